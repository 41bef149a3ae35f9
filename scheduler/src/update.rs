// update.rs — Incremental schedule update after module edits
//
// Reconciles a persisted id schedule with the current module: newly added
// instructions are placed as soon as their last operand lands, deleted
// instructions vanish, and surviving instructions keep their relative
// order. The patched schedule is verified before returning.
//
// Preconditions: `id_schedule` was produced by `compute_id_schedule` on an
//                earlier version of the module.
// Postconditions: `schedule` covers exactly the module's current
//                 non-fusion computations and passes verification.
// Failure modes: a patched sequence violating an edge surfaces as the
//                verifier's `InvariantViolation`.
// Side effects: `schedule` is rewritten in place.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ScheduleError;
use crate::ir::{InstrId, Module};
use crate::schedule::{IdSchedule, ModuleSchedule};
use crate::verify::verify_schedule;

/// Patch `schedule` to match the current module, preserving the prior
/// order where it survives.
pub fn update_schedule(
    module: &Module,
    id_schedule: &IdSchedule,
    schedule: &mut ModuleSchedule,
) -> Result<(), ScheduleError> {
    let nonfusion = module.non_fusion_computations();

    // Ids present in the prior schedule; everything in the module but not
    // in here was added after the schedule was taken.
    let mut ids_in_schedule: FxHashSet<u32> = FxHashSet::default();
    for &comp in &nonfusion {
        if let Some(ids) = id_schedule.instruction_ids(comp) {
            ids_in_schedule.extend(ids.iter().copied());
        }
    }

    // For each instruction, the newly added instructions that read it, and
    // for each newly added instruction the count of operands not yet
    // placed. Operand multiplicity is kept on both sides so the counts
    // drain exactly.
    let mut new_instruction_uses: FxHashMap<InstrId, Vec<InstrId>> = FxHashMap::default();
    let mut unscheduled_operand_count: FxHashMap<InstrId, usize> = FxHashMap::default();
    let mut new_zero_operand: FxHashMap<u32, Vec<InstrId>> = FxHashMap::default();
    for &comp in &nonfusion {
        for &id in module.computation(comp).instruction_ids() {
            if ids_in_schedule.contains(&id.0) {
                continue;
            }
            let instr = module.instruction(id);
            for &op in instr.operands() {
                new_instruction_uses.entry(op).or_default().push(id);
            }
            if instr.operands().is_empty() {
                new_zero_operand.entry(comp.0).or_default().push(id);
            }
            unscheduled_operand_count.insert(id, instr.operand_count());
        }
    }

    for &comp in &nonfusion {
        let mut sequence = Vec::with_capacity(module.computation(comp).instruction_count());
        let mut worklist: VecDeque<InstrId> = new_zero_operand
            .get(&comp.0)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();

        let mut drain = |worklist: &mut VecDeque<InstrId>, sequence: &mut Vec<InstrId>| {
            while let Some(id) = worklist.pop_front() {
                sequence.push(id);
                let Some(new_users) = new_instruction_uses.get(&id) else {
                    continue;
                };
                for &user in new_users {
                    let count = unscheduled_operand_count.get_mut(&user).unwrap();
                    assert!(*count > 0, "operand count underflow during update");
                    *count -= 1;
                    if *count == 0 {
                        worklist.push_back(user);
                    }
                }
            }
        };

        drain(&mut worklist, &mut sequence);
        for &raw in id_schedule.instruction_ids(comp).unwrap_or_default() {
            // Skip instructions no longer in the module.
            let id = InstrId(raw);
            if module.find_instruction(id).is_none() {
                continue;
            }
            worklist.push_back(id);
            drain(&mut worklist, &mut sequence);
        }
        schedule.set_sequence(comp, sequence);
    }

    // Computations deleted from the module leave no stale entries behind.
    let current: FxHashSet<u32> = nonfusion.iter().map(|c| c.0).collect();
    schedule.retain(|comp| current.contains(&comp.0));

    verify_schedule(module, schedule)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CompId, Opcode};
    use crate::schedule::compute_id_schedule;

    fn linear() -> (Module, CompId, [InstrId; 3]) {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_constant(c, "a", 4);
        let b = m.add_instruction(c, Opcode::Negate, "b", &[a], 4);
        let d = m.add_instruction(c, Opcode::Negate, "d", &[b], 4);
        (m, c, [a, b, d])
    }

    #[test]
    fn unmodified_module_round_trips() {
        let (m, c, [a, b, d]) = linear();
        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, d]);
        let ids = compute_id_schedule(&schedule);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c).unwrap(), &[a, b, d]);
    }

    #[test]
    fn added_instruction_lands_after_its_operands() {
        let (mut m, c, [a, b, d]) = linear();
        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, d]);
        let ids = compute_id_schedule(&schedule);

        // New x reads a and is consumed by d.
        let x = m.add_instruction(c, Opcode::Negate, "x", &[a], 4);
        m.add_operand(d, x);
        m.set_root(c, d);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c).unwrap(), &[a, x, b, d]);
    }

    #[test]
    fn added_zero_operand_instruction_leads() {
        let (mut m, c, [a, b, d]) = linear();
        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, d]);
        let ids = compute_id_schedule(&schedule);

        let k = m.add_constant(c, "k", 4);
        m.add_operand(d, k);
        m.set_root(c, d);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c).unwrap(), &[k, a, b, d]);
    }

    #[test]
    fn chained_new_instructions_drain_in_operand_order() {
        let (mut m, c, [a, b, d]) = linear();
        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, d]);
        let ids = compute_id_schedule(&schedule);

        // x reads a, y reads x; both new. y must come out after x.
        let x = m.add_instruction(c, Opcode::Negate, "x", &[a], 4);
        let y = m.add_instruction(c, Opcode::Negate, "y", &[x], 4);
        m.add_operand(d, y);
        m.set_root(c, d);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c).unwrap(), &[a, x, y, b, d]);
    }

    #[test]
    fn deleted_instruction_vanishes() {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_constant(c, "a", 4);
        let b = m.add_instruction(c, Opcode::Negate, "b", &[a], 4);
        let dead = m.add_instruction(c, Opcode::Negate, "dead", &[a], 4);
        let d = m.add_instruction(c, Opcode::Negate, "d", &[b], 4);
        m.set_root(c, d);

        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, dead, d]);
        let ids = compute_id_schedule(&schedule);

        m.remove_instruction(dead);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c).unwrap(), &[a, b, d]);
    }

    #[test]
    fn computation_missing_from_prior_schedule_is_fully_placed() {
        let (m_old, c, [a, b, d]) = linear();
        let mut schedule = ModuleSchedule::new();
        schedule.set_sequence(c, vec![a, b, d]);
        let ids = compute_id_schedule(&schedule);

        // A whole new computation appears after the id schedule was taken.
        let mut m = m_old;
        let c2 = m.add_computation("late");
        let p = m.add_constant(c2, "p", 4);
        let q = m.add_instruction(c2, Opcode::Negate, "q", &[p], 4);
        update_schedule(&m, &ids, &mut schedule).unwrap();
        assert_eq!(schedule.sequence(c2).unwrap(), &[p, q]);
        assert_eq!(schedule.sequence(c).unwrap(), &[a, b, d]);
    }
}
