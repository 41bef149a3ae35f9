// verify.rs — Schedule verification
//
// Checks that a schedule covers exactly the module's non-fusion
// computations, that each sequence is a permutation of its computation's
// instructions, and that every operand and control edge runs forward.
// Errors name the offending instruction.

use rustc_hash::FxHashMap;

use crate::error::ScheduleError;
use crate::ir::{InstrId, Module};
use crate::schedule::ModuleSchedule;

pub fn verify_schedule(module: &Module, schedule: &ModuleSchedule) -> Result<(), ScheduleError> {
    let nonfusion = module.non_fusion_computations();
    if nonfusion.len() != schedule.len() {
        return Err(ScheduleError::InvariantViolation(format!(
            "schedule covers {} computations but the module has {} non-fusion computations",
            schedule.len(),
            nonfusion.len()
        )));
    }
    for &comp in &nonfusion {
        if schedule.sequence(comp).is_none() {
            return Err(ScheduleError::InvariantViolation(format!(
                "computation '{}' is missing from the schedule",
                module.computation(comp).name()
            )));
        }
    }

    for &comp in &nonfusion {
        let computation = module.computation(comp);
        let sequence = schedule.sequence(comp).unwrap();

        let mut position: FxHashMap<InstrId, usize> = FxHashMap::default();
        for (pos, &id) in sequence.iter().enumerate() {
            let Some(instr) = module.find_instruction(id) else {
                return Err(ScheduleError::InvariantViolation(format!(
                    "scheduled instruction id {} is not in the module",
                    id.0
                )));
            };
            if instr.computation() != comp {
                return Err(ScheduleError::InvariantViolation(format!(
                    "instruction '{}' does not belong to computation '{}'",
                    instr.name(),
                    computation.name()
                )));
            }
            if position.insert(id, pos).is_some() {
                return Err(ScheduleError::InvariantViolation(format!(
                    "instruction '{}' appears more than once in the schedule",
                    instr.name()
                )));
            }
        }

        if position.len() != computation.instruction_count() {
            for &id in computation.instruction_ids() {
                if !position.contains_key(&id) {
                    return Err(ScheduleError::InvariantViolation(format!(
                        "instruction '{}' is not in the schedule",
                        module.instruction(id).name()
                    )));
                }
            }
        }

        for &id in computation.instruction_ids() {
            let instr = module.instruction(id);
            for &operand in instr.operands() {
                if position[&operand] >= position[&id] {
                    return Err(ScheduleError::InvariantViolation(format!(
                        "instruction '{}' is not scheduled after its operand '{}'",
                        instr.name(),
                        module.instruction(operand).name()
                    )));
                }
            }
            for &pred in instr.control_predecessors() {
                if position[&pred] >= position[&id] {
                    return Err(ScheduleError::InvariantViolation(format!(
                        "instruction '{}' is not scheduled after its control predecessor '{}'",
                        instr.name(),
                        module.instruction(pred).name()
                    )));
                }
            }
        }
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────
