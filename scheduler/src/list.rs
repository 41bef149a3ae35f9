// list.rs — Greedy list scheduler keyed on bytes freed
//
// Keeps a ready set of instructions whose operand and control edges are
// satisfied and repeatedly schedules the one that frees the most bytes,
// preferring higher user counts on ties. Priorities shift as use counts
// drop, so ready entries are re-keyed live; the propagation is bounded to
// users of the scheduled instruction's operands, the only entries whose
// freed component can have changed.
//
// List scheduling is greedy and not globally optimal: deferring a
// producer whose output is bigger than its inputs can pin an earlier
// buffer across an expensive region. The selection meta-scheduler exists
// for exactly that case.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffers::{ignore_buffer, BufferAnalysis, BufferId, SizeFn};
use crate::error::ScheduleError;
use crate::ir::{CompId, Computation, InstrId, Module};
use crate::use_index::UseIndex;

/// Schedule one computation with the greedy list heuristic.
pub fn list_memory_scheduler(
    module: &Module,
    comp: CompId,
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
    memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<Vec<InstrId>, ScheduleError> {
    ListScheduler {
        module,
        computation: module.computation(comp),
        analysis,
        size_fn,
        memory_by_computation,
        use_index: UseIndex::new(module, comp, analysis),
        scheduled: FxHashSet::default(),
    }
    .create_schedule()
}

/// Priority of a ready instruction: (bytes freed if scheduled, user
/// count), compared lexicographically, highest first.
type Priority = (i64, i64);

/// Ready-queue key. `Reverse(seq)` breaks priority ties toward the
/// earliest-inserted entry, and makes keys unique so a `BTreeMap` can
/// serve as the mutable-key priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Priority,
    seq: Reverse<u64>,
}

struct ReadyEntry {
    instruction: InstrId,
    /// Total bytes of the non-ignored buffers the instruction defines.
    bytes_defined: i64,
    /// Non-ignored buffers the instruction reads.
    used_buffers: Vec<BufferId>,
}

struct ListScheduler<'a> {
    module: &'a Module,
    computation: &'a Computation,
    analysis: &'a BufferAnalysis,
    size_fn: &'a SizeFn,
    memory_by_computation: &'a FxHashMap<CompId, u64>,
    use_index: UseIndex,
    scheduled: FxHashSet<InstrId>,
}

impl<'a> ListScheduler<'a> {
    fn make_ready_entry(&self, id: InstrId) -> ReadyEntry {
        let mut bytes_defined = 0i64;
        for &b in self.analysis.buffers_defined_by(id) {
            if !ignore_buffer(self.module, self.analysis, b) {
                bytes_defined += (self.size_fn)(self.analysis.buffer(b)) as i64;
            }
        }
        let used_buffers = self
            .use_index
            .uses(id)
            .iter()
            .copied()
            .filter(|&b| !ignore_buffer(self.module, self.analysis, b))
            .collect();
        ReadyEntry {
            instruction: id,
            bytes_defined,
            used_buffers,
        }
    }

    /// Bytes freed by scheduling the entry: buffers whose last live use
    /// this is, minus the bytes the instruction defines, minus the peak of
    /// its largest called sub-computation. Sub-computations run
    /// sequentially, so only the largest one is pressed at once.
    fn bytes_freed_if_scheduled(&self, entry: &ReadyEntry) -> i64 {
        let mut freed = 0i64;
        for &b in &entry.used_buffers {
            if self.use_index.use_count(b) == 1 {
                freed += (self.size_fn)(self.analysis.buffer(b)) as i64;
            }
        }
        let mut max_subcomputation = 0i64;
        for &callee in self.module.instruction(entry.instruction).called_computations() {
            if let Some(&bytes) = self.memory_by_computation.get(&callee) {
                max_subcomputation = max_subcomputation.max(bytes as i64);
            }
        }
        freed - entry.bytes_defined - max_subcomputation
    }

    fn priority(&self, entry: &ReadyEntry) -> Priority {
        (
            self.bytes_freed_if_scheduled(entry),
            self.module.instruction(entry.instruction).user_count() as i64,
        )
    }

    fn create_schedule(mut self) -> Result<Vec<InstrId>, ScheduleError> {
        let module = self.module;
        let mut schedule = Vec::with_capacity(self.computation.instruction_count());

        // Pending operand-plus-control predecessor counts. Instructions
        // absent from the map have no incoming edges and seed the ready set.
        let mut pending: FxHashMap<InstrId, i64> = FxHashMap::default();
        for &id in self.computation.instruction_ids() {
            let instr = module.instruction(id);
            for &user in instr.users() {
                *pending.entry(user).or_insert(0) += 1;
            }
            for &succ in instr.control_successors() {
                *pending.entry(succ).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeMap<ReadyKey, ReadyEntry> = BTreeMap::new();
        let mut ready_keys: FxHashMap<InstrId, ReadyKey> = FxHashMap::default();
        let mut next_seq = 0u64;

        let mut insert_ready =
            |sched: &Self, ready: &mut BTreeMap<ReadyKey, ReadyEntry>, ready_keys: &mut FxHashMap<InstrId, ReadyKey>, id: InstrId| {
                let entry = sched.make_ready_entry(id);
                let key = ReadyKey {
                    priority: sched.priority(&entry),
                    seq: Reverse(next_seq),
                };
                next_seq += 1;
                ready.insert(key, entry);
                ready_keys.insert(id, key);
            };

        for &id in self.computation.instruction_ids() {
            if !pending.contains_key(&id) {
                insert_ready(&self, &mut ready, &mut ready_keys, id);
            }
        }

        while let Some((&best_key, _)) = ready.last_key_value() {
            let entry = ready.remove(&best_key).unwrap();
            let best = entry.instruction;
            ready_keys.remove(&best);
            debug!(
                "schedule instruction: {} bytes freed: {}",
                module.instruction_short_string(best),
                best_key.priority.0
            );
            schedule.push(best);
            self.scheduled.insert(best);

            // Update the unscheduled uses of the logical buffers.
            let mut adjust_ready = false;
            let used: Vec<BufferId> = self.use_index.uses(best).to_vec();
            for b in used {
                if self.use_index.decrement_use(b) == 1 {
                    adjust_ready = true;
                }
            }

            let mut newly_ready = Vec::new();
            let best_instr = module.instruction(best);
            for &user in best_instr.users() {
                let count = pending.get_mut(&user).unwrap();
                *count -= 1;
                assert!(*count >= 0, "predecessor count underflow");
                if *count == 0 {
                    newly_ready.push(user);
                }
            }
            for &succ in best_instr.control_successors() {
                let count = pending.get_mut(&succ).unwrap();
                *count -= 1;
                assert!(*count >= 0, "predecessor count underflow");
                if *count == 0 {
                    newly_ready.push(succ);
                }
            }
            for id in newly_ready {
                insert_ready(&self, &mut ready, &mut ready_keys, id);
            }

            // A use count dropped to 1, so some ready entries may now free
            // more bytes. Only users of best's operands can be affected:
            // the buffers whose counts changed are the ones best read, and
            // their remaining readers all sit among those users.
            if adjust_ready {
                let mut seen_operands = FxHashSet::default();
                for &op in best_instr.operands() {
                    if !seen_operands.insert(op) {
                        continue;
                    }
                    for &user in module.instruction(op).users() {
                        let Some(&old_key) = ready_keys.get(&user) else {
                            continue;
                        };
                        let new_priority = self.priority(&ready[&old_key]);
                        if new_priority == old_key.priority {
                            continue;
                        }
                        // Re-key in place, keeping the insertion rank so
                        // tie ordering stays deterministic.
                        let entry = ready.remove(&old_key).unwrap();
                        let new_key = ReadyKey {
                            priority: new_priority,
                            seq: old_key.seq,
                        };
                        ready.insert(new_key, entry);
                        ready_keys.insert(user, new_key);
                    }
                }
            }
        }

        assert_eq!(
            schedule.len(),
            self.computation.instruction_count(),
            "list scheduler dropped instructions in computation '{}'",
            self.computation.name()
        );
        assert_eq!(self.scheduled.len(), self.computation.instruction_count());
        Ok(schedule)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
