// use_index.rs — Per-computation buffer use index
//
// Two tables built once per computation: the set of buffers each
// instruction reads, and for every buffer defined in the computation the
// number of not-yet-scheduled uses. Buffers reachable from the root carry
// one extra count for their implicit use at computation exit.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffers::{BufferAnalysis, BufferId};
use crate::ir::{CompId, InstrId, Module};

#[derive(Debug)]
pub struct UseIndex {
    uses: FxHashMap<InstrId, Vec<BufferId>>,
    unscheduled_use_count: FxHashMap<BufferId, i64>,
}

impl UseIndex {
    pub fn new(module: &Module, comp: CompId, analysis: &BufferAnalysis) -> Self {
        let computation = module.computation(comp);

        // An instruction uses a buffer when the buffer is in the points-to
        // set of one of its operands. Deduplicated; kept in id order so the
        // index is deterministic.
        let mut uses: FxHashMap<InstrId, Vec<BufferId>> = FxHashMap::default();
        for &id in computation.instruction_ids() {
            let mut used = FxHashSet::default();
            for &op in module.instruction(id).operands() {
                for b in analysis.points_to(op).flattened() {
                    used.insert(b);
                }
            }
            let mut used: Vec<BufferId> = used.into_iter().collect();
            used.sort_unstable();
            uses.insert(id, used);
        }

        let mut unscheduled_use_count: FxHashMap<BufferId, i64> = FxHashMap::default();
        for &id in computation.instruction_ids() {
            for &b in analysis.buffers_defined_by(id) {
                unscheduled_use_count.insert(b, 0);
            }
        }
        for &id in computation.instruction_ids() {
            for &b in &uses[&id] {
                *unscheduled_use_count
                    .get_mut(&b)
                    .unwrap_or_else(|| panic!("use of buffer {} defined outside computation", b.0)) += 1;
            }
        }

        // Buffers live out of the computation have an implicit use at the
        // end of the computation.
        let root = computation.root().expect("computation has a root");
        for b in analysis.points_to(root).flattened() {
            *unscheduled_use_count.get_mut(&b).unwrap() += 1;
        }

        UseIndex {
            uses,
            unscheduled_use_count,
        }
    }

    /// Buffers the instruction reads, ignored buffers included.
    pub fn uses(&self, id: InstrId) -> &[BufferId] {
        self.uses.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn use_count(&self, buffer: BufferId) -> i64 {
        self.unscheduled_use_count[&buffer]
    }

    /// Decrement the unscheduled-use count and return the new value.
    pub fn decrement_use(&mut self, buffer: BufferId) -> i64 {
        let count = self.unscheduled_use_count.get_mut(&buffer).unwrap();
        assert!(*count > 0, "use count underflow for buffer {}", buffer.0);
        *count -= 1;
        *count
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
