// buffers.rs — Logical buffers and points-to analysis
//
// A logical buffer is a distinct value at a shape index of a producing
// instruction. Every non-tuple instruction defines exactly one buffer;
// a tuple defines a small table buffer and aliases the buffers its
// operands point to. Aliasing is why buffer liveness differs from
// instruction liveness: a tuple's consumer keeps every element buffer
// alive, not just the table.
//
// Preconditions: every computation in the module has a root.
// Postconditions: each instruction has a defined-buffer list and a
//                 points-to set; buffer ids are dense.
// Failure modes: rootless computation → `ScheduleError::Analysis`.
// Side effects: none.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ScheduleError;
use crate::ir::{InstrId, Module, Opcode};

// ── Buffer model ────────────────────────────────────────────────────────────

/// Identifier of a logical buffer within one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// A distinct value produced at `shape_index` of `instruction`.
#[derive(Debug, Clone)]
pub struct LogicalBuffer {
    pub id: BufferId,
    pub instruction: InstrId,
    pub shape_index: usize,
    /// Byte width recorded from the defining instruction's declared output.
    pub bytes: u64,
}

/// The buffer-size oracle: a pure function from buffer to byte count.
/// The usual oracle is `|b| b.bytes`.
pub type SizeFn = dyn Fn(&LogicalBuffer) -> u64;

/// Points-to set of one instruction, as `(shape_index, buffers)` elements.
#[derive(Debug, Clone, Default)]
pub struct PointsToSet {
    elements: Vec<(usize, Vec<BufferId>)>,
}

impl PointsToSet {
    pub fn elements(&self) -> &[(usize, Vec<BufferId>)] {
        &self.elements
    }

    /// All buffers named by the set, deduplicated, in first-seen order.
    pub fn flattened(&self) -> Vec<BufferId> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for (_, buffers) in &self.elements {
            for &b in buffers {
                if seen.insert(b) {
                    out.push(b);
                }
            }
        }
        out
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Maps every instruction of a module to the buffers it defines and the
/// buffers it points to.
#[derive(Debug)]
pub struct BufferAnalysis {
    buffers: Vec<LogicalBuffer>,
    defined_by: FxHashMap<InstrId, Vec<BufferId>>,
    points_to: FxHashMap<InstrId, PointsToSet>,
}

impl BufferAnalysis {
    /// Run the analysis over every computation of the module.
    pub fn run(module: &Module) -> Result<Self, ScheduleError> {
        let mut analysis = BufferAnalysis {
            buffers: Vec::new(),
            defined_by: FxHashMap::default(),
            points_to: FxHashMap::default(),
        };
        for comp_id in module.computation_post_order() {
            let comp = module.computation(comp_id);
            if comp.root().is_none() {
                return Err(ScheduleError::Analysis(format!(
                    "computation '{}' has no root instruction",
                    comp.name()
                )));
            }
            for id in comp.post_order(module) {
                analysis.assign(module, id);
            }
        }
        Ok(analysis)
    }

    fn assign(&mut self, module: &Module, id: InstrId) {
        let instr = module.instruction(id);
        let own = BufferId(self.buffers.len() as u32);
        self.buffers.push(LogicalBuffer {
            id: own,
            instruction: id,
            shape_index: 0,
            bytes: instr.output_bytes(),
        });
        self.defined_by.insert(id, vec![own]);

        let mut elements = vec![(0, vec![own])];
        if instr.opcode() == Opcode::Tuple {
            // The tuple aliases everything its operands point to; the
            // operand sets already exist because assignment runs in
            // post-order.
            for (slot, &op) in instr.operands().iter().enumerate() {
                elements.push((slot + 1, self.points_to(op).flattened()));
            }
        }
        self.points_to.insert(id, PointsToSet { elements });
    }

    pub fn buffer(&self, id: BufferId) -> &LogicalBuffer {
        &self.buffers[id.0 as usize]
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Buffers defined by the instruction itself (aliased buffers are not
    /// re-defined).
    pub fn buffers_defined_by(&self, id: InstrId) -> &[BufferId] {
        self.defined_by
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn points_to(&self, id: InstrId) -> &PointsToSet {
        self.points_to
            .get(&id)
            .unwrap_or_else(|| panic!("no points-to set for instruction id {}", id.0))
    }
}

/// Whether byte accounting skips this buffer: true when its defining
/// instruction is a parameter or constant.
pub fn ignore_buffer(module: &Module, analysis: &BufferAnalysis, id: BufferId) -> bool {
    let buffer = analysis.buffer(id);
    module.instruction(buffer.instruction).opcode().is_ignored()
}

// ── Tests ───────────────────────────────────────────────────────────────────
