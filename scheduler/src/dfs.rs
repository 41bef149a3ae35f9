// dfs.rs — DFS post-order scheduler and the plain post-order scheduler
//
// The DFS scheduler emits the computation's post-order, choosing which
// dependency of a node to visit first by cumulative fan-out, then by
// cumulative defined size, then by name. Visiting high-fan-out operands
// first tends to realize widely shared buffers early so they can die
// sooner; size is a secondary pressure signal. The comparator is
// empirical and kept exactly as-is: for some recurrent structures it
// beats the list heuristic. It is unclear why transitive sizes matter at
// all — when placing a node its own input and output buffers should be
// what counts, not its history — so do not re-derive the ordering.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffers::{BufferAnalysis, SizeFn};
use crate::error::ScheduleError;
use crate::ir::{CompId, InstrId, Module};

/// Schedule one computation in heuristic-ordered DFS post-order.
pub fn dfs_memory_scheduler(
    module: &Module,
    comp: CompId,
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
    _memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<Vec<InstrId>, ScheduleError> {
    let computation = module.computation(comp);
    let (extra_users, total_sizes) = dfs_metrics(module, comp, analysis, size_fn);

    let sequence = computation.post_order_with_order(module, |a, b| {
        extra_users[&b]
            .cmp(&extra_users[&a])
            .then(total_sizes[&b].cmp(&total_sizes[&a]))
            .then_with(|| module.instruction(a).name().cmp(module.instruction(b).name()))
    });
    assert_eq!(
        sequence.len(),
        computation.instruction_count(),
        "dfs scheduler dropped instructions in computation '{}'",
        computation.name()
    );
    Ok(sequence)
}

/// Schedule one computation as its raw instruction post-order.
pub fn post_order_memory_scheduler(
    module: &Module,
    comp: CompId,
    _analysis: &BufferAnalysis,
    _size_fn: &SizeFn,
    _memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<Vec<InstrId>, ScheduleError> {
    Ok(module.computation(comp).post_order(module))
}

/// Cumulative attributes over each instruction's transitive operand
/// closure, visited in post-order:
///
///   extra_users(x) = max(0, |users(x)| - 1) + Σ extra_users(operands)
///   total_sizes(x) = Σ size(buffers defined by x) + Σ total_sizes(operands)
///
/// Summing over operand closures of a DAG double-counts shared ancestors,
/// so both sums are capped: `total_sizes` by the running total of sizes
/// seen so far, `extra_users` by the module's instruction-id count. On
/// large branchy programs the path count is exponential in the node
/// count; without the caps the sums overflow.
fn dfs_metrics(
    module: &Module,
    comp: CompId,
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
) -> (FxHashMap<InstrId, i64>, FxHashMap<InstrId, u64>) {
    let computation = module.computation(comp);
    let total_instruction_ids = module.num_unique_instruction_ids() as i64;
    let mut cumulative_total_size: u64 = 0;
    let mut extra_users: FxHashMap<InstrId, i64> = FxHashMap::default();
    let mut total_sizes: FxHashMap<InstrId, u64> = FxHashMap::default();

    for id in computation.post_order(module) {
        let instr = module.instruction(id);
        if instr.opcode().is_ignored() {
            extra_users.insert(id, 0);
            total_sizes.insert(id, 0);
            continue;
        }
        let mut users = instr.user_count().saturating_sub(1) as i64;
        let mut size: u64 = analysis
            .buffers_defined_by(id)
            .iter()
            .map(|&b| size_fn(analysis.buffer(b)))
            .sum();
        cumulative_total_size = cumulative_total_size.saturating_add(size);
        let unique_operands: FxHashSet<InstrId> = instr.operands().iter().copied().collect();
        for op in unique_operands {
            users = users.saturating_add(extra_users[&op]);
            size = size.saturating_add(total_sizes[&op]);
        }
        extra_users.insert(id, users.min(total_instruction_ids));
        total_sizes.insert(id, size.min(cumulative_total_size));
    }

    assert_eq!(extra_users.len(), computation.instruction_count());
    assert_eq!(total_sizes.len(), computation.instruction_count());
    (extra_users, total_sizes)
}

// ── Tests ───────────────────────────────────────────────────────────────────
