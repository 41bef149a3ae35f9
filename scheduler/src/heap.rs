// heap.rs — Minimum-memory estimate for a scheduled sequence
//
// Simulates sequential execution of a sequence: a buffer becomes live when
// its defining instruction is placed and dies when its last reader is
// placed; buffers reachable from the root outlive the computation. While
// an instruction with called sub-computations runs, the largest recorded
// callee peak is transiently live on top of the caller's buffers.
// Ignored buffers (parameters, constants) are skipped, matching the
// schedulers' own accounting.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffers::{ignore_buffer, BufferAnalysis, BufferId, SizeFn};
use crate::error::ScheduleError;
use crate::ir::{CompId, InstrId, Module};

/// Peak live-buffer bytes needed to execute `sequence`.
///
/// `memory_by_computation` carries previously simulated peaks of
/// sub-computations; computations absent from the map contribute nothing.
pub fn minimum_memory_for_computation(
    module: &Module,
    comp: CompId,
    sequence: &[InstrId],
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
    memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<u64, ScheduleError> {
    let computation = module.computation(comp);
    assert_eq!(
        sequence.len(),
        computation.instruction_count(),
        "sequence length does not match computation '{}'",
        computation.name()
    );

    let mut position: FxHashMap<InstrId, usize> = FxHashMap::default();
    for (pos, &id) in sequence.iter().enumerate() {
        assert!(
            position.insert(id, pos).is_none(),
            "instruction '{}' appears twice in sequence",
            module.instruction(id).name()
        );
    }

    // Buffer lifetimes: allocated at the defining instruction, freed after
    // the last reader, held to the end when reachable from the root.
    let mut alloc_at: FxHashMap<BufferId, usize> = FxHashMap::default();
    let mut last_use: FxHashMap<BufferId, usize> = FxHashMap::default();
    for (&id, &pos) in &position {
        for &b in analysis.buffers_defined_by(id) {
            if !ignore_buffer(module, analysis, b) {
                alloc_at.insert(b, pos);
            }
        }
        for &op in module.instruction(id).operands() {
            for b in analysis.points_to(op).flattened() {
                if ignore_buffer(module, analysis, b) {
                    continue;
                }
                let entry = last_use.entry(b).or_insert(pos);
                *entry = (*entry).max(pos);
            }
        }
    }
    let root = computation.root().expect("computation has a root");
    let live_out: FxHashSet<BufferId> = analysis
        .points_to(root)
        .flattened()
        .into_iter()
        .filter(|&b| !ignore_buffer(module, analysis, b))
        .collect();

    // Per-position byte deltas. A buffer with no readers that does not
    // live out dies in the same step it is defined, after the peak of
    // that step is measured.
    let n = sequence.len();
    let mut allocs = vec![0u64; n];
    let mut frees_before = vec![0u64; n];
    let mut frees_within = vec![0u64; n];
    for (&b, &def_pos) in &alloc_at {
        let bytes = size_fn(analysis.buffer(b));
        allocs[def_pos] += bytes;
        if live_out.contains(&b) {
            continue;
        }
        match last_use.get(&b) {
            Some(&use_pos) => {
                assert!(use_pos >= def_pos, "buffer {} read before defined", b.0);
                frees_before[use_pos] += bytes;
            }
            None => frees_within[def_pos] += bytes,
        }
    }

    let mut live: u64 = 0;
    let mut peak: u64 = 0;
    for (pos, &id) in sequence.iter().enumerate() {
        live -= frees_before[pos];
        live += allocs[pos];
        let mut sub_peak = 0;
        for &callee in module.instruction(id).called_computations() {
            if let Some(&m) = memory_by_computation.get(&callee) {
                sub_peak = sub_peak.max(m);
            }
        }
        peak = peak.max(live + sub_peak);
        live -= frees_within[pos];
    }
    Ok(peak)
}

// ── Tests ───────────────────────────────────────────────────────────────────
