// schedule.rs — Module driver, selection meta-scheduler, schedule types
//
// The driver walks non-fusion computations in module post-order, schedules
// each with the requested algorithm (the selecting default when none is
// given), and records the simulated peak so parent computations charge
// their callees through the list heuristic's `max_sub` term.
//
// Preconditions: every computation of the module has a root.
// Postconditions: the returned schedule covers exactly the non-fusion
//                 computations and honors operand and control edges.
// Failure modes: buffer analysis errors propagate unchanged.
// Side effects: none.

use std::fmt;

use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::buffers::{BufferAnalysis, SizeFn};
use crate::dfs::{dfs_memory_scheduler, post_order_memory_scheduler};
use crate::error::ScheduleError;
use crate::heap::minimum_memory_for_computation;
use crate::ir::{CompId, InstrId, Module};
use crate::list::list_memory_scheduler;

// ── Algorithm selection ─────────────────────────────────────────────────────

/// The scheduling algorithms a caller can request by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    List,
    Dfs,
    PostOrder,
    /// Run all three and keep whichever sequence simulates to the lowest
    /// peak.
    Default,
}

// ── Schedule types ──────────────────────────────────────────────────────────

/// A total order per scheduled computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSchedule {
    sequences: FxHashMap<CompId, Vec<InstrId>>,
}

impl ModuleSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self, comp: CompId) -> Option<&[InstrId]> {
        self.sequences.get(&comp).map(Vec::as_slice)
    }

    pub fn set_sequence(&mut self, comp: CompId, sequence: Vec<InstrId>) {
        self.sequences.insert(comp, sequence);
    }

    /// Drop entries for computations the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(CompId) -> bool) {
        self.sequences.retain(|&comp, _| keep(comp));
    }

    /// Scheduled computation ids, ascending.
    pub fn computation_ids(&self) -> Vec<CompId> {
        let mut ids: Vec<CompId> = self.sequences.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Display adapter for a human-readable listing. The schedule stores
    /// only ids, so rendering borrows the module for names.
    pub fn rendered<'a>(&'a self, module: &'a Module) -> RenderedSchedule<'a> {
        RenderedSchedule {
            schedule: self,
            module,
        }
    }
}

/// A schedule paired with its module for display.
pub struct RenderedSchedule<'a> {
    schedule: &'a ModuleSchedule,
    module: &'a Module,
}

impl fmt::Display for RenderedSchedule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for comp in self.schedule.computation_ids() {
            writeln!(f, "computation '{}':", self.module.computation(comp).name())?;
            for &id in self.schedule.sequence(comp).unwrap() {
                writeln!(f, "  {}", self.module.instruction_short_string(id))?;
            }
        }
        Ok(())
    }
}

/// A schedule projected onto stable instruction ids, independent of
/// instruction object identity; the form that survives module edits and
/// serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSchedule {
    pub entries: Vec<IdScheduleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdScheduleEntry {
    pub computation: u32,
    pub instruction_ids: Vec<u32>,
}

impl IdSchedule {
    pub fn instruction_ids(&self, comp: CompId) -> Option<&[u32]> {
        self.entries
            .iter()
            .find(|e| e.computation == comp.0)
            .map(|e| e.instruction_ids.as_slice())
    }
}

/// Project a schedule to persistable instruction ids.
pub fn compute_id_schedule(schedule: &ModuleSchedule) -> IdSchedule {
    let mut entries = Vec::with_capacity(schedule.len());
    for comp in schedule.computation_ids() {
        entries.push(IdScheduleEntry {
            computation: comp.0,
            instruction_ids: schedule
                .sequence(comp)
                .unwrap()
                .iter()
                .map(|id| id.0)
                .collect(),
        });
    }
    IdSchedule { entries }
}

// ── Meta-scheduler ──────────────────────────────────────────────────────────

/// Run list, DFS, and post-order, simulate each sequence, and keep the one
/// with the lowest peak. Ties fall to list, then DFS: list wins most
/// workloads, the post-order pair wins some recurrent ones.
pub fn default_memory_scheduler(
    module: &Module,
    comp: CompId,
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
    memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<Vec<InstrId>, ScheduleError> {
    let list_sequence =
        list_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)?;
    let list_memory = minimum_memory_for_computation(
        module,
        comp,
        &list_sequence,
        analysis,
        size_fn,
        memory_by_computation,
    )?;
    debug!("min-memory list sequence: {list_memory} bytes");

    let dfs_sequence =
        dfs_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)?;
    let dfs_memory = minimum_memory_for_computation(
        module,
        comp,
        &dfs_sequence,
        analysis,
        size_fn,
        memory_by_computation,
    )?;
    debug!("min-memory dfs sequence: {dfs_memory} bytes");

    let post_order_sequence =
        post_order_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)?;
    let post_order_memory = minimum_memory_for_computation(
        module,
        comp,
        &post_order_sequence,
        analysis,
        size_fn,
        memory_by_computation,
    )?;
    debug!("min-memory post-order sequence: {post_order_memory} bytes");

    let min_memory = list_memory.min(dfs_memory).min(post_order_memory);
    if min_memory == list_memory {
        debug!("chose min-memory list sequence: {list_memory} bytes");
        Ok(list_sequence)
    } else if min_memory == dfs_memory {
        debug!("chose min-memory dfs sequence: {dfs_memory} bytes");
        Ok(dfs_sequence)
    } else {
        debug!("chose min-memory post-order sequence: {post_order_memory} bytes");
        Ok(post_order_sequence)
    }
}

fn run_algorithm(
    algorithm: Algorithm,
    module: &Module,
    comp: CompId,
    analysis: &BufferAnalysis,
    size_fn: &SizeFn,
    memory_by_computation: &FxHashMap<CompId, u64>,
) -> Result<Vec<InstrId>, ScheduleError> {
    match algorithm {
        Algorithm::List => {
            list_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)
        }
        Algorithm::Dfs => {
            dfs_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)
        }
        Algorithm::PostOrder => {
            post_order_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)
        }
        Algorithm::Default => {
            default_memory_scheduler(module, comp, analysis, size_fn, memory_by_computation)
        }
    }
}

// ── Module driver ───────────────────────────────────────────────────────────

/// Schedule every non-fusion computation of the module, callees before
/// callers so `max_sub` sees recorded peaks.
pub fn schedule_module(
    module: &Module,
    size_fn: &SizeFn,
    algorithm: Option<Algorithm>,
) -> Result<ModuleSchedule, ScheduleError> {
    let analysis = BufferAnalysis::run(module)?;
    let mut memory_by_computation: FxHashMap<CompId, u64> = FxHashMap::default();
    let mut schedule = ModuleSchedule::new();
    for comp in module.computation_post_order() {
        if module.computation(comp).is_fusion() {
            continue;
        }
        let sequence = run_algorithm(
            algorithm.unwrap_or(Algorithm::Default),
            module,
            comp,
            &analysis,
            size_fn,
            &memory_by_computation,
        )?;
        let peak = minimum_memory_for_computation(
            module,
            comp,
            &sequence,
            &analysis,
            size_fn,
            &memory_by_computation,
        )?;
        debug!(
            "computation '{}': peak {peak} bytes",
            module.computation(comp).name()
        );
        memory_by_computation.insert(comp, peak);
        schedule.set_sequence(comp, sequence);
    }
    debug!("module schedule:\n{}", schedule.rendered(module));
    Ok(schedule)
}

/// Schedule a single computation with the selecting default and no
/// recorded callee peaks. Must not be called on a fusion computation.
pub fn schedule_one_computation(
    module: &Module,
    comp: CompId,
    size_fn: &SizeFn,
) -> Result<Vec<InstrId>, ScheduleError> {
    assert!(
        !module.computation(comp).is_fusion(),
        "cannot schedule fusion computation '{}'",
        module.computation(comp).name()
    );
    let analysis = BufferAnalysis::run(module)?;
    let memory_by_computation = FxHashMap::default();
    default_memory_scheduler(module, comp, &analysis, size_fn, &memory_by_computation)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Opcode;

    fn size(b: &crate::buffers::LogicalBuffer) -> u64 {
        b.bytes
    }

    fn chain_module() -> (Module, CompId, [InstrId; 4]) {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_parameter(c, "a", 1);
        let b = m.add_instruction(c, Opcode::Negate, "b", &[a], 1);
        let d = m.add_instruction(c, Opcode::Negate, "d", &[b], 1);
        let e = m.add_instruction(c, Opcode::Negate, "e", &[d], 1);
        (m, c, [a, b, d, e])
    }

    #[test]
    fn default_picks_list_on_ties() {
        let (m, c, [a, b, d, e]) = chain_module();
        let analysis = BufferAnalysis::run(&m).unwrap();
        let empty = FxHashMap::default();
        // On a chain every algorithm returns the same order, so the tie
        // must fall to list's sequence.
        let list = list_memory_scheduler(&m, c, &analysis, &size, &empty).unwrap();
        let chosen = default_memory_scheduler(&m, c, &analysis, &size, &empty).unwrap();
        assert_eq!(chosen, list);
        assert_eq!(chosen, vec![a, b, d, e]);
    }

    #[test]
    fn driver_skips_fusion_computations() {
        let (mut m, c, _) = chain_module();
        let fused = m.add_fusion_computation("fused");
        let fp = m.add_parameter(fused, "fp", 1);
        m.add_instruction(fused, Opcode::Negate, "fneg", &[fp], 1);
        let schedule = schedule_module(&m, &size, None).unwrap();
        assert_eq!(schedule.len(), 1);
        assert!(schedule.sequence(c).is_some());
        assert!(schedule.sequence(fused).is_none());
    }

    #[test]
    fn driver_records_callee_peaks_for_callers() {
        // Two callees of very different peaks; the caller schedules the
        // cheap call first because the expensive one charges its callee.
        let mut m = Module::new("test");
        let heavy = m.add_computation("heavy");
        let hp = m.add_parameter(heavy, "hp", 1);
        m.add_instruction(heavy, Opcode::Negate, "hn", &[hp], 100);
        let light = m.add_computation("light");
        let lp = m.add_parameter(light, "lp", 1);
        m.add_instruction(light, Opcode::Negate, "ln", &[lp], 1);

        let main = m.add_computation("main");
        let p = m.add_parameter(main, "p", 1);
        let ch = m.add_call(main, "call_heavy", &[p], heavy, 1);
        let cl = m.add_call(main, "call_light", &[p], light, 1);
        let t = m.add_instruction(main, Opcode::Tuple, "t", &[ch, cl], 1);
        m.set_root(main, t);

        let schedule = schedule_module(&m, &size, Some(Algorithm::List)).unwrap();
        let seq = schedule.sequence(main).unwrap();
        let pos = |id: InstrId| seq.iter().position(|&i| i == id).unwrap();
        assert!(pos(cl) < pos(ch), "sequence was {seq:?}");
    }

    #[test]
    fn schedule_one_computation_matches_default() {
        let (m, c, _) = chain_module();
        let seq = schedule_one_computation(&m, c, &size).unwrap();
        let analysis = BufferAnalysis::run(&m).unwrap();
        let expected =
            default_memory_scheduler(&m, c, &analysis, &size, &FxHashMap::default()).unwrap();
        assert_eq!(seq, expected);
    }

    #[test]
    #[should_panic(expected = "fusion")]
    fn schedule_one_computation_rejects_fusion() {
        let mut m = Module::new("test");
        let fused = m.add_fusion_computation("fused");
        m.add_parameter(fused, "fp", 1);
        let _ = schedule_one_computation(&m, fused, &size);
    }

    #[test]
    fn rendered_schedule_lists_computations_and_instructions() {
        let (m, _, _) = chain_module();
        let schedule = schedule_module(&m, &size, None).unwrap();
        let output = format!("{}", schedule.rendered(&m));
        assert!(output.contains("computation 'main':"));
        assert!(output.contains("  a = parameter()"));
        assert!(output.contains("  b = negate(a)"));
        assert!(output.contains("  e = negate(d)"));
        // Instructions are listed in schedule order.
        let a_pos = output.find("a = parameter()").unwrap();
        let e_pos = output.find("e = negate(d)").unwrap();
        assert!(a_pos < e_pos);
    }

    #[test]
    fn id_schedule_projects_and_serializes() {
        let (m, c, [a, b, d, e]) = chain_module();
        let schedule = schedule_module(&m, &size, None).unwrap();
        let ids = compute_id_schedule(&schedule);
        assert_eq!(ids.instruction_ids(c).unwrap(), &[a.0, b.0, d.0, e.0]);
        let json = serde_json::to_string(&ids).unwrap();
        let back: IdSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ids);
    }
}
