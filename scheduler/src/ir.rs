// ir.rs — Arena-based dataflow IR: modules, computations, instructions
//
// A module owns every instruction in a single slab; computations hold
// insertion-ordered lists of `InstrId`s into that slab. Operand and user
// lists are a pair of one-way indices over the stable ids, so the
// bidirectional adjacency carries no owned cycle. Removal tombstones the
// slot; ids are never reused, which keeps persisted id schedules valid
// across module edits.
//
// Preconditions: operands of a new instruction must already exist in the
//                same computation; control edges go from an earlier-created
//                instruction to a later-created one.
// Postconditions: operand/user and control pred/succ lists stay inverses.
// Failure modes: none (builder misuse is a fatal assert).
// Side effects: none.

use std::cmp::Ordering;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Stable unique identifier of an instruction. Allocated monotonically per
/// module, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

/// Identifier of a computation within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompId(pub u32);

// ── Opcode ──────────────────────────────────────────────────────────────────

/// Instruction opcode. `Parameter` and `Constant` are the ignored markers:
/// their buffers count for nothing in byte accounting but the instructions
/// still appear in every emitted sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Parameter,
    Constant,
    Negate,
    Add,
    Multiply,
    Concatenate,
    Tuple,
    Call,
}

impl Opcode {
    /// Whether byte accounting skips buffers defined by this opcode.
    pub fn is_ignored(self) -> bool {
        matches!(self, Opcode::Parameter | Opcode::Constant)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Parameter => "parameter",
            Opcode::Constant => "constant",
            Opcode::Negate => "negate",
            Opcode::Add => "add",
            Opcode::Multiply => "multiply",
            Opcode::Concatenate => "concatenate",
            Opcode::Tuple => "tuple",
            Opcode::Call => "call",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// ── Instruction ─────────────────────────────────────────────────────────────

/// One node of a computation DAG.
#[derive(Debug, Clone)]
pub struct Instruction {
    id: InstrId,
    computation: CompId,
    opcode: Opcode,
    name: String,
    operands: Vec<InstrId>,
    users: Vec<InstrId>,
    control_predecessors: Vec<InstrId>,
    control_successors: Vec<InstrId>,
    called_computations: Vec<CompId>,
    output_bytes: u64,
}

impl Instruction {
    pub fn id(&self) -> InstrId {
        self.id
    }

    pub fn computation(&self) -> CompId {
        self.computation
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered operand list. May contain the same instruction twice.
    pub fn operands(&self) -> &[InstrId] {
        &self.operands
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Instructions that have this one as an operand. Deduplicated, in the
    /// order the uses were created.
    pub fn users(&self) -> &[InstrId] {
        &self.users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn control_predecessors(&self) -> &[InstrId] {
        &self.control_predecessors
    }

    pub fn control_successors(&self) -> &[InstrId] {
        &self.control_successors
    }

    pub fn called_computations(&self) -> &[CompId] {
        &self.called_computations
    }

    /// Byte width of the value this instruction defines. Consulted by the
    /// default buffer-size oracle.
    pub fn output_bytes(&self) -> u64 {
        self.output_bytes
    }
}

// ── Computation ─────────────────────────────────────────────────────────────

/// A DAG of instructions with a distinguished root.
#[derive(Debug, Clone)]
pub struct Computation {
    id: CompId,
    name: String,
    instructions: Vec<InstrId>,
    root: Option<InstrId>,
    fusion: bool,
}

impl Computation {
    pub fn id(&self) -> CompId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instruction ids in insertion order.
    pub fn instruction_ids(&self) -> &[InstrId] {
        &self.instructions
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// The root instruction. Defaults to the most recently added
    /// instruction; `Module::set_root` overrides.
    pub fn root(&self) -> Option<InstrId> {
        self.root
    }

    pub fn is_fusion(&self) -> bool {
        self.fusion
    }

    /// Post-order over all instructions of the computation: every operand
    /// and control predecessor is emitted before its dependents. Covers
    /// instructions unreachable from the root as well.
    pub fn post_order(&self, module: &Module) -> Vec<InstrId> {
        self.post_order_impl(module, &mut None)
    }

    /// Post-order where the traversal starts at the root and each
    /// instruction's dependency list is first sorted with `order`
    /// (`Ordering::Less` means "visit first"). This is the hook the DFS
    /// scheduler hangs its operand heuristic on. Instructions unreachable
    /// from the root are swept up afterwards in insertion order.
    pub fn post_order_with_order(
        &self,
        module: &Module,
        mut order: impl FnMut(InstrId, InstrId) -> Ordering,
    ) -> Vec<InstrId> {
        let mut order: Option<&mut dyn FnMut(InstrId, InstrId) -> Ordering> = Some(&mut order);
        self.post_order_impl(module, &mut order)
    }

    fn post_order_impl(
        &self,
        module: &Module,
        order: &mut Option<&mut dyn FnMut(InstrId, InstrId) -> Ordering>,
    ) -> Vec<InstrId> {
        #[derive(PartialEq)]
        enum Visit {
            Visiting,
            Visited,
        }

        // The heuristic traversal begins at the root so the comparator
        // governs the whole reachable region; the raw post-order sticks to
        // insertion order throughout.
        let mut starts: Vec<InstrId> = Vec::with_capacity(self.instructions.len() + 1);
        if order.is_some() {
            starts.extend(self.root);
        }
        starts.extend_from_slice(&self.instructions);

        let mut state: FxHashMap<InstrId, Visit> = FxHashMap::default();
        let mut out = Vec::with_capacity(self.instructions.len());
        // Iterative DFS; recursion would overflow on long chains.
        let mut stack: Vec<(InstrId, Vec<InstrId>, usize)> = Vec::new();

        for &start in &starts {
            if state.contains_key(&start) {
                continue;
            }
            state.insert(start, Visit::Visiting);
            stack.push((start, ordered_dependencies(module, start, order), 0));
            while let Some(frame) = stack.last_mut() {
                if frame.2 < frame.1.len() {
                    let dep = frame.1[frame.2];
                    frame.2 += 1;
                    match state.get(&dep) {
                        Some(Visit::Visited) => {}
                        Some(Visit::Visiting) => panic!(
                            "cycle in computation '{}' involving instruction '{}'",
                            self.name,
                            module.instruction(dep).name()
                        ),
                        None => {
                            state.insert(dep, Visit::Visiting);
                            let deps = ordered_dependencies(module, dep, order);
                            stack.push((dep, deps, 0));
                        }
                    }
                } else {
                    let (id, _, _) = stack.pop().unwrap();
                    state.insert(id, Visit::Visited);
                    out.push(id);
                }
            }
        }

        debug_assert_eq!(out.len(), self.instructions.len());
        out
    }
}

/// Unique operands followed by unique control predecessors, optionally
/// sorted by the caller's comparator.
fn ordered_dependencies(
    module: &Module,
    id: InstrId,
    order: &mut Option<&mut dyn FnMut(InstrId, InstrId) -> Ordering>,
) -> Vec<InstrId> {
    let instr = module.instruction(id);
    let mut seen = FxHashSet::default();
    let mut deps = Vec::with_capacity(instr.operands().len() + instr.control_predecessors().len());
    for &op in instr.operands() {
        if seen.insert(op) {
            deps.push(op);
        }
    }
    for &pred in instr.control_predecessors() {
        if seen.insert(pred) {
            deps.push(pred);
        }
    }
    if let Some(cmp) = order.as_mut() {
        deps.sort_by(|&a, &b| cmp(a, b));
    }
    deps
}

// ── Module ──────────────────────────────────────────────────────────────────

/// An ordered collection of computations sharing one instruction arena.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    instructions: Vec<Option<Instruction>>,
    computations: Vec<Computation>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            instructions: Vec::new(),
            computations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total ids ever allocated, including tombstoned ones. The DFS
    /// scheduler uses this as its fan-out saturation cap.
    pub fn num_unique_instruction_ids(&self) -> usize {
        self.instructions.len()
    }

    /// Look up an instruction that must exist. Panics on a removed or
    /// unknown id; use `find_instruction` when absence is expected.
    pub fn instruction(&self, id: InstrId) -> &Instruction {
        self.find_instruction(id)
            .unwrap_or_else(|| panic!("instruction id {} not in module", id.0))
    }

    pub fn find_instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn computation(&self, id: CompId) -> &Computation {
        &self.computations[id.0 as usize]
    }

    pub fn computations(&self) -> impl Iterator<Item = &Computation> {
        self.computations.iter()
    }

    pub fn non_fusion_computations(&self) -> Vec<CompId> {
        self.computations
            .iter()
            .filter(|c| !c.fusion)
            .map(|c| c.id)
            .collect()
    }

    /// Computations in post-order over call edges: callees before callers.
    pub fn computation_post_order(&self) -> Vec<CompId> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::with_capacity(self.computations.len());
        for comp in &self.computations {
            self.visit_computation(comp.id, &mut visited, &mut order);
        }
        order
    }

    fn visit_computation(&self, id: CompId, visited: &mut FxHashSet<CompId>, order: &mut Vec<CompId>) {
        if !visited.insert(id) {
            return;
        }
        for &instr_id in self.computation(id).instruction_ids() {
            for &callee in self.instruction(instr_id).called_computations() {
                self.visit_computation(callee, visited, order);
            }
        }
        order.push(id);
    }

    /// `name = opcode(operand, ...)`, for logs and error messages.
    pub fn instruction_short_string(&self, id: InstrId) -> String {
        let instr = self.instruction(id);
        let operands: Vec<&str> = instr
            .operands()
            .iter()
            .map(|&op| self.instruction(op).name())
            .collect();
        format!("{} = {}({})", instr.name(), instr.opcode(), operands.join(", "))
    }

    // ── Construction ────────────────────────────────────────────────────

    pub fn add_computation(&mut self, name: impl Into<String>) -> CompId {
        self.add_computation_impl(name.into(), false)
    }

    /// Fusion computations are carried in the module but skipped by every
    /// scheduling driver.
    pub fn add_fusion_computation(&mut self, name: impl Into<String>) -> CompId {
        self.add_computation_impl(name.into(), true)
    }

    fn add_computation_impl(&mut self, name: String, fusion: bool) -> CompId {
        let id = CompId(self.computations.len() as u32);
        self.computations.push(Computation {
            id,
            name,
            instructions: Vec::new(),
            root: None,
            fusion,
        });
        id
    }

    pub fn add_parameter(&mut self, comp: CompId, name: impl Into<String>, bytes: u64) -> InstrId {
        self.add_instruction(comp, Opcode::Parameter, name, &[], bytes)
    }

    pub fn add_constant(&mut self, comp: CompId, name: impl Into<String>, bytes: u64) -> InstrId {
        self.add_instruction(comp, Opcode::Constant, name, &[], bytes)
    }

    pub fn add_instruction(
        &mut self,
        comp: CompId,
        opcode: Opcode,
        name: impl Into<String>,
        operands: &[InstrId],
        bytes: u64,
    ) -> InstrId {
        self.add_instruction_impl(comp, opcode, name.into(), operands, Vec::new(), bytes)
    }

    /// A `Call` instruction invoking `callee` as a sub-computation.
    pub fn add_call(
        &mut self,
        comp: CompId,
        name: impl Into<String>,
        operands: &[InstrId],
        callee: CompId,
        bytes: u64,
    ) -> InstrId {
        self.add_instruction_impl(comp, Opcode::Call, name.into(), operands, vec![callee], bytes)
    }

    fn add_instruction_impl(
        &mut self,
        comp: CompId,
        opcode: Opcode,
        name: String,
        operands: &[InstrId],
        called_computations: Vec<CompId>,
        bytes: u64,
    ) -> InstrId {
        let id = InstrId(self.instructions.len() as u32);
        for &op in operands {
            let operand = self.instruction(op);
            assert_eq!(
                operand.computation, comp,
                "operand '{}' belongs to another computation",
                operand.name
            );
        }
        self.instructions.push(Some(Instruction {
            id,
            computation: comp,
            opcode,
            name,
            operands: operands.to_vec(),
            users: Vec::new(),
            control_predecessors: Vec::new(),
            control_successors: Vec::new(),
            called_computations,
            output_bytes: bytes,
        }));
        for &op in operands {
            let users = &mut self.instructions[op.0 as usize].as_mut().unwrap().users;
            if !users.contains(&id) {
                users.push(id);
            }
        }
        let computation = &mut self.computations[comp.0 as usize];
        computation.instructions.push(id);
        computation.root = Some(id);
        id
    }

    /// Append `operand` to `of`'s operand list, wiring the user edge.
    pub fn add_operand(&mut self, of: InstrId, operand: InstrId) {
        assert_ne!(of, operand, "instruction cannot use itself");
        assert_eq!(
            self.instruction(of).computation,
            self.instruction(operand).computation,
            "operand belongs to another computation"
        );
        self.instructions[of.0 as usize]
            .as_mut()
            .unwrap()
            .operands
            .push(operand);
        let users = &mut self.instructions[operand.0 as usize].as_mut().unwrap().users;
        if !users.contains(&of) {
            users.push(of);
        }
    }

    /// Order `pred` before `succ` without a data dependency. Control edges
    /// must follow creation order, which keeps the graph a DAG.
    pub fn add_control_edge(&mut self, pred: InstrId, succ: InstrId) {
        assert!(
            pred < succ,
            "control edge must run from an earlier-created instruction to a later one"
        );
        assert_eq!(
            self.instruction(pred).computation,
            self.instruction(succ).computation,
            "control edge spans computations"
        );
        let p = self.instructions[pred.0 as usize].as_mut().unwrap();
        if !p.control_successors.contains(&succ) {
            p.control_successors.push(succ);
        }
        let s = self.instructions[succ.0 as usize].as_mut().unwrap();
        if !s.control_predecessors.contains(&pred) {
            s.control_predecessors.push(pred);
        }
    }

    pub fn set_root(&mut self, comp: CompId, root: InstrId) {
        assert_eq!(
            self.instruction(root).computation,
            comp,
            "root belongs to another computation"
        );
        self.computations[comp.0 as usize].root = Some(root);
    }

    /// Remove an instruction from the module, leaving a tombstone so the
    /// id is never reused. The instruction must be dead: no users, no
    /// control successors, not the root.
    pub fn remove_instruction(&mut self, id: InstrId) {
        let instr = self.instruction(id);
        assert!(
            instr.users.is_empty(),
            "cannot remove '{}': it still has users",
            instr.name
        );
        assert!(
            instr.control_successors.is_empty(),
            "cannot remove '{}': it still has control successors",
            instr.name
        );
        let comp = instr.computation;
        assert_ne!(
            self.computation(comp).root,
            Some(id),
            "cannot remove the root instruction"
        );
        let removed = self.instructions[id.0 as usize].take().unwrap();
        for op in removed.operands {
            if let Some(operand) = self.instructions[op.0 as usize].as_mut() {
                operand.users.retain(|&u| u != id);
            }
        }
        for pred in removed.control_predecessors {
            if let Some(p) = self.instructions[pred.0 as usize].as_mut() {
                p.control_successors.retain(|&s| s != id);
            }
        }
        self.computations[comp.0 as usize]
            .instructions
            .retain(|&i| i != id);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (Module, CompId, [InstrId; 4]) {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_parameter(c, "a", 4);
        let b = m.add_instruction(c, Opcode::Negate, "b", &[a], 4);
        let d = m.add_instruction(c, Opcode::Negate, "d", &[a], 4);
        let e = m.add_instruction(c, Opcode::Add, "e", &[b, d], 4);
        (m, c, [a, b, d, e])
    }

    #[test]
    fn users_are_inverse_of_operands() {
        let (m, _, [a, b, d, e]) = diamond();
        assert_eq!(m.instruction(a).users(), &[b, d]);
        assert_eq!(m.instruction(b).users(), &[e]);
        assert_eq!(m.instruction(e).operands(), &[b, d]);
        assert_eq!(m.instruction(e).user_count(), 0);
    }

    #[test]
    fn duplicate_operand_registers_one_user() {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_parameter(c, "a", 4);
        let sq = m.add_instruction(c, Opcode::Multiply, "sq", &[a, a], 4);
        assert_eq!(m.instruction(a).users(), &[sq]);
        assert_eq!(m.instruction(sq).operand_count(), 2);
    }

    #[test]
    fn post_order_emits_operands_first() {
        let (m, c, [a, b, d, e]) = diamond();
        let order = m.computation(c).post_order(&m);
        assert_eq!(order.len(), 4);
        let pos = |id: InstrId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(d));
        assert!(pos(b) < pos(e));
        assert!(pos(d) < pos(e));
    }

    #[test]
    fn post_order_respects_control_predecessors() {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_constant(c, "a", 4);
        let b = m.add_constant(c, "b", 4);
        let r = m.add_instruction(c, Opcode::Negate, "r", &[b], 4);
        m.add_control_edge(a, r);
        m.set_root(c, r);
        let order = m.computation(c).post_order(&m);
        let pos = |id: InstrId| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(a) < pos(r));
    }

    #[test]
    fn post_order_with_order_steers_visit() {
        let (m, c, [a, b, d, e]) = diamond();
        // Visit d's subtree before b's.
        let order = m.computation(c).post_order_with_order(&m, |x, y| {
            if x == d && y == b {
                Ordering::Less
            } else if x == b && y == d {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        assert_eq!(order, vec![a, d, b, e]);
    }

    #[test]
    fn post_order_covers_instructions_unreachable_from_root() {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_parameter(c, "a", 4);
        let dead = m.add_instruction(c, Opcode::Negate, "dead", &[a], 4);
        let r = m.add_instruction(c, Opcode::Negate, "r", &[a], 4);
        m.set_root(c, r);
        let order = m.computation(c).post_order(&m);
        assert_eq!(order.len(), 3);
        assert!(order.contains(&dead));
    }

    #[test]
    fn computation_post_order_puts_callees_first() {
        let mut m = Module::new("test");
        let inner = m.add_computation("inner");
        let p = m.add_parameter(inner, "p", 4);
        m.add_instruction(inner, Opcode::Negate, "n", &[p], 4);
        let outer = m.add_computation("outer");
        let x = m.add_parameter(outer, "x", 4);
        m.add_call(outer, "call", &[x], inner, 4);
        let order = m.computation_post_order();
        let pos = |id: CompId| order.iter().position(|&c| c == id).unwrap();
        assert!(pos(inner) < pos(outer));
    }

    #[test]
    fn remove_instruction_tombstones_and_detaches() {
        let mut m = Module::new("test");
        let c = m.add_computation("main");
        let a = m.add_parameter(c, "a", 4);
        let dead = m.add_instruction(c, Opcode::Negate, "dead", &[a], 4);
        let r = m.add_instruction(c, Opcode::Negate, "r", &[a], 4);
        m.set_root(c, r);
        m.remove_instruction(dead);
        assert!(m.find_instruction(dead).is_none());
        assert_eq!(m.instruction(a).users(), &[r]);
        assert_eq!(m.computation(c).instruction_count(), 2);
        // Ids are not reused.
        assert_eq!(m.num_unique_instruction_ids(), 3);
    }

    #[test]
    fn short_string_names_operands() {
        let (m, _, [_, b, d, e]) = diamond();
        assert_eq!(m.instruction_short_string(e), "e = add(b, d)");
        assert_eq!(m.instruction_short_string(b), "b = negate(a)");
        let _ = d;
    }
}
