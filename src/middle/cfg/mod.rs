//! Basic blocks and the control-flow graph. The linear instruction stream
//! is sliced at labels; each block owns a copy of its slice so later passes
//! can rewrite block contents without touching the stream they came from.

use hashbrown::{HashMap, HashSet};

use crate::{
    error::{CompileError, CompileResult},
    index::IndexVec,
    intern::Symbol,
    middle::{
        function::Function,
        ir::{Instruction, Label},
        symbol_table::SymbolTable,
        value::{ValueId, ValueKind},
    },
    simple_index,
};

pub mod cleanup;

simple_index! {
    /// Identifies a block within one function's graph
    pub struct BlockId;
}

/// Role of a block in the graph. The entry and exit blocks are synthesized
/// and carry no user instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRole {
    Entry,
    Exit,
    Normal,
}

#[derive(Debug)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: Label,
    pub role: BlockRole,
    pub instructions: Vec<Instruction>,
    /// For a conditional terminator, the true target comes first
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    /// Cleanup marks blocks instead of removing them so ids stay stable
    pub deleted: bool,
    /// Values written in this block
    pub defs: HashSet<ValueId>,
    /// Values read in this block before any local write (upward-exposed)
    pub uses: HashSet<ValueId>,
}

impl BasicBlock {
    fn new(id: BlockId, label: Label, role: BlockRole) -> Self {
        BasicBlock {
            id,
            label,
            role,
            instructions: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            deleted: false,
            defs: HashSet::new(),
            uses: HashSet::new(),
        }
    }

    /// The terminating control transfer, if the block has one.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.is_control_transfer())
    }
}

#[derive(Debug)]
pub struct Cfg {
    pub function: Symbol,
    pub blocks: IndexVec<BlockId, BasicBlock>,
    pub entry: BlockId,
    pub exit: BlockId,
    by_label: HashMap<Label, BlockId>,
}

impl Cfg {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    pub fn block_by_label(&self, label: Label) -> Option<BlockId> {
        self.by_label.get(&label).copied()
    }

    /// Live (non-deleted) block ids in creation order.
    pub fn live_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .indices()
            .filter(|&id| !self.blocks[id].deleted)
    }

    /// Rebuilds every live block's predecessor list from the successor
    /// lists. Called after cleanup rewires edges.
    pub fn recompute_predecessors(&mut self) {
        for id in self.blocks.indices() {
            self.blocks[id].predecessors.clear();
        }
        let edges: Vec<(BlockId, BlockId)> = self
            .live_blocks()
            .flat_map(|id| {
                self.blocks[id]
                    .successors
                    .iter()
                    .map(move |&succ| (id, succ))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (from, to) in edges {
            if !self.blocks[to].predecessors.contains(&from) {
                self.blocks[to].predecessors.push(from);
            }
        }
    }
}

/// Slices a lowered function into basic blocks and wires the edges.
///
/// Synthetic entry and exit blocks bracket the graph: the entry block holds
/// the `FunctionEntry` marker and falls into the first labeled block, and
/// every `FunctionExit` block points at the synthetic exit. Instructions
/// between a block's terminator and the next label are unreachable and are
/// dropped during slicing.
pub fn build_cfg(func: &Function, symtab: &SymbolTable) -> CompileResult<Cfg> {
    let mut blocks: IndexVec<BlockId, BasicBlock> = IndexVec::new();
    let mut by_label: HashMap<Label, BlockId> = HashMap::new();

    let entry_label = Label::new(&format!("entry {}", func.name));
    let exit_label = Label::new(&format!("exit {}", func.name));
    let id = blocks.next_index();
    let entry = blocks.push(BasicBlock::new(id, entry_label, BlockRole::Entry));
    let id = blocks.next_index();
    let exit = blocks.push(BasicBlock::new(id, exit_label, BlockRole::Exit));

    // First pass: slice at labels.
    let mut current: Option<BlockId> = None;
    let mut dead_tail = false;
    for instruction in &func.instructions {
        match instruction {
            Instruction::FunctionEntry => {
                blocks[entry].instructions.push(instruction.clone());
            }
            Instruction::Label(label) => {
                let id = blocks.next_index();
                let id = blocks.push(BasicBlock::new(id, *label, BlockRole::Normal));
                if by_label.insert(*label, id).is_some() {
                    return Err(CompileError::Internal(format!(
                        "label {} defined twice in @{}",
                        label.name(),
                        func.name
                    )));
                }
                blocks[id].instructions.push(instruction.clone());
                current = Some(id);
                dead_tail = false;
            }
            _ => {
                if dead_tail {
                    continue;
                }
                let Some(id) = current else {
                    return Err(CompileError::Internal(format!(
                        "instruction before the first label in @{}",
                        func.name
                    )));
                };
                blocks[id].instructions.push(instruction.clone());
                if instruction.is_control_transfer() {
                    dead_tail = true;
                }
            }
        }
    }

    // Second pass: successors from terminators.
    let ids: Vec<BlockId> = blocks.indices().collect();
    for id in ids {
        if blocks[id].role == BlockRole::Exit {
            continue;
        }
        if blocks[id].role == BlockRole::Entry {
            // Falls into the first labeled block.
            let first = blocks
                .indices()
                .find(|&b| blocks[b].role == BlockRole::Normal)
                .ok_or_else(|| {
                    CompileError::Internal(format!("@{} has no basic blocks", func.name))
                })?;
            blocks[id].successors.push(first);
            continue;
        }
        let terminator = blocks[id].terminator().cloned().ok_or_else(|| {
            CompileError::Internal(format!(
                "block {} in @{} has no terminator",
                blocks[id].label.name(),
                func.name
            ))
        })?;
        if matches!(terminator, Instruction::FunctionExit { .. }) {
            blocks[id].successors.push(exit);
            continue;
        }
        for target in terminator.branch_targets() {
            let succ = *by_label.get(&target).ok_or_else(|| {
                CompileError::Internal(format!(
                    "branch to undefined label {} in @{}",
                    target.name(),
                    func.name
                ))
            })?;
            blocks[id].successors.push(succ);
        }
    }

    let mut cfg = Cfg {
        function: func.name,
        blocks,
        entry,
        exit,
        by_label,
    };
    cfg.recompute_predecessors();
    compute_def_use(&mut cfg, symtab);
    Ok(cfg)
}

/// Per-block def and upward-exposed use sets over trackable values.
/// Constants never count; globals and pointer temporaries are excluded
/// because they name memory, not a register-like location.
fn compute_def_use(cfg: &mut Cfg, symtab: &SymbolTable) {
    let trackable = |id: ValueId| {
        let v = symtab.values.get(id);
        matches!(v.kind, ValueKind::Local | ValueKind::Temporary) && !v.is_pointer && !v.is_array()
    };
    for block_id in cfg.blocks.indices() {
        let block = &mut cfg.blocks[block_id];
        block.defs.clear();
        block.uses.clear();
        for instruction in &block.instructions {
            for used in instruction.used_values() {
                if trackable(used) && !block.defs.contains(&used) {
                    block.uses.insert(used);
                }
            }
            if let Some(defined) = instruction.defined_value() {
                if trackable(defined) {
                    block.defs.insert(defined);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        frontend::ast::{Ast, AstBuilder, BinaryOp, NodeId},
        middle::{ir::lowering::lower_compile_unit, value::ScalarType},
    };

    pub(crate) fn lower_single(
        build: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> (Ast, SymbolTable) {
        let mut b = AstBuilder::new();
        let top = build(&mut b);
        let ast = b.finish(top);
        let mut symtab = SymbolTable::new();
        lower_compile_unit(&ast, &mut symtab).expect("lowering should succeed");
        (ast, symtab)
    }

    /// `int x; x = 1; if (x) x = 2; else x = 3;` built as a diamond.
    pub(crate) fn diamond() -> SymbolTable {
        let (_, symtab) = lower_single(|b| {
            let decl = b.declarator("x", vec![], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let x0 = b.ident("x");
            let one = b.int_lit(1);
            let init = b.assign(x0, one);
            let cond = b.ident("x");
            let x1 = b.ident("x");
            let two = b.int_lit(2);
            let then = b.assign(x1, two);
            let x2 = b.ident("x");
            let three = b.int_lit(3);
            let els = b.assign(x2, three);
            let if_stmt = b.if_stmt(cond, then, Some(els));
            let x3 = b.ident("x");
            let ret = b.return_stmt(Some(x3));
            let body = b.block(vec![decl, init, if_stmt, ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });
        symtab
    }

    #[test]
    fn every_block_has_a_terminator_and_known_targets() {
        let symtab = diamond();
        let func = symtab
            .function_by_name(crate::intern::Symbol::new("main"))
            .unwrap();
        let cfg = build_cfg(func, &symtab).unwrap();

        for id in cfg.live_blocks() {
            let block = cfg.block(id);
            if block.role == BlockRole::Normal {
                assert!(block.terminator().is_some(), "{}", block.label.name());
            }
            for &succ in &block.successors {
                assert!(cfg.block(succ).predecessors.contains(&id));
            }
        }
    }

    #[test]
    fn conditional_successors_keep_true_first() {
        let symtab = diamond();
        let func = symtab
            .function_by_name(crate::intern::Symbol::new("main"))
            .unwrap();
        let cfg = build_cfg(func, &symtab).unwrap();

        let branching = cfg
            .live_blocks()
            .find(|&id| {
                matches!(
                    cfg.block(id).terminator(),
                    Some(Instruction::CondBranch { .. })
                )
            })
            .expect("diamond has a conditional branch");
        let block = cfg.block(branching);
        let Some(Instruction::CondBranch {
            true_target,
            false_target,
            ..
        }) = block.terminator()
        else {
            unreachable!()
        };
        assert_eq!(block.successors.len(), 2);
        assert_eq!(cfg.block(block.successors[0]).label, *true_target);
        assert_eq!(cfg.block(block.successors[1]).label, *false_target);
    }

    #[test]
    fn def_use_sets_are_upward_exposed() {
        let (_, symtab) = lower_single(|b| {
            let p = b.formal_param("n", ScalarType::Int);
            let n0 = b.ident("n");
            let one = b.int_lit(1);
            let sum = b.binary(BinaryOp::Add, n0, one);
            let n1 = b.ident("n");
            let assign = b.assign(n1, sum);
            let n2 = b.ident("n");
            let ret = b.return_stmt(Some(n2));
            let body = b.block(vec![assign, ret]);
            vec![b.function("f", ScalarType::Int, vec![p], body)]
        });
        let func = symtab
            .function_by_name(crate::intern::Symbol::new("f"))
            .unwrap();
        let n = func.params[0].value;
        let cfg = build_cfg(func, &symtab).unwrap();

        let body_block = cfg.block(cfg.block(cfg.entry).successors[0]);
        // n is read before the assignment writes it, so it is upward-exposed
        assert!(body_block.uses.contains(&n));
        assert!(body_block.defs.contains(&n));
    }

    #[test]
    fn dead_instructions_after_a_terminator_are_dropped() {
        let (_, symtab) = lower_single(|b| {
            let one = b.int_lit(1);
            let ret = b.return_stmt(Some(one));
            let two = b.int_lit(2);
            let unreachable_ret = b.return_stmt(Some(two));
            let body = b.block(vec![ret, unreachable_ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });
        let func = symtab
            .function_by_name(crate::intern::Symbol::new("main"))
            .unwrap();
        let cfg = build_cfg(func, &symtab).unwrap();

        for id in cfg.live_blocks() {
            let block = cfg.block(id);
            let transfers = block
                .instructions
                .iter()
                .filter(|i| i.is_control_transfer())
                .count();
            assert!(transfers <= 1, "block {} kept dead code", block.label.name());
        }
    }
}
