//! Minimal SSA construction over a cleaned graph: phi placement at the
//! iterated dominance frontier of each variable's definition blocks, then a
//! dominator-tree preorder walk that renames definitions and uses against
//! per-variable version stacks.
//!
//! Phis are placed semi-pruned: only variables that are live into some
//! block (upward-exposed in its use set) are candidates, which keeps
//! single-block temporaries from growing spurious phis at joins.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::{
    intern::Symbol,
    middle::{
        cfg::{BlockId, Cfg},
        ir::Instruction,
        ssa::dominance::DominatorTree,
        symbol_table::SymbolTable,
        value::ValueId,
    },
};

pub fn convert_to_ssa(cfg: &mut Cfg, dom: &DominatorTree, symtab: &mut SymbolTable) {
    let params: Vec<ValueId> = symtab
        .function_by_name(cfg.function)
        .map(|f| f.params.iter().map(|p| p.value).collect())
        .unwrap_or_default();

    // Candidate variables: everything upward-exposed somewhere. The def and
    // use sets already exclude constants, globals, arrays, and pointers.
    let mut candidates: BTreeSet<ValueId> = BTreeSet::new();
    for block in cfg.live_blocks() {
        candidates.extend(&cfg.block(block).uses);
    }

    // Definition sites. Parameters are defined by the entry block.
    let mut def_sites: HashMap<ValueId, BTreeSet<BlockId>> = HashMap::new();
    for block in cfg.live_blocks().collect::<Vec<_>>() {
        for &defined in &cfg.block(block).defs {
            if candidates.contains(&defined) {
                def_sites.entry(defined).or_default().insert(block);
            }
        }
    }
    for &param in &params {
        if candidates.contains(&param) {
            def_sites.entry(param).or_default().insert(cfg.entry);
        }
    }

    insert_phis(cfg, dom, &def_sites);

    let mut renamer = Renamer {
        cfg,
        dom,
        symtab,
        candidates,
        stacks: HashMap::new(),
        versions: HashMap::new(),
        phi_origs: HashMap::new(),
    };
    // Before renaming, every phi still carries its original destination.
    renamer.record_phi_origins();
    for param in params {
        renamer.stacks.insert(param, vec![param]);
    }
    let entry = renamer.cfg.entry;
    renamer.rename_block(entry);

    tracing::debug!(
        function = cfg.function.value(),
        "SSA conversion finished"
    );
}

/// Classic worklist phi placement over the iterated dominance frontier.
fn insert_phis(cfg: &mut Cfg, dom: &DominatorTree, def_sites: &HashMap<ValueId, BTreeSet<BlockId>>) {
    let mut ordered: Vec<(&ValueId, &BTreeSet<BlockId>)> = def_sites.iter().collect();
    ordered.sort_by_key(|(value, _)| **value);

    for (&value, sites) in ordered {
        let mut worklist: Vec<BlockId> = sites.iter().copied().collect();
        let mut placed: BTreeSet<BlockId> = BTreeSet::new();
        while let Some(block) = worklist.pop() {
            for join in dom.frontier(block) {
                if !placed.insert(join) {
                    continue;
                }
                // After a leading label if the block has one; the synthetic
                // blocks do not.
                let instructions = &mut cfg.block_mut(join).instructions;
                let at = usize::from(matches!(instructions.first(), Some(Instruction::Label(_))));
                instructions.insert(
                    at,
                    Instruction::Phi {
                        dst: value,
                        sources: Vec::new(),
                    },
                );
                if !sites.contains(&join) {
                    worklist.push(join);
                }
            }
        }
    }
}

struct Renamer<'a> {
    cfg: &'a mut Cfg,
    dom: &'a DominatorTree,
    symtab: &'a mut SymbolTable,
    candidates: BTreeSet<ValueId>,
    /// Innermost (current) version last, keyed by the original value
    stacks: HashMap<ValueId, Vec<ValueId>>,
    versions: HashMap<ValueId, u32>,
    /// Original variable behind each phi, keyed by (block, position)
    phi_origs: HashMap<(BlockId, usize), ValueId>,
}

impl Renamer<'_> {
    fn record_phi_origins(&mut self) {
        for block in self.cfg.blocks.indices() {
            for (i, instruction) in self.cfg.block(block).instructions.iter().enumerate() {
                if let Instruction::Phi { dst, .. } = instruction {
                    self.phi_origs.insert((block, i), *dst);
                }
            }
        }
    }

    /// A fresh version of `original`, named `base.N` in creation order.
    fn fresh_version(&mut self, original: ValueId) -> ValueId {
        let n = self.versions.entry(original).or_insert(0);
        let version = *n;
        *n += 1;
        let template = self.symtab.values.get(original).clone();
        let name = Symbol::new(&format!("{}.{version}", template.name));
        let mut value = template;
        value.name = name;
        self.symtab.values.alloc(value)
    }

    fn current_version(&self, original: ValueId) -> ValueId {
        self.stacks
            .get(&original)
            .and_then(|stack| stack.last().copied())
            .unwrap_or(original)
    }

    fn rename_block(&mut self, block: BlockId) {
        let mut pushed: Vec<ValueId> = Vec::new();
        self.rewrite_instructions(block, &mut pushed);
        self.fill_successor_phis(block);

        let children: Vec<BlockId> = self.dom.children_of(block).to_vec();
        for child in children {
            self.rename_block(child);
        }

        for original in pushed.into_iter().rev() {
            self.stacks
                .get_mut(&original)
                .expect("pushed versions have a stack")
                .pop();
        }
    }

    fn rewrite_instructions(&mut self, block: BlockId, pushed: &mut Vec<ValueId>) {
        let count = self.cfg.block(block).instructions.len();
        for i in 0..count {
            let is_phi = matches!(
                self.cfg.block(block).instructions[i],
                Instruction::Phi { .. }
            );
            if is_phi {
                let original = self.phi_origs[&(block, i)];
                let version = self.fresh_version(original);
                self.cfg.block_mut(block).instructions[i].replace_def(version);
                self.stacks.entry(original).or_default().push(version);
                pushed.push(original);
                continue;
            }

            let Renamer { cfg, stacks, .. } = self;
            let instruction = &mut cfg.block_mut(block).instructions[i];
            instruction.replace_uses(|used| {
                stacks
                    .get(&used)
                    .and_then(|stack| stack.last().copied())
                    .unwrap_or(used)
            });

            let defined = instruction.defined_value();
            if let Some(defined) = defined {
                if self.candidates.contains(&defined) {
                    let version = self.fresh_version(defined);
                    self.cfg.block_mut(block).instructions[i].replace_def(version);
                    self.stacks.entry(defined).or_default().push(version);
                    pushed.push(defined);
                }
            }
        }
    }

    /// Appends this block's current versions as the phi operands of every
    /// successor, tagged with this block's label. Each live predecessor is
    /// renamed exactly once, so each phi ends with one operand per
    /// predecessor.
    fn fill_successor_phis(&mut self, block: BlockId) {
        let label = self.cfg.block(block).label;
        let successors = self.cfg.block(block).successors.clone();
        for succ in successors {
            let count = self.cfg.block(succ).instructions.len();
            for i in 0..count {
                let Some(&original) = self.phi_origs.get(&(succ, i)) else {
                    continue;
                };
                let operand = self.current_version(original);
                if let Instruction::Phi { sources, .. } =
                    &mut self.cfg.block_mut(succ).instructions[i]
                {
                    sources.push((operand, label));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hashbrown::HashSet;

    use super::*;
    use crate::{
        frontend::ast::{AstBuilder, BinaryOp, NodeId},
        intern::Symbol,
        middle::{
            cfg::{build_cfg, cleanup::cleanup, tests::lower_single},
            ssa::dominance::compute_dominators,
            value::{ScalarType, ValueKind},
        },
    };

    fn ssa_for(
        name: &str,
        build: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> (Cfg, SymbolTable) {
        let (_, mut symtab) = lower_single(build);
        let func = symtab.function_by_name(Symbol::new(name)).unwrap();
        let mut cfg = build_cfg(func, &symtab).unwrap();
        cleanup(&mut cfg);
        let dom = compute_dominators(&cfg);
        convert_to_ssa(&mut cfg, &dom, &mut symtab);
        (cfg, symtab)
    }

    fn diamond() -> (Cfg, SymbolTable) {
        ssa_for("main", |b| {
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
            let call = b.call("putint", vec![x3]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![decl, init, if_stmt, stmt]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        })
    }

    #[test]
    fn every_tracked_value_is_defined_once() {
        let (cfg, symtab) = diamond();
        let mut seen: HashSet<ValueId> = HashSet::new();
        for block in cfg.live_blocks() {
            for instruction in &cfg.block(block).instructions {
                if let Some(defined) = instruction.defined_value() {
                    let v = symtab.values.get(defined);
                    if matches!(v.kind, ValueKind::Local | ValueKind::Temporary)
                        && !v.is_pointer
                        && !v.is_array()
                    {
                        assert!(
                            seen.insert(defined),
                            "{} defined more than once",
                            v.name
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn diamond_join_gets_a_two_way_phi() {
        let (cfg, symtab) = diamond();
        let phis: Vec<(BlockId, &Instruction)> = cfg
            .live_blocks()
            .flat_map(|id| {
                cfg.block(id)
                    .instructions
                    .iter()
                    .filter(|i| matches!(i, Instruction::Phi { .. }))
                    .map(move |i| (id, i))
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(phis.len(), 1, "one merged variable, one phi");

        let (join, phi) = phis[0];
        let Instruction::Phi { dst, sources } = phi else {
            unreachable!()
        };
        assert_eq!(sources.len(), cfg.block(join).predecessors.len());
        // Operands are distinct versions of the same base variable.
        let base = |id: ValueId| {
            let name = symtab.values.get(id).name.to_string();
            name.split('.').next().unwrap().to_string()
        };
        assert_eq!(base(*dst), base(sources[0].0));
        assert_eq!(base(sources[0].0), base(sources[1].0));
        assert_ne!(sources[0].0, sources[1].0);
    }

    #[test]
    fn phi_operands_match_predecessor_labels() {
        let (cfg, _) = diamond();
        for block in cfg.live_blocks() {
            for instruction in &cfg.block(block).instructions {
                let Instruction::Phi { sources, .. } = instruction else {
                    continue;
                };
                let pred_labels: HashSet<_> = cfg
                    .block(block)
                    .predecessors
                    .iter()
                    .map(|&p| cfg.block(p).label)
                    .collect();
                for (_, label) in sources {
                    assert!(pred_labels.contains(label));
                }
            }
        }
    }

    /// A loop-carried variable needs a phi at the loop header merging the
    /// initial value with the back-edge value.
    #[test]
    fn loop_header_merges_initial_and_latch_values() {
        let (cfg, symtab) = ssa_for("f", |b| {
            let p = b.formal_param("n", ScalarType::Int);
            let n0 = b.ident("n");
            let zero = b.int_lit(0);
            let cond = b.binary(BinaryOp::Gt, n0, zero);
            let n1 = b.ident("n");
            let one = b.int_lit(1);
            let dec = b.binary(BinaryOp::Sub, n1, one);
            let n2 = b.ident("n");
            let step = b.assign(n2, dec);
            let body = b.block(vec![step]);
            let lp = b.while_stmt(cond, body);
            let n3 = b.ident("n");
            let ret = b.return_stmt(Some(n3));
            let outer = b.block(vec![lp, ret]);
            vec![b.function("f", ScalarType::Int, vec![p], outer)]
        });

        let dom = compute_dominators(&cfg);
        let (_, header) = dom.back_edges()[0];
        let header_phis: Vec<_> = cfg
            .block(header)
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Phi { dst, sources } => Some((*dst, sources.clone())),
                _ => None,
            })
            .collect();
        let n_phi = header_phis
            .iter()
            .find(|(dst, _)| symtab.values.get(*dst).name.to_string().starts_with("%l0."))
            .expect("loop variable must merge at the header");
        assert_eq!(n_phi.1.len(), 2);
    }

    /// A loop body ending in an empty if/else funnels both arms back to
    /// the header through one collapsed edge; every header phi must still
    /// carry exactly one operand per predecessor.
    #[test]
    fn header_phis_carry_one_operand_per_predecessor() {
        let (cfg, _) = ssa_for("main", |b| {
            let i_decl = b.declarator("i", vec![], None);
            let i_decl = b.var_decl(ScalarType::Int, vec![i_decl]);
            let c_decl = b.declarator("c", vec![], None);
            let c_decl = b.var_decl(ScalarType::Int, vec![c_decl]);
            let i0 = b.ident("i");
            let zero = b.int_lit(0);
            let init = b.assign(i0, zero);
            let i1 = b.ident("i");
            let three = b.int_lit(3);
            let cond = b.binary(BinaryOp::Lt, i1, three);
            let i2 = b.ident("i");
            let one = b.int_lit(1);
            let sum = b.binary(BinaryOp::Add, i2, one);
            let i3 = b.ident("i");
            let step = b.assign(i3, sum);
            let c = b.ident("c");
            let then = b.block(vec![]);
            let els = b.block(vec![]);
            let empty_if = b.if_stmt(c, then, Some(els));
            let body = b.block(vec![step, empty_if]);
            let lp = b.while_stmt(cond, body);
            let i4 = b.ident("i");
            let ret = b.return_stmt(Some(i4));
            let outer = b.block(vec![i_decl, c_decl, init, lp, ret]);
            vec![b.function("main", ScalarType::Int, vec![], outer)]
        });

        let mut saw_phi = false;
        for block in cfg.live_blocks() {
            for instruction in &cfg.block(block).instructions {
                if let Instruction::Phi { sources, .. } = instruction {
                    saw_phi = true;
                    assert_eq!(
                        sources.len(),
                        cfg.block(block).predecessors.len(),
                        "phi arity mismatch in {}",
                        cfg.block(block).label.name()
                    );
                }
            }
        }
        assert!(saw_phi, "the loop variable must merge somewhere");
    }

    /// Temporaries that live and die inside one block must not sprout phis.
    #[test]
    fn single_block_temporaries_get_no_phis() {
        let (cfg, symtab) = diamond();
        for block in cfg.live_blocks() {
            for instruction in &cfg.block(block).instructions {
                if let Instruction::Phi { dst, .. } = instruction {
                    let name = symtab.values.get(*dst).name.to_string();
                    assert!(
                        name.starts_with("%l"),
                        "unexpected phi for temporary {name}"
                    );
                }
            }
        }
    }

    /// Uses in straight-line code pick up the innermost dominating
    /// definition without any phi.
    #[test]
    fn straight_line_reassignment_needs_no_phi() {
        let (cfg, _) = ssa_for("main", |b| {
            let decl = b.declarator("x", vec![], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let x0 = b.ident("x");
            let one = b.int_lit(1);
            let a1 = b.assign(x0, one);
            let x1 = b.ident("x");
            let two = b.int_lit(2);
            let a2 = b.assign(x1, two);
            let x2 = b.ident("x");
            let call = b.call("putint", vec![x2]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![decl, a1, a2, stmt]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        for block in cfg.live_blocks() {
            assert!(
                !cfg.block(block)
                    .instructions
                    .iter()
                    .any(|i| matches!(i, Instruction::Phi { .. })),
                "straight-line code must stay phi-free"
            );
        }
    }
}
