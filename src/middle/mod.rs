//! The middle end: AST lowering to linear IR, control-flow graph
//! construction and cleanup, dominance analysis, and SSA conversion.

use crate::{error::CompileResult, frontend::ast::Ast};

pub mod cfg;
pub mod function;
pub mod ir;
pub mod ssa;
pub mod symbol_table;
pub mod value;

/// Runs the whole middle end over one tree: lowering, then per function a
/// cleaned control-flow graph in SSA form. The symbol table accumulates
/// every value and function the passes create.
pub fn run_middle_end(
    ast: &Ast,
    symtab: &mut symbol_table::SymbolTable,
) -> CompileResult<Vec<cfg::Cfg>> {
    ir::lowering::lower_compile_unit(ast, symtab)?;

    let ids: Vec<_> = symtab.function_ids().collect();
    let mut cfgs = Vec::with_capacity(ids.len());
    for id in ids {
        let mut graph = cfg::build_cfg(symtab.function(id), symtab)?;
        cfg::cleanup::cleanup(&mut graph);
        let dominators = ssa::compute_dominators(&graph);
        ssa::convert_to_ssa(&mut graph, &dominators, symtab);
        cfgs.push(graph);
    }
    Ok(cfgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::{AstBuilder, BinaryOp},
        intern::Symbol,
        middle::{ir::Instruction, symbol_table::SymbolTable, value::ScalarType},
    };

    /// Iterative factorial, end to end: lowering, cleanup, dominators, SSA.
    #[test]
    fn factorial_pipeline_produces_ssa_graphs() {
        let mut b = AstBuilder::new();
        let p = b.formal_param("n", ScalarType::Int);

        let one0 = b.int_lit(1);
        let r_decl = b.declarator("r", vec![], Some(one0));
        let r_decl = b.var_decl(ScalarType::Int, vec![r_decl]);

        let n0 = b.ident("n");
        let one1 = b.int_lit(1);
        let cond = b.binary(BinaryOp::Gt, n0, one1);

        let r0 = b.ident("r");
        let n1 = b.ident("n");
        let prod = b.binary(BinaryOp::Mul, r0, n1);
        let r1 = b.ident("r");
        let acc = b.assign(r1, prod);
        let n2 = b.ident("n");
        let one2 = b.int_lit(1);
        let dec = b.binary(BinaryOp::Sub, n2, one2);
        let n3 = b.ident("n");
        let step = b.assign(n3, dec);
        let body = b.block(vec![acc, step]);
        let lp = b.while_stmt(cond, body);

        let r2 = b.ident("r");
        let ret = b.return_stmt(Some(r2));
        let outer = b.block(vec![r_decl, lp, ret]);
        let f = b.function("fact", ScalarType::Int, vec![p], outer);
        let ast = b.finish(vec![f]);

        let mut symtab = SymbolTable::new();
        let cfgs = run_middle_end(&ast, &mut symtab).unwrap();
        assert_eq!(cfgs.len(), 1);
        let graph = &cfgs[0];
        assert_eq!(graph.function, Symbol::new("fact"));

        // Both loop-carried variables merge at the header.
        let phis = graph
            .live_blocks()
            .flat_map(|id| graph.block(id).instructions.iter())
            .filter(|i| matches!(i, Instruction::Phi { .. }))
            .count();
        assert!(phis >= 2, "expected phis for r and n, saw {phis}");

        // Every live block still ends in a control transfer.
        for id in graph.live_blocks() {
            if graph.block(id).role == cfg::BlockRole::Normal {
                assert!(graph.block(id).terminator().is_some());
            }
        }
    }
}
