//! Textual rendering of the linear IR, colored for terminals. Tests strip
//! the escape sequences and compare plain text.

use std::fmt::Write;

use colored::Colorize;
use itertools::Itertools;

use crate::middle::{
    function::Function,
    ir::{AssignMode, Instruction},
    symbol_table::SymbolTable,
    value::{ScalarType, Value, ValueId},
};

fn dims_suffix(value: &Value) -> String {
    match &value.array {
        None => String::new(),
        Some(desc) => desc
            .dims
            .iter()
            .map(|&d| {
                if d == 0 {
                    "[]".to_string()
                } else {
                    format!("[{d}]")
                }
            })
            .collect(),
    }
}

pub fn render_instruction(instruction: &Instruction, symtab: &SymbolTable) -> String {
    let operand = |id: &ValueId| symtab.values.get(*id).name.to_string();
    match instruction {
        Instruction::Label(label) => format!("{}:", label.name().cyan()),
        Instruction::Binary {
            op,
            dst,
            src1,
            src2,
        } => format!(
            "{} = {} {}, {}",
            operand(dst),
            op.to_string().blue(),
            operand(src1),
            operand(src2)
        ),
        Instruction::Assign { dst, src, mode } => match mode {
            AssignMode::Plain => format!("{} = {}", operand(dst), operand(src)),
            AssignMode::LoadPointer => format!("{} = *{}", operand(dst), operand(src)),
            AssignMode::StorePointer => format!("*{} = {}", operand(dst), operand(src)),
            AssignMode::Negate => format!("{} = {} {}", operand(dst), "neg".blue(), operand(src)),
        },
        Instruction::Branch { target } => format!(
            "{} {} {}",
            "br".blue(),
            "label".blue(),
            target.name().cyan()
        ),
        Instruction::CondBranch {
            cond,
            true_target,
            false_target,
        } => format!(
            "{} {}, {} {}, {} {}",
            "bc".blue(),
            operand(cond),
            "label".blue(),
            true_target.name().cyan(),
            "label".blue(),
            false_target.name().cyan()
        ),
        Instruction::Call {
            callee,
            args,
            result,
        } => {
            let args = args.iter().map(operand).join(", ");
            let return_type = symtab.values.get(*result).ty;
            if return_type == ScalarType::Void {
                format!(
                    "{} {} @{}({})",
                    "call".blue(),
                    return_type.to_string().green(),
                    callee,
                    args
                )
            } else {
                format!(
                    "{} = {} {} @{}({})",
                    operand(result),
                    "call".blue(),
                    return_type.to_string().green(),
                    callee,
                    args
                )
            }
        }
        Instruction::FunctionEntry => "entry".blue().to_string(),
        Instruction::FunctionExit { value } => match value {
            Some(value) => format!("{} {}", "exit".blue(), operand(value)),
            None => "exit".blue().to_string(),
        },
        Instruction::Phi { dst, sources } => {
            let sources = sources
                .iter()
                .map(|(value, label)| format!("[{}, {}]", operand(value), label.name().cyan()))
                .join(", ");
            format!("{} = {} {}", operand(dst), "phi".blue(), sources)
        }
    }
}

pub fn dump_function(func: &Function, symtab: &SymbolTable) -> String {
    let mut out = String::new();
    let params = func
        .params
        .iter()
        .map(|p| {
            let v = symtab.values.get(p.value);
            format!("{} {}{}", v.ty.to_string().green(), v.name, dims_suffix(v))
        })
        .join(", ");
    let _ = writeln!(
        out,
        "{} {} @{}({}) {{",
        "define".blue(),
        func.return_type.to_string().green(),
        func.name,
        params
    );
    for &local in &func.locals {
        let v = symtab.values.get(local);
        let _ = writeln!(
            out,
            "{} {} {}{}",
            "declare".blue(),
            v.ty.to_string().green(),
            v.name,
            dims_suffix(v)
        );
    }
    for instruction in &func.instructions {
        let rendered = render_instruction(instruction, symtab);
        match instruction {
            Instruction::Label(_) => {
                let _ = writeln!(out, "{rendered}");
            }
            _ => {
                let _ = writeln!(out, "    {rendered}");
            }
        }
    }
    out.push_str("}\n");
    out
}

/// The whole session: file-scope declarations, then every function in
/// definition order.
pub fn dump_module(symtab: &SymbolTable) -> String {
    let mut out = String::new();
    for &global in symtab.global_values() {
        let v = symtab.values.get(global);
        let _ = writeln!(
            out,
            "{} {} {}{}",
            "declare".blue(),
            v.ty.to_string().green(),
            v.name,
            dims_suffix(v)
        );
    }
    if !symtab.global_values().is_empty() {
        out.push('\n');
    }
    for id in symtab.function_ids() {
        out.push_str(&dump_function(symtab.function(id), symtab));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{
        frontend::ast::AstBuilder,
        intern::Symbol,
        middle::ir::lowering::lower_compile_unit,
    };

    #[test]
    fn identity_function_renders_stably() {
        let mut b = AstBuilder::new();
        let p = b.formal_param("n", ScalarType::Int);
        let n = b.ident("n");
        let ret = b.return_stmt(Some(n));
        let body = b.block(vec![ret]);
        let f = b.function("f", ScalarType::Int, vec![p], body);
        let ast = b.finish(vec![f]);

        let mut symtab = SymbolTable::new();
        lower_compile_unit(&ast, &mut symtab).unwrap();

        let dump = dump_function(symtab.function_by_name(Symbol::new("f")).unwrap(), &symtab);
        let plain = strip_ansi_escapes::strip_str(&dump);
        assert_eq!(
            plain,
            indoc! {"
                define i32 @f(i32 %l0) {
                declare i32 %t0
                    entry
                .L1:
                    %t0 = %l0
                    br label .L0
                .L0:
                    exit %t0
                }
            "}
        );
    }

    #[test]
    fn stores_and_loads_render_with_pointer_sigils() {
        let mut b = AstBuilder::new();
        let d4 = b.int_lit(4);
        let decl = b.declarator("a", vec![d4], None);
        let decl = b.var_decl(ScalarType::Int, vec![decl]);
        let idx = b.int_lit(2);
        let lhs = b.indexed("a", vec![idx]);
        let seven = b.int_lit(7);
        let assign = b.assign(lhs, seven);
        let body = b.block(vec![decl, assign]);
        let f = b.function("main", ScalarType::Void, vec![], body);
        let ast = b.finish(vec![f]);

        let mut symtab = SymbolTable::new();
        lower_compile_unit(&ast, &mut symtab).unwrap();

        let dump = dump_function(
            symtab.function_by_name(Symbol::new("main")).unwrap(),
            &symtab,
        );
        let plain = strip_ansi_escapes::strip_str(&dump);
        assert!(plain.contains("declare i32 %l0[4]"), "dump was:\n{plain}");
        assert!(plain.contains("*%t0 = 7"), "dump was:\n{plain}");
    }
}
