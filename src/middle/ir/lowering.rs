//! AST to linear-IR lowering. One [`IrGenerator`] walks the tree exactly
//! once, emitting instructions into the active function, folding constant
//! subexpressions as it goes, and flattening structured control flow into
//! labels and branches. Short-circuit `&&`/`||` never produce a boolean
//! temporary unless the expression sits in a value position.

use hashbrown::HashMap;

use crate::{
    error::{CompileError, CompileResult},
    frontend::ast::{Ast, BinaryOp, NodeId, NodeKind, UnaryOp},
    intern::Symbol,
    middle::{
        ir::{AssignMode, Instruction, Label},
        symbol_table::SymbolTable,
        value::{ArrayDescriptor, ArrayStorage, ElementBuffer, ScalarType, ValueId},
    },
};

/// Where control continues after a condition is decided. Short-circuit
/// operators thread these through their operands instead of materializing
/// intermediate booleans.
#[derive(Debug, Clone, Copy)]
struct ConditionTargets {
    on_true: Label,
    on_false: Label,
}

impl ConditionTargets {
    fn swapped(self) -> Self {
        ConditionTargets {
            on_true: self.on_false,
            on_false: self.on_true,
        }
    }
}

/// Branch targets of the innermost enclosing loop.
#[derive(Debug, Clone, Copy)]
struct LoopTargets {
    continue_target: Label,
    break_target: Label,
}

pub struct IrGenerator<'a> {
    ast: &'a Ast,
    symtab: &'a mut SymbolTable,
    loop_stack: Vec<LoopTargets>,
    /// Lowered result per expression node, kept for diagnostics and so the
    /// tree itself stays read-only.
    results: HashMap<NodeId, ValueId>,
}

/// Lowers a whole compile unit into `symtab`. Convenience wrapper around
/// [`IrGenerator`].
pub fn lower_compile_unit(ast: &Ast, symtab: &mut SymbolTable) -> CompileResult<()> {
    IrGenerator::new(ast, symtab).run()
}

impl<'a> IrGenerator<'a> {
    pub fn new(ast: &'a Ast, symtab: &'a mut SymbolTable) -> Self {
        IrGenerator {
            ast,
            symtab,
            loop_stack: Vec::new(),
            results: HashMap::new(),
        }
    }

    /// The value an already-lowered expression node produced.
    pub fn result_of(&self, node: NodeId) -> Option<ValueId> {
        self.results.get(&node).copied()
    }

    pub fn run(&mut self) -> CompileResult<()> {
        let root = self.ast.root();
        for &child in self.ast.children(root) {
            match self.ast.node(child).kind {
                NodeKind::VarDecl { .. } => self.lower_declaration(child)?,
                NodeKind::FunctionDef => self.lower_function(child)?,
                ref kind => {
                    return Err(CompileError::Internal(format!(
                        "unexpected top-level node {kind:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /* Functions */

    fn lower_function(&mut self, node: NodeId) -> CompileResult<()> {
        let name = self.ast.name_of(node);
        let line = self.ast.node(node).line;
        let return_type = self.ast.node(node).ty;

        if self.symtab.current_function.is_some() {
            return Err(CompileError::NestedFunction { name, line });
        }
        let id = self
            .symtab
            .define_function(name, return_type)
            .ok_or(CompileError::DuplicateFunction { name, line })?;

        tracing::debug!(function = name.value(), "lowering function body");

        // Parameter values are created before the cursor is set so they do
        // not land in the function's local pool.
        let &[params_node, body_node] = self.ast.children(node) else {
            return Err(CompileError::Internal(format!(
                "malformed function node for '{name}' at line {line}"
            )));
        };
        for &param in self.ast.children(params_node) {
            self.lower_formal_param(id, param)?;
        }

        self.symtab.current_function = Some(id);
        let result = self.lower_function_body(body_node);
        self.symtab.current_function = None;
        result
    }

    fn lower_formal_param(
        &mut self,
        func: crate::middle::function::FunctionId,
        node: NodeId,
    ) -> CompileResult<()> {
        let name = self.ast.name_of(node);
        let ty = self.ast.node(node).ty;
        let value = self.symtab.new_local(ty);

        if let NodeKind::FormalParam { is_array: true } = self.ast.node(node).kind {
            // The leading dimension of a parameter array is unknown; only
            // the trailing dimension expressions are given.
            let mut dims = vec![0];
            for &dim in self.ast.children(node) {
                dims.push(self.fold_dimension(dim)?);
            }
            let v = self.symtab.values.get_mut(value);
            v.array = Some(ArrayDescriptor::formal_param(dims));
            v.is_pointer = true;
        }

        self.symtab
            .function_mut(func)
            .params
            .push(crate::middle::function::Param { name, value });
        Ok(())
    }

    fn lower_function_body(&mut self, body: NodeId) -> CompileResult<()> {
        let func = self.current();
        let return_type = self.symtab.function(func).return_type;
        if return_type != ScalarType::Void {
            let rv = self.symtab.new_temp(return_type);
            self.symtab.function_mut(func).return_value = Some(rv);
        }

        self.symtab.emit(Instruction::FunctionEntry);
        let entry = self.symtab.new_label();
        self.symtab.emit(Instruction::Label(entry));

        self.lower_block(body)?;

        // Bodies that fall off the end still reach the exit block.
        let exit_label = self.symtab.function(func).exit_label;
        let terminated = self
            .symtab
            .function(func)
            .instructions
            .last()
            .is_some_and(Instruction::is_control_transfer);
        if !terminated {
            self.symtab.emit(Instruction::Branch { target: exit_label });
        }
        self.symtab.emit(Instruction::Label(exit_label));
        let value = self.symtab.function(func).return_value;
        self.symtab.emit(Instruction::FunctionExit { value });
        Ok(())
    }

    /* Statements */

    fn lower_block(&mut self, node: NodeId) -> CompileResult<()> {
        let func = self.current();
        self.symtab.function_mut(func).enter_scope();
        let result = self.lower_block_body(node);
        self.symtab.function_mut(func).exit_scope();
        result
    }

    fn lower_block_body(&mut self, node: NodeId) -> CompileResult<()> {
        for &stmt in self.ast.children(node) {
            self.lower_statement(stmt)?;
        }
        Ok(())
    }

    fn lower_statement(&mut self, node: NodeId) -> CompileResult<()> {
        let line = self.ast.node(node).line;
        match self.ast.node(node).kind {
            NodeKind::VarDecl { .. } => self.lower_declaration(node),
            NodeKind::Block => self.lower_block(node),
            NodeKind::Assign => self.lower_assign(node),
            NodeKind::ExprStmt => {
                self.lower_expr(self.ast.children(node)[0])?;
                Ok(())
            }
            NodeKind::If => self.lower_if(node),
            NodeKind::While => self.lower_while(node),
            NodeKind::Break => {
                let targets = self
                    .loop_stack
                    .last()
                    .copied()
                    .ok_or(CompileError::BreakOutsideLoop { line })?;
                self.symtab.emit(Instruction::Branch {
                    target: targets.break_target,
                });
                Ok(())
            }
            NodeKind::Continue => {
                let targets = self
                    .loop_stack
                    .last()
                    .copied()
                    .ok_or(CompileError::ContinueOutsideLoop { line })?;
                self.symtab.emit(Instruction::Branch {
                    target: targets.continue_target,
                });
                Ok(())
            }
            NodeKind::Return => self.lower_return(node),
            ref kind => Err(CompileError::Internal(format!(
                "unexpected statement node {kind:?} at line {line}"
            ))),
        }
    }

    fn lower_assign(&mut self, node: NodeId) -> CompileResult<()> {
        let line = self.ast.node(node).line;
        let &[lvalue, rhs] = self.ast.children(node) else {
            return Err(CompileError::Internal(format!(
                "malformed assignment at line {line}"
            )));
        };

        match self.ast.node(lvalue).kind {
            NodeKind::Ident => {
                let name = self.ast.name_of(lvalue);
                let dst = self.resolve(name, line)?;
                if self.symtab.values.get(dst).is_constant() {
                    return Err(CompileError::AssignToConstant { name, line });
                }
                if self.symtab.values.get(dst).is_array() {
                    return Err(CompileError::Internal(format!(
                        "assignment to whole array '{name}' at line {line}"
                    )));
                }
                let src = self.lower_expr(rhs)?;
                self.symtab.emit(Instruction::Assign {
                    dst,
                    src,
                    mode: AssignMode::Plain,
                });
            }
            NodeKind::IndexedIdent => {
                let addr = self.lower_indexed_address(lvalue)?;
                if self.symtab.values.get(addr).is_array() {
                    let name = self.ast.name_of(lvalue);
                    return Err(CompileError::Internal(format!(
                        "partial indexing of '{name}' is not assignable at line {line}"
                    )));
                }
                let src = self.lower_expr(rhs)?;
                self.symtab.emit(Instruction::Assign {
                    dst: addr,
                    src,
                    mode: AssignMode::StorePointer,
                });
            }
            ref kind => {
                return Err(CompileError::Internal(format!(
                    "node {kind:?} is not an lvalue at line {line}"
                )))
            }
        }
        Ok(())
    }

    fn lower_if(&mut self, node: NodeId) -> CompileResult<()> {
        let children = self.ast.children(node).to_vec();
        let cond = children[0];
        let then = children[1];
        let els = children.get(2).copied();

        let then_label = self.symtab.new_label();
        let exit_label = self.symtab.new_label();
        let else_label = if els.is_some() {
            self.symtab.new_label()
        } else {
            exit_label
        };

        self.lower_condition(
            cond,
            ConditionTargets {
                on_true: then_label,
                on_false: else_label,
            },
        )?;

        self.symtab.emit(Instruction::Label(then_label));
        self.lower_statement(then)?;
        self.symtab.emit(Instruction::Branch { target: exit_label });

        if let Some(els) = els {
            self.symtab.emit(Instruction::Label(else_label));
            self.lower_statement(els)?;
            self.symtab.emit(Instruction::Branch { target: exit_label });
        }

        self.symtab.emit(Instruction::Label(exit_label));
        Ok(())
    }

    fn lower_while(&mut self, node: NodeId) -> CompileResult<()> {
        let children = self.ast.children(node).to_vec();
        let (cond, body) = (children[0], children[1]);

        let cond_label = self.symtab.new_label();
        let body_label = self.symtab.new_label();
        let exit_label = self.symtab.new_label();

        self.symtab.emit(Instruction::Branch { target: cond_label });
        self.symtab.emit(Instruction::Label(cond_label));
        self.lower_condition(
            cond,
            ConditionTargets {
                on_true: body_label,
                on_false: exit_label,
            },
        )?;

        self.symtab.emit(Instruction::Label(body_label));
        self.loop_stack.push(LoopTargets {
            continue_target: cond_label,
            break_target: exit_label,
        });
        let result = self.lower_statement(body);
        self.loop_stack.pop();
        result?;

        self.symtab.emit(Instruction::Branch { target: cond_label });
        self.symtab.emit(Instruction::Label(exit_label));
        Ok(())
    }

    fn lower_return(&mut self, node: NodeId) -> CompileResult<()> {
        let func = self.current();
        if let Some(&expr) = self.ast.children(node).first() {
            let src = self.lower_expr(expr)?;
            let src_ty = self.symtab.values.get(src).ty;

            // A function declared without a return type takes the type of
            // the first returned value.
            if self.symtab.function(func).return_type == ScalarType::Void {
                self.symtab.function_mut(func).return_type = src_ty;
            }
            let dst = match self.symtab.function(func).return_value {
                Some(dst) => dst,
                None => {
                    let dst = self.symtab.new_temp(src_ty);
                    self.symtab.function_mut(func).return_value = Some(dst);
                    dst
                }
            };
            self.symtab.emit(Instruction::Assign {
                dst,
                src,
                mode: AssignMode::Plain,
            });
        }
        let target = self.symtab.function(func).exit_label;
        self.symtab.emit(Instruction::Branch { target });
        Ok(())
    }

    /* Declarations */

    fn lower_declaration(&mut self, node: NodeId) -> CompileResult<()> {
        let NodeKind::VarDecl { is_const } = self.ast.node(node).kind else {
            unreachable!("caller matched VarDecl");
        };
        let ty = self.ast.node(node).ty;
        for &declarator in self.ast.children(node) {
            self.lower_declarator(declarator, ty, is_const)?;
        }
        Ok(())
    }

    fn lower_declarator(
        &mut self,
        node: NodeId,
        ty: ScalarType,
        is_const: bool,
    ) -> CompileResult<()> {
        let name = self.ast.name_of(node);
        let line = self.ast.node(node).line;
        let NodeKind::Declarator { has_init } = self.ast.node(node).kind else {
            return Err(CompileError::Internal(format!(
                "malformed declaration of '{name}' at line {line}"
            )));
        };

        let children = self.ast.children(node).to_vec();
        let (dim_nodes, init) = if has_init {
            let (dims, init) = children.split_at(children.len() - 1);
            (dims.to_vec(), Some(init[0]))
        } else {
            (children, None)
        };

        if dim_nodes.is_empty() {
            self.declare_scalar(name, ty, is_const, init, line)
        } else {
            let mut dims = Vec::with_capacity(dim_nodes.len());
            for dim in dim_nodes {
                dims.push(self.fold_dimension(dim)?);
            }
            self.declare_array(name, ty, dims, init, line)
        }
    }

    fn declare_scalar(
        &mut self,
        name: Symbol,
        ty: ScalarType,
        is_const: bool,
        init: Option<NodeId>,
        line: u32,
    ) -> CompileResult<()> {
        // Constants never get storage: the name binds straight to the pool
        // constant and reads fold away.
        if is_const {
            let init = init.ok_or(CompileError::NonConstantInitializer { name, line })?;
            let folded = self.lower_expr(init)?;
            if !self.symtab.values.get(folded).is_constant() {
                return Err(CompileError::NonConstantInitializer { name, line });
            }
            let folded = self.coerce_constant(folded, ty);
            return self.bind(name, folded, line);
        }

        if self.symtab.current_function.is_some() {
            let value = self.symtab.new_local(ty);
            self.bind(name, value, line)?;
            if let Some(init) = init {
                let src = self.lower_expr(init)?;
                self.symtab.emit(Instruction::Assign {
                    dst: value,
                    src,
                    mode: AssignMode::Plain,
                });
            }
        } else {
            let value = self
                .symtab
                .declare_global(name, ty, None)
                .ok_or(CompileError::Redeclaration { name, line })?;
            if let Some(init) = init {
                let src = self.lower_expr(init)?;
                let src_value = self.symtab.values.get(src);
                if !src_value.is_constant() {
                    return Err(CompileError::NonConstantInitializer { name, line });
                }
                let (int_val, float_val) = match (ty, src_value.ty) {
                    (ScalarType::Float, ScalarType::Float) => (0, src_value.float_val),
                    (ScalarType::Float, _) => (0, src_value.int_val as f32),
                    (_, ScalarType::Float) => (src_value.float_val as i32, 0.0),
                    _ => (src_value.int_val, 0.0),
                };
                let dst = self.symtab.values.get_mut(value);
                dst.int_val = int_val;
                dst.float_val = float_val;
            }
        }
        Ok(())
    }

    fn declare_array(
        &mut self,
        name: Symbol,
        ty: ScalarType,
        dims: Vec<usize>,
        init: Option<NodeId>,
        line: u32,
    ) -> CompileResult<()> {
        let descriptor = ArrayDescriptor::materialized(dims, ty);
        let in_function = self.symtab.current_function.is_some();

        let value = if in_function {
            let value = self.symtab.new_local(ty);
            self.symtab.values.get_mut(value).array = Some(descriptor);
            self.bind(name, value, line)?;
            value
        } else {
            self.symtab
                .declare_global(name, ty, Some(descriptor))
                .ok_or(CompileError::Redeclaration { name, line })?
        };

        if let Some(init) = init {
            let mut walk = InitWalk {
                name,
                value,
                offset: 0,
                in_function,
            };
            self.walk_initializer(init, 0, &mut walk)?;
        }
        Ok(())
    }

    /// Walks one brace level of a structured array initializer, advancing a
    /// running linear offset. A nested brace at depth `d` accounts for one
    /// full stride of dimension `d` regardless of how many elements it
    /// supplies; trailing elements it omits stay zero.
    fn walk_initializer(
        &mut self,
        list: NodeId,
        depth: usize,
        walk: &mut InitWalk,
    ) -> CompileResult<()> {
        let line = self.ast.node(list).line;
        for &child in &self.ast.children(list).to_vec() {
            if matches!(self.ast.node(child).kind, NodeKind::InitList) {
                let stride = {
                    let desc = self.descriptor_of(walk.value);
                    if depth >= desc.rank() {
                        return Err(CompileError::Internal(format!(
                            "initializer for '{}' is nested deeper than its rank",
                            walk.name
                        )));
                    }
                    desc.stride(depth)
                };
                let start = walk.offset;
                self.walk_initializer(child, depth + 1, walk)?;
                walk.offset = start + stride;
            } else {
                let src = self.lower_expr(child)?;
                self.store_initializer_element(src, walk, line)?;
                walk.offset += 1;
            }
        }
        Ok(())
    }

    fn store_initializer_element(
        &mut self,
        src: ValueId,
        walk: &mut InitWalk,
        line: u32,
    ) -> CompileResult<()> {
        let src_value = self.symtab.values.get(src).clone();
        let elem_ty = self.symtab.values.get(walk.value).ty;

        if src_value.is_constant() {
            // Constant elements always land in the compile-time buffer; a
            // global is emitted straight from it by the backend. A local
            // additionally stores the element at runtime below.
            let offset = walk.offset;
            let desc = self
                .symtab
                .values
                .get_mut(walk.value)
                .array
                .as_mut()
                .expect("initializer walk targets an array");
            if offset >= desc.total_len {
                return Err(CompileError::Internal(format!(
                    "initializer for '{}' overflows {} elements",
                    walk.name, desc.total_len
                )));
            }
            match &mut desc.storage {
                ArrayStorage::Materialized(ElementBuffer::Int(buf)) => {
                    buf[offset] = match src_value.ty {
                        ScalarType::Float => src_value.float_val as i32,
                        _ => src_value.int_val,
                    };
                }
                ArrayStorage::Materialized(ElementBuffer::Float(buf)) => {
                    buf[offset] = match src_value.ty {
                        ScalarType::Float => src_value.float_val,
                        _ => src_value.int_val as f32,
                    };
                }
                ArrayStorage::FormalParam => {
                    unreachable!("declared arrays are materialized")
                }
            }
            if !walk.in_function {
                return Ok(());
            }
        } else if !walk.in_function {
            return Err(CompileError::NonConstantInitializer {
                name: walk.name,
                line,
            });
        }

        // Every supplied element of a local array stores through a computed
        // address, constant or not.
        let byte_offset = (walk.offset as i32) * elem_ty.size();
        let offset_const = self.symtab.const_int(byte_offset);
        let addr = self.symtab.new_temp(elem_ty);
        self.symtab.values.get_mut(addr).is_pointer = true;
        self.symtab.emit(Instruction::Binary {
            op: BinaryOp::Add,
            dst: addr,
            src1: walk.value,
            src2: offset_const,
        });
        self.symtab.emit(Instruction::Assign {
            dst: addr,
            src,
            mode: AssignMode::StorePointer,
        });
        Ok(())
    }

    /* Expressions */

    fn lower_expr(&mut self, node: NodeId) -> CompileResult<ValueId> {
        let value = self.lower_expr_inner(node)?;
        self.results.insert(node, value);
        Ok(value)
    }

    fn lower_expr_inner(&mut self, node: NodeId) -> CompileResult<ValueId> {
        let line = self.ast.node(node).line;
        match self.ast.node(node).kind {
            NodeKind::IntLiteral(v) => Ok(self.symtab.const_int(v)),
            NodeKind::FloatLiteral(v) => Ok(self.symtab.const_float(v)),
            NodeKind::Ident => {
                let name = self.ast.name_of(node);
                self.resolve(name, line)
            }
            NodeKind::IndexedIdent => {
                let addr = self.lower_indexed_address(node)?;
                if self.symtab.values.get(addr).is_array() {
                    // Partial indexing selects a sub-array; the address is
                    // the value (it feeds a call argument).
                    return Ok(addr);
                }
                let ty = self.symtab.values.get(addr).ty;
                let dst = self.symtab.new_temp(ty);
                self.symtab.emit(Instruction::Assign {
                    dst,
                    src: addr,
                    mode: AssignMode::LoadPointer,
                });
                Ok(dst)
            }
            NodeKind::Binary(op) if op.is_short_circuit() => self.materialize_boolean(node),
            NodeKind::Binary(op) => {
                let children = self.ast.children(node).to_vec();
                let lhs = self.lower_expr(children[0])?;
                let rhs = self.lower_expr(children[1])?;
                self.emit_binary(op, lhs, rhs, line)
            }
            NodeKind::Unary(op) => self.lower_unary(node, op, line),
            NodeKind::Call => self.lower_call(node),
            ref kind => Err(CompileError::Internal(format!(
                "unexpected expression node {kind:?} at line {line}"
            ))),
        }
    }

    fn lower_unary(&mut self, node: NodeId, op: UnaryOp, line: u32) -> CompileResult<ValueId> {
        let operand = self.ast.children(node)[0];
        match op {
            UnaryOp::Plus => self.lower_expr(operand),
            UnaryOp::Neg => {
                // Double negation cancels without emitting anything.
                if let NodeKind::Unary(UnaryOp::Neg) = self.ast.node(operand).kind {
                    return self.lower_expr(self.ast.children(operand)[0]);
                }
                let src = self.lower_expr(operand)?;
                let v = self.symtab.values.get(src);
                if v.is_constant() {
                    return Ok(match v.ty {
                        ScalarType::Float => {
                            let x = v.float_val;
                            self.symtab.const_float(-x)
                        }
                        _ => {
                            let x = v.int_val;
                            self.symtab.const_int(x.wrapping_neg())
                        }
                    });
                }
                self.require_function(line)?;
                let ty = v.ty;
                let dst = self.symtab.new_temp(ty);
                self.symtab.emit(Instruction::Assign {
                    dst,
                    src,
                    mode: AssignMode::Negate,
                });
                Ok(dst)
            }
            UnaryOp::Not => {
                if let NodeKind::Unary(UnaryOp::Not) = self.ast.node(operand).kind {
                    return self.lower_expr(self.ast.children(operand)[0]);
                }
                let src = self.lower_expr(operand)?;
                let v = self.symtab.values.get(src);
                if v.is_constant() {
                    let truthy = match v.ty {
                        ScalarType::Float => v.float_val != 0.0,
                        _ => v.int_val != 0,
                    };
                    return Ok(self.symtab.const_int(i32::from(!truthy)));
                }
                let zero = self.symtab.const_int(0);
                self.emit_binary(BinaryOp::Eq, src, zero, line)
            }
        }
    }

    /// Runtime expression lowering is only legal inside a function body;
    /// file-scope positions must have folded away by this point.
    fn require_function(&self, line: u32) -> CompileResult<()> {
        if self.symtab.current_function.is_none() {
            return Err(CompileError::ConstantExpressionRequired { line });
        }
        Ok(())
    }

    /// Emits (or folds) a non-short-circuit binary operation.
    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        line: u32,
    ) -> CompileResult<ValueId> {
        if let Some(folded) = self.fold_binary(op, lhs, rhs, line)? {
            return Ok(folded);
        }
        self.require_function(line)?;
        let ty = if op.is_comparison() {
            ScalarType::Bool
        } else {
            let l = self.symtab.values.get(lhs).ty;
            let r = self.symtab.values.get(rhs).ty;
            if l == ScalarType::Float || r == ScalarType::Float {
                ScalarType::Float
            } else {
                ScalarType::Int
            }
        };
        let dst = self.symtab.new_temp(ty);
        self.symtab.emit(Instruction::Binary {
            op,
            dst,
            src1: lhs,
            src2: rhs,
        });
        Ok(dst)
    }

    /// Folds `lhs op rhs` when both operands are constants. Division or
    /// modulo by a constant zero is a hard error, never a placeholder value.
    fn fold_binary(
        &mut self,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        line: u32,
    ) -> CompileResult<Option<ValueId>> {
        let l = self.symtab.values.get(lhs);
        let r = self.symtab.values.get(rhs);
        if !(l.is_constant() && r.is_constant()) {
            return Ok(None);
        }

        let float = l.ty == ScalarType::Float || r.ty == ScalarType::Float;
        if float {
            let a = if l.ty == ScalarType::Float {
                l.float_val
            } else {
                l.int_val as f32
            };
            let b = if r.ty == ScalarType::Float {
                r.float_val
            } else {
                r.int_val as f32
            };
            let folded = match op {
                BinaryOp::Add => self.symtab.const_float(a + b),
                BinaryOp::Sub => self.symtab.const_float(a - b),
                BinaryOp::Mul => self.symtab.const_float(a * b),
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(CompileError::DivisionByZero { line });
                    }
                    self.symtab.const_float(a / b)
                }
                BinaryOp::Mod => {
                    return Err(CompileError::Internal(format!(
                        "modulo on float operands at line {line}"
                    )))
                }
                BinaryOp::Lt => self.symtab.const_int(i32::from(a < b)),
                BinaryOp::Gt => self.symtab.const_int(i32::from(a > b)),
                BinaryOp::Le => self.symtab.const_int(i32::from(a <= b)),
                BinaryOp::Ge => self.symtab.const_int(i32::from(a >= b)),
                BinaryOp::Eq => self.symtab.const_int(i32::from(a == b)),
                BinaryOp::Ne => self.symtab.const_int(i32::from(a != b)),
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    unreachable!("short-circuit operators never reach fold_binary")
                }
            };
            return Ok(Some(folded));
        }

        let (a, b) = (l.int_val, r.int_val);
        let folded = match op {
            BinaryOp::Add => self.symtab.const_int(a.wrapping_add(b)),
            BinaryOp::Sub => self.symtab.const_int(a.wrapping_sub(b)),
            BinaryOp::Mul => self.symtab.const_int(a.wrapping_mul(b)),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(CompileError::DivisionByZero { line });
                }
                self.symtab.const_int(a.wrapping_div(b))
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(CompileError::DivisionByZero { line });
                }
                self.symtab.const_int(a.wrapping_rem(b))
            }
            BinaryOp::Lt => self.symtab.const_int(i32::from(a < b)),
            BinaryOp::Gt => self.symtab.const_int(i32::from(a > b)),
            BinaryOp::Le => self.symtab.const_int(i32::from(a <= b)),
            BinaryOp::Ge => self.symtab.const_int(i32::from(a >= b)),
            BinaryOp::Eq => self.symtab.const_int(i32::from(a == b)),
            BinaryOp::Ne => self.symtab.const_int(i32::from(a != b)),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                unreachable!("short-circuit operators never reach fold_binary")
            }
        };
        Ok(Some(folded))
    }

    /* Conditions and short-circuit lowering */

    /// Lowers an expression in condition position: instead of producing a
    /// value, control is routed to one of the two target labels.
    fn lower_condition(&mut self, node: NodeId, targets: ConditionTargets) -> CompileResult<()> {
        let line = self.ast.node(node).line;
        match self.ast.node(node).kind {
            NodeKind::Binary(BinaryOp::LogicalAnd) => {
                let children = self.ast.children(node).to_vec();
                let second = self.symtab.new_label();
                self.lower_condition(
                    children[0],
                    ConditionTargets {
                        on_true: second,
                        on_false: targets.on_false,
                    },
                )?;
                self.symtab.emit(Instruction::Label(second));
                self.lower_condition(children[1], targets)
            }
            NodeKind::Binary(BinaryOp::LogicalOr) => {
                let children = self.ast.children(node).to_vec();
                let second = self.symtab.new_label();
                self.lower_condition(
                    children[0],
                    ConditionTargets {
                        on_true: targets.on_true,
                        on_false: second,
                    },
                )?;
                self.symtab.emit(Instruction::Label(second));
                self.lower_condition(children[1], targets)
            }
            NodeKind::Unary(UnaryOp::Not) => {
                let operand = self.ast.children(node)[0];
                self.lower_condition(operand, targets.swapped())
            }
            NodeKind::Binary(op) if op.is_comparison() => {
                let children = self.ast.children(node).to_vec();
                let lhs = self.lower_expr(children[0])?;
                let rhs = self.lower_expr(children[1])?;
                let cond = self.emit_binary(op, lhs, rhs, line)?;
                self.branch_on(cond, targets);
                Ok(())
            }
            _ => {
                let value = self.lower_expr(node)?;
                let v = self.symtab.values.get(value);
                if v.is_constant() || v.ty == ScalarType::Bool {
                    self.branch_on(value, targets);
                    return Ok(());
                }
                // Arbitrary numeric condition: compare against zero first.
                let zero = self.symtab.const_int(0);
                let cond = self.emit_binary(BinaryOp::Ne, value, zero, line)?;
                self.branch_on(cond, targets);
                Ok(())
            }
        }
    }

    /// A conditional branch on `cond`, folded to an unconditional branch
    /// when the condition is a known constant.
    fn branch_on(&mut self, cond: ValueId, targets: ConditionTargets) {
        let v = self.symtab.values.get(cond);
        if v.is_constant() {
            let truthy = match v.ty {
                ScalarType::Float => v.float_val != 0.0,
                _ => v.int_val != 0,
            };
            let target = if truthy {
                targets.on_true
            } else {
                targets.on_false
            };
            self.symtab.emit(Instruction::Branch { target });
            return;
        }
        self.symtab.emit(Instruction::CondBranch {
            cond,
            true_target: targets.on_true,
            false_target: targets.on_false,
        });
    }

    /// A short-circuit expression in value position: route control through
    /// the condition network, then converge on a single boolean temporary.
    /// Only this outermost expression materializes a value.
    fn materialize_boolean(&mut self, node: NodeId) -> CompileResult<ValueId> {
        self.require_function(self.ast.node(node).line)?;
        let true_label = self.symtab.new_label();
        let false_label = self.symtab.new_label();
        let join_label = self.symtab.new_label();
        let dst = self.symtab.new_temp(ScalarType::Bool);

        self.lower_condition(
            node,
            ConditionTargets {
                on_true: true_label,
                on_false: false_label,
            },
        )?;

        let one = self.symtab.const_int(1);
        let zero = self.symtab.const_int(0);
        self.symtab.emit(Instruction::Label(true_label));
        self.symtab.emit(Instruction::Assign {
            dst,
            src: one,
            mode: AssignMode::Plain,
        });
        self.symtab.emit(Instruction::Branch { target: join_label });
        self.symtab.emit(Instruction::Label(false_label));
        self.symtab.emit(Instruction::Assign {
            dst,
            src: zero,
            mode: AssignMode::Plain,
        });
        self.symtab.emit(Instruction::Branch { target: join_label });
        self.symtab.emit(Instruction::Label(join_label));
        Ok(dst)
    }

    /* Array addressing */

    /// Lowers `name[i]...[k]` to an address computation. Full indexing
    /// yields a pointer temporary for the selected element; partial indexing
    /// yields a pointer carrying the sub-array's descriptor.
    fn lower_indexed_address(&mut self, node: NodeId) -> CompileResult<ValueId> {
        let name = self.ast.name_of(node);
        let line = self.ast.node(node).line;
        self.require_function(line)?;
        let base = self.resolve(name, line)?;
        let descriptor = self
            .symtab
            .values
            .get(base)
            .array
            .clone()
            .ok_or(CompileError::NotAnArray { name, line })?;

        let index_nodes = self.ast.children(node).to_vec();
        if index_nodes.len() > descriptor.rank() {
            return Err(CompileError::Internal(format!(
                "'{name}' indexed with {} subscripts but has rank {} at line {line}",
                index_nodes.len(),
                descriptor.rank()
            )));
        }

        // offset = sum of index[d] * stride(d), in elements. Constant terms
        // fold into a running literal; variable terms emit multiply-adds.
        let mut acc: Option<ValueId> = None;
        for (d, &index) in index_nodes.iter().enumerate() {
            let index_value = self.lower_expr(index)?;
            let stride = descriptor.stride(d) as i32;
            let stride_const = self.symtab.const_int(stride);
            let term = self.emit_binary(BinaryOp::Mul, index_value, stride_const, line)?;
            acc = Some(match acc {
                None => term,
                Some(prev) => self.emit_binary(BinaryOp::Add, prev, term, line)?,
            });
        }
        let elements = acc.ok_or_else(|| {
            CompileError::Internal(format!("'{name}' indexed without subscripts at line {line}"))
        })?;

        let elem_ty = self.symtab.values.get(base).ty;
        let scale = self.symtab.const_int(elem_ty.size());
        let byte_offset = self.emit_binary(BinaryOp::Mul, elements, scale, line)?;

        let addr = self.symtab.new_temp(elem_ty);
        {
            let v = self.symtab.values.get_mut(addr);
            v.is_pointer = true;
            if index_nodes.len() < descriptor.rank() {
                v.array = Some(descriptor.strip_leading(index_nodes.len()));
            }
        }
        self.symtab.emit(Instruction::Binary {
            op: BinaryOp::Add,
            dst: addr,
            src1: base,
            src2: byte_offset,
        });
        Ok(addr)
    }

    /* Calls */

    fn lower_call(&mut self, node: NodeId) -> CompileResult<ValueId> {
        let callee = self.ast.name_of(node);
        let line = self.ast.node(node).line;
        let signature = self
            .symtab
            .signature_of(callee)
            .ok_or(CompileError::UnknownFunction { name: callee, line })?;

        let arg_nodes = self.ast.children(node).to_vec();
        if arg_nodes.len() != signature.params.len() {
            return Err(CompileError::ArgumentCountMismatch {
                name: callee,
                expected: signature.params.len(),
                actual: arg_nodes.len(),
                line,
            });
        }

        // Arguments lower right to left, matching the push order the
        // backend marshals them in.
        let mut args = vec![None; arg_nodes.len()];
        for (position, &arg) in arg_nodes.iter().enumerate().rev() {
            args[position] = Some(self.lower_expr(arg)?);
        }
        let args: Vec<ValueId> = args.into_iter().map(Option::unwrap).collect();

        for (position, (&arg, param)) in args.iter().zip(&signature.params).enumerate() {
            let v = self.symtab.values.get(arg);
            let compatible = if param.is_array {
                v.is_array()
            } else {
                !v.is_array()
                    && match (param.ty, v.ty) {
                        (ScalarType::Float, t) | (t, ScalarType::Float) => t == ScalarType::Float,
                        _ => true,
                    }
            };
            if !compatible {
                return Err(CompileError::ArgumentTypeMismatch {
                    name: callee,
                    position,
                    line,
                });
            }
        }

        let func = self
            .symtab
            .current_function
            .ok_or(CompileError::ConstantExpressionRequired { line })?;
        self.symtab.function_mut(func).note_call_args(args.len());

        // Result temporaries are allocated even for void callees so every
        // call site looks the same to the backend.
        let result = self.symtab.new_temp(signature.return_type);
        self.symtab.emit(Instruction::Call {
            callee,
            args,
            result,
        });
        Ok(result)
    }

    /* Helpers */

    fn current(&self) -> crate::middle::function::FunctionId {
        self.symtab
            .current_function
            .expect("statement lowering runs inside a function body")
    }

    /// Name resolution: scope chain, then parameters, then file scope.
    fn resolve(&self, name: Symbol, line: u32) -> CompileResult<ValueId> {
        if let Some(func) = self.symtab.current() {
            if let Some(value) = func.lookup(name) {
                return Ok(value);
            }
        }
        self.symtab
            .lookup_global(name)
            .ok_or(CompileError::UndeclaredIdentifier { name, line })
    }

    fn bind(&mut self, name: Symbol, value: ValueId, line: u32) -> CompileResult<()> {
        if self.symtab.current_function.is_some() {
            let func = self.current();
            if !self.symtab.function_mut(func).declare(name, value) {
                return Err(CompileError::Redeclaration { name, line });
            }
            Ok(())
        } else {
            // Constant declarations at file scope share the globals
            // namespace even though the binding is a pool constant.
            self.symtab
                .bind_global_alias(name, value)
                .then_some(())
                .ok_or(CompileError::Redeclaration { name, line })
        }
    }

    /// Evaluates an array dimension, which must fold to a positive integer.
    fn fold_dimension(&mut self, node: NodeId) -> CompileResult<usize> {
        let line = self.ast.node(node).line;
        let value = self.lower_expr(node)?;
        let v = self.symtab.values.get(value);
        if !v.is_constant() || v.ty == ScalarType::Float || v.int_val <= 0 {
            return Err(CompileError::NonConstantDimension { line });
        }
        Ok(v.int_val as usize)
    }

    /// Re-types a constant initializer to the declared scalar type.
    fn coerce_constant(&mut self, value: ValueId, ty: ScalarType) -> ValueId {
        let v = self.symtab.values.get(value);
        match (ty, v.ty) {
            (ScalarType::Float, ScalarType::Float) => value,
            (ScalarType::Float, _) => {
                let x = v.int_val;
                self.symtab.const_float(x as f32)
            }
            (_, ScalarType::Float) => {
                let x = v.float_val;
                self.symtab.const_int(x as i32)
            }
            _ => value,
        }
    }
}

/// Running state of one structured-initializer walk.
struct InitWalk {
    name: Symbol,
    value: ValueId,
    offset: usize,
    in_function: bool,
}

impl IrGenerator<'_> {
    fn descriptor_of(&self, value: ValueId) -> &ArrayDescriptor {
        self.symtab
            .values
            .get(value)
            .array
            .as_ref()
            .expect("initializer walk targets an array")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::ast::AstBuilder,
        middle::{ir::pretty_print, value::ValueKind},
    };

    fn lower(build: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>) -> (Ast, SymbolTable) {
        let (ast, symtab, result) = try_lower(build);
        result.expect("lowering should succeed");
        (ast, symtab)
    }

    fn try_lower(
        build: impl FnOnce(&mut AstBuilder) -> Vec<NodeId>,
    ) -> (Ast, SymbolTable, CompileResult<()>) {
        let mut b = AstBuilder::new();
        let top = build(&mut b);
        let ast = b.finish(top);
        let mut symtab = SymbolTable::new();
        let result = lower_compile_unit(&ast, &mut symtab);
        (ast, symtab, result)
    }

    /// `int main() { return 2 * 3 + 4; }` folds to a single constant.
    #[test]
    fn constant_expressions_fold_during_lowering() {
        let (_, symtab) = lower(|b| {
            let two = b.int_lit(2);
            let three = b.int_lit(3);
            let four = b.int_lit(4);
            let mul = b.binary(BinaryOp::Mul, two, three);
            let add = b.binary(BinaryOp::Add, mul, four);
            let ret = b.return_stmt(Some(add));
            let body = b.block(vec![ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });

        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        assert!(
            !func
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Binary { .. })),
            "folded expression must not emit arithmetic"
        );
        let returned = func
            .instructions
            .iter()
            .find_map(|i| match i {
                Instruction::Assign { src, .. } => Some(*src),
                _ => None,
            })
            .unwrap();
        assert_eq!(symtab.values.get(returned).int_val, 10);
    }

    #[test]
    fn division_by_constant_zero_is_rejected() {
        let (_, _, result) = try_lower(|b| {
            let one = b.int_lit(1);
            let zero = b.int_lit(0);
            b.at_line(3);
            let div = b.binary(BinaryOp::Div, one, zero);
            let ret = b.return_stmt(Some(div));
            let body = b.block(vec![ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });
        assert_eq!(result, Err(CompileError::DivisionByZero { line: 3 }));
    }

    /// `int a[2][3] = {{1, 2, 3}, {4, 5, 6}};` at file scope fills linear
    /// offsets 0 through 5 in order.
    #[test]
    fn nested_initializer_fills_row_major_offsets() {
        let (_, symtab) = lower(|b| {
            let elems0: Vec<_> = (1..=3).map(|v| b.int_lit(v)).collect();
            let elems1: Vec<_> = (4..=6).map(|v| b.int_lit(v)).collect();
            let row0 = b.init_list(elems0);
            let row1 = b.init_list(elems1);
            let init = b.init_list(vec![row0, row1]);
            let d2 = b.int_lit(2);
            let d3 = b.int_lit(3);
            let decl = b.declarator("a", vec![d2, d3], Some(init));
            vec![b.var_decl(ScalarType::Int, vec![decl])]
        });

        let a = symtab.lookup_global(Symbol::new("a")).unwrap();
        let desc = symtab.values.get(a).array.as_ref().unwrap();
        assert_eq!(desc.dims, vec![2, 3]);
        match &desc.storage {
            ArrayStorage::Materialized(ElementBuffer::Int(buf)) => {
                assert_eq!(buf, &vec![1, 2, 3, 4, 5, 6]);
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    /// A short row in braces skips to the next stride boundary and leaves
    /// the gap zeroed.
    #[test]
    fn short_initializer_rows_are_zero_padded() {
        let (_, symtab) = lower(|b| {
            let one = b.int_lit(1);
            let four = b.int_lit(4);
            let row0 = b.init_list(vec![one]);
            let row1 = b.init_list(vec![four]);
            let init = b.init_list(vec![row0, row1]);
            let d2 = b.int_lit(2);
            let d3 = b.int_lit(3);
            let decl = b.declarator("a", vec![d2, d3], Some(init));
            vec![b.var_decl(ScalarType::Int, vec![decl])]
        });

        let a = symtab.lookup_global(Symbol::new("a")).unwrap();
        match &symtab.values.get(a).array.as_ref().unwrap().storage {
            ArrayStorage::Materialized(ElementBuffer::Int(buf)) => {
                assert_eq!(buf, &vec![1, 0, 0, 4, 0, 0]);
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    /// `int a[2] = {1, 2};` in a body fills the compile-time buffer and
    /// also stores each supplied element at runtime.
    #[test]
    fn local_array_initializer_stores_every_element() {
        let (_, symtab) = lower(|b| {
            let one = b.int_lit(1);
            let two = b.int_lit(2);
            let init = b.init_list(vec![one, two]);
            let d2 = b.int_lit(2);
            let decl = b.declarator("a", vec![d2], Some(init));
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let body = b.block(vec![decl]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });

        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        let stores = func
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instruction::Assign {
                        mode: AssignMode::StorePointer,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(stores, 2, "one pointer store per supplied element");

        let buf = func
            .locals
            .iter()
            .find_map(|&id| symtab.values.get(id).array.as_ref())
            .map(|desc| &desc.storage)
            .expect("the array local keeps its descriptor");
        match buf {
            ArrayStorage::Materialized(ElementBuffer::Int(buf)) => {
                assert_eq!(buf, &vec![1, 2]);
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    /// An indexed access without subscripts is a frontend defect; it must
    /// surface as an internal error, not a panic.
    #[test]
    fn subscript_free_indexing_is_an_internal_error() {
        let (_, _, result) = try_lower(|b| {
            let d2 = b.int_lit(2);
            let decl = b.declarator("a", vec![d2], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let access = b.indexed("a", vec![]);
            let one = b.int_lit(1);
            let assign = b.assign(access, one);
            let body = b.block(vec![decl, assign]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        assert!(matches!(result, Err(CompileError::Internal(_))));
    }

    /// `a[i][j]` lowers to stride multiplies, an add, an element-size
    /// scale, and a pointer add off the array base.
    #[test]
    fn indexing_emits_multiply_add_chain() {
        let (_, symtab) = lower(|b| {
            let d2 = b.int_lit(2);
            let d3 = b.int_lit(3);
            let decl = b.declarator("a", vec![d2, d3], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let i_decl = b.declarator("i", vec![], None);
            let i_decl = b.var_decl(ScalarType::Int, vec![i_decl]);
            let i1 = b.ident("i");
            let i2 = b.ident("i");
            let access = b.indexed("a", vec![i1, i2]);
            let ret = b.return_stmt(Some(access));
            let body = b.block(vec![decl, i_decl, ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });

        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        let binaries: Vec<_> = func
            .instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::Binary { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        // i * 3, i * 1, sum, byte scale, base + offset
        assert_eq!(
            binaries,
            vec![
                BinaryOp::Mul,
                BinaryOp::Mul,
                BinaryOp::Add,
                BinaryOp::Mul,
                BinaryOp::Add
            ]
        );
        let loads = func
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instruction::Assign {
                        mode: AssignMode::LoadPointer,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(loads, 1);
    }

    /// `if (0 && f())` must not place the call on an unconditional path:
    /// the constant left operand becomes a direct branch around it.
    #[test]
    fn constant_false_and_branches_around_the_call() {
        let (_, symtab) = lower(|b| {
            let z = b.int_lit(0);
            let ret0 = b.return_stmt(Some(z));
            let f_body = b.block(vec![ret0]);
            let f = b.function("f", ScalarType::Int, vec![], f_body);

            let zero = b.int_lit(0);
            let call = b.call("f", vec![]);
            let cond = b.binary(BinaryOp::LogicalAnd, zero, call);
            let one = b.int_lit(1);
            let x_decl = b.declarator("x", vec![], None);
            let x_decl = b.var_decl(ScalarType::Int, vec![x_decl]);
            let x = b.ident("x");
            let assign = b.assign(x, one);
            let then = b.block(vec![assign]);
            let if_stmt = b.if_stmt(cond, then, None);
            let z2 = b.int_lit(0);
            let ret = b.return_stmt(Some(z2));
            let body = b.block(vec![x_decl, if_stmt, ret]);
            let main = b.function("main", ScalarType::Int, vec![], body);
            vec![f, main]
        });

        let main = symtab.function_by_name(Symbol::new("main")).unwrap();
        // Walking the instruction stream, the first control transfer comes
        // before the call, so the call is only reachable via its label.
        let call_at = main
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::Call { .. }))
            .expect("call must still be lowered");
        let first_transfer = main
            .instructions
            .iter()
            .position(Instruction::is_control_transfer)
            .unwrap();
        assert!(first_transfer < call_at);
        assert!(matches!(
            main.instructions[first_transfer],
            Instruction::Branch { .. }
        ));
    }

    #[test]
    fn file_scope_initializers_must_fold() {
        let (_, _, result) = try_lower(|b| {
            let y_decl = b.declarator("y", vec![], None);
            let y_decl = b.var_decl(ScalarType::Int, vec![y_decl]);
            b.at_line(2);
            let y = b.ident("y");
            let one = b.int_lit(1);
            let sum = b.binary(BinaryOp::Add, y, one);
            let x_decl = b.declarator("x", vec![], Some(sum));
            let x_decl = b.var_decl(ScalarType::Int, vec![x_decl]);
            vec![y_decl, x_decl]
        });
        assert_eq!(
            result,
            Err(CompileError::ConstantExpressionRequired { line: 2 })
        );
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let (_, _, result) = try_lower(|b| {
            b.at_line(7);
            let brk = b.break_stmt();
            let body = b.block(vec![brk]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        assert_eq!(result, Err(CompileError::BreakOutsideLoop { line: 7 }));
    }

    #[test]
    fn undeclared_identifier_is_rejected() {
        let (_, _, result) = try_lower(|b| {
            b.at_line(2);
            let x = b.ident("x");
            let ret = b.return_stmt(Some(x));
            let body = b.block(vec![ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });
        assert_eq!(
            result,
            Err(CompileError::UndeclaredIdentifier {
                name: Symbol::new("x"),
                line: 2
            })
        );
    }

    #[test]
    fn call_arity_is_checked() {
        let (_, _, result) = try_lower(|b| {
            b.at_line(5);
            let one = b.int_lit(1);
            let two = b.int_lit(2);
            let call = b.call("putint", vec![one, two]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![stmt]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        assert_eq!(
            result,
            Err(CompileError::ArgumentCountMismatch {
                name: Symbol::new("putint"),
                expected: 1,
                actual: 2,
                line: 5
            })
        );
    }

    #[test]
    fn scalar_argument_rejects_array_value() {
        let (_, _, result) = try_lower(|b| {
            b.at_line(9);
            let d4 = b.int_lit(4);
            let decl = b.declarator("a", vec![d4], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let a = b.ident("a");
            let call = b.call("putint", vec![a]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![decl, stmt]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        assert_eq!(
            result,
            Err(CompileError::ArgumentTypeMismatch {
                name: Symbol::new("putint"),
                position: 0,
                line: 9
            })
        );
    }

    #[test]
    fn const_scalar_reads_fold_and_writes_are_rejected() {
        let (_, symtab) = lower(|b| {
            let ten = b.int_lit(10);
            let decl = b.declarator("N", vec![], Some(ten));
            let decl = b.const_decl(ScalarType::Int, vec![decl]);
            let n = b.ident("N");
            let two = b.int_lit(2);
            let double = b.binary(BinaryOp::Mul, n, two);
            let ret = b.return_stmt(Some(double));
            let body = b.block(vec![decl, ret]);
            vec![b.function("main", ScalarType::Int, vec![], body)]
        });
        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        assert!(
            !func
                .instructions
                .iter()
                .any(|i| matches!(i, Instruction::Binary { .. })),
            "reads of a constant must fold"
        );

        let (_, _, result) = try_lower(|b| {
            let ten = b.int_lit(10);
            let decl = b.declarator("N", vec![], Some(ten));
            let decl = b.const_decl(ScalarType::Int, vec![decl]);
            b.at_line(4);
            let n = b.ident("N");
            let one = b.int_lit(1);
            let assign = b.assign(n, one);
            let body = b.block(vec![decl, assign]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        assert_eq!(
            result,
            Err(CompileError::AssignToConstant {
                name: Symbol::new("N"),
                line: 4
            })
        );
    }

    #[test]
    fn return_type_is_inferred_from_first_return() {
        let (_, symtab) = lower(|b| {
            let x = b.float_lit(1.5);
            let ret = b.return_stmt(Some(x));
            let body = b.block(vec![ret]);
            vec![b.function("f", ScalarType::Void, vec![], body)]
        });
        let func = symtab.function_by_name(Symbol::new("f")).unwrap();
        assert_eq!(func.return_type, ScalarType::Float);
        assert!(func.return_value.is_some());
    }

    #[test]
    fn double_negation_cancels() {
        let (_, symtab) = lower(|b| {
            let p = b.formal_param("x", ScalarType::Int);
            let x = b.ident("x");
            let inner = b.unary(UnaryOp::Neg, x);
            let outer = b.unary(UnaryOp::Neg, inner);
            let ret = b.return_stmt(Some(outer));
            let body = b.block(vec![ret]);
            vec![b.function("f", ScalarType::Int, vec![p], body)]
        });
        let func = symtab.function_by_name(Symbol::new("f")).unwrap();
        assert!(!func.instructions.iter().any(|i| matches!(
            i,
            Instruction::Assign {
                mode: AssignMode::Negate,
                ..
            }
        )));
    }

    #[test]
    fn max_call_args_tracks_the_widest_call() {
        let (_, symtab) = lower(|b| {
            let d4 = b.int_lit(4);
            let decl = b.declarator("a", vec![d4], None);
            let decl = b.var_decl(ScalarType::Int, vec![decl]);
            let a = b.ident("a");
            let n = b.int_lit(4);
            let call2 = b.call("putarray", vec![a, n]);
            let stmt2 = b.expr_stmt(call2);
            let one = b.int_lit(1);
            let call1 = b.call("putint", vec![one]);
            let stmt1 = b.expr_stmt(call1);
            let body = b.block(vec![decl, stmt2, stmt1]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        assert_eq!(func.max_call_args, 2);
    }

    /// Two sessions lowering the same tree shape must render identically.
    #[test]
    fn lowering_is_deterministic_across_sessions() {
        let build = |b: &mut AstBuilder| {
            let p = b.formal_param("n", ScalarType::Int);
            let n = b.ident("n");
            let zero = b.int_lit(0);
            let cond = b.binary(BinaryOp::Gt, n, zero);
            let n2 = b.ident("n");
            let one = b.int_lit(1);
            let dec = b.binary(BinaryOp::Sub, n2, one);
            let n3 = b.ident("n");
            let assign = b.assign(n3, dec);
            let body = b.block(vec![assign]);
            let lp = b.while_stmt(cond, body);
            let n4 = b.ident("n");
            let ret = b.return_stmt(Some(n4));
            let outer = b.block(vec![lp, ret]);
            vec![b.function("f", ScalarType::Int, vec![p], outer)]
        };

        let (_, first) = lower(build);
        let (_, second) = lower(build);
        let name = Symbol::new("f");
        let a = pretty_print::dump_function(first.function_by_name(name).unwrap(), &first);
        let b = pretty_print::dump_function(second.function_by_name(name).unwrap(), &second);
        assert_eq!(a, b);
    }

    #[test]
    fn void_calls_still_allocate_a_result() {
        let (_, symtab) = lower(|b| {
            let one = b.int_lit(1);
            let call = b.call("putint", vec![one]);
            let stmt = b.expr_stmt(call);
            let body = b.block(vec![stmt]);
            vec![b.function("main", ScalarType::Void, vec![], body)]
        });
        let func = symtab.function_by_name(Symbol::new("main")).unwrap();
        let result = func
            .instructions
            .iter()
            .find_map(|i| match i {
                Instruction::Call { result, .. } => Some(*result),
                _ => None,
            })
            .unwrap();
        let v = symtab.values.get(result);
        assert_eq!(v.kind, ValueKind::Temporary);
        assert_eq!(v.ty, ScalarType::Void);
    }
}
