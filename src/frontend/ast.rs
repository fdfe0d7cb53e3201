//! The abstract syntax tree handed over by the frontend. Nodes live in an
//! arena and refer to each other by [`NodeId`], so the lowering can walk
//! parents and children freely without owning references. The middle end
//! treats the tree as read-only.

use strum::Display;

use crate::{index::IndexVec, intern::Symbol, middle::value::ScalarType, simple_index};

simple_index! {
    /// Identifies an AST node within one tree
    pub struct NodeId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "mod")]
    Mod,
    #[strum(serialize = "icmp lt")]
    Lt,
    #[strum(serialize = "icmp gt")]
    Gt,
    #[strum(serialize = "icmp le")]
    Le,
    #[strum(serialize = "icmp ge")]
    Ge,
    #[strum(serialize = "icmp eq")]
    Eq,
    #[strum(serialize = "icmp ne")]
    Ne,
    #[strum(serialize = "and")]
    LogicalAnd,
    #[strum(serialize = "or")]
    LogicalOr,
}

impl BinaryOp {
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "plus")]
    Plus,
}

/// Discriminated node kind. The comments note the expected children.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Root; children are global declarations and function definitions
    CompileUnit,
    /// `name` = function name, `ty` = return type;
    /// children: `[FormalParams, Block]`
    FunctionDef,
    FormalParams,
    /// `name` + `ty`; for arrays the children are the *trailing* dimension
    /// expressions (the leading dimension of a parameter array is unknown)
    FormalParam { is_array: bool },
    Block,
    /// `ty` = declared element type; children are declarators
    VarDecl { is_const: bool },
    /// `name`; children: dimension expressions, then (if `has_init`) one
    /// final initializer expression or `InitList`
    Declarator { has_init: bool },
    /// One level of braces in a structured array initializer
    InitList,
    /// children: `[lvalue, expr]`
    Assign,
    /// children: `[expr]` — an expression evaluated for effect
    ExprStmt,
    /// children: `[cond, then]` or `[cond, then, else]`
    If,
    /// children: `[cond, body]`
    While,
    Break,
    Continue,
    /// children: `[]` or `[expr]`
    Return,
    Binary(BinaryOp),
    Unary(UnaryOp),
    /// `name` = callee; children are argument expressions
    Call,
    /// `name`; leaf
    Ident,
    /// `name`; children are subscript expressions
    IndexedIdent,
    IntLiteral(i32),
    FloatLiteral(f32),
}

#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: NodeKind,
    pub ty: ScalarType,
    pub line: u32,
    pub name: Option<Symbol>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

#[derive(Debug)]
pub struct Ast {
    nodes: IndexVec<NodeId, AstNode>,
    root: NodeId,
}

impl Ast {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The symbol attached to a leaf, panicking on malformed trees. Only
    /// used after the frontend guarantees the node carries a name.
    pub fn name_of(&self, id: NodeId) -> Symbol {
        self.nodes[id]
            .name
            .expect("frontend guarantees this node kind carries a name")
    }
}

/// Builds an [`Ast`] bottom-up. This is the programmatic stand-in for the
/// external parser, used by tests and by any embedding frontend.
#[derive(Debug, Default)]
pub struct AstBuilder {
    nodes: IndexVec<NodeId, AstNode>,
    line: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source line recorded on subsequently created nodes.
    pub fn at_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn add(
        &mut self,
        kind: NodeKind,
        ty: ScalarType,
        name: Option<Symbol>,
        children: Vec<NodeId>,
    ) -> NodeId {
        let id = self.nodes.next_index();
        for &child in &children {
            self.nodes[child].parent = Some(id);
        }
        self.nodes.push(AstNode {
            kind,
            ty,
            line: self.line,
            name,
            children,
            parent: None,
        })
    }

    pub fn int_lit(&mut self, value: i32) -> NodeId {
        self.add(NodeKind::IntLiteral(value), ScalarType::Int, None, vec![])
    }

    pub fn float_lit(&mut self, value: f32) -> NodeId {
        self.add(
            NodeKind::FloatLiteral(value),
            ScalarType::Float,
            None,
            vec![],
        )
    }

    pub fn ident(&mut self, name: &str) -> NodeId {
        self.add(NodeKind::Ident, ScalarType::Void, Some(Symbol::new(name)), vec![])
    }

    pub fn indexed(&mut self, name: &str, indices: Vec<NodeId>) -> NodeId {
        self.add(
            NodeKind::IndexedIdent,
            ScalarType::Void,
            Some(Symbol::new(name)),
            indices,
        )
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add(NodeKind::Binary(op), ScalarType::Void, None, vec![lhs, rhs])
    }

    pub fn unary(&mut self, op: UnaryOp, operand: NodeId) -> NodeId {
        self.add(NodeKind::Unary(op), ScalarType::Void, None, vec![operand])
    }

    pub fn call(&mut self, name: &str, args: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Call, ScalarType::Void, Some(Symbol::new(name)), args)
    }

    pub fn assign(&mut self, lvalue: NodeId, expr: NodeId) -> NodeId {
        self.add(NodeKind::Assign, ScalarType::Void, None, vec![lvalue, expr])
    }

    pub fn expr_stmt(&mut self, expr: NodeId) -> NodeId {
        self.add(NodeKind::ExprStmt, ScalarType::Void, None, vec![expr])
    }

    pub fn declarator(&mut self, name: &str, dims: Vec<NodeId>, init: Option<NodeId>) -> NodeId {
        let has_init = init.is_some();
        let mut children = dims;
        children.extend(init);
        self.add(
            NodeKind::Declarator { has_init },
            ScalarType::Void,
            Some(Symbol::new(name)),
            children,
        )
    }

    pub fn var_decl(&mut self, ty: ScalarType, declarators: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::VarDecl { is_const: false }, ty, None, declarators)
    }

    pub fn const_decl(&mut self, ty: ScalarType, declarators: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::VarDecl { is_const: true }, ty, None, declarators)
    }

    pub fn init_list(&mut self, elements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::InitList, ScalarType::Void, None, elements)
    }

    pub fn block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Block, ScalarType::Void, None, statements)
    }

    pub fn if_stmt(&mut self, cond: NodeId, then: NodeId, els: Option<NodeId>) -> NodeId {
        let mut children = vec![cond, then];
        children.extend(els);
        self.add(NodeKind::If, ScalarType::Void, None, children)
    }

    pub fn while_stmt(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        self.add(NodeKind::While, ScalarType::Void, None, vec![cond, body])
    }

    pub fn break_stmt(&mut self) -> NodeId {
        self.add(NodeKind::Break, ScalarType::Void, None, vec![])
    }

    pub fn continue_stmt(&mut self) -> NodeId {
        self.add(NodeKind::Continue, ScalarType::Void, None, vec![])
    }

    pub fn return_stmt(&mut self, value: Option<NodeId>) -> NodeId {
        let children = value.into_iter().collect();
        self.add(NodeKind::Return, ScalarType::Void, None, children)
    }

    pub fn formal_param(&mut self, name: &str, ty: ScalarType) -> NodeId {
        self.add(
            NodeKind::FormalParam { is_array: false },
            ty,
            Some(Symbol::new(name)),
            vec![],
        )
    }

    /// An array-typed formal parameter. `trailing_dims` are the dimension
    /// expressions after the omitted leading dimension, so `int a[][3]`
    /// passes one expression.
    pub fn formal_array_param(
        &mut self,
        name: &str,
        ty: ScalarType,
        trailing_dims: Vec<NodeId>,
    ) -> NodeId {
        self.add(
            NodeKind::FormalParam { is_array: true },
            ty,
            Some(Symbol::new(name)),
            trailing_dims,
        )
    }

    pub fn function(
        &mut self,
        name: &str,
        return_ty: ScalarType,
        params: Vec<NodeId>,
        body: NodeId,
    ) -> NodeId {
        let params = self.add(NodeKind::FormalParams, ScalarType::Void, None, params);
        self.add(
            NodeKind::FunctionDef,
            return_ty,
            Some(Symbol::new(name)),
            vec![params, body],
        )
    }

    pub fn finish(mut self, top_level: Vec<NodeId>) -> Ast {
        let root = self.add(NodeKind::CompileUnit, ScalarType::Void, None, top_level);
        Ast {
            nodes: self.nodes,
            root,
        }
    }
}
