//! Linear three-address IR. In this form, loops and conditionals are
//! simplified to labels and branches, and expression trees are flattened
//! into ordered operations over [`ValueId`] operands.

use crate::{
    frontend::ast::BinaryOp,
    intern::Symbol,
    middle::value::ValueId,
};

pub mod lowering;
pub mod pretty_print;

/// A branch target. Label names are unique within their function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub Symbol);

impl Label {
    pub fn new(name: &str) -> Self {
        Label(Symbol::new(name))
    }

    pub fn name(&self) -> &'static str {
        self.0.value()
    }
}

/// Flavor of an [`Instruction::Assign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// `dst = src`
    Plain,
    /// `dst = *src` — src holds an element address
    LoadPointer,
    /// `*dst = src` — dst holds an element address
    StorePointer,
    /// `dst = neg src`
    Negate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Label(Label),
    Binary {
        op: BinaryOp,
        dst: ValueId,
        src1: ValueId,
        src2: ValueId,
    },
    Assign {
        dst: ValueId,
        src: ValueId,
        mode: AssignMode,
    },
    Branch {
        target: Label,
    },
    CondBranch {
        cond: ValueId,
        true_target: Label,
        false_target: Label,
    },
    Call {
        callee: Symbol,
        args: Vec<ValueId>,
        /// Allocated even for void callees so every call site is uniform;
        /// the backend discards unused results.
        result: ValueId,
    },
    FunctionEntry,
    FunctionExit {
        value: Option<ValueId>,
    },
    Phi {
        dst: ValueId,
        /// One operand per predecessor, tagged with the predecessor's label
        sources: Vec<(ValueId, Label)>,
    },
}

impl Instruction {
    /// The value this instruction defines, if any. Stores through a pointer
    /// write memory, not the pointer temporary, so they define nothing.
    pub fn defined_value(&self) -> Option<ValueId> {
        match self {
            Instruction::Binary { dst, .. } => Some(*dst),
            Instruction::Assign {
                mode: AssignMode::StorePointer,
                ..
            } => None,
            Instruction::Assign { dst, .. } => Some(*dst),
            Instruction::Call { result, .. } => Some(*result),
            Instruction::Phi { dst, .. } => Some(*dst),
            Instruction::Label(_)
            | Instruction::Branch { .. }
            | Instruction::CondBranch { .. }
            | Instruction::FunctionEntry
            | Instruction::FunctionExit { .. } => None,
        }
    }

    /// The values this instruction reads. Phi operands are excluded; they
    /// are renamed from the predecessor side during SSA construction.
    pub fn used_values(&self) -> Vec<ValueId> {
        match self {
            Instruction::Binary { src1, src2, .. } => vec![*src1, *src2],
            Instruction::Assign {
                dst,
                src,
                mode: AssignMode::StorePointer,
            } => vec![*dst, *src],
            Instruction::Assign { src, .. } => vec![*src],
            Instruction::CondBranch { cond, .. } => vec![*cond],
            Instruction::Call { args, .. } => args.clone(),
            Instruction::FunctionExit { value } => value.iter().copied().collect(),
            Instruction::Label(_)
            | Instruction::Branch { .. }
            | Instruction::FunctionEntry
            | Instruction::Phi { .. } => vec![],
        }
    }

    /// Rewrites every used operand through `f`. Phi operands are exempt,
    /// matching [`Instruction::used_values`].
    pub fn replace_uses(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Instruction::Binary { src1, src2, .. } => {
                *src1 = f(*src1);
                *src2 = f(*src2);
            }
            Instruction::Assign {
                dst,
                src,
                mode: AssignMode::StorePointer,
            } => {
                *dst = f(*dst);
                *src = f(*src);
            }
            Instruction::Assign { src, .. } => *src = f(*src),
            Instruction::CondBranch { cond, .. } => *cond = f(*cond),
            Instruction::Call { args, .. } => {
                for arg in args {
                    *arg = f(*arg);
                }
            }
            Instruction::FunctionExit { value: Some(value) } => *value = f(*value),
            Instruction::Label(_)
            | Instruction::Branch { .. }
            | Instruction::FunctionEntry
            | Instruction::FunctionExit { value: None }
            | Instruction::Phi { .. } => {}
        }
    }

    /// Rewrites the defined value. No-op for instructions without one.
    pub fn replace_def(&mut self, new: ValueId) {
        match self {
            Instruction::Binary { dst, .. } => *dst = new,
            Instruction::Assign {
                mode: AssignMode::StorePointer,
                ..
            } => {}
            Instruction::Assign { dst, .. } => *dst = new,
            Instruction::Call { result, .. } => *result = new,
            Instruction::Phi { dst, .. } => *dst = new,
            Instruction::Label(_)
            | Instruction::Branch { .. }
            | Instruction::CondBranch { .. }
            | Instruction::FunctionEntry
            | Instruction::FunctionExit { .. } => {}
        }
    }

    /// Whether control cannot fall through past this instruction.
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self,
            Instruction::Branch { .. }
                | Instruction::CondBranch { .. }
                | Instruction::FunctionExit { .. }
        )
    }

    /// Branch targets in (true, false) order for conditionals.
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Instruction::Branch { target } => vec![*target],
            Instruction::CondBranch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            _ => vec![],
        }
    }
}
