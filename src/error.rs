use thiserror::Error;

use crate::intern::Symbol;

pub type CompileResult<T> = Result<T, CompileError>;

/// A fatal compilation error. The first error raised anywhere in lowering or
/// analysis aborts the whole compilation; there is no multi-error recovery.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("line {line}: use of undeclared identifier '{name}'")]
    UndeclaredIdentifier { name: Symbol, line: u32 },

    #[error("line {line}: redeclaration of '{name}' in the same scope")]
    Redeclaration { name: Symbol, line: u32 },

    #[error("line {line}: function '{name}' defined inside another function")]
    NestedFunction { name: Symbol, line: u32 },

    #[error("line {line}: duplicate definition of function '{name}'")]
    DuplicateFunction { name: Symbol, line: u32 },

    #[error("line {line}: call to unknown function '{name}'")]
    UnknownFunction { name: Symbol, line: u32 },

    #[error("line {line}: 'break' used outside of a loop")]
    BreakOutsideLoop { line: u32 },

    #[error("line {line}: 'continue' used outside of a loop")]
    ContinueOutsideLoop { line: u32 },

    #[error("line {line}: '{name}' expects {expected} argument(s) but {actual} were supplied")]
    ArgumentCountMismatch {
        name: Symbol,
        expected: usize,
        actual: usize,
        line: u32,
    },

    #[error("line {line}: argument {position} of '{name}' has the wrong type")]
    ArgumentTypeMismatch {
        name: Symbol,
        position: usize,
        line: u32,
    },

    #[error("line {line}: division by zero in a constant expression")]
    DivisionByZero { line: u32 },

    #[error("line {line}: array dimension is not a compile-time constant")]
    NonConstantDimension { line: u32 },

    #[error("line {line}: initializer for '{name}' must be a compile-time constant")]
    NonConstantInitializer { name: Symbol, line: u32 },

    #[error("line {line}: expression is not a compile-time constant")]
    ConstantExpressionRequired { line: u32 },

    #[error("line {line}: '{name}' is not an array but is indexed")]
    NotAnArray { name: Symbol, line: u32 },

    #[error("line {line}: assignment to constant '{name}'")]
    AssignToConstant { name: Symbol, line: u32 },

    #[error("internal error: {0}")]
    Internal(String),
}
