//! Interface surface consumed from the external frontend. The lexer and
//! parser live outside this crate; they hand us a finished [`ast::Ast`].

pub mod ast;
