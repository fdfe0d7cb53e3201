//! Per-function state: formal parameters, the nested lexical scope stack
//! used for shadowing, the flat local/temporary pool, and the emitted
//! instruction list handed to the backend.

use hashbrown::HashMap;

use crate::{
    intern::Symbol,
    middle::{
        ir::{Instruction, Label},
        value::{ScalarType, ValueId},
    },
    simple_index,
};

simple_index! {
    /// Identifies a function in the session's registry
    pub struct FunctionId;
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: Symbol,
    pub value: ValueId,
}

#[derive(Debug)]
pub struct Function {
    pub name: Symbol,
    pub return_type: ScalarType,
    pub params: Vec<Param>,
    /// Every local and temporary in creation order, for backend layout
    pub locals: Vec<ValueId>,
    pub instructions: Vec<Instruction>,
    /// All `return` statements branch here; the block at this label emits
    /// the single `FunctionExit`
    pub exit_label: Label,
    pub return_value: Option<ValueId>,
    /// Largest argument count among calls lowered in this body, for stack
    /// space reservation in the backend
    pub max_call_args: usize,
    /// Innermost scope last. The outermost entry is the function body's
    /// own block.
    scopes: Vec<HashMap<Symbol, ValueId>>,
}

impl Function {
    pub fn new(name: Symbol, return_type: ScalarType, exit_label: Label) -> Self {
        Function {
            name,
            return_type,
            params: Vec::new(),
            locals: Vec::new(),
            instructions: Vec::new(),
            exit_label,
            return_value: None,
            max_call_args: 0,
            scopes: vec![HashMap::new()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn exit_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot exit the function body scope");
        self.scopes.pop();
    }

    /// Binds `name` in the innermost scope. Returns false if the name is
    /// already bound in that same scope (shadowing an outer scope is fine).
    pub fn declare(&mut self, name: Symbol, value: ValueId) -> bool {
        let scope = self.scopes.last_mut().unwrap();
        if scope.contains_key(&name) {
            return false;
        }
        scope.insert(name, value);
        true
    }

    /// Resolves `name` against the scope chain (innermost outward), then
    /// the flat parameter list. Globals are the symbol table's business.
    pub fn lookup(&self, name: Symbol) -> Option<ValueId> {
        for scope in self.scopes.iter().rev() {
            if let Some(&value) = scope.get(&name) {
                return Some(value);
            }
        }
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn note_call_args(&mut self, count: usize) {
        self.max_call_args = self.max_call_args.max(count);
    }
}
