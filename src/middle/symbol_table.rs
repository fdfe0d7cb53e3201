//! The global scope of one compilation session: global variables, the
//! deduplicated constant pool, the function registry (builtins included),
//! and the naming counters for temporaries, locals, globals, and labels.
//! All of this is per-session state so several compilations can run in one
//! process without contaminating each other.

use hashbrown::HashMap;

use crate::{
    index::IndexVec,
    intern::Symbol,
    middle::{
        function::{Function, FunctionId},
        ir::{Instruction, Label},
        value::{ArrayDescriptor, ScalarType, Value, ValueArena, ValueId, ValueKind},
    },
};

/// One formal-parameter slot in a callable's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSig {
    pub ty: ScalarType,
    pub is_array: bool,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<ParamSig>,
    pub return_type: ScalarType,
}

#[derive(Debug, Default)]
struct NameCounters {
    temp: u32,
    local: u32,
    global: u32,
    label: u32,
}

#[derive(Debug)]
pub struct SymbolTable {
    pub values: ValueArena,
    globals: HashMap<Symbol, ValueId>,
    global_order: Vec<ValueId>,
    /// Constants deduplicated by literal text
    constants: HashMap<Symbol, ValueId>,
    functions: IndexVec<FunctionId, Function>,
    function_ids: HashMap<Symbol, FunctionId>,
    builtins: HashMap<Symbol, Signature>,
    /// Active-function cursor, set for the duration of one body's lowering
    pub current_function: Option<FunctionId>,
    counters: NameCounters,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable {
            values: ValueArena::new(),
            globals: HashMap::new(),
            global_order: Vec::new(),
            constants: HashMap::new(),
            functions: IndexVec::new(),
            function_ids: HashMap::new(),
            builtins: HashMap::new(),
            current_function: None,
            counters: NameCounters::default(),
        };
        table.register_builtins();
        table
    }

    /// The runtime-library functions every program may call.
    fn register_builtins(&mut self) {
        let int = |is_array| ParamSig {
            ty: ScalarType::Int,
            is_array,
        };
        let float = ParamSig {
            ty: ScalarType::Float,
            is_array: false,
        };

        let builtins: &[(&str, Vec<ParamSig>, ScalarType)] = &[
            ("putint", vec![int(false)], ScalarType::Void),
            ("putch", vec![int(false)], ScalarType::Void),
            ("getint", vec![], ScalarType::Int),
            ("getch", vec![], ScalarType::Int),
            ("putfloat", vec![float], ScalarType::Void),
            ("getfloat", vec![], ScalarType::Float),
            ("getarray", vec![int(true)], ScalarType::Int),
            ("putarray", vec![int(true), int(false)], ScalarType::Void),
        ];

        for (name, params, return_type) in builtins {
            self.builtins.insert(
                Symbol::new(name),
                Signature {
                    params: params.clone(),
                    return_type: *return_type,
                },
            );
        }
    }

    /* Name minting */

    fn mint(&mut self, prefix: &str, counter: u32) -> Symbol {
        Symbol::new(&format!("{prefix}{counter}"))
    }

    pub fn new_label(&mut self) -> Label {
        let n = self.counters.label;
        self.counters.label += 1;
        Label(self.mint(".L", n))
    }

    /* Value creation */

    /// A fresh temporary, registered with the active function when there is
    /// one (constant folding at global scope also needs scratch values).
    pub fn new_temp(&mut self, ty: ScalarType) -> ValueId {
        let n = self.counters.temp;
        self.counters.temp += 1;
        let name = self.mint("%t", n);
        let id = self.values.alloc(Value::new(name, ValueKind::Temporary, ty));
        if let Some(func) = self.current_function {
            self.functions[func].locals.push(id);
        }
        id
    }

    /// A fresh user local. `name` is the source identifier used for scope
    /// lookup; the value itself gets an internal `%l` name.
    pub fn new_local(&mut self, ty: ScalarType) -> ValueId {
        let n = self.counters.local;
        self.counters.local += 1;
        let name = self.mint("%l", n);
        let id = self.values.alloc(Value::new(name, ValueKind::Local, ty));
        if let Some(func) = self.current_function {
            self.functions[func].locals.push(id);
        }
        id
    }

    pub fn new_global_value(&mut self, ty: ScalarType) -> ValueId {
        let n = self.counters.global;
        self.counters.global += 1;
        let name = self.mint("%g", n);
        self.values.alloc(Value::new(name, ValueKind::Global, ty))
    }

    /// Integer constant, deduplicated by literal text.
    pub fn const_int(&mut self, value: i32) -> ValueId {
        let text = Symbol::new(&value.to_string());
        if let Some(&id) = self.constants.get(&text) {
            return id;
        }
        let mut v = Value::new(text, ValueKind::Constant, ScalarType::Int);
        v.int_val = value;
        let id = self.values.alloc(v);
        self.constants.insert(text, id);
        id
    }

    /// Float constant, deduplicated by literal text.
    pub fn const_float(&mut self, value: f32) -> ValueId {
        let text = Symbol::new(&format!("{value:?}"));
        if let Some(&id) = self.constants.get(&text) {
            return id;
        }
        let mut v = Value::new(text, ValueKind::Constant, ScalarType::Float);
        v.float_val = value;
        let id = self.values.alloc(v);
        self.constants.insert(text, id);
        id
    }

    /* Globals */

    /// Declares a file-scope variable. Returns None if `name` is already
    /// declared at file scope.
    pub fn declare_global(
        &mut self,
        name: Symbol,
        ty: ScalarType,
        array: Option<ArrayDescriptor>,
    ) -> Option<ValueId> {
        if self.globals.contains_key(&name) {
            return None;
        }
        let id = self.new_global_value(ty);
        self.values.get_mut(id).array = array;
        self.globals.insert(name, id);
        self.global_order.push(id);
        Some(id)
    }

    /// Binds a file-scope name to an existing value. Used by `const`
    /// declarations, whose names alias pool constants instead of getting
    /// storage. Returns false if the name is taken.
    pub fn bind_global_alias(&mut self, name: Symbol, value: ValueId) -> bool {
        if self.globals.contains_key(&name) {
            return false;
        }
        self.globals.insert(name, value);
        true
    }

    pub fn lookup_global(&self, name: Symbol) -> Option<ValueId> {
        self.globals.get(&name).copied()
    }

    /// Globals and constants in declaration order, for the backend's data
    /// section.
    pub fn global_values(&self) -> &[ValueId] {
        &self.global_order
    }

    /* Functions */

    /// Registers a function definition. Returns None on a duplicate name
    /// (builtins count as taken names).
    pub fn define_function(&mut self, name: Symbol, return_type: ScalarType) -> Option<FunctionId> {
        if self.function_ids.contains_key(&name) || self.builtins.contains_key(&name) {
            return None;
        }
        let exit_label = self.new_label();
        let id = self
            .functions
            .push(Function::new(name, return_type, exit_label));
        self.function_ids.insert(name, id);
        Some(id)
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn function_by_name(&self, name: Symbol) -> Option<&Function> {
        self.function_ids.get(&name).map(|&id| &self.functions[id])
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions.indices()
    }

    /// The callable signature for `name`: a builtin's registered signature,
    /// or one derived from a user function's lowered parameters.
    pub fn signature_of(&self, name: Symbol) -> Option<Signature> {
        if let Some(sig) = self.builtins.get(&name) {
            return Some(sig.clone());
        }
        let func = self.function_by_name(name)?;
        let params = func
            .params
            .iter()
            .map(|p| {
                let value = self.values.get(p.value);
                ParamSig {
                    ty: value.ty,
                    is_array: value.is_array(),
                }
            })
            .collect();
        Some(Signature {
            params,
            return_type: func.return_type,
        })
    }

    /* Active-function plumbing */

    pub fn current(&self) -> Option<&Function> {
        self.current_function.map(|id| &self.functions[id])
    }

    pub fn current_mut(&mut self) -> Option<&mut Function> {
        let id = self.current_function?;
        Some(&mut self.functions[id])
    }

    /// Appends to the active function's instruction stream. Panics outside
    /// a function body; global-scope lowering never emits instructions.
    pub fn emit(&mut self, instruction: Instruction) {
        let func = self
            .current_mut()
            .expect("instruction emitted outside a function body");
        func.push_instruction(instruction);
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
