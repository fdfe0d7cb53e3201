//! Storage-location descriptors. Every operand in the IR is a [`ValueId`]
//! pointing into the [`ValueArena`] owned by the symbol table, so that
//! instructions, blocks, and phi operands never hold references into
//! growable containers.

use crate::{index::IndexVec, intern::Symbol, simple_index};

/// Element count above which a local array is hinted for promotion to
/// file-scope storage instead of the stack frame.
pub const STATIC_PROMOTION_THRESHOLD: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Void,
    Int,
    Float,
    Bool,
    /// Produced only by the frontend for malformed nodes; never attached to
    /// a `Value`.
    Error,
}

impl ScalarType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Float)
    }

    /// Size of one element in bytes, as the backend lays values out.
    pub fn size(self) -> i32 {
        match self {
            ScalarType::Int | ScalarType::Bool => 4,
            ScalarType::Float => 4,
            ScalarType::Void | ScalarType::Error => 0,
        }
    }
}

impl core::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarType::Void => write!(f, "void"),
            ScalarType::Int => write!(f, "i32"),
            ScalarType::Float => write!(f, "float"),
            ScalarType::Bool => write!(f, "i1"),
            ScalarType::Error => write!(f, "<error>"),
        }
    }
}

simple_index! {
    /// Identifies a value in the compilation session's arena
    pub struct ValueId;
}

/// What a value names. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A literal or folded compile-time constant
    Constant,
    /// A compiler-generated temporary holding an intermediate result
    Temporary,
    /// A user-declared function-local variable
    Local,
    /// A user-declared file-scope variable
    Global,
}

/// Backing storage for an array value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayStorage {
    /// Compile-time-known array with an eagerly initialized element buffer
    Materialized(ElementBuffer),
    /// Formal-parameter array: only the rank is known, the leading
    /// dimension is unbounded
    FormalParam,
}

/// Initialized element values for a materialized array. Elements that the
/// source initializer omitted stay zero.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementBuffer {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

impl ElementBuffer {
    pub fn new(ty: ScalarType, len: usize) -> Self {
        match ty {
            ScalarType::Float => ElementBuffer::Float(vec![0.0; len]),
            _ => ElementBuffer::Int(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ElementBuffer::Int(v) => v.len(),
            ElementBuffer::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dimension and storage metadata for an array value.
///
/// `dims` is ordered outermost first, so `int a[2][3]` has `dims == [2, 3]`.
/// For a formal-parameter array the *leading* dimension is unknown and
/// `dims[0]` is 0 by convention; `total_len` is only meaningful for
/// materialized arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDescriptor {
    pub dims: Vec<usize>,
    pub total_len: usize,
    pub storage: ArrayStorage,
    /// Local arrays past [`STATIC_PROMOTION_THRESHOLD`] elements should be
    /// placed in file-scope storage by the backend.
    pub promote_to_static: bool,
}

impl ArrayDescriptor {
    pub fn materialized(dims: Vec<usize>, ty: ScalarType) -> Self {
        let total_len = dims.iter().product();
        ArrayDescriptor {
            dims,
            total_len,
            storage: ArrayStorage::Materialized(ElementBuffer::new(ty, total_len)),
            promote_to_static: total_len > STATIC_PROMOTION_THRESHOLD,
        }
    }

    pub fn formal_param(dims: Vec<usize>) -> Self {
        ArrayDescriptor {
            dims,
            total_len: 0,
            storage: ArrayStorage::FormalParam,
            promote_to_static: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Row-major stride (in elements) of dimension `d`: the product of all
    /// dimension sizes after `d`.
    pub fn stride(&self, d: usize) -> usize {
        self.dims[d + 1..].iter().product()
    }

    /// Descriptor for the sub-array selected by indexing away the leading
    /// `stripped` dimensions. Used for partially indexed arrays.
    pub fn strip_leading(&self, stripped: usize) -> Self {
        let dims: Vec<usize> = self.dims[stripped..].to_vec();
        let total_len = dims.iter().product();
        ArrayDescriptor {
            dims,
            total_len,
            storage: ArrayStorage::FormalParam,
            promote_to_static: false,
        }
    }

    /// Recovers the per-dimension indices addressed by a flat element
    /// offset, innermost dimension first in the division chain.
    pub fn unlinearize(&self, mut offset: usize) -> Vec<usize> {
        let mut indices = vec![0; self.dims.len()];
        for d in (0..self.dims.len()).rev() {
            indices[d] = offset % self.dims[d];
            offset /= self.dims[d];
        }
        indices
    }
}

/// A typed storage-location descriptor: a constant, temporary, local, or
/// global. The kind is fixed at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub name: Symbol,
    pub kind: ValueKind,
    pub ty: ScalarType,
    pub int_val: i32,
    pub float_val: f32,
    pub array: Option<ArrayDescriptor>,
    /// Set on temporaries that hold a computed element address; assignments
    /// through them render with a leading `*`.
    pub is_pointer: bool,
}

impl Value {
    pub fn new(name: Symbol, kind: ValueKind, ty: ScalarType) -> Self {
        Value {
            name,
            kind,
            ty,
            int_val: 0,
            float_val: 0.0,
            array: None,
            is_pointer: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.kind == ValueKind::Constant
    }

    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }
}

/// Arena for every value created during one compilation session.
#[derive(Debug, Default)]
pub struct ValueArena {
    values: IndexVec<ValueId, Value>,
}

impl ValueArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: Value) -> ValueId {
        self.values.push(value)
    }

    pub fn get(&self, id: ValueId) -> &Value {
        &self.values[id]
    }

    pub fn get_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
