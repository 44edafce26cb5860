// tamarin-vm - Bytecode compiler and virtual machine for the Tamarin programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime value model for the Tamarin VM.
//!
//! `Value` is the central enum representing all Tamarin values. Arrays and
//! hashes are shared references with interior mutability: mutating one is
//! observable through every holder, which is the language's semantics for
//! containers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::opcode::Instructions;

/// A builtin procedure body. Misuse is reported in-band as a
/// `Value::Error`, never as a VM failure.
pub type BuiltinFn = fn(&[Value]) -> Value;

/// A registered builtin procedure.
#[derive(Debug)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// A compiled function: bytecode plus its frame layout. Immutable after
/// compilation and shared between the constant pool and call frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    /// Stack slots reserved for parameters and let-bindings.
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A Tamarin runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    /// Strings are byte sequences; `len` counts bytes.
    Str(Rc<String>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashMap<HashKey, HashPair>>>),
    Function(Rc<CompiledFunction>),
    Builtin(&'static BuiltinDef),
    /// In-band error sentinel produced by builtin misuse.
    Error(Rc<String>),
}

impl Value {
    /// Canonical truth. Every `true` push routes through this value (or
    /// `from_bool`), so boolean equality is identity equality.
    pub const TRUE: Value = Value::Boolean(true);
    /// Canonical falsehood.
    pub const FALSE: Value = Value::Boolean(false);
    /// The canonical null value.
    pub const NULL: Value = Value::Null;

    /// The canonical boolean for a host `bool`.
    #[inline]
    pub fn from_bool(b: bool) -> Value {
        if b {
            Value::TRUE
        } else {
            Value::FALSE
        }
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn hash(pairs: HashMap<HashKey, HashPair>) -> Value {
        Value::Hash(Rc::new(RefCell::new(pairs)))
    }

    pub fn error(message: impl Into<String>) -> Value {
        Value::Error(Rc::new(message.into()))
    }

    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Boolean(_) => "boolean",
            Value::Null => "null",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Error(_) => "error",
        }
    }

    /// Everything is truthy except `false` and `null`. `0` is truthy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Boolean(false) | Value::Null)
    }

    /// Language equality: integers compare by value, everything else by
    /// identity. The canonical `TRUE`/`FALSE`/`NULL` make boolean and null
    /// identity coincide with value equality; strings, arrays, and hashes
    /// are equal only when they are the same reference.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => l == r,
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::Null, Value::Null) => true,
            (Value::Str(l), Value::Str(r)) => Rc::ptr_eq(l, r),
            (Value::Array(l), Value::Array(r)) => Rc::ptr_eq(l, r),
            (Value::Hash(l), Value::Hash(r)) => Rc::ptr_eq(l, r),
            (Value::Function(l), Value::Function(r)) => Rc::ptr_eq(l, r),
            (Value::Builtin(l), Value::Builtin(r)) => std::ptr::eq(*l, *r),
            (Value::Error(l), Value::Error(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }

    /// The hash-key projection of this value, if it can key a hash.
    /// Only integers, booleans, and strings are hashable.
    pub fn hash_key(&self) -> Option<HashKey> {
        let key = match self {
            Value::Integer(n) => HashKey {
                tag: KeyTag::Integer,
                value: *n as u64,
            },
            Value::Boolean(b) => HashKey {
                tag: KeyTag::Boolean,
                value: *b as u64,
            },
            Value::Str(s) => HashKey {
                tag: KeyTag::Str,
                value: fnv1a(s.as_bytes()),
            },
            _ => return None,
        };
        Some(key)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(elements) => {
                let elements = elements.borrow();
                let parts: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Hash(pairs) => {
                let pairs = pairs.borrow();
                let parts: Vec<String> = pairs
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Function(_) => write!(f, "#<fn>"),
            Value::Builtin(builtin) => write!(f, "#<builtin {}>", builtin.name),
            Value::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// The type tag half of a [`HashKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyTag {
    Integer,
    Boolean,
    Str,
}

/// Structural projection of a hashable value: a type tag plus a 64-bit
/// digest of the content, so equal values yield equal keys regardless of
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    tag: KeyTag,
    value: u64,
}

/// A key/value entry in a hash. The original key value is kept alongside
/// the stored value so iteration can recover it from the digest.
#[derive(Debug, Clone)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

// String digests must be stable across runs, so hashes use a fixed-seed
// FNV-1a rather than the randomly-seeded std hasher.
const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}
