// tamarin-vm - Property-based tests for hash keys and symbol indices
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Property-based tests for the hash-key contract and the symbol table.
//!
//! The hash-key law: equal values yield equal keys regardless of identity,
//! and the type tag keeps different value types apart even when their
//! content digests would collide.

use proptest::prelude::*;

use tamarin_vm::{SymbolScope, SymbolTable, Value};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Equal integers yield equal keys.
    #[test]
    fn integer_keys_agree(n in any::<i64>()) {
        prop_assert_eq!(
            Value::Integer(n).hash_key(),
            Value::Integer(n).hash_key()
        );
    }

    /// Distinct integers yield distinct keys.
    #[test]
    fn integer_keys_are_injective(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        prop_assert_ne!(
            Value::Integer(a).hash_key(),
            Value::Integer(b).hash_key()
        );
    }

    /// Equal strings yield equal keys even though the values themselves
    /// compare unequal (string equality is by identity).
    #[test]
    fn string_keys_ignore_identity(s in ".{0,32}") {
        let first = Value::string(s.clone());
        let second = Value::string(s);
        prop_assert!(!first.equals(&second));
        prop_assert_eq!(first.hash_key(), second.hash_key());
    }

    /// An integer never collides with the string spelling of itself.
    #[test]
    fn type_tags_keep_types_apart(n in any::<i64>()) {
        prop_assert_ne!(
            Value::Integer(n).hash_key(),
            Value::string(n.to_string()).hash_key()
        );
    }

    /// Top-level definitions are global, dense, and insertion-ordered.
    #[test]
    fn global_indices_are_dense(names in prop::collection::vec("[a-z]{1,8}", 1..20)) {
        let mut table = SymbolTable::new();
        for (i, name) in names.iter().enumerate() {
            let symbol = table.define(name);
            prop_assert_eq!(symbol.index, i);
            prop_assert_eq!(symbol.scope, SymbolScope::Global);
        }
        prop_assert_eq!(table.num_definitions(), names.len());
    }

    /// Enclosed tables start their index space over at zero.
    #[test]
    fn enclosed_indices_reset(
        outer_names in prop::collection::vec("[a-z]{1,8}", 1..10),
        inner_names in prop::collection::vec("[a-z]{1,8}", 1..10),
    ) {
        let mut table = SymbolTable::new();
        for name in &outer_names {
            table.define(name);
        }

        let mut inner = SymbolTable::enclosed(table);
        for (i, name) in inner_names.iter().enumerate() {
            let symbol = inner.define(name);
            prop_assert_eq!(symbol.index, i);
            prop_assert_eq!(symbol.scope, SymbolScope::Local);
        }
    }
}

#[test]
fn boolean_keys_are_distinct_and_stable() {
    let true_key = Value::TRUE.hash_key();
    let false_key = Value::FALSE.hash_key();
    assert_eq!(true_key, Value::from_bool(true).hash_key());
    assert_ne!(true_key, false_key);
    // Boolean true and integer 1 carry different tags.
    assert_ne!(true_key, Value::Integer(1).hash_key());
}
