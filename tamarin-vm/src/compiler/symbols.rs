// tamarin-vm - Bytecode compiler and virtual machine for the Tamarin programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Lexically-scoped symbol table.
//!
//! Maps identifier names to `(scope, index)` addresses the compiler uses to
//! emit load/store opcodes. Tables form a parent chain: enclosing a table
//! only ever adds a new table pointing at an existing one, so the chain has
//! no cycles.

use std::collections::HashMap;

/// The scope class of a symbol, which selects the load/store opcode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// Addressed in the globals array.
    Global,
    /// Addressed relative to the current frame's base pointer.
    Local,
    /// Addressed in the builtin registry.
    Builtin,
}

/// A resolved identifier binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// A single scope's name store plus a link to its enclosing table.
#[derive(Debug, Default)]
pub struct SymbolTable {
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    outer: Option<Box<SymbolTable>>,
}

impl SymbolTable {
    /// An empty top-level table.
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// An empty table enclosed in `outer`.
    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Define `name` in this table. The scope is `Local` when the table has
    /// an outer table, `Global` otherwise; the index is the running
    /// definition count. Redefining a name overwrites the binding but the
    /// count still advances.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_some() {
            SymbolScope::Local
        } else {
            SymbolScope::Global
        };
        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    /// Define `name` as the builtin at registry index `index`. Does not
    /// advance the definition count.
    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    /// Resolve `name` here or, on a miss, anywhere up the outer chain.
    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        match self.store.get(name) {
            Some(symbol) => Some(symbol.clone()),
            None => self.outer.as_ref().and_then(|outer| outer.resolve(name)),
        }
    }

    /// Number of `define` calls on this table.
    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Whether this table has an enclosing table.
    pub fn is_enclosed(&self) -> bool {
        self.outer.is_some()
    }

    /// Unwrap into the enclosing table, if any.
    pub fn into_outer(self) -> Option<SymbolTable> {
        self.outer.map(|outer| *outer)
    }

    /// Unwind the chain to its root table, discarding any inner scopes.
    /// Used by the REPL to recover after a compile error left the table
    /// enclosed.
    pub fn into_root(mut self) -> SymbolTable {
        while let Some(outer) = self.outer.take() {
            self = *outer;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_symbol(name: &str, index: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            scope: SymbolScope::Global,
            index,
        }
    }

    fn local_symbol(name: &str, index: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            scope: SymbolScope::Local,
            index,
        }
    }

    #[test]
    fn test_define_assigns_dense_indices() {
        let mut global = SymbolTable::new();
        assert_eq!(global.define("a"), global_symbol("a", 0));
        assert_eq!(global.define("b"), global_symbol("b", 1));

        let mut first_local = SymbolTable::enclosed(global);
        assert_eq!(first_local.define("c"), local_symbol("c", 0));
        assert_eq!(first_local.define("d"), local_symbol("d", 1));

        let mut second_local = SymbolTable::enclosed(first_local);
        assert_eq!(second_local.define("e"), local_symbol("e", 0));
        assert_eq!(second_local.define("f"), local_symbol("f", 1));
    }

    #[test]
    fn test_resolve_global() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        assert_eq!(global.resolve("a"), Some(global_symbol("a", 0)));
        assert_eq!(global.resolve("b"), Some(global_symbol("b", 1)));
        assert_eq!(global.resolve("c"), None);
    }

    #[test]
    fn test_resolve_through_nested_scopes() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");

        let mut first_local = SymbolTable::enclosed(global);
        first_local.define("c");
        first_local.define("d");

        let mut second_local = SymbolTable::enclosed(first_local);
        second_local.define("e");
        second_local.define("f");

        // Globals resolve from the root; locals from the innermost table
        // that defined them. The middle scope's locals are visible too,
        // still tagged Local with their own indices.
        assert_eq!(second_local.resolve("a"), Some(global_symbol("a", 0)));
        assert_eq!(second_local.resolve("b"), Some(global_symbol("b", 1)));
        assert_eq!(second_local.resolve("e"), Some(local_symbol("e", 0)));
        assert_eq!(second_local.resolve("f"), Some(local_symbol("f", 1)));
        assert_eq!(second_local.resolve("c"), Some(local_symbol("c", 0)));
        assert_eq!(second_local.resolve("nope"), None);
    }

    #[test]
    fn test_shadowing_resolves_innermost() {
        let mut global = SymbolTable::new();
        global.define("x");

        let mut local = SymbolTable::enclosed(global);
        local.define("x");

        assert_eq!(local.resolve("x"), Some(local_symbol("x", 0)));
    }

    #[test]
    fn test_redefine_overwrites_but_count_advances() {
        let mut global = SymbolTable::new();
        global.define("a");
        let redefined = global.define("a");

        assert_eq!(redefined.index, 1);
        assert_eq!(global.num_definitions(), 2);
        assert_eq!(global.resolve("a"), Some(global_symbol("a", 1)));
    }

    #[test]
    fn test_top_level_define_is_always_global() {
        let mut global = SymbolTable::new();
        let symbol = global.define("a");
        assert_eq!(symbol.scope, SymbolScope::Global);
        assert!(!global.is_enclosed());
    }

    #[test]
    fn test_define_builtin_visible_from_all_scopes() {
        let mut global = SymbolTable::new();
        let expected: Vec<Symbol> = ["len", "first", "last"]
            .iter()
            .enumerate()
            .map(|(i, name)| global.define_builtin(i, name))
            .collect();

        // DefineBuiltin does not advance the definition count.
        assert_eq!(global.num_definitions(), 0);

        let first_local = SymbolTable::enclosed(global);
        let second_local = SymbolTable::enclosed(first_local);

        for symbol in &expected {
            assert_eq!(symbol.scope, SymbolScope::Builtin);
            assert_eq!(second_local.resolve(&symbol.name), Some(symbol.clone()));
        }
    }

    #[test]
    fn test_into_outer_restores_enclosing_table() {
        let mut global = SymbolTable::new();
        global.define("a");

        let mut local = SymbolTable::enclosed(global);
        local.define("b");

        let restored = local.into_outer().expect("outer table");
        assert_eq!(restored.resolve("a"), Some(global_symbol("a", 0)));
        assert_eq!(restored.resolve("b"), None);
    }
}
