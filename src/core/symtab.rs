// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Global symbol table built during packing and consumed by the fixup
//! resolver and the artifact writers.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::core::diag::{CompileError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Label,
    Constant,
    Data,
    Var,
}

impl SymbolKind {
    pub fn label(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Label => "label",
            SymbolKind::Constant => "constant",
            SymbolKind::Data => "data",
            SymbolKind::Var => "var",
        }
    }
}

/// One resolved symbol. `name` is the fully qualified form
/// (`scope.name` for scoped symbols); `address` holds the constant's value
/// for `Constant` kind.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub address: u16,
    pub scope: String,
    pub file: String,
    pub line: u32,
    pub size: u16,
    pub exported: bool,
}

/// Qualify `name` inside `scope`. Module-global scope is the empty string.
pub fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Compiler-synthesized symbols (structured-control targets, epilogue
/// labels) are resolvable like any other but filtered from listings and
/// the debug map.
pub fn is_internal(name: &str) -> bool {
    name.split('.').any(|part| part.starts_with("__"))
}

#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    by_name: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol; duplicate qualified names are a semantic error.
    pub fn define(&mut self, sym: Symbol) -> Result<(), CompileError> {
        if self.by_name.contains_key(&sym.name) {
            return Err(CompileError::new(
                ErrorKind::Semantic,
                "Duplicate symbol",
                Some(&sym.name),
            ));
        }
        self.by_name.insert(sym.name.clone(), sym);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(name)
    }

    /// Symbols that belong in listings and the debug map.
    pub fn iter_public(&self) -> impl Iterator<Item = &Symbol> {
        self.by_name.values().filter(|s| !is_internal(&s.name))
    }

    /// Tabular dump for listing footers; name order, internals filtered.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for sym in self.iter_public() {
            writeln!(
                out,
                "{:<24}  {:04X}  {:<9}  {:>5}  {}:{}",
                sym.name,
                sym.address,
                sym.kind.label(),
                sym.size,
                sym.file,
                sym.line
            )?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, kind: SymbolKind) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind,
            address: 0,
            scope: String::new(),
            file: "main.zax".to_string(),
            line: 1,
            size: 0,
            exported: false,
        }
    }

    #[test]
    fn qualify_joins_scope_and_name() {
        assert_eq!(qualify("", "main"), "main");
        assert_eq!(qualify("main", "loop"), "main.loop");
    }

    #[test]
    fn internal_symbols_are_filtered_from_public_iteration() {
        let mut table = SymbolTable::new();
        table
            .define(sym("main", SymbolKind::Label))
            .expect("define");
        table
            .define(sym("main.__L0", SymbolKind::Label))
            .expect("define");
        assert!(is_internal("main.__L0"));
        assert!(!is_internal("main.loop"));
        let public: Vec<&str> = table.iter_public().map(|s| s.name.as_str()).collect();
        assert_eq!(public, vec!["main"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut table = SymbolTable::new();
        table
            .define(sym("twice", SymbolKind::Constant))
            .expect("first define");
        let err = table
            .define(sym("twice", SymbolKind::Constant))
            .expect_err("second define must fail");
        assert_eq!(err.message(), "Duplicate symbol: twice");
    }

    #[test]
    fn dump_lists_public_symbols_in_name_order() {
        let mut table = SymbolTable::new();
        let mut draw = sym("draw", SymbolKind::Function);
        draw.address = 0x0003;
        draw.size = 5;
        table.define(draw).expect("define");
        table
            .define(sym("draw.__L0", SymbolKind::Label))
            .expect("define");
        let mut out = Vec::new();
        table.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("draw"));
        assert!(text.contains("0003  function"));
        assert!(!text.contains("__L0"));
    }
}
