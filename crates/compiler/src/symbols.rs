//! Scoped symbol table
//!
//! Names map to a stack of entries ordered by scope depth; a per-depth
//! list of declared names lets `exit_scope` remove exactly the symbols
//! of the departing scope before siblings start declaring at the same
//! depth. Within one scope, names are unique.

use crate::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
}

/// A function's declared interface, kept alongside its symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub return_type: Type,
    pub params: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub kind: SymbolKind,
    pub scope_level: usize,
    pub line: usize,
    pub column: usize,
    pub signature: Option<FunctionSignature>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<String, Vec<Symbol>>,
    /// Names declared at each depth; index 0 is the global scope
    scopes: Vec<Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            entries: HashMap::new(),
            scopes: vec![Vec::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Drop every symbol declared at the departing depth.
    pub fn exit_scope(&mut self) {
        let names = self.scopes.pop().unwrap_or_default();
        for name in names {
            if let Some(stack) = self.entries.get_mut(&name) {
                stack.pop();
                if stack.is_empty() {
                    self.entries.remove(&name);
                }
            }
        }
        if self.scopes.is_empty() {
            self.scopes.push(Vec::new());
        }
    }

    /// Declare a symbol at the current depth. Returns the previous entry
    /// when the name is already taken in this scope.
    pub fn declare(&mut self, mut symbol: Symbol) -> Result<(), Symbol> {
        let depth = self.depth();
        symbol.scope_level = depth;
        if let Some(stack) = self.entries.get(&symbol.name) {
            if let Some(existing) = stack.last() {
                if existing.scope_level == depth {
                    return Err(existing.clone());
                }
            }
        }
        self.scopes[depth].push(symbol.name.clone());
        self.entries.entry(symbol.name.clone()).or_default().push(symbol);
        Ok(())
    }

    /// Innermost visible entry for `name`.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.entries.get(name).and_then(|stack| stack.last())
    }

    pub fn lookup_function(&self, name: &str) -> Option<&Symbol> {
        self.entries
            .get(name)
            .and_then(|stack| stack.iter().rev().find(|s| s.kind == SymbolKind::Function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            ty: Type::int(),
            kind: SymbolKind::Variable,
            scope_level: 0,
            line: 1,
            column: 1,
            signature: None,
        }
    }

    #[test]
    fn test_shadowing_and_scope_exit() {
        let mut table = SymbolTable::new();
        table.declare(var("x")).unwrap();
        table.enter_scope();
        table.declare(var("x")).unwrap();
        assert_eq!(table.lookup("x").unwrap().scope_level, 1);
        table.exit_scope();
        assert_eq!(table.lookup("x").unwrap().scope_level, 0);
    }

    #[test]
    fn test_duplicate_in_same_scope_rejected() {
        let mut table = SymbolTable::new();
        table.declare(var("x")).unwrap();
        assert!(table.declare(var("x")).is_err());
    }

    #[test]
    fn test_sibling_scopes_reuse_names() {
        let mut table = SymbolTable::new();
        table.enter_scope();
        table.declare(var("i")).unwrap();
        table.exit_scope();
        table.enter_scope();
        // The first sibling's `i` must be gone by now
        table.declare(var("i")).unwrap();
        table.exit_scope();
        assert!(table.lookup("i").is_none());
    }

    #[test]
    fn test_lookup_function_skips_shadowing_variable() {
        let mut table = SymbolTable::new();
        let mut f = var("open");
        f.kind = SymbolKind::Function;
        f.signature = Some(FunctionSignature {
            return_type: Type::int(),
            params: vec![Type::char_ptr()],
        });
        table.declare(f).unwrap();
        table.enter_scope();
        table.declare(var("open")).unwrap();
        assert_eq!(table.lookup("open").unwrap().kind, SymbolKind::Variable);
        assert_eq!(
            table.lookup_function("open").unwrap().kind,
            SymbolKind::Function
        );
    }
}
