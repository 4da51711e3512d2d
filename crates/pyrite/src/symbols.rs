//! Lexically nested scopes and variable storage classification.
//!
//! A name resolves to one of three storage shapes: a function-local stack
//! slot, a module-level global cell, or a direct SSA value (parameters
//! and loop join points). The recorded type travels with the storage.
//!
//! Function bodies form a lookup boundary: names inside a function see
//! the function's own scopes and the module scope, never an enclosing
//! function's locals (there is no closure capture beyond module globals).
//!
//! Function definitions are additionally bound as [`FunctionInfo`]
//! records so call sites can resolve a known callee to a direct native
//! call and recover its return type; the binding happens before the body
//! is lowered so recursive calls resolve.

use std::collections::HashMap;

use crate::ir::{FuncId, GlobalId, SlotId, ValueId};

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Function-local stack slot holding a boxed object pointer.
    Slot(SlotId),
    /// Module-level cell holding a boxed object pointer.
    Global(GlobalId),
    /// A direct SSA value (parameters, loop join points).
    Value(ValueId),
}

/// A variable's storage and recorded type.
#[derive(Debug, Clone, Copy)]
pub struct VariableInfo {
    pub storage: Storage,
    pub type_id: i32,
}

/// A compile-time binding for a defined function.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    /// The IR function implementing the body.
    pub func_id: FuncId,
    /// Where the boxed `Function` object lives.
    pub cell: Storage,
    pub param_names: Vec<String>,
    pub param_types: Vec<i32>,
    pub return_type_id: i32,
}

/// Scope kinds; the kind drives the lookup boundary rule and storage
/// selection for fresh names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
}

struct Scope {
    kind: ScopeKind,
    variables: HashMap<String, VariableInfo>,
    functions: HashMap<String, FunctionInfo>,
}

/// The scope stack.
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    /// A fresh table with the module scope already open.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Module,
                variables: HashMap::new(),
                functions: HashMap::new(),
            }],
        }
    }

    pub fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            variables: HashMap::new(),
            functions: HashMap::new(),
        });
    }

    pub fn pop_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the module scope");
        self.scopes.pop();
    }

    /// True when the innermost non-block scope is the module scope, i.e.
    /// fresh names belong in global cells.
    pub fn at_module_level(&self) -> bool {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind != ScopeKind::Block)
            .map(|s| s.kind == ScopeKind::Module)
            .unwrap_or(true)
    }

    /// Define a variable in the innermost scope.
    pub fn define(&mut self, name: &str, info: VariableInfo) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .variables
            .insert(name.to_string(), info);
    }

    /// Look up a variable, honoring the function boundary.
    pub fn lookup(&self, name: &str) -> Option<&VariableInfo> {
        let mut crossed_function = false;
        for scope in self.scopes.iter().rev() {
            if !crossed_function || scope.kind == ScopeKind::Module {
                if let Some(info) = scope.variables.get(name) {
                    return Some(info);
                }
            }
            if scope.kind == ScopeKind::Function {
                crossed_function = true;
            }
        }
        None
    }

    /// Rebind an existing variable's storage and type in the scope where
    /// it is defined. Returns false when the name is not visible.
    pub fn update(&mut self, name: &str, storage: Storage, type_id: i32) -> bool {
        let mut crossed_function = false;
        for scope in self.scopes.iter_mut().rev() {
            if !crossed_function || scope.kind == ScopeKind::Module {
                if let Some(info) = scope.variables.get_mut(name) {
                    info.storage = storage;
                    info.type_id = type_id;
                    return true;
                }
            }
            if scope.kind == ScopeKind::Function {
                crossed_function = true;
            }
        }
        false
    }

    /// Bind a function definition in the innermost scope.
    pub fn define_function(&mut self, name: &str, info: FunctionInfo) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .functions
            .insert(name.to_string(), info);
    }

    /// Find a function binding, walking out through all parents.
    ///
    /// Unlike variable lookup this ignores the function boundary: module
    /// functions stay callable from anywhere, and there is nothing else
    /// a nested scope could capture through a function binding.
    pub fn find_function(&self, name: &str) -> Option<&FunctionInfo> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.functions.get(name))
    }

    /// Update the recorded return type of a function binding (used once
    /// the body's returns have been analyzed).
    pub fn set_function_return_type(&mut self, name: &str, return_type_id: i32) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(info) = scope.functions.get_mut(name) {
                info.return_type_id = return_type_id;
                return;
            }
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyrite_runtime::type_ids;

    fn slot_var(slot: u32, type_id: i32) -> VariableInfo {
        VariableInfo {
            storage: Storage::Slot(SlotId(slot)),
            type_id,
        }
    }

    #[test]
    fn block_scopes_shadow_and_expire() {
        let mut table = SymbolTable::new();
        table.push_scope(ScopeKind::Function);
        table.define("x", slot_var(0, type_ids::INT));

        table.push_scope(ScopeKind::Block);
        table.define("x", slot_var(1, type_ids::STRING));
        assert_eq!(table.lookup("x").unwrap().type_id, type_ids::STRING);
        table.pop_scope();

        assert_eq!(table.lookup("x").unwrap().type_id, type_ids::INT);
    }

    #[test]
    fn function_boundary_hides_enclosing_locals_but_not_globals() {
        let mut table = SymbolTable::new();
        table.define(
            "g",
            VariableInfo {
                storage: Storage::Global(GlobalId(0)),
                type_id: type_ids::INT,
            },
        );
        table.push_scope(ScopeKind::Function);
        table.define("outer_local", slot_var(0, type_ids::INT));
        table.push_scope(ScopeKind::Function);

        assert!(table.lookup("outer_local").is_none());
        assert!(table.lookup("g").is_some());
    }

    #[test]
    fn update_rewrites_in_the_defining_scope() {
        let mut table = SymbolTable::new();
        table.push_scope(ScopeKind::Function);
        table.define("x", slot_var(0, type_ids::INT));
        table.push_scope(ScopeKind::Block);

        assert!(table.update("x", Storage::Value(ValueId(7)), type_ids::FLOAT));
        table.pop_scope();
        let info = table.lookup("x").unwrap();
        assert_eq!(info.storage, Storage::Value(ValueId(7)));
        assert_eq!(info.type_id, type_ids::FLOAT);
    }

    #[test]
    fn function_bindings_walk_parents() {
        let mut table = SymbolTable::new();
        table.define_function(
            "helper",
            FunctionInfo {
                func_id: FuncId(0),
                cell: Storage::Global(GlobalId(0)),
                param_names: vec!["a".to_string()],
                param_types: vec![type_ids::ANY],
                return_type_id: type_ids::ANY,
            },
        );
        table.push_scope(ScopeKind::Function);
        table.push_scope(ScopeKind::Block);
        assert!(table.find_function("helper").is_some());
        assert!(table.find_function("missing").is_none());
    }
}
