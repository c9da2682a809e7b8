use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::ir::is_temporary_name;
use crate::lang::value::Value;

pub type MemoryRef = Rc<RefCell<Memory>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Shared,
    Script,
    Local,
}

/// One level of the variable scope chain.
///
/// Lookup falls through to the parent; assignment to an existing name
/// writes where the name lives, a new name lands in this scope.
#[derive(Debug)]
pub struct Memory {
    scope: Scope,
    variables: IndexMap<String, Value>,
    parent: Option<MemoryRef>,
}

impl Memory {
    pub fn shared() -> MemoryRef {
        Rc::new(RefCell::new(Memory {
            scope: Scope::Shared,
            variables: IndexMap::new(),
            parent: None,
        }))
    }

    pub fn script(shared: &MemoryRef) -> MemoryRef {
        Rc::new(RefCell::new(Memory {
            scope: Scope::Script,
            variables: IndexMap::new(),
            parent: Some(Rc::clone(shared)),
        }))
    }

    pub fn local(script: &MemoryRef) -> MemoryRef {
        Rc::new(RefCell::new(Memory {
            scope: Scope::Local,
            variables: IndexMap::new(),
            parent: Some(Rc::clone(script)),
        }))
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn parent(&self) -> Option<&MemoryRef> {
        self.parent.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        match self.variables.get(name) {
            Some(value) => Some(value.clone()),
            None => self.parent.as_ref()?.borrow().get(name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.borrow().contains(name))
    }

    /// Assigns through the chain (see type docs).
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.variables.get_mut(name) {
            *slot = value;
            return;
        }
        if let Some(parent) = &self.parent {
            if parent.borrow().contains(name) {
                parent.borrow_mut().set(name, value);
                return;
            }
        }
        self.variables.insert(name.to_string(), value);
    }

    /// Creates (or resets) `name` in this scope, regardless of the chain.
    pub fn declare(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.variables.shift_remove(name)
    }

    /// The shared-scope memory at the root of this chain.
    pub fn shared_root(this: &MemoryRef) -> MemoryRef {
        let mut current = Rc::clone(this);
        loop {
            let parent = match current.borrow().parent.as_ref() {
                Some(parent) => Rc::clone(parent),
                None => break,
            };
            current = parent;
        }
        current
    }

    /// Removes this scope's temporaries so other interpreters cannot see them.
    pub fn hide_temporaries(&mut self) -> IndexMap<String, Value> {
        let names: Vec<String> = self
            .variables
            .keys()
            .filter(|name| is_temporary_name(name))
            .cloned()
            .collect();

        let mut hidden = IndexMap::new();
        for name in names {
            if let Some(value) = self.variables.shift_remove(&name) {
                hidden.insert(name, value);
            }
        }
        hidden
    }

    pub fn expose_temporaries(&mut self, hidden: IndexMap<String, Value>) {
        self.variables.extend(hidden);
    }

    /// Variables of this scope only, in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.variables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_falls_through_scopes() {
        let shared = Memory::shared();
        let script = Memory::script(&shared);
        let local = Memory::local(&script);

        shared.borrow_mut().declare("s", Value::Int(1));
        script.borrow_mut().declare("g", Value::Int(2));

        let local = local.borrow();
        assert_eq!(local.get("s"), Some(Value::Int(1)));
        assert_eq!(local.get("g"), Some(Value::Int(2)));
        assert_eq!(local.get("missing"), None);
    }

    #[test]
    fn test_assignment_targets_existing_scope() {
        let shared = Memory::shared();
        let script = Memory::script(&shared);
        let local = Memory::local(&script);

        shared.borrow_mut().declare("counter", Value::Int(0));
        local.borrow_mut().set("counter", Value::Int(5));
        local.borrow_mut().set("fresh", Value::Int(7));

        assert_eq!(shared.borrow().get("counter"), Some(Value::Int(5)));
        assert!(local.borrow().variables().any(|(n, _)| n == "fresh"));
        assert!(!script.borrow().contains("fresh"));
    }

    #[test]
    fn test_temporaries_can_be_hidden_and_restored() {
        let shared = Memory::shared();
        let script = Memory::script(&shared);

        script.borrow_mut().declare("[0:1]", Value::Int(9));
        script.borrow_mut().declare("x", Value::Int(1));

        let hidden = script.borrow_mut().hide_temporaries();
        assert_eq!(hidden.len(), 1);
        assert!(!script.borrow().contains("[0:1]"));
        assert!(script.borrow().contains("x"));

        script.borrow_mut().expose_temporaries(hidden);
        assert_eq!(script.borrow().get("[0:1]"), Some(Value::Int(9)));
    }

    #[test]
    fn test_shared_root() {
        let shared = Memory::shared();
        let script = Memory::script(&shared);
        let local = Memory::local(&script);
        assert!(Rc::ptr_eq(&Memory::shared_root(&local), &shared));
    }
}
