use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::runtime::value::Value;

pub type EnvRef = Rc<RefCell<Env>>;

/// A lexical scope: name bindings plus an optional parent link. Scopes form a
/// tree rooted at the builtins environment; lookups walk toward the root.
#[derive(Debug, Default)]
pub struct Env {
    values: HashMap<String, Value>,
    parent: Option<EnvRef>,
}

impl Env {
    pub fn root() -> EnvRef {
        Rc::new(RefCell::new(Env::default()))
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Env {
            values: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Creates or overwrites a binding in this scope only.
    pub fn define(env: &EnvRef, name: impl Into<String>, value: Value) {
        env.borrow_mut().values.insert(name.into(), value);
    }

    pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
        let mut current = Rc::clone(env);
        loop {
            if let Some(value) = current.borrow().values.get(name) {
                return Some(value.clone());
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => return None,
            }
        }
    }

    /// Updates the innermost scope that already binds `name`. Returns false
    /// when no enclosing scope binds it.
    pub fn set(env: &EnvRef, name: &str, value: Value) -> bool {
        let mut current = Rc::clone(env);
        loop {
            if current.borrow().values.contains_key(name) {
                current.borrow_mut().values.insert(name.to_string(), value);
                return true;
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Assignment rule: update an existing binding anywhere up the chain,
    /// otherwise create the binding in the current scope.
    pub fn assign(env: &EnvRef, name: &str, value: Value) {
        if !Env::set(env, name, value.clone()) {
            Env::define(env, name, value);
        }
    }

    /// The scope's own bindings, excluding everything inherited from parents.
    /// Used to splice an imported module's exports.
    pub fn own_bindings(env: &EnvRef) -> Vec<(String, Value)> {
        env.borrow()
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_the_parent_chain() {
        let root = Env::root();
        Env::define(&root, "x", Value::Number(1.0));
        let inner = Env::child(&root);
        assert!(matches!(Env::get(&inner, "x"), Some(Value::Number(n)) if n == 1.0));
        assert!(Env::get(&inner, "y").is_none());
    }

    #[test]
    fn assign_updates_existing_outer_binding() {
        let root = Env::root();
        Env::define(&root, "x", Value::Number(1.0));
        let inner = Env::child(&root);
        Env::assign(&inner, "x", Value::Number(2.0));

        // No shadow was created; the outer binding changed.
        assert!(!inner.borrow().values.contains_key("x"));
        assert!(matches!(Env::get(&root, "x"), Some(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn assign_defines_locally_when_unbound() {
        let root = Env::root();
        let inner = Env::child(&root);
        Env::assign(&inner, "fresh", Value::Bool(true));
        assert!(Env::get(&inner, "fresh").is_some());
        assert!(Env::get(&root, "fresh").is_none());
    }

    #[test]
    fn own_bindings_exclude_inherited_names() {
        let root = Env::root();
        Env::define(&root, "inherited", Value::Nil);
        let inner = Env::child(&root);
        Env::define(&inner, "local", Value::Nil);

        let names = Env::own_bindings(&inner)
            .into_iter()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["local".to_string()]);
    }
}
