use std::collections::HashMap;

use crate::lang::value::{Builtin, Value};
use crate::runtime::runtime_error::ErrorKind;
use crate::runtime::scope::{Scope, ScopeRef};
use crate::runtime::stack::OperandStack;

/// Host built-ins, collected before a machine is built.
///
/// This is the explicit form of the root scope: each machine turns its own
/// `Builtins` into a fresh frozen root link, so machines never share mutable
/// state through it. The core registers nothing itself.
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    entries: HashMap<String, Value>,
}

impl Builtins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native callable under `name`, replacing any earlier one.
    pub fn register(
        mut self,
        name: &str,
        func: impl Fn(&mut OperandStack) -> Result<Vec<Value>, ErrorKind> + 'static,
    ) -> Self {
        self.entries
            .insert(name.to_string(), Value::Builtin(Builtin::new(name, func)));
        self
    }

    /// Bind a plain value in the root scope (constants, shared lists).
    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.entries.insert(name.to_string(), value);
        self
    }

    /// Freeze into a root scope link.
    pub fn into_root(self) -> ScopeRef {
        Scope::root(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_names_resolve_in_root() {
        let root = Builtins::new()
            .register("nop", |_| Ok(vec![]))
            .constant("answer", Value::Number(42.0))
            .into_root();
        assert!(root.is_root());
        assert!(matches!(root.lookup("nop"), Ok(Value::Builtin(_))));
        assert_eq!(root.lookup("answer"), Ok(Value::Number(42.0)));
    }

    #[test]
    fn test_each_root_is_independent() {
        let builtins = Builtins::new().constant("k", Value::Number(1.0));
        let a = builtins.clone().into_root();
        let b = builtins.into_root();
        assert!(!std::rc::Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_builtin_pops_its_arguments() {
        let root = Builtins::new()
            .register("sub", |stack| {
                let b = stack.pop()?;
                let a = stack.pop()?;
                match (a.as_number(), b.as_number()) {
                    (Some(a), Some(b)) => Ok(vec![Value::Number(a - b)]),
                    _ => Err(ErrorKind::builtin("sub", "expected numbers")),
                }
            })
            .into_root();
        let Ok(Value::Builtin(sub)) = root.lookup("sub") else {
            panic!("sub should be a builtin");
        };
        let mut stack = OperandStack::from(vec![Value::Number(10.0), Value::Number(4.0)]);
        assert_eq!(sub.invoke(&mut stack), Ok(vec![Value::Number(6.0)]));
        assert!(stack.is_empty());
    }
}
