use crate::runtime::runtime_error::ErrorKind;
use crate::runtime::scope::ScopeRef;
use crate::runtime::stack::OperandStack;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable list storage.
pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Native function signature.
///
/// A built-in pops its own arguments from the caller's operand stack (last
/// argument on top) and returns the values to push back, in order.
pub type NativeFn = dyn Fn(&mut OperandStack) -> Result<Vec<Value>, ErrorKind>;

/// Runtime value.
///
/// Numbers and text are copied by value; lists, routines and scopes are
/// shared by reference.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Text(String),
    List(ListRef),
    Builtin(Builtin),
    /// A bytecode subroutine closed over the scope it was created in.
    Routine(Rc<Routine>),
    Scope(ScopeRef),
}

/// A host-provided callable.
#[derive(Clone)]
pub struct Builtin {
    pub name: Rc<str>,
    pub func: Rc<NativeFn>,
}

impl Builtin {
    pub fn new(
        name: &str,
        func: impl Fn(&mut OperandStack) -> Result<Vec<Value>, ErrorKind> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn invoke(&self, stack: &mut OperandStack) -> Result<Vec<Value>, ErrorKind> {
        (self.func)(stack)
    }
}

#[derive(Debug)]
pub struct Routine {
    /// Landing address of the routine body.
    pub address: usize,
    /// Scope captured when the routine value was created.
    pub scope: ScopeRef,
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// `0`, `NaN` and the empty text are falsy. Everything else, including an
    /// empty list, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Builtin(_) => "builtin",
            Value::Routine(_) => "routine",
            Value::Scope(_) => "scope",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Snapshot of a list's elements.
    pub fn list_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    fn fmt_repr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(&a.func, &b.func),
            (Value::Routine(a), Value::Routine(b)) => Rc::ptr_eq(a, b),
            (Value::Scope(a), Value::Scope(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_repr(f)?;
                }
                write!(f, "]")
            }
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name),
            Value::Routine(r) => write!(f, "<routine @{:04}>", r.address),
            Value::Scope(_) => write!(f, "<scope>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "Number({:?})", n),
            Value::Text(s) => write!(f, "Text({:?})", s),
            Value::List(items) => f.debug_tuple("List").field(&*items.borrow()).finish(),
            Value::Builtin(b) => write!(f, "Builtin({})", b.name),
            Value::Routine(r) => write!(f, "Routine({})", r.address),
            Value::Scope(_) => write!(f, "Scope"),
        }
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}
