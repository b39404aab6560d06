//! Chained variable scopes.
//!
//! Each link maps names to values and falls through to its parent on a miss.
//! Links are reference-counted: several children, saved frames and routine
//! closures can all hold the same parent, and a link is freed only when the
//! last of them lets go. The root link carries the host built-ins and is
//! frozen once built.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::lang::value::Value;
use crate::runtime::runtime_error::ErrorKind;

pub type ScopeRef = Rc<Scope>;

pub struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<ScopeRef>,
    frozen: bool,
}

impl Scope {
    /// A parentless, frozen link holding `bindings`.
    pub fn root(bindings: HashMap<String, Value>) -> ScopeRef {
        Rc::new(Scope {
            bindings: RefCell::new(bindings),
            parent: None,
            frozen: true,
        })
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Scope {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            frozen: false,
        })
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn lookup(&self, name: &str) -> Result<Value, ErrorKind> {
        let mut link = self;
        loop {
            if let Some(value) = link.bindings.borrow().get(name) {
                return Ok(value.clone());
            }
            match &link.parent {
                Some(parent) => link = &**parent,
                None => return Err(ErrorKind::UnboundName(name.to_string())),
            }
        }
    }

    /// Bind `name` in this link only, shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) -> Result<(), ErrorKind> {
        if self.frozen {
            return Err(ErrorKind::FrozenScope(name.to_string()));
        }
        self.bindings.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }

    /// Rebind `name` in the nearest link that already holds it.
    ///
    /// Never creates a binding. A name found only in the root is frozen.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), ErrorKind> {
        let mut link = self;
        loop {
            if let Some(slot) = link.bindings.borrow_mut().get_mut(name) {
                if link.frozen {
                    return Err(ErrorKind::FrozenScope(name.to_string()));
                }
                *slot = value;
                return Ok(());
            }
            match &link.parent {
                Some(parent) => link = &**parent,
                None => return Err(ErrorKind::UnboundName(name.to_string())),
            }
        }
    }

    /// Number of links from here to the root, inclusive.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut link = self;
        while let Some(parent) = &link.parent {
            depth += 1;
            link = &**parent;
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Scope")
            .field("names", &names)
            .field("depth", &self.depth())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// The engine's view of the chain: a cursor on the current link.
#[derive(Debug, Clone)]
pub struct ScopeChain {
    current: ScopeRef,
}

impl ScopeChain {
    /// Start at `link`.
    pub fn new(link: ScopeRef) -> Self {
        Self { current: link }
    }

    pub fn current(&self) -> &ScopeRef {
        &self.current
    }

    /// Swap in another link as current, returning the old one.
    pub fn replace(&mut self, link: ScopeRef) -> ScopeRef {
        std::mem::replace(&mut self.current, link)
    }

    pub fn lookup(&self, name: &str) -> Result<Value, ErrorKind> {
        self.current.lookup(name)
    }

    pub fn define(&self, name: &str, value: Value) -> Result<(), ErrorKind> {
        self.current.define(name, value)
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), ErrorKind> {
        self.current.assign(name, value)
    }

    pub fn push_scope(&mut self) {
        self.current = Scope::child(&self.current);
    }

    pub fn pop_scope(&mut self) -> Result<(), ErrorKind> {
        let parent = self
            .current
            .parent()
            .cloned()
            .ok_or(ErrorKind::ScopeUnderflow)?;
        self.current = parent;
        Ok(())
    }
}
