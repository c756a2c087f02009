use std::cell::RefCell;
use std::env;

use indexmap::IndexMap;

use crate::error::StrataError;
use crate::interp::pattern;
use crate::value::Value;

/// Per-name resolution state inside one scope.
///
/// A definition starts `Pending` with its raw node, is `InProgress` while
/// its own value is being interpolated, and lands `Resolved` exactly once.
/// Lookups that re-enter a name while it is `InProgress` fall through to
/// the parent chain, which is what makes cycle detection (and shadowed
/// self-references) work.
#[derive(Debug)]
pub(crate) enum Binding {
    Pending(Value),
    InProgress,
    Resolved(Value),
}

impl Binding {
    /// Moves a pending definition out, leaving the name in-progress.
    fn begin(&mut self) -> Option<Value> {
        match std::mem::replace(self, Binding::InProgress) {
            Binding::Pending(node) => Some(node),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// A lexical context for variable resolution, one per mapping level of the
/// source tree, chained to its enclosing scope. Lives only for the duration
/// of one interpolation pass over its subtree.
pub(crate) struct Scope<'a> {
    bindings: RefCell<IndexMap<String, Binding>>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    /// An empty scope, used at the top level and for sequence elements.
    pub(crate) fn new(parent: Option<&'a Scope<'a>>) -> Self {
        Scope {
            bindings: RefCell::new(IndexMap::new()),
            parent,
        }
    }

    /// A scope seeded from a mapping's `defines` entry.
    pub(crate) fn with_defines(
        defines: &IndexMap<String, Value>,
        parent: Option<&'a Scope<'a>>,
    ) -> Self {
        let bindings = defines
            .iter()
            .map(|(name, node)| (name.clone(), Binding::Pending(node.clone())))
            .collect();
        Scope {
            bindings: RefCell::new(bindings),
            parent,
        }
    }

    /// Resolves `name`, first match wins: local pending definition, local
    /// resolved cache, parent chain, process environment. A pending
    /// definition is interpolated through this same scope before being
    /// memoized, so definitions may reference each other.
    pub(crate) fn value_of(&self, name: &str) -> Result<Value, StrataError> {
        let pending = {
            let mut bindings = self.bindings.borrow_mut();
            match bindings.get_mut(name) {
                Some(binding) => {
                    if let Binding::Resolved(value) = binding {
                        return Ok(value.clone());
                    }
                    binding.begin()
                }
                None => None,
            }
        };

        if let Some(node) = pending {
            let value = self.resolve_definition(name, &node)?;
            self.bindings
                .borrow_mut()
                .insert(name.to_string(), Binding::Resolved(value.clone()));
            return Ok(value);
        }

        if let Some(parent) = self.parent {
            return parent.value_of(name);
        }
        if let Ok(value) = env::var(name) {
            return Ok(Value::String(value));
        }
        Err(StrataError::undefined(name))
    }

    /// Interpolates a definition's own value. An undefined-variable failure
    /// naming the definition itself means the reference chain looped back
    /// before completing, and is reported as a cycle instead.
    fn resolve_definition(&self, name: &str, node: &Value) -> Result<Value, StrataError> {
        let result = match node {
            Value::String(text) if !text.is_empty() => {
                pattern::substitute(text, |var| self.value_of(var))
            }
            other => Ok(other.clone()),
        };

        match result {
            Err(StrataError::UndefinedVariable { name: offender, .. }) if offender == name => {
                Err(StrataError::CyclicDefinition {
                    name: name.to_string(),
                })
            }
            other => other,
        }
    }
}
