//! Scope names like `string.quoted.double.saffron`.
//!
//! A scope is a cheap handle on an interned dot-separated name: cloning it is a refcount bump
//! and every token of a scan shares the same allocations as the grammar that produced it.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A hierarchical name attached to a span of text, made of dot-separated atoms.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(Arc<str>);

impl Scope {
    /// Create a scope from a dot-separated string.
    /// Surrounding whitespace and empty atoms (`a..b`) are dropped.
    pub fn new(s: &str) -> Scope {
        let s = s.trim();
        if s.split('.').any(str::is_empty) {
            let cleaned = s
                .split('.')
                .filter(|atom| !atom.is_empty())
                .collect::<Vec<_>>()
                .join(".");
            return Scope(Arc::from(cleaned));
        }
        Scope(Arc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn atoms(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|atom| !atom.is_empty())
    }

    /// Number of atoms in this scope
    pub fn len(&self) -> usize {
        self.atoms().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if this scope is an atom-wise prefix of another scope:
    /// `string.quoted` is a prefix of `string.quoted.double` but not of `string.quotedx`.
    pub fn is_prefix_of(&self, other: &Scope) -> bool {
        if self.is_empty() {
            return true;
        }
        match other.0.strip_prefix(&*self.0) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl Deref for Scope {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq<str> for Scope {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Scope {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Scope::new(&s))
    }
}

/// Deduplicates scopes while a grammar is being compiled so that every rule using
/// `keyword.control.saffron` points to the same allocation.
#[derive(Debug, Default)]
pub(crate) struct ScopeInterner {
    scopes: HashMap<String, Scope>,
}

impl ScopeInterner {
    pub(crate) fn intern(&mut self, name: &str) -> Scope {
        if let Some(scope) = self.scopes.get(name) {
            return scope.clone();
        }
        let scope = Scope::new(name);
        self.scopes.insert(name.to_owned(), scope.clone());
        scope
    }
}
