//! Symbol identification and per-account symbol catalogs.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Vendor-assigned symbol id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub i64);

impl SymbolId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SymbolId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| CoreError::InvalidSymbolId(format!("{s}: {e}")))
    }
}

/// A tradable instrument: immutable id and display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    id: SymbolId,
    name: String,
}

impl Symbol {
    pub fn new(id: SymbolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `name` is usable as a single directory under the data path.
    ///
    /// Empty names, `.`/`..`, path separators, drive prefixes and control
    /// characters are refused.
    pub fn is_valid_name(name: &str) -> bool {
        !name.trim().is_empty()
            && name != "."
            && name != ".."
            && !name
                .chars()
                .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Ordered set of symbols, unique by id.
///
/// Insertion order is kept so the persisted catalog and the subscribe
/// requests come out in the order the vendor listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolCatalog {
    symbols: Vec<Symbol>,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol. Returns `false` if the id is already present or the
    /// name is not a valid directory name.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        if !Symbol::is_valid_name(symbol.name()) {
            warn!(id = %symbol.id(), name = ?symbol.name(), "Refusing symbol with unusable name");
            return false;
        }
        if self.contains(symbol.id()) {
            return false;
        }
        self.symbols.push(symbol);
        true
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.id() == id)
    }

    /// Look up a symbol name by id.
    pub fn name_of(&self, id: SymbolId) -> Option<&str> {
        self.get(id).map(Symbol::name)
    }

    pub fn contains(&self, id: SymbolId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn ids(&self) -> Vec<SymbolId> {
        self.symbols.iter().map(Symbol::id).collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<Symbol> for SymbolCatalog {
    fn from_iter<T: IntoIterator<Item = Symbol>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for symbol in iter {
            catalog.insert(symbol);
        }
        catalog
    }
}

impl<'a> IntoIterator for &'a SymbolCatalog {
    type Item = &'a Symbol;
    type IntoIter = std::slice::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}
