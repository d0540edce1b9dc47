//! String interning for constraint, rule and variable names.
//!
//! The analyses only ever compare identifiers, so names are mapped to
//! `SymbolId`s once when the program is built and resolved back to text
//! only for reporting.

use rustc_hash::FxHashMap;
use std::fmt;

/// Interned symbol ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symbol table owned by a single program.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    str_to_id: FxHashMap<Box<str>, SymbolId>,
    id_to_str: Vec<Box<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its unique ID
    pub fn intern(&mut self, s: &str) -> SymbolId {
        if let Some(&id) = self.str_to_id.get(s) {
            return id;
        }

        let id = SymbolId(self.id_to_str.len() as u32);
        let boxed: Box<str> = s.into();
        self.str_to_id.insert(boxed.clone(), id);
        self.id_to_str.push(boxed);
        id
    }

    /// Look up an already interned string without inserting it.
    pub fn get(&self, s: &str) -> Option<SymbolId> {
        self.str_to_id.get(s).copied()
    }

    /// Look up the string for an ID
    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.id_to_str[id.0 as usize]
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }
}
