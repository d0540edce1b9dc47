//! Lookup types, lookup categories and index selection.
//!
//! Every partner search an active occurrence performs is described by a
//! [`LookupType`]: the index structure to use and the argument positions
//! bound at that point of the join. Lookups with equal types share one
//! [`LookupCategory`], i.e. one physical index of the generated store. One
//! category per constraint is the master store holding every live instance.

use crate::program::OccurrenceId;
use std::cell::Cell;
use std::fmt;
use thiserror::Error;

/// Contract violations of the lookup model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("lookup category {0} already exists")]
    DuplicateCategory(LookupType),
    #[error("lookup information of category {0} was already read")]
    Frozen(LookupType),
    #[error("index position {position} out of range for key of arity {arity}")]
    IndexOutOfRange { position: usize, arity: usize },
    #[error("unknown lookup category {0}")]
    UnknownCategory(CategoryId),
    #[error("{0} lookups cannot carry a key")]
    UnkeyedIndex(IndexType),
}

/// Physical index structure backing a lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    /// Linear scan over every live instance
    Default,
    /// The partner is never in the store; the lookup always fails.
    NeverStored,
    HashMap,
    /// Hash map over a set-semantics constraint
    SsHashMap,
    /// Set-semantics hash map keyed on a functional dependency
    FdSsHashMap,
}

impl IndexType {
    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            IndexType::HashMap | IndexType::SsHashMap | IndexType::FdSsHashMap
        )
    }

    pub fn is_set_semantics(self) -> bool {
        matches!(self, IndexType::SsHashMap | IndexType::FdSsHashMap)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexType::Default => "DEFAULT",
            IndexType::NeverStored => "NEVER_STORED",
            IndexType::HashMap => "HASH_MAP",
            IndexType::SsHashMap => "SS_HASH_MAP",
            IndexType::FdSsHashMap => "FD_SS_HASH_MAP",
        };
        f.write_str(name)
    }
}

/// An index access pattern. Equality is by index type and the exact
/// (ordered) list of key positions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LookupType {
    index: IndexType,
    variables: Box<[usize]>,
}

impl LookupType {
    pub fn default_scan() -> Self {
        LookupType {
            index: IndexType::Default,
            variables: Box::new([]),
        }
    }

    pub fn never_stored() -> Self {
        LookupType {
            index: IndexType::NeverStored,
            variables: Box::new([]),
        }
    }

    /// A keyed lookup. Unkeyed index types reject a non-empty key.
    pub fn keyed(index: IndexType, variables: Vec<usize>) -> Result<Self, LookupError> {
        if !index.is_keyed() && !variables.is_empty() {
            return Err(LookupError::UnkeyedIndex(index));
        }
        Ok(LookupType {
            index,
            variables: variables.into_boxed_slice(),
        })
    }

    pub fn index_type(&self) -> IndexType {
        self.index
    }

    /// Key argument positions.
    pub fn variables(&self) -> &[usize] {
        &self.variables
    }

    pub fn key_arity(&self) -> usize {
        self.variables.len()
    }

    /// The argument position used as the `i`-th key component.
    pub fn position(&self, i: usize) -> Result<usize, LookupError> {
        self.variables
            .get(i)
            .copied()
            .ok_or(LookupError::IndexOutOfRange {
                position: i,
                arity: self.variables.len(),
            })
    }

    /// At most one instance can match a fully keyed lookup.
    pub fn is_singleton(&self, arity: usize) -> bool {
        match self.index {
            IndexType::FdSsHashMap => true,
            IndexType::SsHashMap => self.variables.len() == arity,
            _ => false,
        }
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.index, self.variables)
    }
}

/// Index of a category within its constraint's [`LookupCategories`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(u32);

impl CategoryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cat{}", self.0)
    }
}

/// One physical index: a lookup type plus the partner occurrences found through it.
///
/// Membership is append-only until the first query against the category;
/// afterwards any mutation is a contract violation.
#[derive(Clone, Debug)]
pub struct LookupCategory {
    lookup_type: LookupType,
    members: Vec<OccurrenceId>,
    master: bool,
    read: Cell<bool>,
}

impl LookupCategory {
    pub fn new(lookup_type: LookupType) -> Self {
        LookupCategory {
            lookup_type,
            members: Vec::new(),
            master: false,
            read: Cell::new(false),
        }
    }

    pub fn lookup_type(&self) -> &LookupType {
        &self.lookup_type
    }

    pub fn index_type(&self) -> IndexType {
        self.lookup_type.index
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn can_change_lookup_information(&self) -> bool {
        !self.read.get()
    }

    pub fn add_member(&mut self, occurrence: OccurrenceId) -> Result<(), LookupError> {
        if !self.can_change_lookup_information() {
            return Err(LookupError::Frozen(self.lookup_type.clone()));
        }
        if !self.members.contains(&occurrence) {
            self.members.push(occurrence);
        }
        Ok(())
    }

    pub fn members(&self) -> &[OccurrenceId] {
        self.read.set(true);
        &self.members
    }

    pub fn is_singleton(&self, arity: usize) -> bool {
        self.read.set(true);
        self.lookup_type.is_singleton(arity)
    }
}

/// All lookup categories of one constraint.
#[derive(Clone, Debug, Default)]
pub struct LookupCategories {
    categories: Vec<LookupCategory>,
    master: Option<CategoryId>,
}

impl LookupCategories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &LookupCategory)> {
        self.categories
            .iter()
            .enumerate()
            .map(|(i, c)| (CategoryId(i as u32), c))
    }

    pub fn find(&self, lookup_type: &LookupType) -> Option<CategoryId> {
        self.categories
            .iter()
            .position(|c| &c.lookup_type == lookup_type)
            .map(|i| CategoryId(i as u32))
    }

    /// Add a new category. Callers de-duplicate first.
    pub fn add_lookup_category(&mut self, category: LookupCategory) -> Result<CategoryId, LookupError> {
        if self.find(&category.lookup_type).is_some() {
            return Err(LookupError::DuplicateCategory(category.lookup_type));
        }
        self.categories.push(category);
        Ok(CategoryId((self.categories.len() - 1) as u32))
    }

    pub fn get_or_add(&mut self, lookup_type: &LookupType) -> Result<CategoryId, LookupError> {
        match self.find(lookup_type) {
            Some(id) => Ok(id),
            None => self.add_lookup_category(LookupCategory::new(lookup_type.clone())),
        }
    }

    pub fn get(&self, id: CategoryId) -> Result<&LookupCategory, LookupError> {
        self.categories
            .get(id.index())
            .ok_or(LookupError::UnknownCategory(id))
    }

    pub fn get_mut(&mut self, id: CategoryId) -> Result<&mut LookupCategory, LookupError> {
        self.categories
            .get_mut(id.index())
            .ok_or(LookupError::UnknownCategory(id))
    }

    pub fn master(&self) -> Option<CategoryId> {
        self.master
    }

    pub fn master_category(&self) -> Option<&LookupCategory> {
        self.master.and_then(|id| self.categories.get(id.index()))
    }

    /// Make `id` the master category, demoting any previous one.
    pub fn force_master(&mut self, id: CategoryId) -> Result<(), LookupError> {
        self.get(id)?;
        if let Some(old) = self.master {
            self.categories[old.index()].master = false;
        }
        self.categories[id.index()].master = true;
        self.master = Some(id);
        Ok(())
    }

    /// Pick the master category: the linear-scan category if one exists,
    /// otherwise the first keyed category, otherwise a fresh unkeyed one.
    pub fn assign_master(&mut self, may_be_stored: bool) -> Result<CategoryId, LookupError> {
        let default = self.find(&LookupType::default_scan());
        let keyed = self
            .categories
            .iter()
            .position(|c| c.index_type().is_keyed())
            .map(|i| CategoryId(i as u32));
        let id = match (default, keyed) {
            (Some(id), _) => id,
            (None, Some(id)) if may_be_stored => id,
            _ if may_be_stored => self.get_or_add(&LookupType::default_scan())?,
            _ => self.get_or_add(&LookupType::never_stored())?,
        };
        self.force_master(id)?;
        Ok(id)
    }
}

/// Constant-time access through a small finite argument domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DirectAccess {
    /// Argument position used as array index.
    pub position: usize,
    pub domain_size: usize,
}

/// The lookup an active occurrence uses to find one partner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lookup {
    pub partner: OccurrenceId,
    pub lookup_type: LookupType,
    /// Category in the partner constraint's [`LookupCategories`].
    pub category: CategoryId,
    pub direct_access: Option<DirectAccess>,
}

/// Equality guard linking the two occurrences of a binary head.
///
/// `occurrence[k]` is the head position owning `argument[k]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BinaryGuardInfo {
    pub guard: usize,
    pub occurrence: [usize; 2],
    pub argument: [usize; 2],
}

impl BinaryGuardInfo {
    /// The side of the guard opposite to side `o` (`o` is 0 or 1).
    pub fn one_index(o: usize) -> usize {
        debug_assert!(o <= 1, "binary guard side must be 0 or 1");
        1 - o
    }

    /// Side of the guard belonging to head position `head_index`, if any.
    pub fn side_of(&self, head_index: usize) -> Option<usize> {
        self.occurrence.iter().position(|&o| o == head_index)
    }
}
