//! Declarative schema definitions
//!
//! Definitions own no runtime resource. They name a database, store or index,
//! carry its options and, through phantom type parameters, the Rust types of
//! its values and keys.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use qntx_idb_host::{IndexParams, Key, KeyPath, ObjectStoreParams};

use crate::database::Database;
use crate::error::Result;
use crate::key::{KeyRange, KeyType};

/// Runs inside the versionchange transaction with `(db, old_version, new_version)`.
pub type Upgrader = Rc<dyn Fn(&Database, u32, Option<u32>) -> Result<()>>;

/// A logical database: name, target version and upgrade callback.
#[derive(Clone)]
pub struct DatabaseDefinition {
    name: String,
    version: u32,
    upgrader: Upgrader,
}

impl DatabaseDefinition {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        upgrader: impl Fn(&Database, u32, Option<u32>) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            upgrader: Rc::new(upgrader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn upgrader(&self) -> &Upgrader {
        &self.upgrader
    }
}

impl fmt::Debug for DatabaseDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Anything naming an object store, so a transaction scope can mix stores
/// of different value types.
pub trait StoreScope {
    fn store_name(&self) -> &str;
}

/// An object store holding values of type `V` under primary keys of type `K`.
pub struct ObjectStoreDefinition<V, K = Key> {
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: bool,
    _types: PhantomData<fn() -> (V, K)>,
}

impl<V, K> ObjectStoreDefinition<V, K> {
    /// Out-of-line keys, no key generator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: false,
            _types: PhantomData,
        }
    }

    /// Read primary keys from the stored value.
    pub fn with_key_path(mut self, key_path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(key_path.into());
        self
    }

    /// Generate primary keys when none is given.
    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub fn auto_generate_primary_key(&self) -> bool {
        self.auto_increment
    }

    pub(crate) fn params(&self) -> ObjectStoreParams {
        ObjectStoreParams {
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
        }
    }
}

impl<V, K: KeyType> ObjectStoreDefinition<V, K> {
    pub fn only(&self, key: K) -> Result<KeyRange<K>> {
        KeyRange::only(key)
    }

    pub fn bound(&self, lower: K, upper: K, lower_open: bool, upper_open: bool) -> Result<KeyRange<K>> {
        KeyRange::bound(lower, upper, lower_open, upper_open)
    }

    pub fn lower_bound(&self, lower: K, open: bool) -> Result<KeyRange<K>> {
        KeyRange::lower_bound(lower, open)
    }

    pub fn upper_bound(&self, upper: K, open: bool) -> Result<KeyRange<K>> {
        KeyRange::upper_bound(upper, open)
    }
}

impl<V, K> StoreScope for ObjectStoreDefinition<V, K> {
    fn store_name(&self) -> &str {
        &self.name
    }
}

impl<V, K> Clone for ObjectStoreDefinition<V, K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            _types: PhantomData,
        }
    }
}

impl<V, K> fmt::Debug for ObjectStoreDefinition<V, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreDefinition")
            .field("name", &self.name)
            .field("key_path", &self.key_path)
            .field("auto_increment", &self.auto_increment)
            .finish()
    }
}

/// A secondary index whose keys have type `IK`.
pub struct IndexDefinition<IK = Key> {
    name: String,
    key_path: KeyPath,
    unique: bool,
    multi_entry: bool,
    _key: PhantomData<fn() -> IK>,
}

impl<IK> IndexDefinition<IK> {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
            multi_entry: false,
            _key: PhantomData,
        }
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Index every element of an array value separately.
    pub fn with_multi_entry(mut self, multi_entry: bool) -> Self {
        self.multi_entry = multi_entry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_multi_entry(&self) -> bool {
        self.multi_entry
    }

    pub(crate) fn params(&self) -> IndexParams {
        IndexParams {
            unique: self.unique,
            multi_entry: self.multi_entry,
        }
    }
}

impl<IK: KeyType> IndexDefinition<IK> {
    pub fn only(&self, key: IK) -> Result<KeyRange<IK>> {
        KeyRange::only(key)
    }

    pub fn bound(&self, lower: IK, upper: IK, lower_open: bool, upper_open: bool) -> Result<KeyRange<IK>> {
        KeyRange::bound(lower, upper, lower_open, upper_open)
    }

    pub fn lower_bound(&self, lower: IK, open: bool) -> Result<KeyRange<IK>> {
        KeyRange::lower_bound(lower, open)
    }

    pub fn upper_bound(&self, upper: IK, open: bool) -> Result<KeyRange<IK>> {
        KeyRange::upper_bound(upper, open)
    }
}

impl<IK> Clone for IndexDefinition<IK> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            key_path: self.key_path.clone(),
            unique: self.unique,
            multi_entry: self.multi_entry,
            _key: PhantomData,
        }
    }
}

impl<IK> fmt::Debug for IndexDefinition<IK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDefinition")
            .field("name", &self.name)
            .field("key_path", &self.key_path)
            .field("unique", &self.unique)
            .field("multi_entry", &self.multi_entry)
            .finish()
    }
}
