//! Object store handles
//!
//! One host call per operation. Values are serialized with serde_json; keys
//! convert through [`KeyType`].

use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use qntx_idb_host::{HostErrorKind, HostObjectStore, Key, KeyPath};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cursor::{self, CursorOptions, KeyPosition, ValuePosition};
use crate::definition::IndexDefinition;
use crate::error::Result;
use crate::index::{self, Index};
use crate::key::{optional_query, KeyType, Query};
use crate::request::await_request;

/// A store holding `V` under primary keys `K`. Valid while its transaction
/// is active.
pub struct ObjectStore<V, K = Key> {
    host: Rc<dyn HostObjectStore>,
    _types: PhantomData<fn() -> (V, K)>,
}

impl<V, K> ObjectStore<V, K> {
    pub(crate) fn new(host: Rc<dyn HostObjectStore>) -> Self {
        Self {
            host,
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> String {
        self.host.name()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.host.key_path()
    }

    pub fn auto_increment(&self) -> bool {
        self.host.auto_increment()
    }

    pub fn index_names(&self) -> Vec<String> {
        self.host.index_names()
    }

    pub fn index<IK>(&self, definition: &IndexDefinition<IK>) -> Result<Index<V, IK, K>> {
        Ok(Index::new(self.host.index(definition.name())?))
    }

    /// Only legal during an upgrade.
    pub fn create_index<IK>(&self, definition: &IndexDefinition<IK>) -> Result<Index<V, IK, K>> {
        let index = self.host.create_index(
            definition.name(),
            definition.key_path().clone(),
            definition.params(),
        )?;
        debug!(store = %self.name(), index = definition.name(), "index created");
        Ok(Index::new(index))
    }

    /// Only legal during an upgrade.
    pub fn delete_index<IK>(&self, definition: &IndexDefinition<IK>) -> Result<()> {
        self.host.delete_index(definition.name())?;
        debug!(store = %self.name(), index = definition.name(), "index deleted");
        Ok(())
    }

    /// Delete an index if it exists. `false` when there was none.
    pub fn try_delete_index(&self, name: &str) -> Result<bool> {
        match self.host.delete_index(name) {
            Ok(()) => Ok(true),
            Err(error) if error.is(HostErrorKind::NotFound) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

impl<V, K> ObjectStore<V, K>
where
    V: Serialize + DeserializeOwned,
    K: KeyType,
{
    async fn write(&self, value: &V, key: Option<K>, overwrite: bool) -> Result<K> {
        let value = serde_json::to_value(value)?;
        let key = key.map(|key| key.to_key());
        let request = if overwrite {
            self.host.put(value, key)?
        } else {
            self.host.add(value, key)?
        };
        K::from_key(await_request(request).await?)
    }

    /// Insert; fails with `ConstraintError` if the key exists.
    pub async fn add(&self, value: &V) -> Result<K> {
        self.write(value, None, false).await
    }

    pub async fn add_with_key(&self, value: &V, key: K) -> Result<K> {
        self.write(value, Some(key), false).await
    }

    /// Insert or overwrite.
    pub async fn put(&self, value: &V) -> Result<K> {
        self.write(value, None, true).await
    }

    pub async fn put_with_key(&self, value: &V, key: K) -> Result<K> {
        self.write(value, Some(key), true).await
    }

    pub async fn get(&self, query: impl Into<Query<K>>) -> Result<Option<V>> {
        index::get(self.host.as_source(), query.into().into_host()?).await
    }

    /// Like [`ObjectStore::get`], failing with `NoResult` when nothing matches.
    pub async fn require_get(&self, query: impl Into<Query<K>>) -> Result<V> {
        index::require_get(self.host.as_source(), query.into().into_host()?, &self.name()).await
    }

    /// Values in ascending key order.
    pub async fn get_all(&self, query: Option<Query<K>>, count: Option<u32>) -> Result<Vec<V>> {
        index::get_all(self.host.as_source(), optional_query(query)?, count).await
    }

    pub async fn get_all_primary_keys(&self, query: Option<Query<K>>, count: Option<u32>) -> Result<Vec<K>> {
        index::get_all_primary_keys(self.host.as_source(), optional_query(query)?, count).await
    }

    pub async fn get_primary_key(&self, query: impl Into<Query<K>>) -> Result<Option<K>> {
        index::get_primary_key(self.host.as_source(), query.into().into_host()?).await
    }

    pub async fn delete(&self, query: impl Into<Query<K>>) -> Result<()> {
        await_request(self.host.delete(query.into().into_host()?)?).await
    }

    pub async fn clear(&self) -> Result<()> {
        await_request(self.host.clear()?).await
    }

    pub async fn count(&self, query: Option<Query<K>>) -> Result<u64> {
        index::count(self.host.as_source(), optional_query(query)?).await
    }

    /// Walk records in key order. Return `true` from the callback to stop.
    pub async fn iterate<F, Fut>(&self, options: CursorOptions<K, K>, callback: F) -> Result<()>
    where
        F: FnMut(ValuePosition<V, K, K>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        cursor::iterate_values(self.host.as_source(), options, callback).await
    }

    /// Walk keys without loading values.
    pub async fn iterate_keys<F, Fut>(&self, options: CursorOptions<K, K>, callback: F) -> Result<()>
    where
        F: FnMut(KeyPosition<K, K>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        cursor::iterate_keys(self.host.as_source(), options, callback).await
    }
}
