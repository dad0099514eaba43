//! Index handles and the read operations shared with object stores

use std::future::Future;
use std::marker::PhantomData;
use std::rc::Rc;

use qntx_idb_host::{HostIndex, HostSource, Key, KeyPath, KeyQuery};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cursor::{self, CursorOptions, KeyPosition, ValuePosition};
use crate::error::{Error, Result};
use crate::key::{optional_query, KeyType, Query};
use crate::request::await_request;

pub(crate) async fn get<V: DeserializeOwned>(source: &dyn HostSource, query: KeyQuery) -> Result<Option<V>> {
    match await_request(source.get(query)?).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub(crate) async fn require_get<V: DeserializeOwned>(
    source: &dyn HostSource,
    query: KeyQuery,
    owner: &str,
) -> Result<V> {
    let description = format!("{} in '{}'", query, owner);
    get(source, query).await?.ok_or(Error::NoResult(description))
}

pub(crate) async fn get_all<V: DeserializeOwned>(
    source: &dyn HostSource,
    query: Option<KeyQuery>,
    count: Option<u32>,
) -> Result<Vec<V>> {
    await_request(source.get_all(query, count)?)
        .await?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(Error::from))
        .collect()
}

pub(crate) async fn get_all_primary_keys<K: KeyType>(
    source: &dyn HostSource,
    query: Option<KeyQuery>,
    count: Option<u32>,
) -> Result<Vec<K>> {
    await_request(source.get_all_keys(query, count)?)
        .await?
        .into_iter()
        .map(K::from_key)
        .collect()
}

pub(crate) async fn get_primary_key<K: KeyType>(source: &dyn HostSource, query: KeyQuery) -> Result<Option<K>> {
    await_request(source.get_key(query)?).await?.map(K::from_key).transpose()
}

pub(crate) async fn count(source: &dyn HostSource, query: Option<KeyQuery>) -> Result<u64> {
    await_request(source.count(query)?).await
}

/// A secondary index of a store holding `V`, with index keys `IK` and
/// primary keys `K`. Valid while its transaction is active.
pub struct Index<V, IK = Key, K = Key> {
    host: Rc<dyn HostIndex>,
    _types: PhantomData<fn() -> (V, IK, K)>,
}

impl<V, IK, K> Index<V, IK, K> {
    pub(crate) fn new(host: Rc<dyn HostIndex>) -> Self {
        Self {
            host,
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> String {
        self.host.name()
    }

    pub fn key_path(&self) -> KeyPath {
        self.host.key_path()
    }

    pub fn is_unique(&self) -> bool {
        self.host.unique()
    }

    pub fn is_multi_entry(&self) -> bool {
        self.host.multi_entry()
    }
}

impl<V, IK, K> Index<V, IK, K>
where
    V: Serialize + DeserializeOwned,
    IK: KeyType,
    K: KeyType,
{
    /// The first record whose index key matches.
    pub async fn get(&self, query: impl Into<Query<IK>>) -> Result<Option<V>> {
        get(self.host.as_source(), query.into().into_host()?).await
    }

    /// Like [`Index::get`], failing with `NoResult` when nothing matches.
    pub async fn require_get(&self, query: impl Into<Query<IK>>) -> Result<V> {
        require_get(self.host.as_source(), query.into().into_host()?, &self.name()).await
    }

    /// Records in index order.
    pub async fn get_all(&self, query: Option<Query<IK>>, count: Option<u32>) -> Result<Vec<V>> {
        get_all(self.host.as_source(), optional_query(query)?, count).await
    }

    pub async fn get_all_primary_keys(&self, query: Option<Query<IK>>, count: Option<u32>) -> Result<Vec<K>> {
        get_all_primary_keys(self.host.as_source(), optional_query(query)?, count).await
    }

    pub async fn get_primary_key(&self, query: impl Into<Query<IK>>) -> Result<Option<K>> {
        get_primary_key(self.host.as_source(), query.into().into_host()?).await
    }

    pub async fn count(&self, query: Option<Query<IK>>) -> Result<u64> {
        count(self.host.as_source(), optional_query(query)?).await
    }

    /// Walk records in index order. Return `true` from the callback to stop.
    pub async fn iterate<F, Fut>(&self, options: CursorOptions<IK, K>, callback: F) -> Result<()>
    where
        F: FnMut(ValuePosition<V, IK, K>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        cursor::iterate_values(self.host.as_source(), options, callback).await
    }

    /// Walk index keys and primary keys without loading values.
    pub async fn iterate_keys<F, Fut>(&self, options: CursorOptions<IK, K>, callback: F) -> Result<()>
    where
        F: FnMut(KeyPosition<IK, K>) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        cursor::iterate_keys(self.host.as_source(), options, callback).await
    }
}
