//! Object store and index handles for the memory engine

use std::rc::Rc;

use serde_json::Value;

use crate::engine::{
    CursorDirection, CursorKind, CursorRequest, HostIndex, HostObjectStore, HostSource,
    IndexParams, Pending,
};
use crate::error::{HostError, HostResult};
use crate::key::{Key, KeyPath, KeyQuery, KeyRange};

use super::cursor::{open_cursor, Target};
use super::data::{IndexData, StoreData};
use super::transaction::TxState;

/// Read side shared by stores and indexes.
struct MemorySource {
    tx: Rc<TxState>,
    target: Target,
}

impl MemorySource {
    /// A handle is usable while its transaction accepts requests and its
    /// store and index still exist.
    fn check(&self) -> HostResult<()> {
        self.tx.ensure_active()?;
        self.tx.read(self.target.store(), |store| match &self.target {
            Target::Store(_) => Ok(()),
            Target::Index { index, .. } => store
                .indexes
                .get(index)
                .map(|_| ())
                .ok_or_else(|| HostError::invalid_state(format!("index '{}' has been deleted", index))),
        })
    }

    fn range_of(query: KeyQuery) -> HostResult<KeyRange> {
        query.into_range()
    }

    /// `(key, primary key, value)` triples matching `range`, in source order,
    /// collected while the store is borrowed.
    fn collect<R>(
        tx: &TxState,
        target: &Target,
        range: Option<&KeyRange>,
        limit: Option<u32>,
        map: impl Fn(&Key, &Key, &Value) -> R,
    ) -> HostResult<Vec<R>> {
        let limit = match limit {
            Some(0) | None => usize::MAX,
            Some(n) => n as usize,
        };
        tx.read(target.store(), |store| match target {
            Target::Store(_) => Ok(store
                .records_in(range)
                .take(limit)
                .map(|(key, value)| map(key, key, value))
                .collect()),
            Target::Index { index, .. } => {
                let index = index_data(store, index)?;
                Ok(index
                    .entries_in(range)
                    .take(limit)
                    .filter_map(|(key, pk)| store.records.get(pk).map(|value| map(key, pk, value)))
                    .collect())
            }
        })
    }

    fn count_in(tx: &TxState, target: &Target, range: Option<&KeyRange>) -> HostResult<u64> {
        tx.read(target.store(), |store| match target {
            Target::Store(_) => Ok(store.records_in(range).count() as u64),
            Target::Index { index, .. } => Ok(index_data(store, index)?.entries_in(range).count() as u64),
        })
    }
}

fn index_data<'a>(store: &'a StoreData, name: &str) -> HostResult<&'a IndexData> {
    store
        .indexes
        .get(name)
        .ok_or_else(|| HostError::invalid_state(format!("index '{}' has been deleted", name)))
}

impl HostSource for MemorySource {
    fn get(&self, query: KeyQuery) -> HostResult<Pending<Option<Value>>> {
        self.check()?;
        let range = Self::range_of(query)?;
        let target = self.target.clone();
        self.tx.request(move |tx| {
            let found = Self::collect(tx, &target, Some(&range), Some(1), |_, _, value| value.clone())?;
            Ok(found.into_iter().next())
        })
    }

    fn get_key(&self, query: KeyQuery) -> HostResult<Pending<Option<Key>>> {
        self.check()?;
        let range = Self::range_of(query)?;
        let target = self.target.clone();
        self.tx.request(move |tx| {
            let found = Self::collect(tx, &target, Some(&range), Some(1), |_, pk, _| pk.clone())?;
            Ok(found.into_iter().next())
        })
    }

    fn get_all(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Value>>> {
        self.check()?;
        let range = query.map(Self::range_of).transpose()?;
        let target = self.target.clone();
        self.tx.request(move |tx| {
            Self::collect(tx, &target, range.as_ref(), count, |_, _, value| value.clone())
        })
    }

    fn get_all_keys(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Key>>> {
        self.check()?;
        let range = query.map(Self::range_of).transpose()?;
        let target = self.target.clone();
        self.tx.request(move |tx| {
            Self::collect(tx, &target, range.as_ref(), count, |_, pk, _| pk.clone())
        })
    }

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Pending<u64>> {
        self.check()?;
        let range = query.map(Self::range_of).transpose()?;
        let target = self.target.clone();
        self.tx
            .request(move |tx| Self::count_in(tx, &target, range.as_ref()))
    }

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        kind: CursorKind,
    ) -> HostResult<Box<dyn CursorRequest>> {
        self.check()?;
        let range = query.map(Self::range_of).transpose()?;
        open_cursor(&self.tx, self.target.clone(), range, direction, kind)
    }
}

pub(crate) struct MemoryObjectStore {
    source: MemorySource,
    name: String,
}

impl MemoryObjectStore {
    pub fn new(tx: Rc<TxState>, name: &str) -> Self {
        Self {
            source: MemorySource {
                tx,
                target: Target::Store(name.to_string()),
            },
            name: name.to_string(),
        }
    }

    fn tx(&self) -> &Rc<TxState> {
        &self.source.tx
    }

    fn metadata<R: Default>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        self.tx().read(&self.name, |store| Ok(f(store))).unwrap_or_default()
    }

    /// Work out the key for a write while the caller waits; `None` means
    /// the key generator supplies it when the request runs.
    fn resolve_key(&self, value: &Value, key: Option<Key>) -> HostResult<Option<Key>> {
        let (key_path, auto_increment) = self
            .tx()
            .read(&self.name, |store| Ok((store.key_path.clone(), store.auto_increment)))?;
        match (key_path, key) {
            (Some(path), Some(_)) => Err(HostError::data(format!(
                "object store '{}' uses the in-line key path {}; an explicit key is not allowed",
                self.name, path
            ))),
            (None, Some(key)) => {
                key.validate()?;
                Ok(Some(key))
            }
            (Some(path), None) => match path.extract(value) {
                Some(key) => {
                    key.validate()?;
                    Ok(Some(key))
                }
                None => {
                    let present = path.evaluate_single(value).is_some();
                    if auto_increment && !present && path.can_inject(value) {
                        Ok(None)
                    } else {
                        Err(HostError::data(format!(
                            "the value has no valid key at {}",
                            path
                        )))
                    }
                }
            },
            (None, None) if auto_increment => Ok(None),
            (None, None) => Err(HostError::data(format!(
                "object store '{}' has no key path and no key generator; a key is required",
                self.name
            ))),
        }
    }

    fn store_value(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> HostResult<Pending<Key>> {
        self.source.check()?;
        self.tx().ensure_writable()?;
        let explicit = self.resolve_key(&value, key)?;
        let name = self.name.clone();
        let mut value = value;
        self.tx().request(move |tx| {
            tx.write(&name, |store| {
                let key = match explicit {
                    Some(key) => key,
                    None => {
                        let key = store.generate_key()?;
                        if let Some(path) = &store.key_path {
                            path.inject(&mut value, &key)?;
                        }
                        key
                    }
                };
                store.store_record(key, value, no_overwrite)
            })
        })
    }
}

impl HostSource for MemoryObjectStore {
    fn get(&self, query: KeyQuery) -> HostResult<Pending<Option<Value>>> {
        self.source.get(query)
    }

    fn get_key(&self, query: KeyQuery) -> HostResult<Pending<Option<Key>>> {
        self.source.get_key(query)
    }

    fn get_all(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Value>>> {
        self.source.get_all(query, count)
    }

    fn get_all_keys(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Key>>> {
        self.source.get_all_keys(query, count)
    }

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Pending<u64>> {
        self.source.count(query)
    }

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        kind: CursorKind,
    ) -> HostResult<Box<dyn CursorRequest>> {
        self.source.open_cursor(query, direction, kind)
    }
}

impl HostObjectStore for MemoryObjectStore {
    fn as_source(&self) -> &dyn HostSource {
        self
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.metadata(|store| store.key_path.clone())
    }

    fn auto_increment(&self) -> bool {
        self.metadata(|store| store.auto_increment)
    }

    fn index_names(&self) -> Vec<String> {
        self.metadata(|store| store.indexes.keys().cloned().collect())
    }

    fn add(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>> {
        self.store_value(value, key, true)
    }

    fn put(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>> {
        self.store_value(value, key, false)
    }

    fn delete(&self, query: KeyQuery) -> HostResult<Pending<()>> {
        self.source.check()?;
        self.tx().ensure_writable()?;
        let range = query.into_range()?;
        let name = self.name.clone();
        self.tx().request(move |tx| {
            tx.write(&name, |store| {
                store.delete_range(&range);
                Ok(())
            })
        })
    }

    fn clear(&self) -> HostResult<Pending<()>> {
        self.source.check()?;
        self.tx().ensure_writable()?;
        let name = self.name.clone();
        self.tx().request(move |tx| {
            tx.write(&name, |store| {
                store.clear();
                Ok(())
            })
        })
    }

    fn index(&self, name: &str) -> HostResult<Rc<dyn HostIndex>> {
        if self.tx().is_finished() {
            return Err(HostError::invalid_state("the transaction has finished"));
        }
        self.tx().read(&self.name, |store| {
            if store.indexes.contains_key(name) {
                Ok(())
            } else {
                Err(HostError::not_found(format!(
                    "object store '{}' has no index '{}'",
                    self.name, name
                )))
            }
        })?;
        Ok(Rc::new(MemoryIndex::new(Rc::clone(self.tx()), &self.name, name)))
    }

    fn create_index(&self, name: &str, key_path: KeyPath, params: IndexParams) -> HostResult<Rc<dyn HostIndex>> {
        self.tx().ensure_upgrading()?;
        if !key_path.is_valid() {
            return Err(HostError::syntax(format!("{} is not a valid key path", key_path)));
        }
        if params.multi_entry && matches!(key_path, KeyPath::Compound(_)) {
            return Err(HostError::invalid_access(
                "a multi-entry index cannot use a compound key path",
            ));
        }
        self.tx().write(&self.name, |store| {
            if store.indexes.contains_key(name) {
                return Err(HostError::constraint(format!(
                    "object store '{}' already has an index '{}'",
                    self.name, name
                )));
            }
            let index = IndexData::build(key_path, params.unique, params.multi_entry, &store.records)?;
            store.indexes.insert(name.to_string(), index);
            Ok(())
        })?;
        Ok(Rc::new(MemoryIndex::new(Rc::clone(self.tx()), &self.name, name)))
    }

    fn delete_index(&self, name: &str) -> HostResult<()> {
        self.tx().ensure_upgrading()?;
        self.tx().write(&self.name, |store| match store.indexes.remove(name) {
            Some(_) => Ok(()),
            None => Err(HostError::not_found(format!(
                "object store '{}' has no index '{}'",
                self.name, name
            ))),
        })
    }
}

pub(crate) struct MemoryIndex {
    source: MemorySource,
    name: String,
}

impl MemoryIndex {
    fn new(tx: Rc<TxState>, store: &str, name: &str) -> Self {
        Self {
            source: MemorySource {
                tx,
                target: Target::Index {
                    store: store.to_string(),
                    index: name.to_string(),
                },
            },
            name: name.to_string(),
        }
    }

    fn metadata<R>(&self, f: impl FnOnce(&IndexData) -> R) -> Option<R> {
        self.source
            .tx
            .read(self.source.target.store(), |store| Ok(f(index_data(store, &self.name)?)))
            .ok()
    }
}

impl HostSource for MemoryIndex {
    fn get(&self, query: KeyQuery) -> HostResult<Pending<Option<Value>>> {
        self.source.get(query)
    }

    fn get_key(&self, query: KeyQuery) -> HostResult<Pending<Option<Key>>> {
        self.source.get_key(query)
    }

    fn get_all(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Value>>> {
        self.source.get_all(query, count)
    }

    fn get_all_keys(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Key>>> {
        self.source.get_all_keys(query, count)
    }

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Pending<u64>> {
        self.source.count(query)
    }

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        kind: CursorKind,
    ) -> HostResult<Box<dyn CursorRequest>> {
        self.source.open_cursor(query, direction, kind)
    }
}

impl HostIndex for MemoryIndex {
    fn as_source(&self) -> &dyn HostSource {
        self
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> KeyPath {
        self.metadata(|index| index.key_path.clone())
            .unwrap_or_else(|| KeyPath::from(""))
    }

    fn unique(&self) -> bool {
        self.metadata(|index| index.unique).unwrap_or_default()
    }

    fn multi_entry(&self) -> bool {
        self.metadata(|index| index.multi_entry).unwrap_or_default()
    }
}
