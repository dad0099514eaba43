//! Record and index storage for the memory engine

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use serde_json::Value;

use crate::error::{HostError, HostResult};
use crate::key::{is_empty_interval, Key, KeyPath, KeyRange, MAX_GENERATED_KEY};

#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    /// Next number the key generator hands out.
    current_number: f64,
    pub records: BTreeMap<Key, Value>,
    pub indexes: BTreeMap<String, IndexData>,
}

impl StoreData {
    pub fn new(key_path: Option<KeyPath>, auto_increment: bool) -> Self {
        Self {
            key_path,
            auto_increment,
            current_number: 1.0,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn generate_key(&mut self) -> HostResult<Key> {
        if self.current_number > MAX_GENERATED_KEY {
            return Err(HostError::constraint("key generator exhausted"));
        }
        let key = Key::Number(self.current_number);
        self.current_number += 1.0;
        Ok(key)
    }

    /// Explicit numeric keys push the generator past them.
    fn observe_key(&mut self, key: &Key) {
        if !self.auto_increment {
            return;
        }
        if let Key::Number(n) = key {
            if *n >= self.current_number {
                self.current_number = (n.floor() + 1.0).min(MAX_GENERATED_KEY + 1.0);
            }
        }
    }

    /// Store a record, maintaining every index. With `no_overwrite` an
    /// existing key fails with `ConstraintError`.
    pub fn store_record(&mut self, key: Key, value: Value, no_overwrite: bool) -> HostResult<Key> {
        if no_overwrite && self.records.contains_key(&key) {
            return Err(HostError::constraint(format!("key {} already exists", key)));
        }

        let index_keys: Vec<(String, Vec<Key>)> = self
            .indexes
            .iter()
            .map(|(name, index)| (name.clone(), index.keys_for(&value)))
            .collect();

        for (name, keys) in &index_keys {
            let index = &self.indexes[name];
            if !index.unique {
                continue;
            }
            for index_key in keys {
                let taken = index
                    .entries
                    .get(index_key)
                    .is_some_and(|owners| owners.iter().any(|owner| owner != &key));
                if taken {
                    return Err(HostError::constraint(format!(
                        "unique index '{}' already contains {}",
                        name, index_key
                    )));
                }
            }
        }

        self.remove_record(&key);
        for (name, keys) in index_keys {
            if let Some(index) = self.indexes.get_mut(&name) {
                for index_key in keys {
                    index.insert(index_key, key.clone());
                }
            }
        }
        self.observe_key(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    pub fn remove_record(&mut self, key: &Key) -> bool {
        let Some(old) = self.records.remove(key) else {
            return false;
        };
        for index in self.indexes.values_mut() {
            for index_key in index.keys_for(&old) {
                index.remove(&index_key, key);
            }
        }
        true
    }

    pub fn delete_range(&mut self, range: &KeyRange) {
        let keys: Vec<Key> = self.keys_in(Some(range)).cloned().collect();
        for key in keys {
            self.remove_record(&key);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    pub fn keys_in<'a>(&'a self, range: Option<&'a KeyRange>) -> Box<dyn Iterator<Item = &'a Key> + 'a> {
        Box::new(self.records_in(range).map(|(key, _)| key))
    }

    pub fn records_in<'a>(
        &'a self,
        range: Option<&'a KeyRange>,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Value)> + 'a> {
        let (lower, upper) = match range {
            Some(range) => range.bounds(),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        if is_empty_interval(lower, upper) {
            return Box::new(std::iter::empty());
        }
        Box::new(self.records.range::<Key, _>((lower, upper)))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
    /// Index key to the primary keys of the records carrying it.
    pub entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    /// Build an index over existing records. A unique index fails with
    /// `ConstraintError` if two records share a key.
    pub fn build(
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
        records: &BTreeMap<Key, Value>,
    ) -> HostResult<Self> {
        let mut index = Self {
            key_path,
            unique,
            multi_entry,
            entries: BTreeMap::new(),
        };
        for (primary_key, value) in records {
            for index_key in index.keys_for(value) {
                if unique && index.entries.contains_key(&index_key) {
                    return Err(HostError::constraint(format!(
                        "existing records share the unique key {}",
                        index_key
                    )));
                }
                index.insert(index_key, primary_key.clone());
            }
        }
        Ok(index)
    }

    /// Index keys a value contributes. Multi-entry indexes over an array
    /// contribute each distinct valid element; anything that is not a valid
    /// key contributes nothing.
    pub fn keys_for(&self, value: &Value) -> Vec<Key> {
        if self.multi_entry {
            if let Some(Value::Array(items)) = self.key_path.evaluate_single(value) {
                let distinct: BTreeSet<Key> = items
                    .iter()
                    .filter_map(Key::from_json)
                    .filter(Key::is_valid)
                    .collect();
                return distinct.into_iter().collect();
            }
        }
        self.key_path
            .extract(value)
            .filter(Key::is_valid)
            .into_iter()
            .collect()
    }

    fn insert(&mut self, index_key: Key, primary_key: Key) {
        self.entries.entry(index_key).or_default().insert(primary_key);
    }

    fn remove(&mut self, index_key: &Key, primary_key: &Key) {
        if let Some(owners) = self.entries.get_mut(index_key) {
            owners.remove(primary_key);
            if owners.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }

    /// `(index key, primary key)` pairs in index order.
    pub fn entries_in<'a>(
        &'a self,
        range: Option<&'a KeyRange>,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Key)> + 'a> {
        let (lower, upper) = match range {
            Some(range) => range.bounds(),
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        if is_empty_interval(lower, upper) {
            return Box::new(std::iter::empty());
        }
        Box::new(
            self.entries
                .range::<Key, _>((lower, upper))
                .flat_map(|(index_key, owners)| owners.iter().map(move |pk| (index_key, pk))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn people() -> StoreData {
        let mut store = StoreData::new(Some(KeyPath::from("id")), false);
        let index = IndexData::build(KeyPath::from("email"), true, false, &store.records).unwrap();
        store.indexes.insert("email".into(), index);
        store
    }

    #[test]
    fn test_store_and_overwrite() {
        let mut store = people();
        store
            .store_record(Key::Number(1.0), json!({"id": 1, "email": "a@x"}), true)
            .unwrap();
        let err = store
            .store_record(Key::Number(1.0), json!({"id": 1, "email": "b@x"}), true)
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Constraint);

        store
            .store_record(Key::Number(1.0), json!({"id": 1, "email": "b@x"}), false)
            .unwrap();
        let index = &store.indexes["email"];
        assert!(index.entries.contains_key(&Key::from("b@x")));
        assert!(!index.entries.contains_key(&Key::from("a@x")));
    }

    #[test]
    fn test_unique_index_violation_leaves_store_untouched() {
        let mut store = people();
        store
            .store_record(Key::Number(1.0), json!({"id": 1, "email": "a@x"}), true)
            .unwrap();
        let err = store
            .store_record(Key::Number(2.0), json!({"id": 2, "email": "a@x"}), true)
            .unwrap_err();
        assert_eq!(err.kind, HostErrorKind::Constraint);
        assert_eq!(store.records.len(), 1);
    }

    #[test]
    fn test_multi_entry_keys() {
        let index = IndexData {
            key_path: KeyPath::from("tags"),
            unique: false,
            multi_entry: true,
            entries: BTreeMap::new(),
        };
        let keys = index.keys_for(&json!({"tags": ["b", "a", "b", {"no": 1}]}));
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    }

    #[test]
    fn test_generator_follows_explicit_keys() {
        let mut store = StoreData::new(None, true);
        assert_eq!(store.generate_key().unwrap(), Key::Number(1.0));
        store
            .store_record(Key::Number(10.5), json!("x"), false)
            .unwrap();
        assert_eq!(store.generate_key().unwrap(), Key::Number(11.0));
    }

    #[test]
    fn test_delete_range() {
        let mut store = StoreData::new(None, false);
        for i in 1..=5 {
            store
                .store_record(Key::Number(i as f64), json!(i), true)
                .unwrap();
        }
        let range = KeyRange::bound(Key::Number(2.0), Key::Number(4.0), false, true).unwrap();
        store.delete_range(&range);
        let left: Vec<Key> = store.keys_in(None).cloned().collect();
        assert_eq!(
            left,
            vec![Key::Number(1.0), Key::Number(4.0), Key::Number(5.0)]
        );
    }
}
