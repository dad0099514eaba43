//! Browser host engine over `indexedDB`
//!
//! Thin adapters from the engine traits to `web-sys`. Values cross the
//! boundary as JSON; keys are converted structurally.

mod convert;
mod request;

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Array;
use serde_json::Value;
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Event, IdbDatabase, IdbFactory, IdbIndex, IdbIndexParameters, IdbObjectStore,
    IdbObjectStoreParameters, IdbTransaction, IdbVersionChangeEvent,
};

use crate::engine::{
    CursorDirection, CursorKind, CursorRequest, DeleteRequest, HostConnection, HostFactory,
    HostIndex, HostObjectStore, HostSource, HostTransaction, IndexParams, ObjectStoreParams,
    OpenRequest, Pending, TransactionMode, VersionChange,
};
use crate::error::{HostError, HostResult};
use crate::key::{Key, KeyPath, KeyQuery};

use convert::{
    direction_to_js, dom_error, js_error, key_from_js, key_path_from_js, key_path_to_js, key_to_js,
    mode_from_js, mode_to_js, optional_key_from_js, optional_query_to_js,
    optional_value_from_js, query_to_js, string_list, value_from_js, value_to_js,
};
use request::{BrowserCursorRequest, BrowserDeleteRequest, BrowserOpenRequest, BrowserRequest};

/// Get the global IndexedDB factory.
fn idb_factory() -> HostResult<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| HostError::unknown("no indexedDB on global"))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(HostError::unknown("indexedDB is null/undefined"));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| HostError::unknown("indexedDB is not IdbFactory"))
}

fn set_prop(target: &JsValue, name: &str, value: &JsValue) -> HostResult<()> {
    js_sys::Reflect::set(target, &name.into(), value)
        .map(|_| ())
        .map_err(js_error)
}

/// The browser's `indexedDB`.
#[derive(Clone)]
pub struct BrowserFactory {
    factory: IdbFactory,
}

impl BrowserFactory {
    /// Fails when the global object has no `indexedDB`.
    pub fn new() -> HostResult<Self> {
        Ok(Self {
            factory: idb_factory()?,
        })
    }
}

impl HostFactory for BrowserFactory {
    fn open(&self, name: &str, version: u32) -> HostResult<Box<dyn OpenRequest>> {
        let request = self.factory.open_with_u32(name, version).map_err(js_error)?;
        Ok(Box::new(BrowserOpenRequest { request }))
    }

    fn delete_database(&self, name: &str) -> HostResult<Box<dyn DeleteRequest>> {
        let request = self.factory.delete_database(name).map_err(js_error)?;
        Ok(Box::new(BrowserDeleteRequest { request }))
    }
}

pub(crate) struct BrowserConnection {
    db: IdbDatabase,
    on_version_change: RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>,
}

impl BrowserConnection {
    pub(crate) fn new(db: IdbDatabase) -> Self {
        Self {
            db,
            on_version_change: RefCell::new(None),
        }
    }
}

impl HostConnection for BrowserConnection {
    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn create_object_store(&self, name: &str, params: ObjectStoreParams) -> HostResult<Rc<dyn HostObjectStore>> {
        let options = IdbObjectStoreParameters::new();
        if let Some(path) = &params.key_path {
            set_prop(&options, "keyPath", &key_path_to_js(path))?;
        }
        set_prop(&options, "autoIncrement", &JsValue::from_bool(params.auto_increment))?;
        let store = self
            .db
            .create_object_store_with_optional_parameters(name, &options)
            .map_err(js_error)?;
        Ok(Rc::new(BrowserObjectStore { store }))
    }

    fn delete_object_store(&self, name: &str) -> HostResult<()> {
        self.db.delete_object_store(name).map_err(js_error)
    }

    fn transaction(&self, scope: &[String], mode: TransactionMode) -> HostResult<Rc<dyn HostTransaction>> {
        if mode == TransactionMode::VersionChange {
            return Err(HostError::type_error(
                "versionchange transactions are only created by open",
            ));
        }
        let names: Array = scope.iter().map(|name| JsValue::from_str(name)).collect();
        let tx = self
            .db
            .transaction_with_str_sequence_and_mode(&names, mode_to_js(mode))
            .map_err(js_error)?;
        Ok(Rc::new(BrowserTransaction::new(tx)))
    }

    fn close(&self) {
        self.db.close();
    }

    fn set_on_version_change(&self, handler: Option<Box<dyn FnMut(VersionChange)>>) {
        let closure = handler.map(|mut handler| {
            Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
                handler(VersionChange {
                    old_version: event.old_version() as u32,
                    new_version: event.new_version().map(|v| v as u32),
                });
            }) as Box<dyn FnMut(IdbVersionChangeEvent)>)
        });
        self.db
            .set_onversionchange(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *self.on_version_change.borrow_mut() = closure;
    }
}

type TransactionClosures = (Closure<dyn FnMut(Event)>, Closure<dyn FnMut(Event)>);

pub(crate) struct BrowserTransaction {
    tx: IdbTransaction,
    closures: Rc<RefCell<Option<TransactionClosures>>>,
}

impl BrowserTransaction {
    pub(crate) fn new(tx: IdbTransaction) -> Self {
        Self {
            tx,
            closures: Rc::new(RefCell::new(None)),
        }
    }
}

impl HostTransaction for BrowserTransaction {
    fn mode(&self) -> TransactionMode {
        match self.tx.mode() {
            Ok(mode) => mode_from_js(mode),
            Err(error) => {
                // Only reachable once the transaction is gone.
                warn!(error = %js_error(error), "transaction mode unavailable");
                TransactionMode::ReadOnly
            }
        }
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.tx.object_store_names())
    }

    fn object_store(&self, name: &str) -> HostResult<Rc<dyn HostObjectStore>> {
        let store = self.tx.object_store(name).map_err(js_error)?;
        Ok(Rc::new(BrowserObjectStore { store }))
    }

    fn abort(&self) -> HostResult<()> {
        self.tx.abort().map_err(js_error)
    }

    fn commit(&self) -> HostResult<()> {
        self.tx.commit().map_err(js_error)
    }

    fn set_callbacks(&self, on_complete: Box<dyn FnOnce()>, on_abort: Box<dyn FnOnce(Option<HostError>)>) {
        let handlers = Rc::new(RefCell::new(Some((on_complete, on_abort))));

        let handlers_c = Rc::clone(&handlers);
        let closures_c = Rc::clone(&self.closures);
        let complete = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = handlers_c.borrow_mut().take();
            if let Some((on_complete, _)) = handlers {
                on_complete();
            }
            *closures_c.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        let tx_a = self.tx.clone();
        let closures_a = Rc::clone(&self.closures);
        let abort = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = handlers.borrow_mut().take();
            if let Some((_, on_abort)) = handlers {
                on_abort(tx_a.error().map(|exception| dom_error(&exception)));
            }
            *closures_a.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        self.tx.set_oncomplete(Some(complete.as_ref().unchecked_ref()));
        self.tx.set_onabort(Some(abort.as_ref().unchecked_ref()));
        *self.closures.borrow_mut() = Some((complete, abort));
    }
}

fn value_request(request: web_sys::IdbRequest) -> Pending<Option<Value>> {
    BrowserRequest::boxed(request, |value| optional_value_from_js(&value))
}

fn values_request(request: web_sys::IdbRequest) -> Pending<Vec<Value>> {
    BrowserRequest::boxed(request, |value| {
        let items: Array = value.dyn_into().map_err(js_error)?;
        items.iter().map(|item| value_from_js(&item)).collect()
    })
}

fn keys_request(request: web_sys::IdbRequest) -> Pending<Vec<Key>> {
    BrowserRequest::boxed(request, |value| {
        let items: Array = value.dyn_into().map_err(js_error)?;
        items.iter().map(|item| key_from_js(&item)).collect()
    })
}

/// `IDBObjectStore` and `IDBIndex` share their read API; implement
/// `HostSource` once for both.
macro_rules! impl_browser_source {
    ($ty:ident, $field:ident) => {
        impl HostSource for $ty {
            fn get(&self, query: KeyQuery) -> HostResult<Pending<Option<Value>>> {
                let request = self.$field.get(&query_to_js(&query)?).map_err(js_error)?;
                Ok(value_request(request))
            }

            fn get_key(&self, query: KeyQuery) -> HostResult<Pending<Option<Key>>> {
                let request = self.$field.get_key(&query_to_js(&query)?).map_err(js_error)?;
                Ok(BrowserRequest::boxed(request, |value| optional_key_from_js(&value)))
            }

            fn get_all(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Value>>> {
                let query = optional_query_to_js(query.as_ref())?;
                let request = match count {
                    Some(count) => self.$field.get_all_with_key_and_limit(&query, count),
                    None => self.$field.get_all_with_key(&query),
                }
                .map_err(js_error)?;
                Ok(values_request(request))
            }

            fn get_all_keys(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Key>>> {
                let query = optional_query_to_js(query.as_ref())?;
                let request = match count {
                    Some(count) => self.$field.get_all_keys_with_key_and_limit(&query, count),
                    None => self.$field.get_all_keys_with_key(&query),
                }
                .map_err(js_error)?;
                Ok(keys_request(request))
            }

            fn count(&self, query: Option<KeyQuery>) -> HostResult<Pending<u64>> {
                let query = optional_query_to_js(query.as_ref())?;
                let request = self.$field.count_with_key(&query).map_err(js_error)?;
                Ok(BrowserRequest::boxed(request, |value| {
                    value
                        .as_f64()
                        .map(|n| n as u64)
                        .ok_or_else(|| HostError::unknown("count did not return a number"))
                }))
            }

            fn open_cursor(
                &self,
                query: Option<KeyQuery>,
                direction: CursorDirection,
                kind: CursorKind,
            ) -> HostResult<Box<dyn CursorRequest>> {
                let query = optional_query_to_js(query.as_ref())?;
                let direction = direction_to_js(direction);
                let request = match kind {
                    CursorKind::WithValue => self.$field.open_cursor_with_range_and_direction(&query, direction),
                    CursorKind::KeyOnly => self.$field.open_key_cursor_with_range_and_direction(&query, direction),
                }
                .map_err(js_error)?;
                Ok(Box::new(BrowserCursorRequest { request, kind }))
            }
        }
    };
}

pub(crate) struct BrowserObjectStore {
    store: IdbObjectStore,
}

impl_browser_source!(BrowserObjectStore, store);

impl BrowserObjectStore {
    fn write(&self, value: Value, key: Option<Key>, overwrite: bool) -> HostResult<Pending<Key>> {
        let value = value_to_js(&value)?;
        let request = match (key, overwrite) {
            (Some(key), true) => self.store.put_with_key(&value, &key_to_js(&key)),
            (Some(key), false) => self.store.add_with_key(&value, &key_to_js(&key)),
            (None, true) => self.store.put(&value),
            (None, false) => self.store.add(&value),
        }
        .map_err(js_error)?;
        Ok(BrowserRequest::boxed(request, |key| key_from_js(&key)))
    }
}

impl HostObjectStore for BrowserObjectStore {
    fn as_source(&self) -> &dyn HostSource {
        self
    }

    fn name(&self) -> String {
        self.store.name()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.store.key_path().ok().and_then(|path| key_path_from_js(&path))
    }

    fn auto_increment(&self) -> bool {
        self.store.auto_increment()
    }

    fn index_names(&self) -> Vec<String> {
        string_list(&self.store.index_names())
    }

    fn add(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>> {
        self.write(value, key, false)
    }

    fn put(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>> {
        self.write(value, key, true)
    }

    fn delete(&self, query: KeyQuery) -> HostResult<Pending<()>> {
        let request = self.store.delete(&query_to_js(&query)?).map_err(js_error)?;
        Ok(BrowserRequest::boxed(request, |_| Ok(())))
    }

    fn clear(&self) -> HostResult<Pending<()>> {
        let request = self.store.clear().map_err(js_error)?;
        Ok(BrowserRequest::boxed(request, |_| Ok(())))
    }

    fn index(&self, name: &str) -> HostResult<Rc<dyn HostIndex>> {
        let index = self.store.index(name).map_err(js_error)?;
        Ok(Rc::new(BrowserIndex { index }))
    }

    fn create_index(&self, name: &str, key_path: KeyPath, params: IndexParams) -> HostResult<Rc<dyn HostIndex>> {
        let options = IdbIndexParameters::new();
        set_prop(&options, "unique", &JsValue::from_bool(params.unique))?;
        set_prop(&options, "multiEntry", &JsValue::from_bool(params.multi_entry))?;
        let index = match &key_path {
            KeyPath::Single(path) => self
                .store
                .create_index_with_str_and_optional_parameters(name, path, &options),
            KeyPath::Compound(_) => self.store.create_index_with_str_sequence_and_optional_parameters(
                name,
                &key_path_to_js(&key_path),
                &options,
            ),
        }
        .map_err(js_error)?;
        Ok(Rc::new(BrowserIndex { index }))
    }

    fn delete_index(&self, name: &str) -> HostResult<()> {
        self.store.delete_index(name).map_err(js_error)
    }
}

pub(crate) struct BrowserIndex {
    index: IdbIndex,
}

impl_browser_source!(BrowserIndex, index);

impl HostIndex for BrowserIndex {
    fn as_source(&self) -> &dyn HostSource {
        self
    }

    fn name(&self) -> String {
        self.index.name()
    }

    fn key_path(&self) -> KeyPath {
        self.index
            .key_path()
            .ok()
            .and_then(|path| key_path_from_js(&path))
            .unwrap_or_else(|| KeyPath::from(""))
    }

    fn unique(&self) -> bool {
        self.index.unique()
    }

    fn multi_entry(&self) -> bool {
        self.index.multi_entry()
    }
}
