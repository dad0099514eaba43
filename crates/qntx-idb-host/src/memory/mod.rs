//! In-memory host engine
//!
//! An object-store engine with IndexedDB semantics that lives entirely in
//! process memory: versioned databases, upgrade and blocked events,
//! transactions that queue behind conflicting ones and auto-commit when idle,
//! rollback on abort, key generators, indexes and cursors over live data.
//!
//! Completions are delivered from tasks spawned with
//! [`tokio::task::spawn_local`], so the engine must be driven from inside a
//! [`tokio::task::LocalSet`].

mod cursor;
mod data;
mod store;
mod transaction;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::spawn_local;
use tracing::debug;

use crate::engine::{
    DeleteCallbacks, DeleteRequest, HostConnection, HostFactory, HostObjectStore,
    HostTransaction, ObjectStoreParams, OnError, OnSuccess, OpenCallbacks, OpenRequest,
    TransactionMode, VersionChange,
};
use crate::error::{HostError, HostResult};
use crate::key::KeyPath;

use data::StoreData;
use store::MemoryObjectStore;
use transaction::{MemoryTransaction, TxState};

/// Tuning for the memory engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// How long a started transaction may sit with no pending request
    /// before it commits on its own.
    #[serde(with = "millis")]
    pub auto_commit_after: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_commit_after: Duration::from_millis(5),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) struct Engine {
    config: MemoryConfig,
    databases: RefCell<HashMap<String, Rc<DbState>>>,
    operations: Cell<u64>,
    ids: Cell<u64>,
}

impl Engine {
    pub fn next_id(&self) -> u64 {
        let id = self.ids.get() + 1;
        self.ids.set(id);
        id
    }

    pub fn count_operation(&self) {
        self.operations.set(self.operations.get() + 1);
    }

    fn database(&self, name: &str) -> Rc<DbState> {
        let mut databases = self.databases.borrow_mut();
        let db = databases
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(DbState::new(name)));
        Rc::clone(db)
    }

    fn process_open(self: &Rc<Self>, name: String, version: u32, callbacks: OpenCallbacks) {
        let OpenCallbacks {
            upgrade_needed,
            mut blocked,
            success,
            error,
        } = callbacks;
        let db = self.database(&name);
        let current = db.version.get();
        if version <= current {
            self.connect(&db, version, success, error);
            return;
        }

        let change = VersionChange {
            old_version: current,
            new_version: Some(version),
        };
        db.notify_version_change(change);

        let engine = Rc::clone(self);
        let proceed: Box<dyn FnOnce()> = Box::new(move || {
            let db = engine.database(&name);
            if version <= db.version.get() {
                engine.connect(&db, version, success, error);
            } else {
                engine.run_upgrade(&db, version, upgrade_needed, success, error);
            }
        });
        if db.has_open_connections() {
            debug!(db = %db.name, ?change, "open blocked by open connections");
            blocked(change);
            db.waiters.borrow_mut().push(proceed);
        } else {
            proceed();
        }
    }

    fn connect(
        self: &Rc<Self>,
        db: &Rc<DbState>,
        version: u32,
        success: OnSuccess<Rc<dyn HostConnection>>,
        error: OnError,
    ) {
        let current = db.version.get();
        if version < current {
            error(HostError::version(format!(
                "requested version {} is lower than the stored version {}",
                version, current
            )));
            return;
        }
        debug!(db = %db.name, version, "connection opened");
        success(ConnectionState::open(self, db, version));
    }

    fn run_upgrade(
        self: &Rc<Self>,
        db: &Rc<DbState>,
        version: u32,
        upgrade_needed: Box<dyn FnOnce(VersionChange, Rc<dyn HostConnection>, Rc<dyn HostTransaction>)>,
        success: OnSuccess<Rc<dyn HostConnection>>,
        error: OnError,
    ) {
        let old_version = db.version.get();
        let change = VersionChange {
            old_version,
            new_version: Some(version),
        };
        let connection = ConnectionState::open(self, db, version);
        let tx = TxState::new(self, db, Vec::new(), TransactionMode::VersionChange);
        let stores = db.schema.borrow().clone();
        tx.snapshot_schema(old_version, stores);
        db.version.set(version);
        *connection.upgrade.borrow_mut() = Some(Rc::downgrade(&tx));
        debug!(db = %db.name, old_version, version, tx = tx.id, "upgrade started");

        let handle = Rc::clone(&connection);
        tx.set_on_start(Box::new(move |tx| {
            upgrade_needed(change, handle, Rc::new(MemoryTransaction::new(Rc::clone(tx))));
        }));
        tx.set_finish_hook(Box::new(move |committed| {
            *connection.upgrade.borrow_mut() = None;
            if committed {
                success(connection);
            } else {
                connection.close();
                error(HostError::abort("the version change transaction was aborted"));
            }
        }));
        db.transactions.borrow_mut().push(tx);
        db.schedule();
    }

    fn process_delete(self: &Rc<Self>, name: String, callbacks: DeleteCallbacks) {
        let DeleteCallbacks {
            mut blocked,
            success,
            error: _,
        } = callbacks;
        let existing = self.databases.borrow().get(&name).cloned();
        let Some(db) = existing else {
            success(());
            return;
        };

        let change = VersionChange {
            old_version: db.version.get(),
            new_version: None,
        };
        db.notify_version_change(change);

        let engine = Rc::clone(self);
        let proceed: Box<dyn FnOnce()> = Box::new(move || {
            engine.databases.borrow_mut().remove(&name);
            debug!(db = %name, "database deleted");
            success(());
        });
        if db.has_open_connections() {
            debug!(db = %db.name, "delete blocked by open connections");
            blocked(change);
            db.waiters.borrow_mut().push(proceed);
        } else {
            proceed();
        }
    }
}

pub(crate) struct DbState {
    pub name: String,
    pub version: Cell<u32>,
    pub schema: RefCell<BTreeMap<String, StoreData>>,
    connections: RefCell<Vec<Weak<ConnectionState>>>,
    /// Unfinished transactions in creation order.
    transactions: RefCell<Vec<Rc<TxState>>>,
    /// Opens and deletes waiting for every connection to close.
    waiters: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl DbState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Cell::new(0),
            schema: RefCell::new(BTreeMap::new()),
            connections: RefCell::new(Vec::new()),
            transactions: RefCell::new(Vec::new()),
            waiters: RefCell::new(Vec::new()),
        }
    }

    /// Start every waiting transaction no earlier unfinished one conflicts with.
    pub fn schedule(&self) {
        let ready: Vec<Rc<TxState>> = {
            let transactions = self.transactions.borrow();
            transactions
                .iter()
                .enumerate()
                .filter(|(i, tx)| {
                    tx.phase() == transaction::Phase::Waiting
                        && !transactions[..*i].iter().any(|earlier| earlier.conflicts_with(tx))
                })
                .map(|(_, tx)| Rc::clone(tx))
                .collect()
        };
        for tx in ready {
            tx.start();
        }
    }

    pub fn forget_transaction(&self, tx: &Rc<TxState>) {
        self.transactions
            .borrow_mut()
            .retain(|other| !Rc::ptr_eq(other, tx));
    }

    fn open_connections(&self) -> Vec<Rc<ConnectionState>> {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|weak| weak.upgrade().is_some_and(|c| !c.closed.get()));
        connections.iter().filter_map(Weak::upgrade).collect()
    }

    fn has_open_connections(&self) -> bool {
        !self.open_connections().is_empty()
    }

    fn notify_version_change(&self, change: VersionChange) {
        for connection in self.open_connections() {
            let handler = connection.on_version_change.borrow_mut().take();
            if let Some(mut handler) = handler {
                handler(change);
                let mut slot = connection.on_version_change.borrow_mut();
                if slot.is_none() {
                    *slot = Some(handler);
                }
            }
        }
    }

    /// Run waiters one at a time while no connection is open.
    fn wake_waiters(&self) {
        while !self.has_open_connections() {
            let next = {
                let mut waiters = self.waiters.borrow_mut();
                if waiters.is_empty() {
                    None
                } else {
                    Some(waiters.remove(0))
                }
            };
            match next {
                Some(waiter) => waiter(),
                None => break,
            }
        }
    }
}

pub(crate) struct ConnectionState {
    engine: Rc<Engine>,
    db: Rc<DbState>,
    version: u32,
    closed: Cell<bool>,
    upgrade: RefCell<Option<Weak<TxState>>>,
    on_version_change: RefCell<Option<Box<dyn FnMut(VersionChange)>>>,
}

impl ConnectionState {
    fn open(engine: &Rc<Engine>, db: &Rc<DbState>, version: u32) -> Rc<Self> {
        let connection = Rc::new(Self {
            engine: Rc::clone(engine),
            db: Rc::clone(db),
            version,
            closed: Cell::new(false),
            upgrade: RefCell::new(None),
            on_version_change: RefCell::new(None),
        });
        db.connections.borrow_mut().push(Rc::downgrade(&connection));
        connection
    }

    fn running_upgrade(&self) -> Option<Rc<TxState>> {
        self.upgrade
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|tx| !tx.is_finished())
    }

    fn upgrade_transaction(&self) -> HostResult<Rc<TxState>> {
        let tx = self.running_upgrade().ok_or_else(|| {
            HostError::invalid_state("schema changes are only allowed during a version change")
        })?;
        tx.ensure_upgrading()?;
        Ok(tx)
    }
}

impl HostConnection for ConnectionState {
    fn name(&self) -> String {
        self.db.name.clone()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn object_store_names(&self) -> Vec<String> {
        self.db.schema.borrow().keys().cloned().collect()
    }

    fn create_object_store(&self, name: &str, params: ObjectStoreParams) -> HostResult<Rc<dyn HostObjectStore>> {
        let tx = self.upgrade_transaction()?;
        if let Some(path) = &params.key_path {
            if !path.is_valid() {
                return Err(HostError::syntax(format!("{} is not a valid key path", path)));
            }
            let generatable = matches!(path, KeyPath::Single(p) if !p.is_empty());
            if params.auto_increment && !generatable {
                return Err(HostError::invalid_access(
                    "a key generator needs a single, non-empty key path",
                ));
            }
        }
        {
            let mut schema = self.db.schema.borrow_mut();
            if schema.contains_key(name) {
                return Err(HostError::constraint(format!(
                    "object store '{}' already exists",
                    name
                )));
            }
            schema.insert(
                name.to_string(),
                StoreData::new(params.key_path, params.auto_increment),
            );
        }
        debug!(db = %self.db.name, store = name, "object store created");
        Ok(Rc::new(MemoryObjectStore::new(tx, name)))
    }

    fn delete_object_store(&self, name: &str) -> HostResult<()> {
        self.upgrade_transaction()?;
        match self.db.schema.borrow_mut().remove(name) {
            Some(_) => Ok(()),
            None => Err(HostError::not_found(format!(
                "object store '{}' does not exist",
                name
            ))),
        }
    }

    fn transaction(&self, scope: &[String], mode: TransactionMode) -> HostResult<Rc<dyn HostTransaction>> {
        if self.closed.get() {
            return Err(HostError::invalid_state("the connection is closed"));
        }
        if self.running_upgrade().is_some() {
            return Err(HostError::invalid_state(
                "a version change transaction is running on this connection",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(HostError::type_error(
                "versionchange transactions are only created by open",
            ));
        }
        if scope.is_empty() {
            return Err(HostError::invalid_access("a transaction needs at least one object store"));
        }
        {
            let schema = self.db.schema.borrow();
            if let Some(missing) = scope.iter().find(|name| !schema.contains_key(name.as_str())) {
                return Err(HostError::not_found(format!(
                    "object store '{}' does not exist",
                    missing
                )));
            }
        }

        let mut scope = scope.to_vec();
        scope.sort();
        scope.dedup();
        let tx = TxState::new(&self.engine, &self.db, scope, mode);
        self.db.transactions.borrow_mut().push(Rc::clone(&tx));
        self.db.schedule();
        Ok(Rc::new(MemoryTransaction::new(tx)))
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!(db = %self.db.name, version = self.version, "connection closed");
        let db = Rc::clone(&self.db);
        spawn_local(async move { db.wake_waiters() });
    }

    fn set_on_version_change(&self, handler: Option<Box<dyn FnMut(VersionChange)>>) {
        *self.on_version_change.borrow_mut() = handler;
    }
}

struct MemoryOpenRequest {
    engine: Rc<Engine>,
    name: String,
    version: u32,
}

impl OpenRequest for MemoryOpenRequest {
    fn set_callbacks(self: Box<Self>, callbacks: OpenCallbacks) {
        let MemoryOpenRequest { engine, name, version } = *self;
        spawn_local(async move { engine.process_open(name, version, callbacks) });
    }
}

struct MemoryDeleteRequest {
    engine: Rc<Engine>,
    name: String,
}

impl DeleteRequest for MemoryDeleteRequest {
    fn set_callbacks(self: Box<Self>, callbacks: DeleteCallbacks) {
        let MemoryDeleteRequest { engine, name } = *self;
        spawn_local(async move { engine.process_delete(name, callbacks) });
    }
}

/// Entry point of the memory engine. Clones share the same databases.
#[derive(Clone)]
pub struct MemoryFactory {
    engine: Rc<Engine>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            engine: Rc::new(Engine {
                config,
                databases: RefCell::new(HashMap::new()),
                operations: Cell::new(0),
                ids: Cell::new(0),
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.engine.config
    }

    /// Number of requests and cursor steps issued so far, across every
    /// database of this factory.
    pub fn operation_count(&self) -> u64 {
        self.engine.operations.get()
    }

    /// Names of the databases that exist (version above zero), sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engine
            .databases
            .borrow()
            .values()
            .filter(|db| db.version.get() > 0)
            .map(|db| db.name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFactory for MemoryFactory {
    fn open(&self, name: &str, version: u32) -> HostResult<Box<dyn OpenRequest>> {
        if version == 0 {
            return Err(HostError::type_error("the version must be at least 1"));
        }
        Ok(Box::new(MemoryOpenRequest {
            engine: Rc::clone(&self.engine),
            name: name.to_string(),
            version,
        }))
    }

    fn delete_database(&self, name: &str) -> HostResult<Box<dyn DeleteRequest>> {
        Ok(Box::new(MemoryDeleteRequest {
            engine: Rc::clone(&self.engine),
            name: name.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{HostRequest, IndexParams};
    use crate::key::{Key, KeyQuery};
    use crate::HostErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        LocalSet::new().block_on(&runtime, future)
    }

    async fn settle<T: 'static>(request: Box<dyn HostRequest<T>>) -> HostResult<T> {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let on_error = Rc::clone(&tx);
        request.set_callbacks(
            Box::new(move |value| {
                if let Some(tx) = tx.borrow_mut().take() {
                    let _ = tx.send(Ok(value));
                }
            }),
            Box::new(move |error| {
                if let Some(tx) = on_error.borrow_mut().take() {
                    let _ = tx.send(Err(error));
                }
            }),
        );
        rx.await.unwrap()
    }

    /// Open `name` at `version`, creating a "people" store keyed by "id"
    /// with an "email" index when upgrading from nothing.
    async fn open(factory: &MemoryFactory, name: &str, version: u32) -> HostResult<Rc<dyn HostConnection>> {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));
        let (on_success, on_error) = (Rc::clone(&tx), Rc::clone(&tx));
        factory.open(name, version)?.set_callbacks(OpenCallbacks {
            upgrade_needed: Box::new(|change, connection, _tx| {
                if change.old_version == 0 {
                    let store = connection
                        .create_object_store(
                            "people",
                            ObjectStoreParams {
                                key_path: Some(KeyPath::from("id")),
                                auto_increment: false,
                            },
                        )
                        .unwrap();
                    store
                        .create_index("email", KeyPath::from("email"), IndexParams { unique: true, multi_entry: false })
                        .unwrap();
                }
            }),
            blocked: Box::new(|_| {}),
            success: Box::new(move |connection| {
                if let Some(tx) = on_success.borrow_mut().take() {
                    let _ = tx.send(Ok(connection));
                }
            }),
            error: Box::new(move |error| {
                if let Some(tx) = on_error.borrow_mut().take() {
                    let _ = tx.send(Err(error));
                }
            }),
        });
        rx.await.unwrap()
    }

    async fn completion(tx: &Rc<dyn HostTransaction>) -> Option<HostError> {
        let (sender, rx) = oneshot::channel();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let on_abort = Rc::clone(&sender);
        tx.set_callbacks(
            Box::new(move || {
                if let Some(s) = sender.borrow_mut().take() {
                    let _ = s.send(None);
                }
            }),
            Box::new(move |error| {
                if let Some(s) = on_abort.borrow_mut().take() {
                    let _ = s.send(Some(error.unwrap_or_else(transaction::aborted)));
                }
            }),
        );
        rx.await.unwrap()
    }

    fn people() -> Vec<String> {
        vec!["people".to_string()]
    }

    #[test]
    fn test_open_upgrade_and_reopen() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            assert_eq!(db.version(), 1);
            assert_eq!(db.object_store_names(), people());
            db.close();

            let err = open(&factory, "app", 0).await.err().unwrap();
            assert_eq!(err.kind, HostErrorKind::Type);

            let again = open(&factory, "app", 1).await.unwrap();
            assert_eq!(again.object_store_names(), people());
            assert_eq!(factory.database_names(), vec!["app".to_string()]);
        });
    }

    #[test]
    fn test_lower_version_is_rejected() {
        run(async {
            let factory = MemoryFactory::new();
            open(&factory, "app", 3).await.unwrap().close();
            let err = open(&factory, "app", 2).await.err().unwrap();
            assert_eq!(err.kind, HostErrorKind::Version);
        });
    }

    #[test]
    fn test_requests_and_auto_commit() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            let tx = db.transaction(&people(), TransactionMode::ReadWrite).unwrap();
            let store = tx.object_store("people").unwrap();
            let key = settle(store.add(json!({"id": 1, "email": "a@x"}), None).unwrap())
                .await
                .unwrap();
            assert_eq!(key, Key::from(1));
            assert_eq!(completion(&tx).await, None);

            let err = store.get(KeyQuery::Key(Key::from(1))).err().unwrap();
            assert_eq!(err.kind, HostErrorKind::TransactionInactive);

            let tx = db.transaction(&people(), TransactionMode::ReadOnly).unwrap();
            let store = tx.object_store("people").unwrap();
            let value = settle(store.get(KeyQuery::Key(Key::from(1))).unwrap()).await.unwrap();
            assert_eq!(value, Some(json!({"id": 1, "email": "a@x"})));
            let err = store.put(json!({"id": 2}), None).err().unwrap();
            assert_eq!(err.kind, HostErrorKind::ReadOnly);
        });
    }

    #[test]
    fn test_failed_request_rolls_back() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            let tx = db.transaction(&people(), TransactionMode::ReadWrite).unwrap();
            let store = tx.object_store("people").unwrap();
            let first = store.add(json!({"id": 1, "email": "a@x"}), None).unwrap();
            let second = store.add(json!({"id": 2, "email": "a@x"}), None).unwrap();
            assert!(settle(first).await.is_ok());
            assert_eq!(settle(second).await.unwrap_err().kind, HostErrorKind::Constraint);
            assert_eq!(
                completion(&tx).await.map(|e| e.kind),
                Some(HostErrorKind::Constraint)
            );

            let tx = db.transaction(&people(), TransactionMode::ReadOnly).unwrap();
            let store = tx.object_store("people").unwrap();
            assert_eq!(settle(store.count(None).unwrap()).await.unwrap(), 0);
        });
    }

    #[test]
    fn test_writers_are_serialized() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            let first = db.transaction(&people(), TransactionMode::ReadWrite).unwrap();
            let second = db.transaction(&people(), TransactionMode::ReadWrite).unwrap();

            let late = second
                .object_store("people")
                .unwrap()
                .get(KeyQuery::Key(Key::from(1)))
                .unwrap();
            let early = first
                .object_store("people")
                .unwrap()
                .put(json!({"id": 1, "email": "a@x"}), None)
                .unwrap();

            assert_eq!(settle(early).await.unwrap(), Key::from(1));
            let seen: Option<Value> = settle(late).await.unwrap();
            assert_eq!(seen, Some(json!({"id": 1, "email": "a@x"})));
        });
    }

    #[test]
    fn test_schema_changes_need_an_upgrade() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            let err = db
                .create_object_store("other", ObjectStoreParams::default())
                .err()
                .unwrap();
            assert_eq!(err.kind, HostErrorKind::InvalidState);

            let err = db.transaction(&[], TransactionMode::ReadOnly).err().unwrap();
            assert_eq!(err.kind, HostErrorKind::InvalidAccess);
            let err = db
                .transaction(&["missing".to_string()], TransactionMode::ReadOnly)
                .err()
                .unwrap();
            assert_eq!(err.kind, HostErrorKind::NotFound);
        });
    }

    #[test]
    fn test_version_change_handler_unblocks_upgrade() {
        run(async {
            let factory = MemoryFactory::new();
            let old = open(&factory, "app", 1).await.unwrap();
            let weak = Rc::downgrade(&old);
            old.set_on_version_change(Some(Box::new(move |change| {
                assert_eq!(change.new_version, Some(2));
                if let Some(connection) = weak.upgrade() {
                    connection.close();
                }
            })));
            let upgraded = open(&factory, "app", 2).await.unwrap();
            assert_eq!(upgraded.version(), 2);
        });
    }

    #[test]
    fn test_auto_increment_injects_key() {
        run(async {
            let factory = MemoryFactory::new();
            let (sender, rx) = oneshot::channel();
            let sender = Rc::new(RefCell::new(Some(sender)));
            factory.open("gen", 1).unwrap().set_callbacks(OpenCallbacks {
                upgrade_needed: Box::new(|_, connection, _| {
                    connection
                        .create_object_store(
                            "notes",
                            ObjectStoreParams {
                                key_path: Some(KeyPath::from("meta.id")),
                                auto_increment: true,
                            },
                        )
                        .unwrap();
                }),
                blocked: Box::new(|_| {}),
                success: Box::new(move |connection| {
                    if let Some(s) = sender.borrow_mut().take() {
                        let _ = s.send(connection);
                    }
                }),
                error: Box::new(|error| panic!("open failed: {}", error)),
            });
            let db = rx.await.unwrap();

            let tx = db
                .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
                .unwrap();
            let store = tx.object_store("notes").unwrap();
            let key = settle(store.add(json!({"text": "hi"}), None).unwrap()).await.unwrap();
            assert_eq!(key, Key::from(1));
            let stored = settle(store.get(KeyQuery::Key(key)).unwrap()).await.unwrap();
            assert_eq!(stored, Some(json!({"text": "hi", "meta": {"id": 1}})));

            let err = store.add(json!({"text": "x"}), Some(Key::from(9))).err().unwrap();
            assert_eq!(err.kind, HostErrorKind::Data);
        });
    }

    #[test]
    fn test_operation_count() {
        run(async {
            let factory = MemoryFactory::new();
            let db = open(&factory, "app", 1).await.unwrap();
            let before = factory.operation_count();
            let tx = db.transaction(&people(), TransactionMode::ReadOnly).unwrap();
            let store = tx.object_store("people").unwrap();
            settle(store.count(None).unwrap()).await.unwrap();
            assert_eq!(factory.operation_count(), before + 1);
        });
    }

    #[test]
    fn test_config_from_json() {
        let config: MemoryConfig = serde_json::from_str(r#"{"auto_commit_after": 20}"#).unwrap();
        assert_eq!(config.auto_commit_after, Duration::from_millis(20));
        let config: MemoryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MemoryConfig::default());
    }
}
