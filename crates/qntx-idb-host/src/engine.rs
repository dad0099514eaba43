//! The host engine contract
//!
//! These traits describe the object-store engine exactly as the browser
//! exposes it. Every operation is issued synchronously and may fail right
//! away (for example with `TransactionInactiveError`); otherwise it returns a
//! pending request that later fires exactly one of its completion callbacks.
//! Nothing here is async: turning requests into futures is the job of the
//! wrapper crate.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HostError, HostResult};
use crate::key::{Key, KeyPath, KeyQuery};

/// Fired once with a request's result.
pub type OnSuccess<T> = Box<dyn FnOnce(T)>;

/// Fired once with a request's failure.
pub type OnError = Box<dyn FnOnce(HostError)>;

/// Fired once per cursor step; `None` once the cursor runs past its range.
pub type OnCursorStep = Box<dyn FnMut(Option<Rc<dyn HostCursor>>)>;

/// A pending operation that completes exactly once.
pub trait HostRequest<T> {
    /// Install the completion callbacks. Consumes the request, so a request
    /// can only ever be adapted once.
    fn set_callbacks(self: Box<Self>, on_success: OnSuccess<T>, on_error: OnError);
}

/// Boxed pending request.
pub type Pending<T> = Box<dyn HostRequest<T>>;

/// A pending cursor: fires its step callback after the cursor opens and after
/// every advance, or its error callback once.
pub trait CursorRequest {
    fn set_callbacks(self: Box<Self>, on_step: OnCursorStep, on_error: OnError);
}

/// Old and new version carried by upgrade, blocked and versionchange events.
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

/// Callbacks for an open request.
pub struct OpenCallbacks {
    /// The stored version is behind the requested one. The transaction is the
    /// versionchange transaction; schema changes are legal while it is active.
    pub upgrade_needed: Box<dyn FnOnce(VersionChange, Rc<dyn HostConnection>, Rc<dyn HostTransaction>)>,
    /// Other connections are still open and prevent the upgrade.
    pub blocked: Box<dyn FnMut(VersionChange)>,
    pub success: OnSuccess<Rc<dyn HostConnection>>,
    pub error: OnError,
}

pub trait OpenRequest {
    fn set_callbacks(self: Box<Self>, callbacks: OpenCallbacks);
}

/// Callbacks for a delete-database request.
pub struct DeleteCallbacks {
    pub blocked: Box<dyn FnMut(VersionChange)>,
    pub success: OnSuccess<()>,
    pub error: OnError,
}

pub trait DeleteRequest {
    fn set_callbacks(self: Box<Self>, callbacks: DeleteCallbacks);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn is_forward(&self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

/// Whether a cursor materializes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorKind {
    KeyOnly,
    WithValue,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreParams {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    pub unique: bool,
    pub multi_entry: bool,
}

/// Entry point of a host engine.
pub trait HostFactory {
    fn open(&self, name: &str, version: u32) -> HostResult<Box<dyn OpenRequest>>;

    fn delete_database(&self, name: &str) -> HostResult<Box<dyn DeleteRequest>>;
}

/// One open connection to a database.
pub trait HostConnection {
    fn name(&self) -> String;

    fn version(&self) -> u32;

    fn object_store_names(&self) -> Vec<String>;

    /// Only legal while this connection's versionchange transaction is active.
    fn create_object_store(
        &self,
        name: &str,
        params: ObjectStoreParams,
    ) -> HostResult<Rc<dyn HostObjectStore>>;

    /// Only legal while this connection's versionchange transaction is active.
    fn delete_object_store(&self, name: &str) -> HostResult<()>;

    fn transaction(&self, scope: &[String], mode: TransactionMode)
        -> HostResult<Rc<dyn HostTransaction>>;

    fn close(&self);

    /// Handler for another connection asking to upgrade or delete the database.
    fn set_on_version_change(&self, handler: Option<Box<dyn FnMut(VersionChange)>>);
}

pub trait HostTransaction {
    fn mode(&self) -> TransactionMode;

    fn object_store_names(&self) -> Vec<String>;

    fn object_store(&self, name: &str) -> HostResult<Rc<dyn HostObjectStore>>;

    fn abort(&self) -> HostResult<()>;

    /// Commit once every pending request has completed; no new requests are
    /// accepted afterwards.
    fn commit(&self) -> HostResult<()>;

    /// Install completion callbacks: `on_complete` after commit, `on_abort`
    /// with the error that caused the abort, if any.
    fn set_callbacks(&self, on_complete: Box<dyn FnOnce()>, on_abort: Box<dyn FnOnce(Option<HostError>)>);
}

/// Read operations shared by object stores and indexes.
pub trait HostSource {
    /// Value of the first record matching the query.
    fn get(&self, query: KeyQuery) -> HostResult<Pending<Option<Value>>>;

    /// Primary key of the first record matching the query.
    fn get_key(&self, query: KeyQuery) -> HostResult<Pending<Option<Key>>>;

    fn get_all(&self, query: Option<KeyQuery>, count: Option<u32>) -> HostResult<Pending<Vec<Value>>>;

    /// Primary keys of the matching records, in source order.
    fn get_all_keys(&self, query: Option<KeyQuery>, count: Option<u32>)
        -> HostResult<Pending<Vec<Key>>>;

    fn count(&self, query: Option<KeyQuery>) -> HostResult<Pending<u64>>;

    fn open_cursor(
        &self,
        query: Option<KeyQuery>,
        direction: CursorDirection,
        kind: CursorKind,
    ) -> HostResult<Box<dyn CursorRequest>>;
}

pub trait HostObjectStore: HostSource {
    fn as_source(&self) -> &dyn HostSource;

    fn name(&self) -> String;

    fn key_path(&self) -> Option<KeyPath>;

    fn auto_increment(&self) -> bool;

    fn index_names(&self) -> Vec<String>;

    /// Insert; fails with `ConstraintError` if the key exists.
    fn add(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>>;

    /// Insert or overwrite.
    fn put(&self, value: Value, key: Option<Key>) -> HostResult<Pending<Key>>;

    fn delete(&self, query: KeyQuery) -> HostResult<Pending<()>>;

    fn clear(&self) -> HostResult<Pending<()>>;

    fn index(&self, name: &str) -> HostResult<Rc<dyn HostIndex>>;

    /// Only legal during an upgrade.
    fn create_index(
        &self,
        name: &str,
        key_path: KeyPath,
        params: IndexParams,
    ) -> HostResult<Rc<dyn HostIndex>>;

    /// Only legal during an upgrade; `NotFoundError` if the index is missing.
    fn delete_index(&self, name: &str) -> HostResult<()>;
}

pub trait HostIndex: HostSource {
    fn as_source(&self) -> &dyn HostSource;

    fn name(&self) -> String;

    fn key_path(&self) -> KeyPath;

    fn unique(&self) -> bool;

    fn multi_entry(&self) -> bool;
}

/// A cursor positioned on one record. The position handed to a step callback
/// is only valid until the cursor is advanced.
pub trait HostCursor {
    fn key(&self) -> Key;

    fn primary_key(&self) -> Key;

    /// `None` for key-only cursors.
    fn value(&self) -> Option<Value>;

    fn direction(&self) -> CursorDirection;

    fn advance(&self, count: u32) -> HostResult<()>;

    /// Advance one step, or to the first position at or beyond `key`.
    fn continue_key(&self, key: Option<Key>) -> HostResult<()>;

    /// Advance to the first position at or beyond `(key, primary_key)`.
    /// Only index cursors with a non-unique direction support this.
    fn continue_primary_key(&self, key: Key, primary_key: Key) -> HostResult<()>;

    fn update(&self, value: Value) -> HostResult<Pending<Key>>;

    fn delete(&self) -> HostResult<Pending<()>>;
}
