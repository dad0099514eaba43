//! Host engines for the QNTX object-store wrapper
//!
//! This crate defines the callback-level contract an IndexedDB-style engine
//! exposes ([`HostFactory`] and friends) and ships two engines behind it:
//!
//! - [`memory::MemoryFactory`]: an in-process engine with real transaction
//!   lifecycles (scheduling, auto-commit, rollback on abort), driven by tokio
//!   local tasks. Used natively and in tests.
//! - `web::BrowserFactory` (wasm32 only): the browser's `indexedDB`.

mod engine;
mod error;
mod key;

#[cfg(not(target_arch = "wasm32"))]
pub mod memory;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use engine::{
    CursorDirection, CursorKind, CursorRequest, DeleteCallbacks, DeleteRequest, HostConnection,
    HostCursor, HostFactory, HostIndex, HostObjectStore, HostRequest, HostSource,
    HostTransaction, IndexParams, ObjectStoreParams, OnCursorStep, OnError, OnSuccess,
    OpenCallbacks, OpenRequest, Pending, TransactionMode, VersionChange,
};
pub use error::{HostError, HostErrorKind, HostResult};
pub use key::{Key, KeyPath, KeyQuery, KeyRange, MAX_GENERATED_KEY};
