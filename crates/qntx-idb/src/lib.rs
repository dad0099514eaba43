//! Typed, awaitable object stores over IndexedDB-style engines
//!
//! The host engine (see `qntx-idb-host`) speaks callbacks: every operation is
//! issued synchronously and later fires a success or error callback. This
//! crate turns each pending operation into a future, drives cursors through
//! a small state machine with seek/offset/limit/early-break policy, and types
//! stores, indexes and key ranges through declarative definitions.
//!
//! # Example
//!
//! ```rust,ignore
//! use qntx_idb::{DatabaseDefinition, Factory, ObjectStoreDefinition, TransactionMode};
//!
//! let notes: ObjectStoreDefinition<Note, u32> =
//!     ObjectStoreDefinition::new("notes").with_key_path("id").with_auto_increment(true);
//!
//! let schema = notes.clone();
//! let definition = DatabaseDefinition::new("app", 1, move |db, _old, _new| {
//!     db.create_object_store(&schema)?;
//!     Ok(())
//! });
//!
//! let db = Factory::memory().open(&definition).await?;
//! let id = db
//!     .transaction(&[&notes], TransactionMode::ReadWrite, |tx| async move {
//!         tx.object_store(&notes)?.add(&note).await
//!     })
//!     .await?;
//! ```
//!
//! # Auto-commit
//!
//! The host commits a transaction once no request has been pending for a
//! brief moment. Inside a transaction action, only await that transaction's
//! own requests; awaiting anything else lets it commit underneath you, after
//! which requests fail with [`Error::TransactionInactive`] and the
//! transaction call fails with [`Error::TransactionActionMismatch`].

mod cursor;
mod database;
mod definition;
mod error;
mod factory;
mod index;
mod key;
mod request;
mod store;
mod transaction;

pub use cursor::{CursorOptions, KeyPosition, StartFrom, ValuePosition};
pub use database::Database;
pub use definition::{DatabaseDefinition, IndexDefinition, ObjectStoreDefinition, StoreScope, Upgrader};
pub use error::{Error, Result};
pub use factory::Factory;
pub use index::Index;
pub use key::{KeyRange, KeyType, Query};
pub use store::ObjectStore;
pub use transaction::Transaction;

pub use qntx_idb_host::{
    CursorDirection, HostError, HostErrorKind, HostFactory, Key, KeyPath, TransactionMode, VersionChange,
};

#[cfg(not(target_arch = "wasm32"))]
pub use qntx_idb_host::memory::{MemoryConfig, MemoryFactory};
