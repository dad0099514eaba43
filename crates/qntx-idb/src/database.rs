//! Open database handles

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;

use futures::future::{select, Either};
use qntx_idb_host::{HostConnection, TransactionMode, VersionChange};
use tracing::{debug, warn};

use crate::definition::{ObjectStoreDefinition, StoreScope};
use crate::error::{Error, Result};
use crate::request::await_completion;
use crate::store::ObjectStore;
use crate::transaction::Transaction;

/// One open connection. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    connection: Rc<dyn HostConnection>,
    /// The versionchange transaction, while an upgrade runs.
    upgrade: Option<Transaction>,
}

impl Database {
    pub(crate) fn new(connection: Rc<dyn HostConnection>) -> Self {
        Self {
            connection,
            upgrade: None,
        }
    }

    pub(crate) fn upgrading(connection: Rc<dyn HostConnection>, upgrade: Transaction) -> Self {
        Self {
            connection,
            upgrade: Some(upgrade),
        }
    }

    pub fn name(&self) -> String {
        self.connection.name()
    }

    pub fn version(&self) -> u32 {
        self.connection.version()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.connection.object_store_names()
    }

    /// The running versionchange transaction, inside an upgrader.
    pub fn upgrade_transaction(&self) -> Option<&Transaction> {
        self.upgrade.as_ref()
    }

    /// Only legal inside an upgrader; the host rejects it otherwise.
    pub fn create_object_store<V, K>(&self, definition: &ObjectStoreDefinition<V, K>) -> Result<ObjectStore<V, K>> {
        let store = self
            .connection
            .create_object_store(definition.name(), definition.params())?;
        debug!(db = %self.name(), store = definition.name(), "object store created");
        Ok(ObjectStore::new(store))
    }

    /// Only legal inside an upgrader; the host rejects it otherwise.
    pub fn delete_object_store<V, K>(&self, definition: &ObjectStoreDefinition<V, K>) -> Result<()> {
        self.connection.delete_object_store(definition.name())?;
        debug!(db = %self.name(), store = definition.name(), "object store deleted");
        Ok(())
    }

    /// Run `action` in a transaction over `scope`.
    ///
    /// Resolves with the action's value once the transaction committed. If
    /// the action fails, the transaction is aborted and the action's error
    /// returned. If the host commits while the action is still pending, the
    /// result is [`Error::TransactionActionMismatch`].
    pub async fn transaction<T, E, F, Fut>(
        &self,
        scope: &[&dyn StoreScope],
        mode: TransactionMode,
        action: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let names: Vec<String> = scope.iter().map(|store| store.store_name().to_string()).collect();
        let host = self.connection.transaction(&names, mode).map_err(Error::from)?;
        let completion = pin!(await_completion(host.as_ref()));
        let transaction = Transaction::new(host);
        debug!(db = %self.name(), ?mode, scope = ?names, "transaction begun");

        let action = pin!(action(transaction.clone()));
        match select(action, completion).await {
            Either::Left((Ok(value), completion)) => {
                completion.await?;
                debug!(db = %self.name(), scope = ?names, "transaction committed");
                Ok(value)
            }
            Either::Left((Err(error), completion)) => {
                debug!(db = %self.name(), scope = ?names, "action failed, aborting transaction");
                if let Err(rejected) = transaction.host().abort() {
                    warn!(db = %self.name(), error = %rejected, "host rejected the abort");
                }
                let _ = completion.await;
                Err(error)
            }
            Either::Right((Ok(()), _)) => Err(Error::TransactionActionMismatch.into()),
            Either::Right((Err(error), _)) => {
                debug!(db = %self.name(), %error, "transaction aborted while its action was pending");
                Err(error.into())
            }
        }
    }

    /// Called when another connection wants to upgrade or delete the
    /// database. Closing this connection from the handler unblocks it.
    pub fn on_version_change(&self, mut handler: impl FnMut(&Database, VersionChange) + 'static) {
        let connection = Rc::downgrade(&self.connection);
        self.connection.set_on_version_change(Some(Box::new(move |change| {
            if let Some(connection) = connection.upgrade() {
                handler(&Database::new(connection), change);
            }
        })));
    }

    pub fn close(&self) {
        debug!(db = %self.name(), "closing connection");
        self.connection.close();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("upgrading", &self.upgrade.is_some())
            .finish()
    }
}
