//! Opening, upgrading and deleting databases

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::channel::oneshot;
use qntx_idb_host::{
    DeleteCallbacks, HostConnection, HostError, HostFactory, HostTransaction, OpenCallbacks,
    VersionChange,
};
use tracing::{debug, warn};

use crate::database::Database;
use crate::definition::DatabaseDefinition;
use crate::error::{Error, Result};
use crate::request::{dropped, send, Sender};
use crate::transaction::Transaction;

/// Entry point owning one host engine. Clones share the engine.
#[derive(Clone)]
pub struct Factory {
    host: Rc<dyn HostFactory>,
}

/// An open nobody waits for any more: it was blocked, or its future was
/// dropped.
fn abandoned<T>(sender: &Sender<T>) -> bool {
    sender.borrow().as_ref().map_or(true, |tx| tx.is_canceled())
}

impl Factory {
    pub fn new(host: Rc<dyn HostFactory>) -> Self {
        Self { host }
    }

    /// A fresh in-memory engine.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn memory() -> Self {
        Self::from(qntx_idb_host::memory::MemoryFactory::new())
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn memory_with(config: qntx_idb_host::memory::MemoryConfig) -> Self {
        Self::from(qntx_idb_host::memory::MemoryFactory::with_config(config))
    }

    /// The browser's `indexedDB`.
    #[cfg(target_arch = "wasm32")]
    pub fn browser() -> Result<Self> {
        let factory =
            qntx_idb_host::web::BrowserFactory::new().map_err(|e| Error::NotAvailable(e.message))?;
        Ok(Self::new(Rc::new(factory)))
    }

    /// Open `definition`, running its upgrader first when the stored version
    /// is behind.
    ///
    /// A blocked open fails with [`Error::UpgradeBlocked`] and is abandoned:
    /// if the host later proceeds, the upgrade is aborted and the late
    /// connection closed.
    pub async fn open(&self, definition: &DatabaseDefinition) -> Result<Database> {
        let name = definition.name().to_string();
        let version = definition.version();
        if version == 0 {
            return Err(Error::InvalidArgument(format!(
                "database '{}' needs a version of at least 1",
                name
            )));
        }
        let request = self.host.open(&name, version)?;

        let (tx, rx) = oneshot::channel::<Result<Database>>();
        let sender: Sender<Result<Database>> = Rc::new(RefCell::new(Some(tx)));
        let failure: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));

        let upgrader = Rc::clone(definition.upgrader());
        let upgrading = Rc::clone(&sender);
        let upgrade_failure = Rc::clone(&failure);
        let upgrade_needed = Box::new(
            move |change: VersionChange, connection: Rc<dyn HostConnection>, host_tx: Rc<dyn HostTransaction>| {
                if abandoned(&upgrading) {
                    warn!(db = %connection.name(), ?change, "aborting upgrade of an abandoned open");
                    if let Err(error) = host_tx.abort() {
                        warn!(db = %connection.name(), %error, "host rejected the abort");
                    }
                    return;
                }
                debug!(
                    db = %connection.name(),
                    old_version = change.old_version,
                    new_version = ?change.new_version,
                    "running upgrade"
                );
                let db = Database::upgrading(connection, Transaction::new(Rc::clone(&host_tx)));
                if let Err(error) = upgrader(&db, change.old_version, change.new_version) {
                    debug!(db = %db.name(), %error, "upgrade failed, aborting");
                    *upgrade_failure.borrow_mut() = Some(error);
                    if let Err(error) = host_tx.abort() {
                        warn!(db = %db.name(), %error, "host rejected the abort");
                    }
                }
            },
        );

        let blocked_sender = Rc::clone(&sender);
        let blocked_name = name.clone();
        let blocked = Box::new(move |change: VersionChange| {
            debug!(db = %blocked_name, ?change, "open blocked by other connections");
            send(
                &blocked_sender,
                Err(Error::UpgradeBlocked {
                    name: blocked_name.clone(),
                    new_version: change.new_version,
                }),
            );
        });

        let success_sender = Rc::clone(&sender);
        let success = Box::new(move |connection: Rc<dyn HostConnection>| {
            let tx = success_sender.borrow_mut().take();
            match tx {
                Some(tx) => {
                    debug!(db = %connection.name(), version = connection.version(), "database opened");
                    if let Err(Ok(db)) = tx.send(Ok(Database::new(connection))) {
                        db.close();
                    }
                }
                None => {
                    warn!(db = %connection.name(), "closing late connection of an abandoned open");
                    connection.close();
                }
            }
        });

        let error = Box::new(move |error: HostError| {
            let failure = failure.borrow_mut().take();
            send(&sender, Err(failure.unwrap_or_else(|| Error::from(error))));
        });

        request.set_callbacks(OpenCallbacks {
            upgrade_needed,
            blocked,
            success,
            error,
        });
        rx.await.unwrap_or_else(|_| Err(dropped("open request")))
    }

    /// Delete a database. While other connections keep it open the delete
    /// waits; it resolves once the host actually removed the database.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        let request = self.host.delete_database(name)?;
        let (tx, rx) = oneshot::channel::<Result<()>>();
        let sender: Sender<Result<()>> = Rc::new(RefCell::new(Some(tx)));

        let blocked_name = name.to_string();
        let success_sender = Rc::clone(&sender);
        let deleted_name = name.to_string();
        request.set_callbacks(DeleteCallbacks {
            blocked: Box::new(move |change: VersionChange| {
                debug!(
                    db = %blocked_name,
                    old_version = change.old_version,
                    "delete waiting for other connections to close"
                );
            }),
            success: Box::new(move |_: ()| {
                debug!(db = %deleted_name, "database deleted");
                send(&success_sender, Ok(()));
            }),
            error: Box::new(move |error: HostError| send(&sender, Err(Error::from(error)))),
        });
        rx.await.unwrap_or_else(|_| Err(dropped("delete request")))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl From<qntx_idb_host::memory::MemoryFactory> for Factory {
    fn from(factory: qntx_idb_host::memory::MemoryFactory) -> Self {
        Self::new(Rc::new(factory))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory").finish_non_exhaustive()
    }
}
