//! Transaction handles

use std::fmt;
use std::rc::Rc;

use qntx_idb_host::{HostTransaction, TransactionMode};
use tracing::debug;

use crate::definition::ObjectStoreDefinition;
use crate::error::Result;
use crate::store::ObjectStore;

/// An atomic unit of work over the stores in its scope.
///
/// The host commits a transaction on its own once no request is pending for
/// a brief moment. Awaiting anything other than this transaction's own
/// requests inside an action risks every later request failing with
/// [`Error::TransactionInactive`](crate::Error::TransactionInactive).
#[derive(Clone)]
pub struct Transaction {
    host: Rc<dyn HostTransaction>,
}

impl Transaction {
    pub(crate) fn new(host: Rc<dyn HostTransaction>) -> Self {
        Self { host }
    }

    pub(crate) fn host(&self) -> &dyn HostTransaction {
        self.host.as_ref()
    }

    pub fn mode(&self) -> TransactionMode {
        self.host.mode()
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.host.object_store_names()
    }

    /// Bind a store of this transaction's scope; `NotFoundError` otherwise.
    pub fn object_store<V, K>(&self, definition: &ObjectStoreDefinition<V, K>) -> Result<ObjectStore<V, K>> {
        Ok(ObjectStore::new(self.host.object_store(definition.name())?))
    }

    /// Roll back everything this transaction did.
    pub fn abort(&self) -> Result<()> {
        debug!("aborting transaction");
        Ok(self.host.abort()?)
    }

    /// Commit once pending requests complete; no new requests are accepted.
    pub fn commit(&self) -> Result<()> {
        debug!("committing transaction");
        Ok(self.host.commit()?)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode())
            .field("stores", &self.object_store_names())
            .finish()
    }
}
