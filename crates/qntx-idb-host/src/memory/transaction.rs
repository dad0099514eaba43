//! Transaction lifecycle for the memory engine
//!
//! A transaction is `Waiting` until no earlier conflicting transaction is
//! unfinished, then `Active` until it commits or aborts. Requests issued while
//! waiting are queued and run, in order, when it starts. Every request's
//! completion is delivered from a spawned local task; once nothing is pending
//! and nothing new arrives for `auto_commit_after`, the transaction commits.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use tokio::task::spawn_local;
use tracing::debug;

use crate::engine::{
    HostObjectStore, HostRequest, HostTransaction, OnError, OnSuccess, TransactionMode,
};
use crate::error::{HostError, HostResult};

use super::data::StoreData;
use super::store::MemoryObjectStore;
use super::{DbState, Engine};

/// A queued request. The flag is false when the transaction aborted before
/// the request could run, in which case it must deliver `AbortError`.
pub(crate) type Operation = Box<dyn FnOnce(&Rc<TxState>, bool)>;

type FinishHook = Box<dyn FnOnce(bool)>;
type StartHook = Box<dyn FnOnce(&Rc<TxState>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Waiting,
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
enum Outcome {
    Complete,
    Abort(Option<HostError>),
}

/// State restored when the transaction aborts.
enum Snapshot {
    None,
    Stores(HashMap<String, StoreData>),
    Schema {
        version: u32,
        stores: BTreeMap<String, StoreData>,
    },
}

type Callbacks = (Box<dyn FnOnce()>, Box<dyn FnOnce(Option<HostError>)>);

pub(crate) struct TxState {
    pub id: u64,
    pub engine: Rc<Engine>,
    pub db: Rc<DbState>,
    scope: Vec<String>,
    pub mode: TransactionMode,
    phase: Cell<Phase>,
    commit_requested: Cell<bool>,
    queue: RefCell<VecDeque<Operation>>,
    pending: Cell<usize>,
    /// Bumped on every issued request; an idle timer only commits if it is
    /// unchanged when the timer fires.
    generation: Cell<u64>,
    snapshot: RefCell<Snapshot>,
    callbacks: RefCell<Option<Callbacks>>,
    outcome: RefCell<Option<Outcome>>,
    on_start: RefCell<Option<StartHook>>,
    finish_hook: RefCell<Option<FinishHook>>,
}

impl TxState {
    pub fn new(engine: &Rc<Engine>, db: &Rc<DbState>, scope: Vec<String>, mode: TransactionMode) -> Rc<Self> {
        Rc::new(Self {
            id: engine.next_id(),
            engine: Rc::clone(engine),
            db: Rc::clone(db),
            scope,
            mode,
            phase: Cell::new(Phase::Waiting),
            commit_requested: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
            pending: Cell::new(0),
            generation: Cell::new(0),
            snapshot: RefCell::new(Snapshot::None),
            callbacks: RefCell::new(None),
            outcome: RefCell::new(None),
            on_start: RefCell::new(None),
            finish_hook: RefCell::new(None),
        })
    }

    /// Snapshot the whole schema up front; used by versionchange transactions.
    pub fn snapshot_schema(&self, version: u32, stores: BTreeMap<String, StoreData>) {
        *self.snapshot.borrow_mut() = Snapshot::Schema { version, stores };
    }

    pub fn set_on_start(&self, hook: StartHook) {
        *self.on_start.borrow_mut() = Some(hook);
    }

    pub fn set_finish_hook(&self, hook: FinishHook) {
        *self.finish_hook.borrow_mut() = Some(hook);
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase.get(), Phase::Committed | Phase::Aborted)
    }

    pub fn in_scope(&self, store: &str) -> bool {
        match self.mode {
            TransactionMode::VersionChange => self.db.schema.borrow().contains_key(store),
            _ => self.scope.iter().any(|name| name == store),
        }
    }

    pub fn scope(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.db.schema.borrow().keys().cloned().collect(),
            _ => self.scope.clone(),
        }
    }

    pub fn conflicts_with(&self, other: &TxState) -> bool {
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        if self.mode == TransactionMode::ReadOnly && other.mode == TransactionMode::ReadOnly {
            return false;
        }
        self.scope.iter().any(|name| other.scope.contains(name))
    }

    /// Fails with `TransactionInactiveError` once the transaction finished or
    /// a commit was requested.
    pub fn ensure_active(&self) -> HostResult<()> {
        if self.is_finished() {
            return Err(HostError::transaction_inactive(format!(
                "transaction {} has finished",
                self.id
            )));
        }
        if self.commit_requested.get() {
            return Err(HostError::transaction_inactive(format!(
                "transaction {} is committing",
                self.id
            )));
        }
        Ok(())
    }

    pub fn ensure_writable(&self) -> HostResult<()> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(HostError::read_only(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        Ok(())
    }

    /// Fails with `InvalidStateError` unless this is a running versionchange
    /// transaction.
    pub fn ensure_upgrading(&self) -> HostResult<()> {
        if self.mode != TransactionMode::VersionChange || self.phase.get() != Phase::Active {
            return Err(HostError::invalid_state(
                "schema changes are only allowed during a version change",
            ));
        }
        Ok(())
    }

    pub fn issue(self: &Rc<Self>, op: Operation) -> HostResult<()> {
        self.ensure_active()?;
        self.engine.count_operation();
        self.pending.set(self.pending.get() + 1);
        self.generation.set(self.generation.get() + 1);
        match self.phase.get() {
            Phase::Active => op(self, true),
            _ => self.queue.borrow_mut().push_back(op),
        }
        Ok(())
    }

    /// Issue a request whose work runs against live data once the
    /// transaction has started.
    pub fn request<T: 'static>(
        self: &Rc<Self>,
        work: impl FnOnce(&Rc<TxState>) -> HostResult<T> + 'static,
    ) -> HostResult<Box<dyn HostRequest<T>>> {
        let slot = Rc::new(Slot::new());
        let target = Rc::clone(&slot);
        self.issue(Box::new(move |tx, live| {
            let result = if live { work(tx) } else { Err(aborted()) };
            tx.deliver(result, move |result| target.fire(result));
        }))?;
        Ok(Box::new(MemoryRequest { slot }))
    }

    /// Deliver a request's result from a local task. Results of a transaction
    /// that aborted in the meantime become `AbortError`.
    pub fn deliver<T: 'static>(self: &Rc<Self>, result: HostResult<T>, fire: impl FnOnce(HostResult<T>) + 'static) {
        let tx = Rc::clone(self);
        spawn_local(async move {
            let result = match tx.phase.get() {
                Phase::Aborted => Err(aborted()),
                _ => result,
            };
            let error = result.as_ref().err().cloned();
            fire(result);
            tx.request_settled(error);
        });
    }

    fn request_settled(self: &Rc<Self>, error: Option<HostError>) {
        self.pending.set(self.pending.get().saturating_sub(1));
        if self.phase.get() != Phase::Active {
            return;
        }
        if let Some(error) = error {
            debug!(tx = self.id, %error, "request failed, aborting transaction");
            self.abort_with(Some(error));
            return;
        }
        if self.pending.get() == 0 {
            if self.commit_requested.get() {
                self.complete();
            } else {
                self.arm_idle_timer();
            }
        }
    }

    fn arm_idle_timer(self: &Rc<Self>) {
        let tx = Rc::clone(self);
        let generation = self.generation.get();
        let delay = self.engine.config.auto_commit_after;
        spawn_local(async move {
            tokio::time::sleep(delay).await;
            if tx.phase.get() == Phase::Active
                && tx.pending.get() == 0
                && tx.generation.get() == generation
                && !tx.commit_requested.get()
            {
                debug!(tx = tx.id, "idle, auto-committing");
                tx.complete();
            }
        });
    }

    pub fn start(self: &Rc<Self>) {
        if self.phase.get() != Phase::Waiting {
            return;
        }
        self.phase.set(Phase::Active);
        debug!(tx = self.id, db = %self.db.name, mode = ?self.mode, scope = ?self.scope, "transaction started");

        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(op) => op(self, true),
                None => break,
            }
        }

        let hook = self.on_start.borrow_mut().take();
        if let Some(hook) = hook {
            hook(self);
        }

        if self.phase.get() == Phase::Active && self.pending.get() == 0 {
            if self.commit_requested.get() {
                self.complete();
            } else {
                self.arm_idle_timer();
            }
        }
    }

    /// Snapshot the stores in scope before the first write of a read-write
    /// transaction.
    pub fn before_write(&self) {
        let mut snapshot = self.snapshot.borrow_mut();
        if !matches!(*snapshot, Snapshot::None) {
            return;
        }
        let schema = self.db.schema.borrow();
        let stores = self
            .scope
            .iter()
            .filter_map(|name| schema.get(name).map(|data| (name.clone(), data.clone())))
            .collect();
        *snapshot = Snapshot::Stores(stores);
    }

    /// Read one store's data. `InvalidStateError` if it no longer exists.
    pub fn read<R>(&self, store: &str, f: impl FnOnce(&StoreData) -> HostResult<R>) -> HostResult<R> {
        let schema = self.db.schema.borrow();
        let data = schema
            .get(store)
            .ok_or_else(|| HostError::invalid_state(format!("object store '{}' has been deleted", store)))?;
        f(data)
    }

    /// Mutate one store's data, snapshotting first.
    pub fn write<R>(&self, store: &str, f: impl FnOnce(&mut StoreData) -> HostResult<R>) -> HostResult<R> {
        self.before_write();
        let mut schema = self.db.schema.borrow_mut();
        let data = schema
            .get_mut(store)
            .ok_or_else(|| HostError::invalid_state(format!("object store '{}' has been deleted", store)))?;
        f(data)
    }

    pub fn commit(self: &Rc<Self>) -> HostResult<()> {
        if self.is_finished() || self.commit_requested.get() {
            return Err(HostError::invalid_state(format!(
                "transaction {} is already committing or finished",
                self.id
            )));
        }
        self.commit_requested.set(true);
        if self.phase.get() == Phase::Active && self.pending.get() == 0 {
            self.complete();
        }
        Ok(())
    }

    pub fn abort(self: &Rc<Self>) -> HostResult<()> {
        if self.is_finished() || self.commit_requested.get() {
            return Err(HostError::invalid_state(format!(
                "transaction {} is already committing or finished",
                self.id
            )));
        }
        self.abort_with(None);
        Ok(())
    }

    pub fn abort_with(self: &Rc<Self>, error: Option<HostError>) {
        if self.is_finished() {
            return;
        }
        self.phase.set(Phase::Aborted);
        debug!(tx = self.id, db = %self.db.name, "transaction aborted");

        let snapshot = std::mem::replace(&mut *self.snapshot.borrow_mut(), Snapshot::None);
        match snapshot {
            Snapshot::None => {}
            Snapshot::Stores(stores) => {
                let mut schema = self.db.schema.borrow_mut();
                for (name, data) in stores {
                    schema.insert(name, data);
                }
            }
            Snapshot::Schema { version, stores } => {
                *self.db.schema.borrow_mut() = stores;
                self.db.version.set(version);
            }
        }

        let queued = std::mem::take(&mut *self.queue.borrow_mut());
        for op in queued {
            op(self, false);
        }
        self.retire(Outcome::Abort(error));
    }

    fn complete(self: &Rc<Self>) {
        self.phase.set(Phase::Committed);
        *self.snapshot.borrow_mut() = Snapshot::None;
        debug!(tx = self.id, db = %self.db.name, "transaction committed");
        self.retire(Outcome::Complete);
    }

    fn retire(self: &Rc<Self>, outcome: Outcome) {
        self.db.forget_transaction(self);
        let tx = Rc::clone(self);
        spawn_local(async move {
            let callbacks = tx.callbacks.borrow_mut().take();
            match callbacks {
                Some(callbacks) => fire_outcome(callbacks, outcome.clone()),
                None => *tx.outcome.borrow_mut() = Some(outcome.clone()),
            }
            let hook = tx.finish_hook.borrow_mut().take();
            if let Some(hook) = hook {
                hook(matches!(outcome, Outcome::Complete));
            }
            tx.db.schedule();
        });
    }

    fn set_callbacks(&self, callbacks: Callbacks) {
        let outcome = self.outcome.borrow_mut().take();
        match outcome {
            Some(outcome) => fire_outcome(callbacks, outcome),
            None => *self.callbacks.borrow_mut() = Some(callbacks),
        }
    }
}

fn fire_outcome((on_complete, on_abort): Callbacks, outcome: Outcome) {
    match outcome {
        Outcome::Complete => on_complete(),
        Outcome::Abort(error) => on_abort(error),
    }
}

pub(crate) fn aborted() -> HostError {
    HostError::abort("the transaction was aborted")
}

/// Completion slot of one request. Holds the result if it arrives before
/// callbacks are installed.
pub(crate) struct Slot<T> {
    callbacks: RefCell<Option<(OnSuccess<T>, OnError)>>,
    early: RefCell<Option<HostResult<T>>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            callbacks: RefCell::new(None),
            early: RefCell::new(None),
        }
    }

    fn fire(&self, result: HostResult<T>) {
        let callbacks = self.callbacks.borrow_mut().take();
        match callbacks {
            Some((on_success, on_error)) => match result {
                Ok(value) => on_success(value),
                Err(error) => on_error(error),
            },
            None => *self.early.borrow_mut() = Some(result),
        }
    }
}

pub(crate) struct MemoryRequest<T> {
    slot: Rc<Slot<T>>,
}

impl<T> HostRequest<T> for MemoryRequest<T> {
    fn set_callbacks(self: Box<Self>, on_success: OnSuccess<T>, on_error: OnError) {
        let early = self.slot.early.borrow_mut().take();
        match early {
            Some(Ok(value)) => on_success(value),
            Some(Err(error)) => on_error(error),
            None => *self.slot.callbacks.borrow_mut() = Some((on_success, on_error)),
        }
    }
}

/// Handle given out for a transaction.
pub(crate) struct MemoryTransaction {
    state: Rc<TxState>,
}

impl MemoryTransaction {
    pub fn new(state: Rc<TxState>) -> Self {
        Self { state }
    }
}

impl HostTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.state.mode
    }

    fn object_store_names(&self) -> Vec<String> {
        let mut names = self.state.scope();
        names.sort();
        names
    }

    fn object_store(&self, name: &str) -> HostResult<Rc<dyn HostObjectStore>> {
        if self.state.is_finished() {
            return Err(HostError::invalid_state(format!(
                "transaction {} has finished",
                self.state.id
            )));
        }
        if !self.state.in_scope(name) {
            return Err(HostError::not_found(format!(
                "object store '{}' is not in the transaction's scope",
                name
            )));
        }
        Ok(Rc::new(MemoryObjectStore::new(Rc::clone(&self.state), name)))
    }

    fn abort(&self) -> HostResult<()> {
        self.state.abort()
    }

    fn commit(&self) -> HostResult<()> {
        self.state.commit()
    }

    fn set_callbacks(&self, on_complete: Box<dyn FnOnce()>, on_abort: Box<dyn FnOnce(Option<HostError>)>) {
        self.state.set_callbacks((on_complete, on_abort));
    }
}
