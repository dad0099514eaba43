//! Cursors over live store and index data
//!
//! A cursor remembers its last `(key, primary key)` position and recomputes
//! the next one against current data on every step, so records written or
//! deleted mid-iteration are observed the way the browser observes them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;
use std::rc::Rc;

use serde_json::Value;
use tracing::trace;

use crate::engine::{CursorDirection, CursorKind, CursorRequest, HostCursor, OnCursorStep, OnError, Pending};
use crate::error::{HostError, HostResult};
use crate::key::{is_empty_interval, tighter_lower, tighter_upper, Key, KeyRange};

use super::transaction::{aborted, TxState};

/// What a cursor or handle reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Store(String),
    Index { store: String, index: String },
}

impl Target {
    pub fn store(&self) -> &str {
        match self {
            Target::Store(name) => name,
            Target::Index { store, .. } => store,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    First,
    Continue(Option<Key>),
    ContinuePrimary(Key, Key),
    Advance(u32),
}

/// Ordered `(key, primary key)` pairs a cursor walks over.
#[derive(Clone, Copy)]
pub(crate) enum View<'a> {
    Store(&'a BTreeMap<Key, Value>),
    Index(&'a BTreeMap<Key, BTreeSet<Key>>),
}

fn lowest_owner<'a>((key, owners): (&'a Key, &'a BTreeSet<Key>)) -> Option<(&'a Key, &'a Key)> {
    owners.iter().next().map(|pk| (key, pk))
}

impl<'a> View<'a> {
    fn pairs(
        self,
        lower: Bound<&'a Key>,
        upper: Bound<&'a Key>,
        forward: bool,
        unique: bool,
    ) -> Box<dyn Iterator<Item = (&'a Key, &'a Key)> + 'a> {
        if is_empty_interval(lower, upper) {
            return Box::new(std::iter::empty());
        }
        match self {
            View::Store(records) => {
                let keys = records.range::<Key, _>((lower, upper)).map(|(key, _)| (key, key));
                if forward {
                    Box::new(keys)
                } else {
                    Box::new(keys.rev())
                }
            }
            View::Index(entries) => {
                let entries = entries.range::<Key, _>((lower, upper));
                match (forward, unique) {
                    (true, true) => Box::new(entries.filter_map(lowest_owner)),
                    (false, true) => Box::new(entries.rev().filter_map(lowest_owner)),
                    (true, false) => Box::new(
                        entries.flat_map(|(key, owners)| owners.iter().map(move |pk| (key, pk))),
                    ),
                    (false, false) => Box::new(
                        entries
                            .rev()
                            .flat_map(|(key, owners)| owners.iter().rev().map(move |pk| (key, pk))),
                    ),
                }
            }
        }
    }
}

/// The position a step lands on, or `None` past the end of the range.
pub(crate) fn locate<'a>(
    view: View<'a>,
    range: Option<&'a KeyRange>,
    direction: CursorDirection,
    position: Option<(&'a Key, &'a Key)>,
    step: &'a Step,
) -> Option<(Key, Key)> {
    let forward = direction.is_forward();
    let unique = direction.is_unique();
    let (mut lower, mut upper) = match range {
        Some(range) => range.bounds(),
        None => (Bound::Unbounded, Bound::Unbounded),
    };

    let mut seek = None;
    let mut beyond = None;
    let mut at_or_beyond = None;
    let mut skip = 0usize;
    match step {
        Step::First => {}
        Step::Continue(None) | Step::Advance(_) => {
            let (key, primary_key) = position?;
            if unique {
                seek = Some(Bound::Excluded(key));
            } else {
                seek = Some(Bound::Included(key));
                beyond = Some((key, primary_key));
            }
            if let Step::Advance(count) = step {
                skip = count.saturating_sub(1) as usize;
            }
        }
        Step::Continue(Some(key)) => seek = Some(Bound::Included(key)),
        Step::ContinuePrimary(key, primary_key) => {
            seek = Some(Bound::Included(key));
            at_or_beyond = Some((key, primary_key));
        }
    }
    if let Some(bound) = seek {
        if forward {
            lower = tighter_lower(lower, bound);
        } else {
            upper = tighter_upper(upper, bound);
        }
    }

    view.pairs(lower, upper, forward, unique)
        .skip_while(|pair| match (beyond, at_or_beyond) {
            (Some(current), _) if forward => *pair <= current,
            (Some(current), _) => *pair >= current,
            (_, Some(target)) if forward => *pair < target,
            (_, Some(target)) => *pair > target,
            _ => false,
        })
        .nth(skip)
        .map(|(key, primary_key)| (key.clone(), primary_key.clone()))
}

type StepResult = HostResult<Option<Rc<dyn HostCursor>>>;

pub(crate) struct CursorState {
    tx: Rc<TxState>,
    target: Target,
    range: Option<KeyRange>,
    direction: CursorDirection,
    kind: CursorKind,
    position: RefCell<Option<(Key, Key)>>,
    /// Bumped on every advance; handles from earlier steps are stale.
    step: Cell<u64>,
    awaiting: Cell<bool>,
    exhausted: Cell<bool>,
    callbacks: RefCell<Option<(OnCursorStep, OnError)>>,
    backlog: RefCell<VecDeque<StepResult>>,
}

pub(crate) fn open_cursor(
    tx: &Rc<TxState>,
    target: Target,
    range: Option<KeyRange>,
    direction: CursorDirection,
    kind: CursorKind,
) -> HostResult<Box<dyn CursorRequest>> {
    let state = Rc::new(CursorState {
        tx: Rc::clone(tx),
        target,
        range,
        direction,
        kind,
        position: RefCell::new(None),
        step: Cell::new(0),
        awaiting: Cell::new(false),
        exhausted: Cell::new(false),
        callbacks: RefCell::new(None),
        backlog: RefCell::new(VecDeque::new()),
    });
    state.advance(Step::First)?;
    Ok(Box::new(MemoryCursorRequest { state }))
}

impl CursorState {
    fn advance(self: &Rc<Self>, step: Step) -> HostResult<()> {
        trace!(tx = self.tx.id, target = ?self.target, ?step, "cursor step");
        self.awaiting.set(true);
        self.step.set(self.step.get() + 1);
        let state = Rc::clone(self);
        let issued = self.tx.issue(Box::new(move |tx, live| {
            let result = if live { state.run(&step) } else { Err(aborted()) };
            let target = Rc::clone(&state);
            tx.deliver(result, move |result| target.fire(result));
        }));
        if issued.is_err() {
            self.awaiting.set(false);
        }
        issued
    }

    fn run(self: &Rc<Self>, step: &Step) -> StepResult {
        let found = self.tx.read(self.target.store(), |store| {
            let view = match &self.target {
                Target::Store(_) => View::Store(&store.records),
                Target::Index { index, .. } => View::Index(
                    &store
                        .indexes
                        .get(index)
                        .ok_or_else(|| HostError::invalid_state(format!("index '{}' has been deleted", index)))?
                        .entries,
                ),
            };
            let position = self.position.borrow();
            let current = position.as_ref().map(|(key, pk)| (key, pk));
            let found = locate(view, self.range.as_ref(), self.direction, current, step);
            let value = match (&found, self.kind) {
                (Some((_, pk)), CursorKind::WithValue) => store.records.get(pk).cloned(),
                _ => None,
            };
            Ok(found.map(|(key, pk)| (key, pk, value)))
        })?;

        match found {
            Some((key, primary_key, value)) => {
                *self.position.borrow_mut() = Some((key.clone(), primary_key.clone()));
                Ok(Some(Rc::new(MemoryCursor {
                    state: Rc::clone(self),
                    step: self.step.get(),
                    key,
                    primary_key,
                    value,
                })))
            }
            None => {
                *self.position.borrow_mut() = None;
                self.exhausted.set(true);
                Ok(None)
            }
        }
    }

    fn fire(&self, result: StepResult) {
        self.awaiting.set(false);
        let callbacks = self.callbacks.borrow_mut().take();
        match callbacks {
            Some((mut on_step, on_error)) => match result {
                Ok(position) => {
                    on_step(position);
                    let mut slot = self.callbacks.borrow_mut();
                    if slot.is_none() {
                        *slot = Some((on_step, on_error));
                    }
                }
                Err(error) => on_error(error),
            },
            None => self.backlog.borrow_mut().push_back(result),
        }
    }
}

struct MemoryCursorRequest {
    state: Rc<CursorState>,
}

impl CursorRequest for MemoryCursorRequest {
    fn set_callbacks(self: Box<Self>, on_step: OnCursorStep, on_error: OnError) {
        *self.state.callbacks.borrow_mut() = Some((on_step, on_error));
        let backlog = std::mem::take(&mut *self.state.backlog.borrow_mut());
        for result in backlog {
            self.state.fire(result);
        }
    }
}

/// One delivered cursor position.
struct MemoryCursor {
    state: Rc<CursorState>,
    step: u64,
    key: Key,
    primary_key: Key,
    value: Option<Value>,
}

impl MemoryCursor {
    fn ensure_current(&self) -> HostResult<()> {
        let state = &self.state;
        if state.step.get() != self.step || state.awaiting.get() || state.exhausted.get() {
            return Err(HostError::invalid_state(
                "the cursor has moved on from this position",
            ));
        }
        Ok(())
    }

    fn is_beyond(&self, key: &Key) -> bool {
        if self.state.direction.is_forward() {
            key > &self.key
        } else {
            key < &self.key
        }
    }
}

impl HostCursor for MemoryCursor {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn primary_key(&self) -> Key {
        self.primary_key.clone()
    }

    fn value(&self) -> Option<Value> {
        self.value.clone()
    }

    fn direction(&self) -> CursorDirection {
        self.state.direction
    }

    fn advance(&self, count: u32) -> HostResult<()> {
        if count == 0 {
            return Err(HostError::type_error("advance count must be positive"));
        }
        self.state.tx.ensure_active()?;
        self.ensure_current()?;
        self.state.advance(Step::Advance(count))
    }

    fn continue_key(&self, key: Option<Key>) -> HostResult<()> {
        self.state.tx.ensure_active()?;
        self.ensure_current()?;
        if let Some(key) = &key {
            key.validate()?;
            if !self.is_beyond(key) {
                return Err(HostError::data(format!(
                    "continue key {} does not lie beyond the current key {}",
                    key, self.key
                )));
            }
        }
        self.state.advance(Step::Continue(key))
    }

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> HostResult<()> {
        self.state.tx.ensure_active()?;
        if matches!(self.state.target, Target::Store(_)) {
            return Err(HostError::invalid_access(
                "continue_primary_key is only supported on index cursors",
            ));
        }
        if self.state.direction.is_unique() {
            return Err(HostError::invalid_access(
                "continue_primary_key is not supported with unique directions",
            ));
        }
        self.ensure_current()?;
        key.validate()?;
        primary_key.validate()?;
        let target = (&key, &primary_key);
        let current = (&self.key, &self.primary_key);
        let beyond = if self.state.direction.is_forward() {
            target > current
        } else {
            target < current
        };
        if !beyond {
            return Err(HostError::data(format!(
                "({}, {}) does not lie beyond the current position ({}, {})",
                key, primary_key, self.key, self.primary_key
            )));
        }
        self.state.advance(Step::ContinuePrimary(key, primary_key))
    }

    fn update(&self, value: Value) -> HostResult<Pending<Key>> {
        let tx = &self.state.tx;
        tx.ensure_active()?;
        tx.ensure_writable()?;
        self.ensure_current()?;
        if self.state.kind == CursorKind::KeyOnly {
            return Err(HostError::invalid_state("a key-only cursor cannot update records"));
        }
        let store = self.state.target.store().to_string();
        let key_path = tx.read(&store, |data| Ok(data.key_path.clone()))?;
        if let Some(path) = key_path {
            if path.extract(&value).as_ref() != Some(&self.primary_key) {
                return Err(HostError::data(format!(
                    "the value's key at {} does not match the cursor's primary key {}",
                    path, self.primary_key
                )));
            }
        }
        let primary_key = self.primary_key.clone();
        tx.request(move |tx| tx.write(&store, |data| data.store_record(primary_key, value, false)))
    }

    fn delete(&self) -> HostResult<Pending<()>> {
        let tx = &self.state.tx;
        tx.ensure_active()?;
        tx.ensure_writable()?;
        self.ensure_current()?;
        if self.state.kind == CursorKind::KeyOnly {
            return Err(HostError::invalid_state("a key-only cursor cannot delete records"));
        }
        let store = self.state.target.store().to_string();
        let primary_key = self.primary_key.clone();
        tx.request(move |tx| {
            tx.write(&store, |data| {
                data.remove_record(&primary_key);
                Ok(())
            })
        })
    }
}
