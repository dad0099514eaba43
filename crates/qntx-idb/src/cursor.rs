//! Cursor iteration engine
//!
//! A run opens one host cursor and drives it as a state machine:
//!
//! ```text
//! SeekingFrom ──> ApplyingOffset ──> Iterating ──> Done
//!      │                │                │
//!      └────────────────┴────────────────┴───────> Failed
//! ```
//!
//! `SeekingFrom` and `ApplyingOffset` each consume one cursor event without
//! invoking the callback. `Iterating` invokes the callback once per position
//! and advances only after the callback resolved, so a position's
//! `update`/`delete` always lands before the next advance. Once a run is
//! `Done` or `Failed` it issues no further host calls.

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::channel::mpsc;
use futures::StreamExt;
use qntx_idb_host::{
    CursorDirection, CursorKind, CursorRequest, HostCursor, HostError, HostResult, HostSource, Key,
    KeyQuery,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{Error, Result};
use crate::key::{KeyRange, KeyType};
use crate::request::{await_request, dropped};

/// Where a run starts: the first position at or beyond `key` (and
/// `primary_key`, for index cursors) in iteration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StartFrom<K, PK> {
    pub key: K,
    pub primary_key: Option<PK>,
}

/// Options of one iteration run over keys `K` with primary keys `PK`.
#[derive(Debug, Clone)]
pub struct CursorOptions<K, PK = K> {
    from: Option<StartFrom<K, PK>>,
    limit: Option<u32>,
    offset: Option<u32>,
    query: Option<KeyRange<K>>,
    direction: CursorDirection,
}

impl<K, PK> Default for CursorOptions<K, PK> {
    fn default() -> Self {
        Self {
            from: None,
            limit: None,
            offset: None,
            query: None,
            direction: CursorDirection::Next,
        }
    }
}

impl<K, PK> CursorOptions<K, PK> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_key(mut self, key: K) -> Self {
        self.from = Some(StartFrom {
            key,
            primary_key: None,
        });
        self
    }

    /// Start at `(key, primary_key)`. Only index cursors in a non-unique
    /// direction can seek by primary key.
    pub fn from_position(mut self, key: K, primary_key: PK) -> Self {
        self.from = Some(StartFrom {
            key,
            primary_key: Some(primary_key),
        });
        self
    }

    /// Deliver at most `limit` positions.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip `offset` positions before the first delivery.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn query(mut self, range: KeyRange<K>) -> Self {
        self.query = Some(range);
        self
    }

    pub fn direction(mut self, direction: CursorDirection) -> Self {
        self.direction = direction;
        self
    }

    /// `offset` and `limit` must be at least 1 when given.
    pub fn validate(&self) -> Result<()> {
        if self.offset == Some(0) {
            return Err(Error::InvalidArgument("offset must be at least 1".into()));
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidArgument("limit must be at least 1".into()));
        }
        Ok(())
    }
}

/// A position of a key-only run.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPosition<K, PK> {
    pub key: K,
    pub primary_key: PK,
}

impl<K: KeyType, PK: KeyType> KeyPosition<K, PK> {
    fn from_host(cursor: Rc<dyn HostCursor>) -> Result<Self> {
        Ok(Self {
            key: K::from_key(cursor.key())?,
            primary_key: PK::from_key(cursor.primary_key())?,
        })
    }
}

/// A position of a value run. `update` and `delete` act on this position
/// and must be awaited before the callback returns.
pub struct ValuePosition<V, K, PK> {
    key: K,
    primary_key: PK,
    value: V,
    cursor: Rc<dyn HostCursor>,
}

impl<V, K, PK> ValuePosition<V, K, PK> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn primary_key(&self) -> &PK {
        &self.primary_key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V, K, PK> ValuePosition<V, K, PK>
where
    V: Serialize + DeserializeOwned,
    K: KeyType,
    PK: KeyType,
{
    fn from_host(cursor: Rc<dyn HostCursor>) -> Result<Self> {
        let value = cursor
            .value()
            .ok_or_else(|| HostError::unknown("value cursor delivered no value"))?;
        Ok(Self {
            key: K::from_key(cursor.key())?,
            primary_key: PK::from_key(cursor.primary_key())?,
            value: serde_json::from_value(value)?,
            cursor,
        })
    }

    /// Replace the record at this position.
    pub async fn update(&self, value: &V) -> Result<PK> {
        let request = self.cursor.update(serde_json::to_value(value)?)?;
        PK::from_key(await_request(request).await?)
    }

    /// Delete the record at this position.
    pub async fn delete(&self) -> Result<()> {
        await_request(self.cursor.delete()?).await
    }
}

impl<V: fmt::Debug, K: fmt::Debug, PK: fmt::Debug> fmt::Debug for ValuePosition<V, K, PK> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePosition")
            .field("key", &self.key)
            .field("primary_key", &self.primary_key)
            .field("value", &self.value)
            .finish()
    }
}

type CursorEvent = HostResult<Option<Rc<dyn HostCursor>>>;

/// Cursor events as a stream: one item per step, the error, or the end.
struct CursorEvents {
    receiver: mpsc::UnboundedReceiver<CursorEvent>,
}

impl CursorEvents {
    fn attach(request: Box<dyn CursorRequest>) -> Self {
        let (sender, receiver) = mpsc::unbounded::<CursorEvent>();
        let errors = sender.clone();
        request.set_callbacks(
            Box::new(move |step| {
                let _ = sender.unbounded_send(Ok(step));
            }),
            Box::new(move |error| {
                let _ = errors.unbounded_send(Err(error));
            }),
        );
        Self { receiver }
    }

    async fn next(&mut self) -> Option<CursorEvent> {
        self.receiver.next().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingFrom,
    ApplyingOffset,
    Iterating,
    Done,
    Failed,
}

/// What to do with a cursor event.
enum Step {
    /// A host call moved the cursor; wait for the next event.
    Wait,
    /// Hand this position to the callback.
    Deliver,
}

struct Run {
    state: State,
    seek: Option<(Key, Option<Key>)>,
    offset: Option<u32>,
    limit: Option<u32>,
    forward: bool,
    delivered: u32,
}

impl Run {
    fn new<K: KeyType, PK: KeyType>(options: &CursorOptions<K, PK>) -> Self {
        let seek = options
            .from
            .as_ref()
            .map(|from| (from.key.to_key(), from.primary_key.as_ref().map(KeyType::to_key)));
        let state = if seek.is_some() {
            State::SeekingFrom
        } else if options.offset.is_some() {
            State::ApplyingOffset
        } else {
            State::Iterating
        };
        Self {
            state,
            seek,
            offset: options.offset,
            limit: options.limit,
            forward: options.direction.is_forward(),
            delivered: 0,
        }
    }

    fn transition(&mut self, next: State) {
        trace!(from = ?self.state, to = ?next, delivered = self.delivered, "cursor state");
        self.state = next;
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.transition(State::Done),
            Err(_) => self.transition(State::Failed),
        }
        result
    }

    fn after_seek(&self) -> State {
        if self.offset.is_some() {
            State::ApplyingOffset
        } else {
            State::Iterating
        }
    }

    /// Whether the cursor already sits at or beyond the seek target in
    /// iteration order. The host refuses to seek to the current position.
    fn reached(&self, cursor: &dyn HostCursor, key: &Key, primary_key: Option<&Key>) -> bool {
        let ordering = cursor.key().cmp(key).then_with(|| match primary_key {
            Some(primary_key) => cursor.primary_key().cmp(primary_key),
            None => Ordering::Equal,
        });
        if self.forward {
            ordering != Ordering::Less
        } else {
            ordering != Ordering::Greater
        }
    }

    fn step(&mut self, cursor: &dyn HostCursor) -> Result<Step> {
        if self.state == State::SeekingFrom {
            let next = self.after_seek();
            if let Some((key, primary_key)) = self.seek.take() {
                if !self.reached(cursor, &key, primary_key.as_ref()) {
                    match primary_key {
                        Some(primary_key) => cursor.continue_primary_key(key, primary_key)?,
                        None => cursor.continue_key(Some(key))?,
                    }
                    self.transition(next);
                    return Ok(Step::Wait);
                }
            }
            self.transition(next);
        }

        if self.state == State::ApplyingOffset {
            if let Some(offset) = self.offset {
                cursor.advance(offset)?;
                self.transition(State::Iterating);
                return Ok(Step::Wait);
            }
            self.transition(State::Iterating);
        }

        Ok(Step::Deliver)
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.delivered >= limit)
    }
}

/// Drive one run to completion. `position` builds the callback argument from
/// the host cursor; the callback returns `true` to stop early.
pub(crate) async fn iterate<K, PK, P, F, Fut>(
    source: &dyn HostSource,
    options: CursorOptions<K, PK>,
    kind: CursorKind,
    position: impl Fn(Rc<dyn HostCursor>) -> Result<P>,
    mut callback: F,
) -> Result<()>
where
    K: KeyType,
    PK: KeyType,
    F: FnMut(P) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    options.validate()?;
    let mut run = Run::new(&options);
    let query = options.query.map(|range| KeyQuery::Range(range.into_host()));
    let mut events = CursorEvents::attach(source.open_cursor(query, options.direction, kind)?);
    trace!(state = ?run.state, direction = ?options.direction, "cursor opened");

    loop {
        let cursor = match events.next().await {
            Some(Ok(Some(cursor))) => cursor,
            Some(Ok(None)) => return run.finish(Ok(())),
            Some(Err(error)) => return run.finish(Err(Error::from(error))),
            None => return run.finish(Err(dropped("cursor request"))),
        };

        match run.step(cursor.as_ref()) {
            Ok(Step::Wait) => continue,
            Ok(Step::Deliver) => {}
            Err(error) => return run.finish(Err(error)),
        }

        run.delivered += 1;
        let outcome = match position(Rc::clone(&cursor)) {
            Ok(position) => callback(position).await,
            Err(error) => Err(error),
        };
        match outcome {
            Err(error) => return run.finish(Err(error)),
            Ok(true) => return run.finish(Ok(())),
            Ok(false) if run.limit_reached() => return run.finish(Ok(())),
            Ok(false) => {
                if let Err(error) = cursor.continue_key(None) {
                    return run.finish(Err(Error::from(error)));
                }
            }
        }
    }
}

/// Key-only run.
pub(crate) async fn iterate_keys<K, PK, F, Fut>(
    source: &dyn HostSource,
    options: CursorOptions<K, PK>,
    callback: F,
) -> Result<()>
where
    K: KeyType,
    PK: KeyType,
    F: FnMut(KeyPosition<K, PK>) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    iterate(
        source,
        options,
        CursorKind::KeyOnly,
        KeyPosition::<K, PK>::from_host,
        callback,
    )
    .await
}

/// Value run.
pub(crate) async fn iterate_values<V, K, PK, F, Fut>(
    source: &dyn HostSource,
    options: CursorOptions<K, PK>,
    callback: F,
) -> Result<()>
where
    V: Serialize + DeserializeOwned,
    K: KeyType,
    PK: KeyType,
    F: FnMut(ValuePosition<V, K, PK>) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    iterate(
        source,
        options,
        CursorKind::WithValue,
        ValuePosition::<V, K, PK>::from_host,
        callback,
    )
    .await
}
