//! Event wiring for IndexedDB requests
//!
//! Closures are stored in `Rc<RefCell<Option<..>>>` so they live until the
//! terminal event fires and are dropped right after it.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbCursor, IdbCursorWithValue, IdbOpenDbRequest, IdbRequest, IdbVersionChangeEvent};

use crate::engine::{
    CursorKind, CursorRequest, DeleteCallbacks, DeleteRequest, HostConnection, HostCursor, HostRequest,
    HostTransaction, OnCursorStep, OnError, OnSuccess, OpenCallbacks, OpenRequest, Pending, VersionChange,
};
use crate::error::{HostError, HostResult};
use crate::key::Key;

use super::convert::{
    direction_from_js, js_error, key_from_js, key_to_js, optional_dom_error, value_from_js, value_to_js,
};
use super::{BrowserConnection, BrowserTransaction};

type ClosurePair = (Closure<dyn FnMut(Event)>, Closure<dyn FnMut(Event)>);

type Convert<T> = Box<dyn Fn(JsValue) -> HostResult<T>>;

fn request_error(request: &IdbRequest) -> HostError {
    match request.error() {
        Ok(exception) => optional_dom_error(exception, "request failed"),
        Err(thrown) => js_error(thrown),
    }
}

/// A pending `IDBRequest` whose result is converted on success.
pub(crate) struct BrowserRequest<T> {
    request: IdbRequest,
    convert: Convert<T>,
}

impl<T: 'static> BrowserRequest<T> {
    pub fn boxed(request: IdbRequest, convert: impl Fn(JsValue) -> HostResult<T> + 'static) -> Pending<T> {
        Box::new(Self {
            request,
            convert: Box::new(convert),
        })
    }
}

impl<T: 'static> HostRequest<T> for BrowserRequest<T> {
    fn set_callbacks(self: Box<Self>, on_success: OnSuccess<T>, on_error: OnError) {
        let BrowserRequest { request, convert } = *self;
        let closures: Rc<RefCell<Option<ClosurePair>>> = Rc::new(RefCell::new(None));
        let handlers = Rc::new(RefCell::new(Some((on_success, on_error))));

        let req_s = request.clone();
        let handlers_s = Rc::clone(&handlers);
        let closures_s = Rc::clone(&closures);
        let success = Closure::wrap(Box::new(move |_event: Event| {
            let result = req_s.result().map_err(js_error).and_then(|value| convert(value));
            let handlers = handlers_s.borrow_mut().take();
            if let Some((on_success, on_error)) = handlers {
                match result {
                    Ok(value) => on_success(value),
                    Err(error) => on_error(error),
                }
            }
            *closures_s.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        let req_e = request.clone();
        let closures_e = Rc::clone(&closures);
        let error = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = handlers.borrow_mut().take();
            if let Some((_, on_error)) = handlers {
                on_error(request_error(&req_e));
            }
            *closures_e.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        request.set_onsuccess(Some(success.as_ref().unchecked_ref()));
        request.set_onerror(Some(error.as_ref().unchecked_ref()));
        *closures.borrow_mut() = Some((success, error));
    }
}

/// A cursor request: `success` fires once per step until the result is null.
pub(crate) struct BrowserCursorRequest {
    pub request: IdbRequest,
    pub kind: CursorKind,
}

impl CursorRequest for BrowserCursorRequest {
    fn set_callbacks(self: Box<Self>, on_step: OnCursorStep, on_error: OnError) {
        let BrowserCursorRequest { request, kind } = *self;
        let closures: Rc<RefCell<Option<ClosurePair>>> = Rc::new(RefCell::new(None));
        let on_step = Rc::new(RefCell::new(on_step));
        let on_error = Rc::new(RefCell::new(Some(on_error)));

        let req_s = request.clone();
        let closures_s = Rc::clone(&closures);
        let errors_s = Rc::clone(&on_error);
        let success = Closure::wrap(Box::new(move |_event: Event| {
            let position = req_s
                .result()
                .map_err(js_error)
                .and_then(|result| BrowserCursor::from_result(result, kind));
            match position {
                Ok(Some(cursor)) => (*on_step.borrow_mut())(Some(cursor)),
                Ok(None) => {
                    (*on_step.borrow_mut())(None);
                    *closures_s.borrow_mut() = None;
                }
                Err(error) => {
                    let handler = errors_s.borrow_mut().take();
                    if let Some(handler) = handler {
                        handler(error);
                    }
                    *closures_s.borrow_mut() = None;
                }
            }
        }) as Box<dyn FnMut(Event)>);

        let req_e = request.clone();
        let closures_e = Rc::clone(&closures);
        let error = Closure::wrap(Box::new(move |_event: Event| {
            let handler = on_error.borrow_mut().take();
            if let Some(handler) = handler {
                handler(request_error(&req_e));
            }
            *closures_e.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        request.set_onsuccess(Some(success.as_ref().unchecked_ref()));
        request.set_onerror(Some(error.as_ref().unchecked_ref()));
        *closures.borrow_mut() = Some((success, error));
    }
}

pub(crate) struct BrowserCursor {
    cursor: IdbCursor,
    key: Key,
    primary_key: Key,
    value: Option<Value>,
}

impl BrowserCursor {
    fn from_result(result: JsValue, kind: CursorKind) -> HostResult<Option<Rc<dyn HostCursor>>> {
        if result.is_null() || result.is_undefined() {
            return Ok(None);
        }
        let value = match kind {
            CursorKind::WithValue => {
                let cursor: &IdbCursorWithValue = result.unchecked_ref();
                Some(value_from_js(&cursor.value().map_err(js_error)?)?)
            }
            CursorKind::KeyOnly => None,
        };
        let cursor: IdbCursor = result.unchecked_into();
        let key = key_from_js(&cursor.key().map_err(js_error)?)?;
        let primary_key = key_from_js(&cursor.primary_key().map_err(js_error)?)?;
        Ok(Some(Rc::new(BrowserCursor {
            cursor,
            key,
            primary_key,
            value,
        })))
    }
}

impl HostCursor for BrowserCursor {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn primary_key(&self) -> Key {
        self.primary_key.clone()
    }

    fn value(&self) -> Option<Value> {
        self.value.clone()
    }

    fn direction(&self) -> crate::engine::CursorDirection {
        direction_from_js(self.cursor.direction())
    }

    fn advance(&self, count: u32) -> HostResult<()> {
        self.cursor.advance(count).map_err(js_error)
    }

    fn continue_key(&self, key: Option<Key>) -> HostResult<()> {
        match key {
            Some(key) => self.cursor.continue_with_key(&key_to_js(&key)),
            None => self.cursor.continue_(),
        }
        .map_err(js_error)
    }

    fn continue_primary_key(&self, key: Key, primary_key: Key) -> HostResult<()> {
        self.cursor
            .continue_primary_key(&key_to_js(&key), &key_to_js(&primary_key))
            .map_err(js_error)
    }

    fn update(&self, value: Value) -> HostResult<Pending<Key>> {
        let request = self.cursor.update(&value_to_js(&value)?).map_err(js_error)?;
        Ok(BrowserRequest::boxed(request, |key| key_from_js(&key)))
    }

    fn delete(&self) -> HostResult<Pending<()>> {
        let request = self.cursor.delete().map_err(js_error)?;
        Ok(BrowserRequest::boxed(request, |_| Ok(())))
    }
}

fn version_change(event: &IdbVersionChangeEvent) -> VersionChange {
    VersionChange {
        old_version: event.old_version() as u32,
        new_version: event.new_version().map(|v| v as u32),
    }
}

struct OpenClosures {
    _upgrade: Closure<dyn FnMut(IdbVersionChangeEvent)>,
    _blocked: Closure<dyn FnMut(IdbVersionChangeEvent)>,
    _success: Closure<dyn FnMut(Event)>,
    _error: Closure<dyn FnMut(Event)>,
}

pub(crate) struct BrowserOpenRequest {
    pub request: IdbOpenDbRequest,
}

impl OpenRequest for BrowserOpenRequest {
    fn set_callbacks(self: Box<Self>, callbacks: OpenCallbacks) {
        let request = self.request;
        let OpenCallbacks {
            upgrade_needed,
            mut blocked,
            success,
            error,
        } = callbacks;
        let closures: Rc<RefCell<Option<OpenClosures>>> = Rc::new(RefCell::new(None));
        let upgrade_needed = RefCell::new(Some(upgrade_needed));
        let terminal = Rc::new(RefCell::new(Some((success, error))));

        let req_u = request.clone();
        let upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            let Some(handler) = upgrade_needed.borrow_mut().take() else {
                return;
            };
            let connection = req_u.result().ok().map(|db| Rc::new(BrowserConnection::new(db.unchecked_into())));
            let transaction = req_u.transaction().map(|tx| Rc::new(BrowserTransaction::new(tx)));
            if let (Some(connection), Some(transaction)) = (connection, transaction) {
                let connection: Rc<dyn HostConnection> = connection;
                let transaction: Rc<dyn HostTransaction> = transaction;
                handler(version_change(&event), connection, transaction);
            }
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        let on_blocked = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            blocked(version_change(&event));
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        let req_s = request.clone();
        let terminal_s = Rc::clone(&terminal);
        let closures_s = Rc::clone(&closures);
        let on_success = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = terminal_s.borrow_mut().take();
            if let Some((success, error)) = handlers {
                match req_s.result() {
                    Ok(db) => success(Rc::new(BrowserConnection::new(db.unchecked_into()))),
                    Err(thrown) => error(js_error(thrown)),
                }
            }
            *closures_s.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        let req_e = request.clone();
        let closures_e = Rc::clone(&closures);
        let on_error = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = terminal.borrow_mut().take();
            if let Some((_, error)) = handlers {
                error(request_error(&req_e));
            }
            *closures_e.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        request.set_onupgradeneeded(Some(upgrade.as_ref().unchecked_ref()));
        request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        *closures.borrow_mut() = Some(OpenClosures {
            _upgrade: upgrade,
            _blocked: on_blocked,
            _success: on_success,
            _error: on_error,
        });
    }
}

struct DeleteClosures {
    _blocked: Closure<dyn FnMut(IdbVersionChangeEvent)>,
    _success: Closure<dyn FnMut(Event)>,
    _error: Closure<dyn FnMut(Event)>,
}

pub(crate) struct BrowserDeleteRequest {
    pub request: IdbOpenDbRequest,
}

impl DeleteRequest for BrowserDeleteRequest {
    fn set_callbacks(self: Box<Self>, callbacks: DeleteCallbacks) {
        let request = self.request;
        let DeleteCallbacks {
            mut blocked,
            success,
            error,
        } = callbacks;
        let closures: Rc<RefCell<Option<DeleteClosures>>> = Rc::new(RefCell::new(None));
        let terminal = Rc::new(RefCell::new(Some((success, error))));

        let on_blocked = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            blocked(version_change(&event));
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        let terminal_s = Rc::clone(&terminal);
        let closures_s = Rc::clone(&closures);
        let on_success = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = terminal_s.borrow_mut().take();
            if let Some((success, _)) = handlers {
                success(());
            }
            *closures_s.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        let req_e = request.clone();
        let closures_e = Rc::clone(&closures);
        let on_error = Closure::wrap(Box::new(move |_event: Event| {
            let handlers = terminal.borrow_mut().take();
            if let Some((_, error)) = handlers {
                error(request_error(&req_e));
            }
            *closures_e.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        *closures.borrow_mut() = Some(DeleteClosures {
            _blocked: on_blocked,
            _success: on_success,
            _error: on_error,
        });
    }
}
