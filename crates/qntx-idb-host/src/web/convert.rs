//! Conversions between host types and JavaScript values

use js_sys::{Array, Uint8Array};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, DomStringList, IdbCursorDirection, IdbKeyRange, IdbTransactionMode};

use crate::engine::{CursorDirection, TransactionMode};
use crate::error::{HostError, HostErrorKind, HostResult};
use crate::key::{Key, KeyPath, KeyQuery, KeyRange};

/// Map a thrown value (usually a `DOMException`) to a host error.
pub(crate) fn js_error(value: JsValue) -> HostError {
    if let Some(exception) = value.dyn_ref::<DomException>() {
        return dom_error(exception);
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        let name: String = error.name().into();
        let message: String = error.message().into();
        return HostError::new(HostErrorKind::from_name(&name), message);
    }
    HostError::unknown(format!("{:?}", value))
}

pub(crate) fn dom_error(exception: &DomException) -> HostError {
    HostError::new(HostErrorKind::from_name(&exception.name()), exception.message())
}

pub(crate) fn optional_dom_error(exception: Option<DomException>, fallback: &str) -> HostError {
    match exception {
        Some(exception) => dom_error(&exception),
        None => HostError::unknown(fallback),
    }
}

pub(crate) fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Binary(bytes) => Uint8Array::from(bytes.as_slice()).into(),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

pub(crate) fn key_from_js(value: &JsValue) -> HostResult<Key> {
    if let Some(n) = value.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if Array::is_array(value) {
        let items: Array = value.clone().unchecked_into();
        return items.iter().map(|item| key_from_js(&item)).collect::<HostResult<Vec<_>>>().map(Key::Array);
    }
    if value.is_instance_of::<js_sys::ArrayBuffer>() || js_sys::ArrayBuffer::is_view(value) {
        return Ok(Key::Binary(Uint8Array::new(value).to_vec()));
    }
    Err(HostError::data(format!("unsupported key {:?}", value)))
}

pub(crate) fn optional_key_from_js(value: &JsValue) -> HostResult<Option<Key>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    key_from_js(value).map(Some)
}

/// Values cross the boundary as JSON.
pub(crate) fn value_to_js(value: &Value) -> HostResult<JsValue> {
    let text = serde_json::to_string(value).map_err(|e| HostError::data(e.to_string()))?;
    js_sys::JSON::parse(&text).map_err(js_error)
}

pub(crate) fn value_from_js(value: &JsValue) -> HostResult<Value> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    let text: String = js_sys::JSON::stringify(value).map_err(js_error)?.into();
    serde_json::from_str(&text).map_err(|e| HostError::data(e.to_string()))
}

pub(crate) fn optional_value_from_js(value: &JsValue) -> HostResult<Option<Value>> {
    if value.is_undefined() {
        return Ok(None);
    }
    value_from_js(value).map(Some)
}

pub(crate) fn range_to_js(range: &KeyRange) -> HostResult<IdbKeyRange> {
    let result = match (range.lower(), range.upper()) {
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(lower),
            &key_to_js(upper),
            range.lower_open(),
            range.upper_open(),
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(&key_to_js(lower), range.lower_open()),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(&key_to_js(upper), range.upper_open()),
        (None, None) => return Err(HostError::data("a key range needs at least one bound")),
    };
    result.map_err(js_error)
}

pub(crate) fn query_to_js(query: &KeyQuery) -> HostResult<JsValue> {
    match query {
        KeyQuery::Key(key) => {
            key.validate()?;
            Ok(key_to_js(key))
        }
        KeyQuery::Range(range) => range_to_js(range).map(JsValue::from),
    }
}

pub(crate) fn optional_query_to_js(query: Option<&KeyQuery>) -> HostResult<JsValue> {
    match query {
        Some(query) => query_to_js(query),
        None => Ok(JsValue::UNDEFINED),
    }
}

pub(crate) fn key_path_to_js(path: &KeyPath) -> JsValue {
    match path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Compound(paths) => paths.iter().map(|p| JsValue::from_str(p)).collect::<Array>().into(),
    }
}

pub(crate) fn key_path_from_js(value: &JsValue) -> Option<KeyPath> {
    if let Some(path) = value.as_string() {
        return Some(KeyPath::Single(path));
    }
    if Array::is_array(value) {
        let items: Array = value.clone().unchecked_into();
        return Some(KeyPath::Compound(items.iter().filter_map(|item| item.as_string()).collect()));
    }
    None
}

pub(crate) fn string_list(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

pub(crate) fn direction_to_js(direction: CursorDirection) -> IdbCursorDirection {
    match direction {
        CursorDirection::Next => IdbCursorDirection::Next,
        CursorDirection::NextUnique => IdbCursorDirection::Nextunique,
        CursorDirection::Prev => IdbCursorDirection::Prev,
        CursorDirection::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

pub(crate) fn direction_from_js(direction: IdbCursorDirection) -> CursorDirection {
    match direction {
        IdbCursorDirection::Nextunique => CursorDirection::NextUnique,
        IdbCursorDirection::Prev => CursorDirection::Prev,
        IdbCursorDirection::Prevunique => CursorDirection::PrevUnique,
        _ => CursorDirection::Next,
    }
}

pub(crate) fn mode_to_js(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        TransactionMode::VersionChange => IdbTransactionMode::Versionchange,
    }
}

pub(crate) fn mode_from_js(mode: IdbTransactionMode) -> TransactionMode {
    match mode {
        IdbTransactionMode::Readwrite => TransactionMode::ReadWrite,
        IdbTransactionMode::Versionchange => TransactionMode::VersionChange,
        _ => TransactionMode::ReadOnly,
    }
}
