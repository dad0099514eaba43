//! Key model shared by every host engine
//!
//! Keys follow the IndexedDB ordering: numbers sort before strings, strings
//! before binary keys, binary keys before arrays. Strings compare by UTF-16
//! code unit, the way the browser compares them.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HostError, HostResult};

/// Largest integer a key generator may hand out (2^53).
pub const MAX_GENERATED_KEY: f64 = 9_007_199_254_740_992.0;

/// A key as the host engine understands it.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Binary(_) => 2,
            Key::Array(_) => 3,
        }
    }

    /// NaN is not a key, nor is any array containing it.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) => !n.is_nan(),
            Key::Array(items) => items.iter().all(Key::is_valid),
            Key::String(_) | Key::Binary(_) => true,
        }
    }

    /// Fails with `DataError` if the key is not valid.
    pub fn validate(&self) -> HostResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(HostError::data(format!("{} is not a valid key", self)))
        }
    }

    /// Interpret a JSON value as a key. Objects, booleans and null are not keys.
    pub fn from_json(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Render the key as JSON. Integral numbers become JSON integers so that
    /// generated keys deserialize into integer fields.
    pub fn to_json(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_GENERATED_KEY {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    /// Name of the key's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Key::Number(_) => "number",
            Key::String(_) => "string",
            Key::Binary(_) => "binary",
            Key::Array(_) => "array",
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Key::String(a), Key::String(b)) => a.encode_utf16().cmp(b.encode_utf16()),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// Where a store or index finds keys inside a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A dotted path such as `"profile.email"`. The empty path is the value itself.
    Single(String),
    /// A list of dotted paths producing an array key.
    Compound(Vec<String>),
}

impl KeyPath {
    fn is_valid_path(path: &str) -> bool {
        path.is_empty()
            || path
                .split('.')
                .all(|part| !part.is_empty() && !part.chars().any(char::is_whitespace))
    }

    /// Every component must be a non-empty identifier; compound paths must
    /// not be empty.
    pub fn is_valid(&self) -> bool {
        match self {
            KeyPath::Single(path) => Self::is_valid_path(path),
            KeyPath::Compound(paths) => {
                !paths.is_empty() && paths.iter().all(|p| Self::is_valid_path(p))
            }
        }
    }

    fn evaluate<'a>(path: &str, value: &'a Value) -> Option<&'a Value> {
        if path.is_empty() {
            return Some(value);
        }
        path.split('.')
            .try_fold(value, |current, part| current.as_object()?.get(part))
    }

    /// Raw JSON found at a single path, used for multi-entry indexes.
    pub fn evaluate_single<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match self {
            KeyPath::Single(path) => Self::evaluate(path, value),
            KeyPath::Compound(_) => None,
        }
    }

    /// Extract a key from a value. `None` when a path is missing or resolves
    /// to something that is not a key.
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => Self::evaluate(path, value).and_then(Key::from_json),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|path| Self::evaluate(path, value).and_then(Key::from_json))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Whether a generated key could be written into `value` at this path.
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }
        let mut current = value;
        for part in path.split('.') {
            match current {
                Value::Object(map) => match map.get(part) {
                    Some(next) => current = next,
                    None => return true,
                },
                _ => return false,
            }
        }
        true
    }

    /// Write `key` into `value` at this path, creating intermediate objects.
    pub fn inject(&self, value: &mut Value, key: &Key) -> HostResult<()> {
        let KeyPath::Single(path) = self else {
            return Err(HostError::data("cannot inject a key through a compound key path"));
        };
        let mut parts = path.split('.').peekable();
        let mut current = value;
        while let Some(part) = parts.next() {
            let map = current
                .as_object_mut()
                .ok_or_else(|| HostError::data(format!("cannot inject key at '{}'", path)))?;
            if parts.peek().is_none() {
                map.insert(part.to_string(), key.to_json());
                return Ok(());
            }
            current = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        Err(HostError::data("cannot inject a key at the empty key path"))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{:?}", path),
            KeyPath::Compound(paths) => write!(f, "{:?}", paths),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(paths: Vec<String>) -> Self {
        KeyPath::Compound(paths)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(paths: &[&str]) -> Self {
        KeyPath::Compound(paths.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeyPath {
    fn from(paths: [&str; N]) -> Self {
        KeyPath::Compound(paths.iter().map(|p| p.to_string()).collect())
    }
}

/// A continuous interval over keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// The range containing exactly `key`.
    pub fn only(key: Key) -> HostResult<Self> {
        key.validate()?;
        Ok(Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        })
    }

    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> HostResult<Self> {
        lower.validate()?;
        upper.validate()?;
        match lower.cmp(&upper) {
            Ordering::Greater => {
                return Err(HostError::data(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower, upper
                )))
            }
            Ordering::Equal if lower_open || upper_open => {
                return Err(HostError::data(format!(
                    "bounds are both {} but the range is open",
                    lower
                )))
            }
            _ => {}
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower_bound(lower: Key, open: bool) -> HostResult<Self> {
        lower.validate()?;
        Ok(Self {
            lower: Some(lower),
            upper: None,
            lower_open: open,
            upper_open: true,
        })
    }

    pub fn upper_bound(upper: Key, open: bool) -> HostResult<Self> {
        upper.validate()?;
        Ok(Self {
            lower: None,
            upper: Some(upper),
            lower_open: true,
            upper_open: open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    pub fn includes(&self, key: &Key) -> bool {
        let (lower, upper) = self.bounds();
        let above = match lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below = match upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// The range as a pair of bounds, suitable for `BTreeMap::range`.
    pub fn bounds(&self) -> (Bound<&Key>, Bound<&Key>) {
        let lower = match &self.lower {
            Some(key) if self.lower_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        };
        let upper = match &self.upper {
            Some(key) if self.upper_open => Bound::Excluded(key),
            Some(key) => Bound::Included(key),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.lower_open { '(' } else { '[' };
        let close = if self.upper_open { ')' } else { ']' };
        write!(f, "{}", open)?;
        match &self.lower {
            Some(key) => write!(f, "{}", key)?,
            None => write!(f, "-inf")?,
        }
        write!(f, ", ")?;
        match &self.upper {
            Some(key) => write!(f, "{}", key)?,
            None => write!(f, "+inf")?,
        }
        write!(f, "{}", close)
    }
}

/// A point lookup or a range lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyQuery {
    Key(Key),
    Range(KeyRange),
}

impl KeyQuery {
    pub fn into_range(self) -> HostResult<KeyRange> {
        match self {
            KeyQuery::Key(key) => KeyRange::only(key),
            KeyQuery::Range(range) => Ok(range),
        }
    }
}

impl From<Key> for KeyQuery {
    fn from(key: Key) -> Self {
        KeyQuery::Key(key)
    }
}

impl From<KeyRange> for KeyQuery {
    fn from(range: KeyRange) -> Self {
        KeyQuery::Range(range)
    }
}

impl fmt::Display for KeyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyQuery::Key(key) => write!(f, "key {}", key),
            KeyQuery::Range(range) => write!(f, "range {}", range),
        }
    }
}

/// Pick whichever lower bound admits fewer keys.
pub(crate) fn tighter_lower<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.max(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.max(y)),
        (Bound::Excluded(x), Bound::Included(y)) | (Bound::Included(y), Bound::Excluded(x)) => {
            if x >= y {
                Bound::Excluded(x)
            } else {
                Bound::Included(y)
            }
        }
    }
}

/// Pick whichever upper bound admits fewer keys.
pub(crate) fn tighter_upper<'a>(a: Bound<&'a Key>, b: Bound<&'a Key>) -> Bound<&'a Key> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other,
        (Bound::Included(x), Bound::Included(y)) => Bound::Included(x.min(y)),
        (Bound::Excluded(x), Bound::Excluded(y)) => Bound::Excluded(x.min(y)),
        (Bound::Excluded(x), Bound::Included(y)) | (Bound::Included(y), Bound::Excluded(x)) => {
            if x <= y {
                Bound::Excluded(x)
            } else {
                Bound::Included(y)
            }
        }
    }
}

/// `BTreeMap::range` panics on inverted bounds; check before calling it.
pub(crate) fn is_empty_interval(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_type_ordering() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::Binary(vec![0]),
            Key::String("a".into()),
            Key::Number(10.0),
            Key::Number(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::Number(-1.0),
                Key::Number(10.0),
                Key::String("a".into()),
                Key::Binary(vec![0]),
                Key::Array(vec![]),
            ]
        );
    }

    #[test]
    fn test_strings_compare_by_utf16_code_unit() {
        // U+FF61 is one code unit; U+1F600 is a surrogate pair starting at 0xD83D.
        let bmp = Key::from("\u{FF61}");
        let astral = Key::from("\u{1F600}");
        assert!(astral < bmp);
    }

    #[test]
    fn test_arrays_compare_lexicographically() {
        let short = Key::Array(vec![Key::Number(1.0)]);
        let long = Key::Array(vec![Key::Number(1.0), Key::Number(0.0)]);
        assert!(short < long);
        assert!(Key::Array(vec![Key::Number(2.0)]) > long);
    }

    #[test]
    fn test_nan_is_invalid() {
        assert!(!Key::Number(f64::NAN).is_valid());
        assert!(!Key::Array(vec![Key::Number(f64::NAN)]).is_valid());
        assert!(Key::Number(f64::NEG_INFINITY).is_valid());
    }

    #[test]
    fn test_key_path_extract() {
        let value = json!({"id": 7, "profile": {"email": "a@b.c"}, "tags": ["x", "y"]});
        assert_eq!(KeyPath::from("id").extract(&value), Some(Key::Number(7.0)));
        assert_eq!(
            KeyPath::from("profile.email").extract(&value),
            Some(Key::from("a@b.c"))
        );
        assert_eq!(KeyPath::from("missing").extract(&value), None);
        assert_eq!(
            KeyPath::from(["id", "profile.email"]).extract(&value),
            Some(Key::Array(vec![Key::Number(7.0), Key::from("a@b.c")]))
        );
        assert_eq!(KeyPath::from(["id", "missing"]).extract(&value), None);
    }

    #[test]
    fn test_key_path_inject() {
        let mut value = json!({"name": "alice"});
        let path = KeyPath::from("meta.id");
        assert!(path.can_inject(&value));
        path.inject(&mut value, &Key::Number(3.0)).unwrap();
        assert_eq!(value, json!({"name": "alice", "meta": {"id": 3}}));

        let scalar = json!("alice");
        assert!(!KeyPath::from("id").can_inject(&scalar));
    }

    #[test]
    fn test_key_path_validity() {
        assert!(KeyPath::from("").is_valid());
        assert!(KeyPath::from("a.b").is_valid());
        assert!(!KeyPath::from("a..b").is_valid());
        assert!(!KeyPath::Compound(vec![]).is_valid());
    }

    #[test]
    fn test_range_validation() {
        let err = KeyRange::bound(Key::Number(5.0), Key::Number(1.0), false, false).unwrap_err();
        assert!(err.is(crate::HostErrorKind::Data));
        assert!(KeyRange::bound(Key::Number(1.0), Key::Number(1.0), true, false).is_err());
        assert!(KeyRange::only(Key::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_range_includes() {
        let range = KeyRange::bound(Key::Number(1.0), Key::Number(3.0), true, false).unwrap();
        assert!(!range.includes(&Key::Number(1.0)));
        assert!(range.includes(&Key::Number(2.0)));
        assert!(range.includes(&Key::Number(3.0)));
        assert!(!range.includes(&Key::from("2")));

        let lower = KeyRange::lower_bound(Key::Number(2.0), false).unwrap();
        assert!(lower.includes(&Key::from("anything")));
    }

    #[test]
    fn test_tighter_bounds() {
        let one = Key::Number(1.0);
        let two = Key::Number(2.0);
        assert_eq!(
            tighter_lower(Bound::Included(&one), Bound::Excluded(&one)),
            Bound::Excluded(&one)
        );
        assert_eq!(
            tighter_lower(Bound::Included(&two), Bound::Excluded(&one)),
            Bound::Included(&two)
        );
        assert_eq!(
            tighter_upper(Bound::Unbounded, Bound::Excluded(&one)),
            Bound::Excluded(&one)
        );
        assert!(is_empty_interval(Bound::Excluded(&one), Bound::Included(&one)));
        assert!(!is_empty_interval(Bound::Included(&one), Bound::Included(&one)));
    }

    #[test]
    fn test_generated_keys_render_as_integers() {
        assert_eq!(Key::Number(4.0).to_json(), json!(4));
        assert_eq!(Key::Number(1.5).to_json(), json!(1.5));
    }
}
