//! Typed keys, key ranges and queries
//!
//! Handles are parameterized by the Rust type of their keys. [`KeyType`]
//! converts between that type and the host's [`Key`]; a stored key that does
//! not convert fails with [`Error::KeyType`].

use std::fmt;
use std::marker::PhantomData;

use qntx_idb_host::{Key, KeyQuery, KeyRange as HostKeyRange};

use crate::error::{Error, Result};

/// A Rust type usable as a key.
pub trait KeyType: Sized {
    /// Name used in conversion errors.
    const NAME: &'static str;

    fn to_key(&self) -> Key;

    fn from_key(key: Key) -> Result<Self>;
}

fn mismatch<K: KeyType>(key: &Key) -> Error {
    Error::KeyType {
        expected: K::NAME,
        found: key.to_string(),
    }
}

impl KeyType for Key {
    const NAME: &'static str = "key";

    fn to_key(&self) -> Key {
        self.clone()
    }

    fn from_key(key: Key) -> Result<Self> {
        Ok(key)
    }
}

impl KeyType for f64 {
    const NAME: &'static str = "number";

    fn to_key(&self) -> Key {
        Key::Number(*self)
    }

    fn from_key(key: Key) -> Result<Self> {
        match key {
            Key::Number(n) => Ok(n),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

macro_rules! integer_key {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl KeyType for $ty {
                const NAME: &'static str = $name;

                fn to_key(&self) -> Key {
                    Key::Number(*self as f64)
                }

                fn from_key(key: Key) -> Result<Self> {
                    match key {
                        Key::Number(n)
                            if n.fract() == 0.0 && n >= <$ty>::MIN as f64 && n < <$ty>::MAX as f64 + 1.0 =>
                        {
                            Ok(n as $ty)
                        }
                        other => Err(mismatch::<Self>(&other)),
                    }
                }
            }
        )*
    };
}

integer_key! {
    i32 => "i32",
    i64 => "i64",
    u32 => "u32",
    u64 => "u64",
}

impl KeyType for String {
    const NAME: &'static str = "string";

    fn to_key(&self) -> Key {
        Key::String(self.clone())
    }

    fn from_key(key: Key) -> Result<Self> {
        match key {
            Key::String(s) => Ok(s),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Binary keys.
impl KeyType for Vec<u8> {
    const NAME: &'static str = "binary";

    fn to_key(&self) -> Key {
        Key::Binary(self.clone())
    }

    fn from_key(key: Key) -> Result<Self> {
        match key {
            Key::Binary(bytes) => Ok(bytes),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

/// Tuples are compound keys, stored as arrays.
macro_rules! tuple_key {
    ($len:literal; $($name:ident : $idx:tt),+) => {
        impl<$($name: KeyType),+> KeyType for ($($name,)+) {
            const NAME: &'static str = concat!("array of ", $len);

            fn to_key(&self) -> Key {
                Key::Array(vec![$(self.$idx.to_key()),+])
            }

            fn from_key(key: Key) -> Result<Self> {
                match key {
                    Key::Array(items) if items.len() == $len => {
                        let mut items = items.into_iter();
                        Ok(($(
                            $name::from_key(items.next().ok_or_else(|| mismatch::<Self>(&Key::Array(Vec::new())))?)?,
                        )+))
                    }
                    other => Err(mismatch::<Self>(&other)),
                }
            }
        }
    };
}

tuple_key!(2; A: 0, B: 1);
tuple_key!(3; A: 0, B: 1, C: 2);
tuple_key!(4; A: 0, B: 1, C: 2, D: 3);

/// A key range over keys of type `K`.
pub struct KeyRange<K> {
    inner: HostKeyRange,
    _key: PhantomData<fn() -> K>,
}

impl<K> KeyRange<K> {
    fn wrap(inner: HostKeyRange) -> Self {
        Self {
            inner,
            _key: PhantomData,
        }
    }

    pub fn as_host(&self) -> &HostKeyRange {
        &self.inner
    }

    pub(crate) fn into_host(self) -> HostKeyRange {
        self.inner
    }
}

impl<K: KeyType> KeyRange<K> {
    /// The range containing exactly `key`.
    pub fn only(key: K) -> Result<Self> {
        Ok(Self::wrap(HostKeyRange::only(key.to_key())?))
    }

    /// Fails with `DataError` when `lower > upper`, or when they are equal and
    /// either end is open.
    pub fn bound(lower: K, upper: K, lower_open: bool, upper_open: bool) -> Result<Self> {
        Ok(Self::wrap(HostKeyRange::bound(
            lower.to_key(),
            upper.to_key(),
            lower_open,
            upper_open,
        )?))
    }

    pub fn lower_bound(lower: K, open: bool) -> Result<Self> {
        Ok(Self::wrap(HostKeyRange::lower_bound(lower.to_key(), open)?))
    }

    pub fn upper_bound(upper: K, open: bool) -> Result<Self> {
        Ok(Self::wrap(HostKeyRange::upper_bound(upper.to_key(), open)?))
    }

    pub fn includes(&self, key: &K) -> bool {
        self.inner.includes(&key.to_key())
    }
}

impl<K> Clone for KeyRange<K> {
    fn clone(&self) -> Self {
        Self::wrap(self.inner.clone())
    }
}

impl<K> fmt::Debug for KeyRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyRange").field(&self.inner).finish()
    }
}

impl<K> fmt::Display for KeyRange<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// A point lookup or a range lookup over keys of type `K`.
pub enum Query<K> {
    Key(K),
    Range(KeyRange<K>),
}

impl<K: KeyType> Query<K> {
    pub(crate) fn into_host(self) -> Result<KeyQuery> {
        match self {
            Query::Key(key) => {
                let key = key.to_key();
                key.validate()?;
                Ok(KeyQuery::Key(key))
            }
            Query::Range(range) => Ok(KeyQuery::Range(range.into_host())),
        }
    }
}

impl<K: KeyType> From<K> for Query<K> {
    fn from(key: K) -> Self {
        Query::Key(key)
    }
}

impl<K> From<KeyRange<K>> for Query<K> {
    fn from(range: KeyRange<K>) -> Self {
        Query::Range(range)
    }
}

pub(crate) fn optional_query<K: KeyType>(query: Option<Query<K>>) -> Result<Option<KeyQuery>> {
    query.map(Query::into_host).transpose()
}
