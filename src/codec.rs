//! Typed encode/decode between client values and the preference backend's
//! native primitive types, with a reserved sentinel for `null`.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The literal that represents a stored `null`, distinct from "key absent".
/// Stable on disk; must never occur as a legitimate compound encoding.
pub const NULL_SENTINEL: &str = "__KSAFE_NULL_VALUE__";

/// The native shape a value takes once it leaves the Codec, matching the
/// preference backend's primitive type system. Compound values and
/// encrypted ciphertext both ride as `Str`.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl StoredValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null_sentinel(&self) -> bool {
        matches!(self, Self::Str(s) if s == NULL_SENTINEL)
    }
}

/// A type that can be losslessly round-tripped through the preference
/// backend's primitive kinds (or, for compound shapes, through the
/// canonical JSON text encoding).
pub trait Codable: Clone {
    fn to_stored(&self) -> StoredValue;
    fn from_stored(stored: &StoredValue) -> Option<Self>;

    /// Canonical textual encoding: always a plain string, regardless of the
    /// value's native primitive kind. This is what gets handed to the
    /// `CryptoEngine` as AEAD plaintext for encrypted writes, and what the
    /// vault's dual-interpretation read path tries first when resolving an
    /// `"encrypted_"`-prefixed cache entry. Unlike `to_stored`/`from_stored`,
    /// which dispatch on the *kind* of a `StoredValue`, this pair dispatches
    /// on the statically-known target type `T`, since the caller of `get`
    /// always supplies it — no runtime type sniffing of the plaintext string
    /// is needed or attempted.
    fn to_text(&self) -> String;
    fn from_text(text: &str) -> Option<Self>;
}

impl Codable for bool {
    fn to_stored(&self) -> StoredValue {
        StoredValue::Bool(*self)
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.to_string()
    }
    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

impl Codable for i32 {
    fn to_stored(&self) -> StoredValue {
        StoredValue::I32(*self)
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::I32(v) => Some(*v),
            // Narrowing from i64: only in-range values satisfy an i32 request.
            StoredValue::I64(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.to_string()
    }
    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

impl Codable for i64 {
    fn to_stored(&self) -> StoredValue {
        StoredValue::I64(*self)
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::I64(v) => Some(*v),
            // Widening from i32 always succeeds.
            StoredValue::I32(v) => Some(*v as i64),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.to_string()
    }
    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

impl Codable for f32 {
    fn to_stored(&self) -> StoredValue {
        StoredValue::F32(*self)
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::F32(v) => Some(*v),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.to_string()
    }
    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

impl Codable for f64 {
    fn to_stored(&self) -> StoredValue {
        StoredValue::F64(*self)
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::F64(v) => Some(*v),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.to_string()
    }
    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }
}

impl Codable for String {
    fn to_stored(&self) -> StoredValue {
        StoredValue::Str(self.clone())
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        match stored {
            StoredValue::Str(s) if s != NULL_SENTINEL => Some(s.clone()),
            _ => None,
        }
    }
    fn to_text(&self) -> String {
        self.clone()
    }
    fn from_text(text: &str) -> Option<Self> {
        if text == NULL_SENTINEL {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Nullable wrapper: a stored null-sentinel decodes to `None`; anything else
/// decodes via `T`. A missing key is handled by the caller's `default`, not
/// by this impl (the Codec only ever sees `Some(stored)` here).
impl<T: Codable> Codable for Option<T> {
    fn to_stored(&self) -> StoredValue {
        match self {
            Some(v) => v.to_stored(),
            None => StoredValue::Str(NULL_SENTINEL.to_string()),
        }
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        if stored.is_null_sentinel() {
            Some(None)
        } else {
            T::from_stored(stored).map(Some)
        }
    }
    fn to_text(&self) -> String {
        match self {
            Some(v) => v.to_text(),
            None => NULL_SENTINEL.to_string(),
        }
    }
    fn from_text(text: &str) -> Option<Self> {
        if text == NULL_SENTINEL {
            Some(None)
        } else {
            T::from_text(text).map(Some)
        }
    }
}

/// A compound value, canonically encoded as JSON text. Equal values of `T`
/// encode identically because `serde_json`'s struct-field order always
/// follows declaration order, and map-shaped payloads that need a stable
/// order should use `serde_json::Map` (which preserves insertion order under
/// the `preserve_order` feature) rather than an unordered `HashMap`.
#[derive(Clone, Debug, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Clone + Serialize + DeserializeOwned> Codable for Json<T> {
    fn to_stored(&self) -> StoredValue {
        // encode() on an unsupported/unserializable type is a programming
        // error at the call site, not a runtime Result — matching the
        // Codec's documented contract.
        StoredValue::Str(self.to_text())
    }
    fn from_stored(stored: &StoredValue) -> Option<Self> {
        let text = stored.as_str()?;
        Self::from_text(text)
    }
    fn to_text(&self) -> String {
        serde_json::to_string(&self.0).expect("Json value must be serializable")
    }
    fn from_text(text: &str) -> Option<Self> {
        if text == NULL_SENTINEL {
            return None;
        }
        serde_json::from_str(text).ok().map(Json)
    }
}

/// Maps typed values to/from `StoredValue`, applying the decode fallback
/// chain: absent → default (handled by the caller, which holds the
/// `Option<StoredValue>`), null-sentinel → `None`/default, matching
/// primitive kind → value (with `i32 <-> i64` widening), compound string →
/// parsed value or default on parse failure.
pub struct Codec;

impl Codec {
    pub fn encode<T: Codable>(value: &T) -> StoredValue {
        value.to_stored()
    }

    /// Decode failures (wrong kind, out-of-range widening, parse failure)
    /// are silently coerced to `default` — the Codec never surfaces an
    /// error to callers of `get`.
    pub fn decode<T: Codable>(stored: Option<&StoredValue>, default: T) -> T {
        match stored {
            None => default,
            Some(s) => T::from_stored(s).unwrap_or(default),
        }
    }
}
