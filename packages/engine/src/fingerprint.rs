//! Canonical, order-independent serialization of `(kind, input)` into a
//! stable 128-bit hex digest: the engine's sole cache key.
//!
//! Non-determinism here produces cache misses (benign) or collisions (latent
//! bugs), so every rule below exists to make the digest stable across
//! processes, machines, and run order.

use std::{fmt, str::FromStr};

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::Value;
use tracing::{instrument, trace};

use crate::error::EngineError;

/// A 128-bit content address derived from `(kind, canonical(input))`.
///
/// Displays and parses as 32 lowercase hex characters.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Compute the fingerprint for `(kind, input)`.
    ///
    /// Fails with [`EngineError::Unserializable`] if `input` cannot be
    /// converted to a `serde_json::Value` (functions, cyclic graphs, and
    /// other non-JSON-representable values fall into this bucket before they
    /// ever reach this function, since Rust's type system already rejects
    /// them at the `Serialize` boundary; this surfaces serde errors such as
    /// non-finite floats or map keys that don't round-trip).
    #[instrument(skip(input))]
    pub fn of(kind: &str, input: &impl Serialize) -> Result<Self, EngineError> {
        let value = serde_json::to_value(input).map_err(|err| EngineError::Unserializable {
            kind: kind.to_owned(),
            message: err.to_string(),
        })?;
        Ok(Self::of_value(kind, &value))
    }

    /// As [`Fingerprint::of`], but for a pre-built [`serde_json::Value`].
    pub fn of_value(kind: &str, input: &Value) -> Self {
        let mut canonical = String::new();
        canonical.push_str(&canonical_json(&Value::String(kind.to_owned())));
        canonical.push(':');
        canonical.push_str(&canonical_json(input));

        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        let digest: [u8; 16] = hasher.finalize().into();

        trace!(%kind, canonical, "computed fingerprint");
        Self(digest)
    }

    /// The raw 16-byte digest.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// The two-character shard prefix used to cap directory fan-out.
    pub fn shard(&self) -> String {
        self.to_string()[..2].to_owned()
    }
}

/// Canonicalize a JSON value into a string suitable for hashing.
///
/// - Object keys are emitted in code-point-sorted order, at every depth.
/// - Array elements are each canonicalized, then the resulting element
///   strings are sorted lexicographically before joining — array order is
///   treated as insignificant (see the open question in `DESIGN.md`).
/// - Primitives and null use serde_json's standard compact encoding.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    let key_str = serde_json::to_string(key).expect("string always serializes");
                    format!("{key_str}:{}", canonical_json(&map[key]))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().map(canonical_json).collect();
            parts.sort();
            format!("[{}]", parts.join(","))
        }
        primitive => serde_json::to_string(primitive).expect("primitive always serializes"),
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(EngineError::InvalidArgument {
                message: format!("not a 32-character hex fingerprint: {s:?}"),
            });
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk).expect("ascii hex");
            bytes[i] = u8::from_str_radix(hex, 16).expect("validated hex digit");
        }
        Ok(Self(bytes))
    }
}
