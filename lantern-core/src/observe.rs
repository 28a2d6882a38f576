//! Trace identity and the span record schema.
//!
//! ID sizing follows W3C Trace Context (16-byte trace, 8-byte span) so records
//! can be forwarded to OpenTelemetry-shaped backends unchanged. In every
//! human-readable encoding an ID is lowercase hex.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::payload::{Metadata, Payload};

/// Current span record schema version.
pub const SCHEMA_VERSION_V1: u32 = 1;

/// Error parsing a hex-encoded ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    /// The input had the wrong length for the target ID type.
    #[error("invalid id length")]
    InvalidLength,
    /// The input contained non-hex characters.
    #[error("invalid hex in id")]
    InvalidHex,
    /// All-zero IDs are reserved as "unset".
    #[error("all-zero id is invalid")]
    AllZeroInvalid,
}

/// Lowercase hex, two digits per byte.
pub fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

fn decode_hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn parse_nonzero_hex<const N: usize>(s: &str) -> Result<[u8; N], ParseIdError> {
    if s.len() != N * 2 {
        return Err(ParseIdError::InvalidLength);
    }
    let mut out = [0u8; N];
    for (slot, pair) in out.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
        let hi = decode_hex_nibble(pair[0]).ok_or(ParseIdError::InvalidHex)?;
        let lo = decode_hex_nibble(pair[1]).ok_or(ParseIdError::InvalidHex)?;
        *slot = (hi << 4) | lo;
    }
    if out.iter().all(|b| *b == 0) {
        return Err(ParseIdError::AllZeroInvalid);
    }
    Ok(out)
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_valid(&self) -> bool {
                self.0.iter().any(|b| *b != 0)
            }

            pub fn parse_hex(s: &str) -> Result<Self, ParseIdError> {
                parse_nonzero_hex::<$len>(s).map(Self)
            }

            pub fn to_hex(&self) -> String {
                hex_lower(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// A 16-byte trace identifier shared by a root span and all its descendants.
    TraceId,
    16
);

hex_id!(
    /// An 8-byte span identifier, unique within the process that minted it.
    SpanId,
    8
);

/// Mints trace and span identifiers.
///
/// Each ID is a prefix of `sha256(seed || counter_be)`. The seed is derived from
/// the process id and wall clock unless a fixed one is supplied, which makes
/// the sequence reproducible.
#[derive(Debug)]
pub struct IdGenerator {
    seed: [u8; 32],
    counter: AtomicU64,
}

impl IdGenerator {
    /// Generator seeded from the process id and the current time.
    pub fn new() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut hasher = Sha256::new();
        hasher.update(std::process::id().to_be_bytes());
        hasher.update(nanos.to_be_bytes());
        Self::from_seed(hasher.finalize().into())
    }

    /// Generator with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_be_bytes());
        Self::from_seed(bytes)
    }

    fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    fn next_digest(&self) -> [u8; 32] {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(n.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn trace_id(&self) -> TraceId {
        loop {
            let digest = self.next_digest();
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&digest[..16]);
            let id = TraceId::from_bytes(bytes);
            if id.is_valid() {
                return id;
            }
        }
    }

    pub fn span_id(&self) -> SpanId {
        loop {
            let digest = self.next_digest();
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let id = SpanId::from_bytes(bytes);
            if id.is_valid() {
                return id;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Severity attached to a span.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Default,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Default => "DEFAULT",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a span observes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    /// A generic unit of work.
    #[default]
    Span,
    /// A delegated model invocation; carries the model identifier.
    Generation,
}

impl ObservationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Span => "span",
            Self::Generation => "generation",
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A span record (NDJSON line schema v1).
///
/// Records handed to an exporter always have `end_unix_nanos` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub schema_version: u32,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub kind: ObservationKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Payload>,
    #[serde(default)]
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub start_unix_nanos: u64,
    pub end_unix_nanos: Option<u64>,
}

impl SpanRecord {
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn is_ended(&self) -> bool {
        self.end_unix_nanos.is_some()
    }

    /// Wall time between start and end, if the span has ended.
    pub fn duration_nanos(&self) -> Option<u64> {
        self.end_unix_nanos
            .map(|end| end.saturating_sub(self.start_unix_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lower_pads_each_byte() {
        assert_eq!(hex_lower(&[0x00, 0xab, 0x0f]), "00ab0f");
        assert_eq!(hex_lower(&[]), "");
    }

    #[test]
    fn trace_id_hex_roundtrip() {
        let id = TraceId::from_bytes([0x11u8; 16]);
        let parsed = TraceId::parse_hex(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn span_id_parses_uppercase_hex() {
        let id: SpanId = "00000000000000AB".parse().unwrap();
        assert_eq!(id.as_bytes()[7], 0xab);
        assert_eq!(id.to_string(), "00000000000000ab");
    }

    #[test]
    fn all_zero_invalid() {
        assert_eq!(
            TraceId::parse_hex("00000000000000000000000000000000").unwrap_err(),
            ParseIdError::AllZeroInvalid
        );
        assert_eq!(
            SpanId::parse_hex("0000000000000000").unwrap_err(),
            ParseIdError::AllZeroInvalid
        );
    }

    #[test]
    fn invalid_length_and_hex_rejected() {
        assert_eq!(
            TraceId::parse_hex("abcd").unwrap_err(),
            ParseIdError::InvalidLength
        );
        assert_eq!(
            SpanId::parse_hex("zz00000000000000").unwrap_err(),
            ParseIdError::InvalidHex
        );
    }

    #[test]
    fn ids_serialize_as_hex_strings() {
        let id = SpanId::from_bytes([0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 1]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"deadbeef00000001\"");
        let back: SpanId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SpanId>("\"0000000000000000\"").is_err());
    }

    #[test]
    fn seeded_generator_is_reproducible_and_unique() {
        let a = IdGenerator::seeded(7);
        let b = IdGenerator::seeded(7);
        let first: Vec<SpanId> = (0..32).map(|_| a.span_id()).collect();
        let second: Vec<SpanId> = (0..32).map(|_| b.span_id()).collect();
        assert_eq!(first, second);

        let mut unique = first.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), first.len());
    }

    #[test]
    fn level_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Level::Error).unwrap(), "\"ERROR\"");
        assert_eq!(Level::default(), Level::Default);
        assert_eq!(
            serde_json::to_string(&ObservationKind::Generation).unwrap(),
            "\"generation\""
        );
    }

    #[test]
    fn duration_is_saturating() {
        let record = SpanRecord {
            schema_version: SCHEMA_VERSION_V1,
            trace_id: TraceId::from_bytes([1u8; 16]),
            span_id: SpanId::from_bytes([2u8; 8]),
            parent_span_id: None,
            kind: ObservationKind::Span,
            name: "root".to_string(),
            model: None,
            input: None,
            output: None,
            level: Level::Default,
            status_message: None,
            metadata: Metadata::new(),
            start_unix_nanos: 10,
            end_unix_nanos: Some(25),
        };
        assert!(record.is_root());
        assert_eq!(record.duration_nanos(), Some(15));
    }
}
