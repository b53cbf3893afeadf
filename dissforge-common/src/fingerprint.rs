//! Content fingerprints
//!
//! A [`Fingerprint`] is a SHA-256 digest over a sequence of length-prefixed
//! fields. Length prefixes keep `("ab", "c")` and `("a", "bc")` distinct.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// SHA-256 content fingerprint used as a cache and memoization key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder::default()
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form (64 chars)
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Error parsing a hex fingerprint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint: {0}")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ParseFingerprintError(format!("expected 64 hex chars, got {}", s.len())));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| ParseFingerprintError(e.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental fingerprint construction
#[derive(Default, Clone)]
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    /// Append a string field
    pub fn field(mut self, value: &str) -> Self {
        self.push(value.as_bytes());
        self
    }

    /// Append raw bytes as one field
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.push(value);
        self
    }

    /// Append another fingerprint
    pub fn fingerprint(mut self, value: &Fingerprint) -> Self {
        self.push(value.as_bytes());
        self
    }

    /// Append a JSON value in its compact serialized form
    ///
    /// serde_json keeps struct field order, so identical configs hash identically.
    pub fn json(self, value: &serde_json::Value) -> Self {
        let text = value.to_string();
        self.field(&text)
    }

    pub fn finish(self) -> Fingerprint {
        let digest = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }

    fn push(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_boundaries_are_significant() {
        let a = Fingerprint::builder().field("ab").field("c").finish();
        let b = Fingerprint::builder().field("a").field("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic() {
        let a = Fingerprint::builder().field("scrape").field("https://reddit.com/r/x").finish();
        let b = Fingerprint::builder().field("scrape").field("https://reddit.com/r/x").finish();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_hex_round_trip_and_serde() {
        let fp = Fingerprint::builder().field("x").finish();
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);

        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        assert!("zz".parse::<Fingerprint>().is_err());
    }
}
