//! Capability tokens and engine identities
//!
//! A [`Token`] is the only proof of identity in the sequencer. There is no
//! registry of issued tokens: whoever holds a token holds the capability.
//! The same type is used in three roles:
//!
//! - **owner**: identifies who registered a section and its sequences
//! - **security**: authorizes starting one specific sequence; only the
//!   owner can read or regenerate it
//! - **runner**: identifies who started an execution, used to cancel
//!   "my runs of sequence X"
//!
//! Tokens deliberately do not implement `Serialize`, and their `Debug` and
//! `Display` output only shows a short fingerprint.

use uuid::Uuid;

// ── Token ────────────────────────────────────────────────────────────

/// Opaque, unforgeable capability handle backed by 128 random bits
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(Uuid);

impl Token {
    /// Generate a fresh token
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Compare two tokens without an early exit on the first differing byte.
    ///
    /// Use this wherever a presented token is checked against a stored one.
    pub fn matches(&self, other: &Token) -> bool {
        let diff = self
            .0
            .as_bytes()
            .iter()
            .zip(other.0.as_bytes().iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }

    /// Short prefix for log correlation
    pub fn fingerprint(&self) -> String {
        let bytes = self.0.as_bytes();
        format!("{:02x}{:02x}", bytes[0], bytes[1])
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({}…)", self.fingerprint())
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}…", self.fingerprint())
    }
}

// ── Instance Identifier ──────────────────────────────────────────────

/// Identity of one engine instance
///
/// Several engines may live in one process. Every validated sequence
/// remembers which instance validated it so that it cannot be started by
/// another one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
