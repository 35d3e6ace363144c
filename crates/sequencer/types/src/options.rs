//! Run options and principals
//!
//! [`RunOptions`] is the per-invocation value bag handed to
//! `RunManager::execute`. The initiator is a [`Principal`] supplied by the
//! host environment.

use std::collections::HashMap;
use std::sync::Arc;

// ── Principal ────────────────────────────────────────────────────────

/// What kind of entity a principal is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PrincipalKind {
    /// Interactive entity (a connected player or user)
    Player,
    /// Non-interactive console
    Console,
    Other,
}

/// Who is running a sequence, as seen by the host environment
pub trait Principal: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn has_permission(&self, permission: &str) -> bool;

    fn kind(&self) -> PrincipalKind;

    fn is_player(&self) -> bool {
        self.kind() == PrincipalKind::Player
    }
}

/// Shared handle to a principal
pub type PrincipalRef = Arc<dyn Principal>;

/// The host console: non-interactive and allowed everything
#[derive(Clone, Debug)]
pub struct ConsolePrincipal {
    name: String,
}

impl ConsolePrincipal {
    pub fn new() -> Self {
        Self {
            name: "console".to_string(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ConsolePrincipal {
    fn default() -> Self {
        Self::new()
    }
}

impl Principal for ConsolePrincipal {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }

    fn kind(&self) -> PrincipalKind {
        PrincipalKind::Console
    }
}

// ── Run Options ──────────────────────────────────────────────────────

/// Per-invocation parameters of a sequence run
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Who started the run, if anyone in particular
    pub initiator: Option<PrincipalRef>,
    /// Ad-hoc placeholder values, consulted before registered placeholders
    pub placeholders: HashMap<String, String>,
    /// Keys presented to actions that require explicit authorization
    pub authorization_keys: Vec<String>,
    /// At most one live run of the sequence when set
    pub singleton: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initiator(mut self, initiator: PrincipalRef) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(key.into(), value.into());
        self
    }

    pub fn with_authorization_key(mut self, key: impl Into<String>) -> Self {
        self.authorization_keys.push(key.into());
        self
    }

    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    /// Copy of these options with another initiator, for per-principal
    /// evaluation that must not touch the original
    pub fn for_principal(&self, principal: PrincipalRef) -> Self {
        let mut copy = self.clone();
        copy.initiator = Some(principal);
        copy
    }

    pub fn has_authorization_key(&self, key: &str) -> bool {
        self.authorization_keys.iter().any(|k| k == key)
    }

    pub fn initiator_name(&self) -> Option<&str> {
        self.initiator.as_deref().map(|p| p.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Player(&'static str);

    impl Principal for Player {
        fn name(&self) -> &str {
            self.0
        }
        fn has_permission(&self, permission: &str) -> bool {
            permission == "sequences.run"
        }
        fn kind(&self) -> PrincipalKind {
            PrincipalKind::Player
        }
    }

    #[test]
    fn test_builder() {
        let options = RunOptions::new()
            .with_placeholder("target", "spawn")
            .with_authorization_key("k1")
            .singleton(true);

        assert_eq!(options.placeholders.get("target").unwrap(), "spawn");
        assert!(options.has_authorization_key("k1"));
        assert!(!options.has_authorization_key("k2"));
        assert!(options.singleton);
        assert!(options.initiator.is_none());
    }

    #[test]
    fn test_for_principal_leaves_original_untouched() {
        let original = RunOptions::new().with_initiator(Arc::new(ConsolePrincipal::new()));
        let copy = original.for_principal(Arc::new(Player("alice")));

        assert_eq!(original.initiator_name(), Some("console"));
        assert_eq!(copy.initiator_name(), Some("alice"));
        assert!(copy.initiator.as_ref().unwrap().is_player());
    }

    #[test]
    fn test_console_principal() {
        let console = ConsolePrincipal::new();
        assert!(console.has_permission("anything"));
        assert!(!console.is_player());
        assert_eq!(ConsolePrincipal::named("rcon").name(), "rcon");
    }
}
