//! Rule model and the ordered rule registry
//!
//! A rule is a named check over a completed request/response pair, with an
//! optional augmentation that derives an extra case from a successful one.
//! The registry is built once at startup and is read-only afterwards.

use std::collections::HashSet;
use std::sync::Arc;

use crate::http::{Case, Response};

/// Configuration section a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// API handbook conventions
    Handbook,
    /// Contract checks against the API document
    Native,
}

impl RuleKind {
    /// Section name in the configuration file
    #[must_use]
    pub const fn section(self) -> &'static str {
        match self {
            Self::Handbook => "handbook_rules",
            Self::Native => "native_checks",
        }
    }
}

/// Enablement a rule has when configuration does not mention it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultState {
    #[default]
    On,
    Off,
}

impl DefaultState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Result of evaluating a rule against one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Passed,
    /// The rule's precondition was not met; no outcome is recorded
    NotApplicable,
    /// Contract violation with a human-readable message
    Violated(String),
}

impl Evaluation {
    pub fn violated(message: impl Into<String>) -> Self {
        Self::Violated(message.into())
    }

    /// `Passed` if `ok`, otherwise a violation carrying `message`.
    pub fn ensure(ok: bool, message: impl Into<String>) -> Self {
        if ok { Self::Passed } else { Self::violated(message) }
    }
}

/// The rule could not be evaluated (tooling problem, not a contract violation)
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RuleError {
    pub message: String,
}

impl RuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait Rule: Send + Sync {
    /// Unique, stable name used in configuration and reports
    fn name(&self) -> &'static str;

    fn kind(&self) -> RuleKind;

    fn default_state(&self) -> DefaultState {
        DefaultState::On
    }

    /// Check a completed exchange.
    ///
    /// # Errors
    ///
    /// Returns error if the check itself cannot run (e.g. an unusable schema).
    fn evaluate(&self, response: &Response, case: &Case) -> Result<Evaluation, RuleError>;

    /// Derive an additional case from a case that received a 2xx response.
    fn augment(&self, _case: &Case, _response: &Response) -> Option<Case> {
        None
    }

    fn has_augmentation(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Ordered catalog of rules, unique by name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    rules: Vec<Arc<dyn Rule>>,
    names: HashSet<&'static str>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule.
    ///
    /// # Errors
    ///
    /// Returns error if a rule with the same name is already registered.
    pub fn register(&mut self, rule: impl Rule + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(rule))
    }

    /// Register a shared rule.
    ///
    /// # Errors
    ///
    /// Returns error if a rule with the same name is already registered.
    pub fn register_arc(&mut self, rule: Arc<dyn Rule>) -> Result<(), RegistryError> {
        let name = rule.name();
        if !self.names.insert(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        tracing::trace!(rule = name, kind = ?rule.kind(), "registered rule");
        self.rules.push(rule);
        Ok(())
    }

    /// Append every rule of `other`, in order.
    ///
    /// # Errors
    ///
    /// Returns error on the first name already present.
    pub fn extend(&mut self, other: Self) -> Result<(), RegistryError> {
        for rule in other.rules {
            self.register_arc(rule)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn all_rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.iter().find(|r| r.name() == name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn of_kind(&self, kind: RuleKind) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.iter().filter(move |r| r.kind() == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("rule '{0}' is already registered")]
    Duplicate(String),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Configurable rule for tests across the crate.
    pub(crate) struct StubRule {
        pub(crate) name: &'static str,
        pub(crate) kind: RuleKind,
        pub(crate) default_state: DefaultState,
    }

    impl StubRule {
        pub(crate) const fn handbook(name: &'static str) -> Self {
            Self {
                name,
                kind: RuleKind::Handbook,
                default_state: DefaultState::On,
            }
        }

        pub(crate) const fn native(name: &'static str) -> Self {
            Self {
                name,
                kind: RuleKind::Native,
                default_state: DefaultState::On,
            }
        }

        pub(crate) const fn off_by_default(mut self) -> Self {
            self.default_state = DefaultState::Off;
            self
        }
    }

    impl Rule for StubRule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kind(&self) -> RuleKind {
            self.kind
        }

        fn default_state(&self) -> DefaultState {
            self.default_state
        }

        fn evaluate(&self, _response: &Response, _case: &Case) -> Result<Evaluation, RuleError> {
            Ok(Evaluation::Passed)
        }
    }

    #[test]
    fn register_keeps_order() {
        let mut registry = Registry::new();
        registry.register(StubRule::handbook("b")).unwrap();
        registry.register(StubRule::native("a")).unwrap();
        let names: Vec<_> = registry.all_rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn register_duplicate_is_error() {
        let mut registry = Registry::new();
        registry.register(StubRule::handbook("x")).unwrap();
        let err = registry.register(StubRule::native("x")).unwrap_err();
        assert_eq!(err.to_string(), "rule 'x' is already registered");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn extend_rejects_shadowing() {
        let mut left = Registry::new();
        left.register(StubRule::handbook("x")).unwrap();
        let mut right = Registry::new();
        right.register(StubRule::handbook("y")).unwrap();
        right.register(StubRule::handbook("x")).unwrap();
        assert!(left.extend(right).is_err());
    }

    #[test]
    fn of_kind_filters() {
        let mut registry = Registry::new();
        registry.register(StubRule::handbook("h")).unwrap();
        registry.register(StubRule::native("n")).unwrap();
        let native: Vec<_> = registry.of_kind(RuleKind::Native).map(|r| r.name()).collect();
        assert_eq!(native, vec!["n"]);
        assert!(registry.contains("h"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn evaluation_ensure() {
        assert_eq!(Evaluation::ensure(true, "nope"), Evaluation::Passed);
        assert_eq!(
            Evaluation::ensure(false, "nope"),
            Evaluation::Violated("nope".into())
        );
    }
}
