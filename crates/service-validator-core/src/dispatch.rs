//! Check dispatch: which rules run, which augmentations apply, and the
//! per-run session object that owns both.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RuleSelection;
use crate::http::{Case, Response};
use crate::registry::{Evaluation, Registry, Rule, RuleKind};
use crate::verdict::{CheckEvent, Classified, Classifier};

/// Explicit check name selecting every native check
pub const ALL_NATIVE_CHECKS: &str = "all";

/// Rules to run: the explicit list plus every active handbook rule, or the
/// whole active set when no list is given. Registry order is preserved.
///
/// # Errors
///
/// Returns error if an explicit name is not a registered rule.
pub fn select(
    registry: &Registry,
    active: &BTreeSet<String>,
    explicit: Option<&[String]>,
) -> Result<Vec<Arc<dyn Rule>>, DispatchError> {
    let Some(explicit) = explicit.filter(|names| !names.is_empty()) else {
        return Ok(registry
            .all_rules()
            .iter()
            .filter(|r| active.contains(r.name()))
            .cloned()
            .collect());
    };

    let mut requested: BTreeSet<&str> = BTreeSet::new();
    for name in explicit {
        if name == ALL_NATIVE_CHECKS {
            requested.extend(registry.of_kind(RuleKind::Native).map(|r| r.name()));
        } else if registry.contains(name) {
            requested.insert(name.as_str());
        } else {
            return Err(DispatchError::UnknownCheck(name.clone()));
        }
    }

    Ok(registry
        .all_rules()
        .iter()
        .filter(|r| {
            requested.contains(r.name())
                || (r.kind() == RuleKind::Handbook && active.contains(r.name()))
        })
        .cloned()
        .collect())
}

/// Augmenting rules among `active`, or nothing when augmentation is disabled.
#[must_use]
pub fn select_augmentations(
    registry: &Registry,
    active: &BTreeSet<String>,
    enabled: bool,
) -> Vec<Arc<dyn Rule>> {
    if !enabled {
        return Vec::new();
    }
    registry
        .all_rules()
        .iter()
        .filter(|r| r.has_augmentation() && active.contains(r.name()))
        .cloned()
        .collect()
}

/// Options that shape check selection
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Explicit check names; empty means "use the configuration"
    pub checks: Vec<String>,
    /// Disable additional cases from augmentations
    pub no_additional_cases: bool,
}

/// Everything one run needs to evaluate responses, fixed at construction.
#[derive(Debug, Clone)]
pub struct Session {
    checks: Vec<Arc<dyn Rule>>,
    augmentations: Vec<Arc<dyn Rule>>,
    warnings: BTreeSet<String>,
}

impl Session {
    /// Select checks and augmentations for this run.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit check name is unknown.
    pub fn new(
        registry: &Registry,
        selection: &RuleSelection,
        options: &DispatchOptions,
    ) -> Result<Self, DispatchError> {
        let explicit = (!options.checks.is_empty()).then_some(options.checks.as_slice());
        let checks = select(registry, &selection.active, explicit)?;
        let effective: BTreeSet<String> = checks.iter().map(|r| r.name().to_string()).collect();
        let augmentations =
            select_augmentations(registry, &effective, !options.no_additional_cases);
        let warnings = selection
            .warnings
            .iter()
            .filter(|w| effective.contains(*w))
            .cloned()
            .collect();

        tracing::debug!(
            checks = ?checks.iter().map(|r| r.name()).collect::<Vec<_>>(),
            augmentations = ?augmentations.iter().map(|r| r.name()).collect::<Vec<_>>(),
            "session prepared"
        );

        Ok(Self {
            checks,
            augmentations,
            warnings,
        })
    }

    #[must_use]
    pub fn checks(&self) -> &[Arc<dyn Rule>] {
        &self.checks
    }

    #[must_use]
    pub fn augmentations(&self) -> &[Arc<dyn Rule>] {
        &self.augmentations
    }

    #[must_use]
    pub const fn warnings(&self) -> &BTreeSet<String> {
        &self.warnings
    }

    #[must_use]
    pub fn classifier(&self) -> Classifier<'_> {
        Classifier::new(&self.warnings)
    }

    /// Run every selected check against one response.
    ///
    /// Not-applicable checks produce nothing; evaluation errors become
    /// exceptions carrying the rule name.
    #[must_use]
    pub fn run_checks(&self, response: &Response, case: &Case) -> Vec<Classified> {
        let classifier = self.classifier();
        self.checks
            .iter()
            .filter_map(|rule| {
                let event = match rule.evaluate(response, case) {
                    Ok(Evaluation::Passed) => CheckEvent::Success {
                        rule: rule.name().to_string(),
                    },
                    Ok(Evaluation::NotApplicable) => return None,
                    Ok(Evaluation::Violated(message)) => CheckEvent::Failure {
                        rule: rule.name().to_string(),
                        message,
                        case: case.clone(),
                        request: response.request.clone(),
                    },
                    Err(e) => CheckEvent::Exception {
                        context: rule.name().to_string(),
                        message: e.to_string(),
                        chain: Vec::new(),
                        case: Some(case.clone()),
                    },
                };
                Some(classifier.classify(event))
            })
            .collect()
    }

    /// Additional cases derived from a case that received a 2xx response.
    #[must_use]
    pub fn additional_cases(&self, case: &Case, response: &Response) -> Vec<(&'static str, Case)> {
        if !response.is_success() {
            return Vec::new();
        }
        self.augmentations
            .iter()
            .filter_map(|rule| rule.augment(case, response).map(|extra| (rule.name(), extra)))
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown check '{0}'")]
    UnknownCheck(String),
}
