//! Operation filters: endpoint path, method and tag patterns

use regex::{Regex, RegexBuilder};

use crate::engine::spec::Operation;

/// Regular-expression filters over operations.
///
/// Within one kind any pattern may match; every kind that has patterns must
/// match. Patterns search anywhere in the value, methods ignore case.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    endpoints: Vec<Regex>,
    methods: Vec<Regex>,
    tags: Vec<Regex>,
}

impl OperationFilter {
    /// Compile the given patterns.
    ///
    /// # Errors
    ///
    /// Returns error naming the first pattern that is not a valid regex.
    pub fn new(
        endpoints: &[String],
        methods: &[String],
        tags: &[String],
    ) -> Result<Self, FilterError> {
        Ok(Self {
            endpoints: compile(endpoints, false)?,
            methods: compile(methods, true)?,
            tags: compile(tags, false)?,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.methods.is_empty() && self.tags.is_empty()
    }

    #[must_use]
    pub fn matches(&self, op: &Operation) -> bool {
        let any = |patterns: &[Regex], value: &str| patterns.iter().any(|p| p.is_match(value));

        (self.endpoints.is_empty() || any(&self.endpoints, &op.path))
            && (self.methods.is_empty() || any(&self.methods, &op.method))
            && (self.tags.is_empty() || op.tags.iter().any(|t| any(&self.tags, t)))
    }
}

fn compile(patterns: &[String], case_insensitive: bool) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| FilterError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
