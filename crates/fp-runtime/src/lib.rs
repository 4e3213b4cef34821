#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EMPTY_ENTRY_DEPRECATION: &str = "The behavior of array concatenation with empty \
entries is deprecated. In a future version, this will no longer exclude empty items when \
determining the result dtype. To retain the old behavior, exclude the empty entries before \
the concat operation.";

/// How zero-length inputs take part in result-dtype resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyEntryMode {
    /// Empty inputs are ignored when a non-empty input exists, and a
    /// deprecation warning is recorded whenever ignoring them mattered.
    #[default]
    Legacy,
    /// Legacy exclusion without the warning.
    Silent,
    /// Empty inputs unify like any other input.
    Future,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConcatPolicy {
    #[serde(default)]
    pub empty_entries: EmptyEntryMode,
}

impl ConcatPolicy {
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            empty_entries: EmptyEntryMode::Legacy,
        }
    }

    #[must_use]
    pub fn silent() -> Self {
        Self {
            empty_entries: EmptyEntryMode::Silent,
        }
    }

    #[must_use]
    pub fn future() -> Self {
        Self {
            empty_entries: EmptyEntryMode::Future,
        }
    }

    pub fn from_json_str(body: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(body)?)
    }

    #[must_use]
    pub fn excludes_empty_entries(&self) -> bool {
        matches!(
            self.empty_entries,
            EmptyEntryMode::Legacy | EmptyEntryMode::Silent
        )
    }

    #[must_use]
    pub fn warns_on_empty_entries(&self) -> bool {
        self.empty_entries == EmptyEntryMode::Legacy
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid concat policy: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DeprecatedEmptyEntryConcat,
    DeprecatedMixedCategoricalEmpty,
}

impl WarningKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeprecatedEmptyEntryConcat => "deprecated empty-entry concatenation",
            Self::DeprecatedMixedCategoricalEmpty => {
                "deprecated mixed-categorical-empty concatenation"
            }
        }
    }
}

/// Advisory signal attached to a successful concatenation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatWarning {
    pub kind: WarningKind,
    pub message: String,
    /// Input positions left out of dtype resolution.
    pub ignored_positions: Vec<usize>,
    pub resolved_dtype: String,
    /// What the result dtype becomes once empty inputs participate.
    pub future_dtype: String,
}

impl ConcatWarning {
    #[must_use]
    pub fn empty_entries(
        categorical: bool,
        ignored_positions: Vec<usize>,
        resolved_dtype: impl Into<String>,
        future_dtype: impl Into<String>,
    ) -> Self {
        let kind = if categorical {
            WarningKind::DeprecatedMixedCategoricalEmpty
        } else {
            WarningKind::DeprecatedEmptyEntryConcat
        };
        Self {
            kind,
            message: EMPTY_ENTRY_DEPRECATION.to_owned(),
            ignored_positions,
            resolved_dtype: resolved_dtype.into(),
            future_dtype: future_dtype.into(),
        }
    }
}

/// Warnings returned alongside a result instead of raised through global
/// state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLedger {
    records: Vec<ConcatWarning>,
}

impl DiagnosticLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, warning: ConcatWarning) {
        tracing::warn!(
            kind = warning.kind.as_str(),
            ignored = ?warning.ignored_positions,
            resolved = %warning.resolved_dtype,
            future = %warning.future_dtype,
            "{}",
            warning.message
        );
        self.records.push(warning);
    }

    #[must_use]
    pub fn records(&self) -> &[ConcatWarning] {
        &self.records
    }

    #[must_use]
    pub fn count(&self, kind: WarningKind) -> usize {
        self.records.iter().filter(|w| w.kind == kind).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ConcatPolicy, ConcatWarning, DiagnosticLedger, EMPTY_ENTRY_DEPRECATION, EmptyEntryMode,
        WarningKind,
    };

    #[test]
    fn default_policy_is_legacy() {
        let policy = ConcatPolicy::default();
        assert_eq!(policy, ConcatPolicy::legacy());
        assert!(policy.excludes_empty_entries());
        assert!(policy.warns_on_empty_entries());
    }

    #[test]
    fn modes_toggle_exclusion_and_warning_independently() {
        let silent = ConcatPolicy::silent();
        assert!(silent.excludes_empty_entries());
        assert!(!silent.warns_on_empty_entries());

        let future = ConcatPolicy::future();
        assert!(!future.excludes_empty_entries());
        assert!(!future.warns_on_empty_entries());
    }

    #[test]
    fn policy_loads_from_json() {
        let policy =
            ConcatPolicy::from_json_str(r#"{"empty_entries":"future"}"#).expect("valid policy");
        assert_eq!(policy.empty_entries, EmptyEntryMode::Future);

        let defaulted = ConcatPolicy::from_json_str("{}").expect("empty object");
        assert_eq!(defaulted, ConcatPolicy::legacy());

        let err = ConcatPolicy::from_json_str(r#"{"empty_entries":"sometimes"}"#)
            .expect_err("unknown mode");
        assert!(err.to_string().starts_with("invalid concat policy:"));
    }

    #[test]
    fn categorical_warnings_use_the_categorical_kind() {
        let warning = ConcatWarning::empty_entries(true, vec![1], "category[a]", "object");
        assert_eq!(warning.kind, WarningKind::DeprecatedMixedCategoricalEmpty);
        assert_eq!(
            warning.kind.as_str(),
            "deprecated mixed-categorical-empty concatenation"
        );
        assert_eq!(warning.message, EMPTY_ENTRY_DEPRECATION);

        let plain = ConcatWarning::empty_entries(false, vec![0], "int64", "float64");
        assert_eq!(plain.kind, WarningKind::DeprecatedEmptyEntryConcat);
    }

    #[test]
    fn ledger_counts_by_kind() {
        let mut ledger = DiagnosticLedger::new();
        assert!(ledger.is_empty());
        ledger.push(ConcatWarning::empty_entries(true, vec![1], "a", "b"));
        ledger.push(ConcatWarning::empty_entries(false, vec![2], "c", "d"));

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.count(WarningKind::DeprecatedMixedCategoricalEmpty), 1);
        assert_eq!(ledger.count(WarningKind::DeprecatedEmptyEntryConcat), 1);
        assert_eq!(ledger.records()[1].ignored_positions, vec![2]);
    }
}
