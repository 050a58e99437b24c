//! Promise lifecycle states and terminal outcomes.

use serde::{Deserialize, Serialize};

use crate::error::Rejection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
    Canceled,
}

impl PromiseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for PromiseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a promise: a value, an error, or cancellation.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Resolved(T),
    Rejected(Rejection),
    Canceled,
}

impl<T> Outcome<T> {
    pub fn state(&self) -> PromiseState {
        match self {
            Self::Resolved(_) => PromiseState::Resolved,
            Self::Rejected(_) => PromiseState::Rejected,
            Self::Canceled => PromiseState::Canceled,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Resolved(v) => Outcome::Resolved(f(v)),
            Self::Rejected(e) => Outcome::Rejected(e),
            Self::Canceled => Outcome::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_not_terminal() {
        assert!(!PromiseState::Pending.is_terminal());
        assert!(PromiseState::Resolved.is_terminal());
        assert!(PromiseState::Rejected.is_terminal());
        assert!(PromiseState::Canceled.is_terminal());
    }

    #[test]
    fn outcome_reports_state() {
        assert_eq!(Outcome::Resolved(1).state(), PromiseState::Resolved);
        assert_eq!(
            Outcome::<u8>::Rejected(Rejection::msg("nope")).state(),
            PromiseState::Rejected
        );
        assert_eq!(Outcome::<u8>::Canceled.state(), PromiseState::Canceled);
    }

    #[test]
    fn outcome_accessors() {
        let ok = Outcome::Resolved("asset");
        assert_eq!(ok.value(), Some(&"asset"));
        assert!(ok.rejection().is_none());
        assert_eq!(ok.map(str::len).into_value(), Some(5));

        let failed: Outcome<u8> = Outcome::Rejected(Rejection::msg("missing bundle"));
        assert_eq!(failed.rejection().map(ToString::to_string).as_deref(), Some("missing bundle"));
        assert!(failed.map(|v| v + 1).into_value().is_none());
    }

    #[test]
    fn state_serializes_lowercase() {
        insta::assert_json_snapshot!(
            [
                PromiseState::Pending,
                PromiseState::Resolved,
                PromiseState::Rejected,
                PromiseState::Canceled,
            ],
            @r#"
        [
          "pending",
          "resolved",
          "rejected",
          "canceled"
        ]
        "#
        );
    }

    #[test]
    fn state_deserializes_lowercase() {
        assert_eq!(
            serde_json::from_str::<PromiseState>("\"canceled\"").unwrap(),
            PromiseState::Canceled
        );
    }
}
