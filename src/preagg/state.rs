//! Refresh state machine, one per pre-aggregation key.
//!
//! ```text
//!            ┌──────────────── interval elapsed ───────────────┐
//!            ▼                                                  │
//!  Stale ──▶ Refreshing ──▶ Fresh ─────────────────────────────┘
//!    ▲            │
//!    └── Failed ◀─┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    #[default]
    Stale,
    Refreshing,
    Fresh,
    Failed,
}

impl RefreshState {
    pub fn can_transition_to(self, next: RefreshState) -> bool {
        use RefreshState::*;
        matches!(
            (self, next),
            (Stale, Refreshing) | (Refreshing, Fresh) | (Refreshing, Failed) | (Failed, Stale) | (Fresh, Stale)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshState::Stale => "stale",
            RefreshState::Refreshing => "refreshing",
            RefreshState::Fresh => "fresh",
            RefreshState::Failed => "failed",
        }
    }
}

impl fmt::Display for RefreshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::RefreshState::*;
    use super::*;

    #[test]
    fn test_transitions() {
        assert_eq!(RefreshState::default(), Stale);
        let allowed = [
            (Stale, Refreshing),
            (Refreshing, Fresh),
            (Refreshing, Failed),
            (Failed, Stale),
            (Fresh, Stale),
        ];
        let all = [Stale, Refreshing, Fresh, Failed];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }
}
