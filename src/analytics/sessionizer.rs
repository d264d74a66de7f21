//! Gap-based session decisions
//!
//! A session is a run of page views from one (visitor, user agent) pair where
//! consecutive views are at most [`SESSION_GAP_SECONDS`] apart. This module
//! holds the per-event decision and the per-batch state cache; the SQL that
//! applies a decision lives in `storage::session`.

use std::collections::HashMap;

/// Inactivity gap after which the next page view opens a new session
pub const SESSION_GAP_SECONDS: i64 = 1800;

/// (visitor key, user-agent key)
pub type SessionKey = (i64, i64);

/// The open session of a pair and the last page view accepted into it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: i64,
    pub last_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// Page view predates the open session's last view; state is left alone
    Ignore,
    /// Start a new session at this page view
    Open,
    /// Append this page view to the open session
    Extend { session_id: i64 },
}

/// Decide what a page view at `timestamp` does to a pair's session state
pub fn next_step(state: Option<SessionState>, timestamp: i64) -> SessionStep {
    match state {
        None => SessionStep::Open,
        Some(open) if timestamp < open.last_ts => SessionStep::Ignore,
        Some(open) if timestamp.saturating_sub(open.last_ts) > SESSION_GAP_SECONDS => {
            SessionStep::Open
        }
        Some(open) => SessionStep::Extend {
            session_id: open.session_id,
        },
    }
}

/// Session states seen during one transaction
///
/// `None` entries remember that the store had no state for the pair, so the
/// lookup is not repeated for every page view of a new visitor.
#[derive(Debug, Default)]
pub struct SessionCache {
    states: HashMap<SessionKey, Option<SessionState>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the pair has not been loaded in this transaction yet
    pub fn get(&self, key: SessionKey) -> Option<Option<SessionState>> {
        self.states.get(&key).copied()
    }

    pub fn insert(&mut self, key: SessionKey, state: Option<SessionState>) {
        self.states.insert(key, state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(last_ts: i64) -> Option<SessionState> {
        Some(SessionState {
            session_id: 42,
            last_ts,
        })
    }

    #[test]
    fn test_first_view_opens() {
        assert_eq!(next_step(None, 100), SessionStep::Open);
    }

    #[test]
    fn test_gap_boundary() {
        assert_eq!(
            next_step(open(0), 1800),
            SessionStep::Extend { session_id: 42 }
        );
        assert_eq!(next_step(open(0), 1801), SessionStep::Open);
    }

    #[test]
    fn test_same_second_extends() {
        assert_eq!(
            next_step(open(500), 500),
            SessionStep::Extend { session_id: 42 }
        );
    }

    #[test]
    fn test_late_view_is_ignored() {
        assert_eq!(next_step(open(5000), 4999), SessionStep::Ignore);
        // Even when the late view is far in the past
        assert_eq!(next_step(open(5000), 0), SessionStep::Ignore);
    }

    #[test]
    fn test_extreme_gaps_do_not_overflow() {
        assert_eq!(next_step(open(i64::MIN + 1), i64::MAX), SessionStep::Open);
        assert_eq!(
            next_step(open(i64::MAX), i64::MAX),
            SessionStep::Extend { session_id: 42 }
        );
    }

    #[test]
    fn test_sequence_matches_gap_rule() {
        let views = [0_i64, 1000, 3000, 3100, 4900, 6701, 6701];
        let mut state = None;
        let mut next_id = 0;
        let mut starts = Vec::new();

        for ts in views {
            match next_step(state, ts) {
                SessionStep::Open => {
                    next_id += 1;
                    starts.push(ts);
                    state = Some(SessionState {
                        session_id: next_id,
                        last_ts: ts,
                    });
                }
                SessionStep::Extend { session_id } => {
                    state = Some(SessionState {
                        session_id,
                        last_ts: ts,
                    });
                }
                SessionStep::Ignore => {}
            }
        }

        // A new session begins wherever the previous view is more than the gap away
        let expected: Vec<i64> = views
            .iter()
            .enumerate()
            .filter(|(i, ts)| *i == 0 || **ts - views[i - 1] > SESSION_GAP_SECONDS)
            .map(|(_, ts)| *ts)
            .collect();
        assert_eq!(starts, expected);
        assert_eq!(starts, vec![0, 3000, 6701]);
    }

    #[test]
    fn test_cache_remembers_absent_state() {
        let mut cache = SessionCache::new();
        assert_eq!(cache.get((1, 2)), None);
        cache.insert((1, 2), None);
        assert_eq!(cache.get((1, 2)), Some(None));
        assert_eq!(cache.len(), 1);
    }
}
