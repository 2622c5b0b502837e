//! Optimistic local intent for start/stop.
//!
//! A start or stop click flips the panel immediately, then waits for the
//! server's snapshots to agree.  The server always has the last word: once
//! the request has answered, the next snapshot settles the intent, and an
//! intent nobody confirms expires.
//!
//! ```text
//!  Confirmed(v)        server agrees with what the panel shows
//!  Pending { .. }      request sent, server has not caught up yet
//!  TimedOut { .. }     no agreement within INTENT_TIMEOUT; server value shown
//! ```

use std::time::{Duration, Instant};

/// How long an unconfirmed start/stop keeps overriding the server phase.
/// Provider starts walk through several statuses, so this is generous.
pub const INTENT_TIMEOUT: Duration = Duration::from_secs(10);

/// What the user last asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIntent {
    Idle,
    Streaming,
}

impl StreamIntent {
    pub fn from_live(live_like: bool) -> Self {
        if live_like {
            StreamIntent::Streaming
        } else {
            StreamIntent::Idle
        }
    }
}

#[derive(Debug, Clone)]
pub enum IntentState<T: Clone + PartialEq> {
    Confirmed(T),
    Pending {
        intended: T,
        confirmed: T,
        since: Instant,
    },
    TimedOut {
        intended: T,
        confirmed: T,
    },
}

impl<T: Clone + PartialEq> IntentState<T> {
    pub fn new(value: T) -> Self {
        Self::Confirmed(value)
    }

    /// Value the user asked for.
    pub fn intended(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { intended, .. } | Self::TimedOut { intended, .. } => intended,
        }
    }

    /// Last value the server reported.
    pub fn confirmed(&self) -> &T {
        match self {
            Self::Confirmed(v) => v,
            Self::Pending { confirmed, .. } | Self::TimedOut { confirmed, .. } => confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Record a request.  No-op when the server already agrees.
    pub fn set_intent(&mut self, intended: T) {
        let confirmed = self.confirmed().clone();
        if intended == confirmed {
            *self = Self::Confirmed(intended);
        } else {
            *self = Self::Pending {
                intended,
                confirmed,
                since: Instant::now(),
            };
        }
    }

    /// Drop the intent and fall back to the server's value (request failed).
    pub fn revert(&mut self) {
        *self = Self::Confirmed(self.confirmed().clone());
    }

    /// Expire a stale intent.  Returns `true` if it just timed out.
    pub fn tick(&mut self) -> bool {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> bool {
        if let Self::Pending {
            intended,
            confirmed,
            since,
        } = self
        {
            if now.saturating_duration_since(*since) >= INTENT_TIMEOUT {
                *self = Self::TimedOut {
                    intended: intended.clone(),
                    confirmed: confirmed.clone(),
                };
                return true;
            }
        }
        false
    }

    /// Server reported `value`.  A pending intent survives disagreeing
    /// values; everything else takes the server's word.  Returns `true` if
    /// the state changed.
    pub fn on_confirmed(&mut self, value: T) -> bool {
        match self {
            Self::Pending {
                intended,
                confirmed,
                ..
            } => {
                if value == *intended {
                    *self = Self::Confirmed(value);
                    return true;
                }
                let changed = *confirmed != value;
                *confirmed = value;
                changed
            }
            Self::TimedOut { .. } => {
                *self = Self::Confirmed(value);
                true
            }
            Self::Confirmed(v) => {
                if *v != value {
                    *v = value;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Server reported `value` and nothing is left to wait for: adopt it
    /// whatever the intent was.  Returns `true` if the state changed.
    pub fn settle(&mut self, value: T) -> bool {
        let changed = !matches!(self, Self::Confirmed(v) if *v == value);
        *self = Self::Confirmed(value);
        changed
    }

    pub fn render_hint(&self) -> RenderHint {
        self.render_hint_at(Instant::now())
    }

    pub fn render_hint_at(&self, now: Instant) -> RenderHint {
        match self {
            Self::Confirmed(_) => RenderHint::Normal,
            Self::Pending { since, .. } => {
                // 400ms pulse
                if (now.saturating_duration_since(*since).as_millis() / 400) % 2 == 0 {
                    RenderHint::PendingVisible
                } else {
                    RenderHint::PendingHidden
                }
            }
            Self::TimedOut { .. } => RenderHint::TimedOut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderHint {
    Normal,
    PendingVisible,
    PendingHidden,
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_start_survives_idle_snapshots() {
        let mut intent = IntentState::new(StreamIntent::Idle);
        intent.set_intent(StreamIntent::Streaming);
        assert!(intent.is_pending());

        assert!(!intent.on_confirmed(StreamIntent::Idle));
        assert!(intent.is_pending());
        assert_eq!(*intent.intended(), StreamIntent::Streaming);

        assert!(intent.on_confirmed(StreamIntent::Streaming));
        assert!(matches!(intent, IntentState::Confirmed(StreamIntent::Streaming)));
    }

    #[test]
    fn revert_restores_server_value() {
        let mut intent = IntentState::new(StreamIntent::Idle);
        intent.set_intent(StreamIntent::Streaming);
        intent.revert();
        assert!(matches!(intent, IntentState::Confirmed(StreamIntent::Idle)));
    }

    #[test]
    fn unconfirmed_intent_times_out() {
        let mut intent = IntentState::new(StreamIntent::Idle);
        intent.set_intent(StreamIntent::Streaming);
        let start = Instant::now();
        assert!(!intent.tick_at(start));
        assert!(intent.tick_at(start + INTENT_TIMEOUT + Duration::from_millis(1)));
        assert!(intent.is_timed_out());
        assert_eq!(intent.render_hint(), RenderHint::TimedOut);

        intent.on_confirmed(StreamIntent::Idle);
        assert!(matches!(intent, IntentState::Confirmed(StreamIntent::Idle)));
    }

    #[test]
    fn settle_overrides_pending_intent() {
        let mut intent = IntentState::new(StreamIntent::Idle);
        intent.set_intent(StreamIntent::Streaming);
        assert!(intent.settle(StreamIntent::Idle));
        assert!(matches!(intent, IntentState::Confirmed(StreamIntent::Idle)));
        assert!(!intent.settle(StreamIntent::Idle));
    }

    #[test]
    fn matching_intent_is_confirmed_at_once() {
        let mut intent = IntentState::new(StreamIntent::Streaming);
        intent.set_intent(StreamIntent::Streaming);
        assert_eq!(intent.render_hint(), RenderHint::Normal);
    }
}
