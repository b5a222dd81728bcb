use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::config::LimitsConfig;

use super::ledger::{is_active_premium, SubscriptionLedger};

/// Outcome of a quota or rate-limit check. `DeniedNotify` is returned for
/// the first denial in a window so the caller can tell the user exactly
/// once instead of on every subsequent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Allowed,
    DeniedNotify,
    Denied,
}

impl GateOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateOutcome::Allowed)
    }
}

// Per-user state that is deliberately not persisted: a 60s command window
// and a once-per-window notice marker survive being lost on restart.
#[derive(Debug, Clone, Copy)]
struct EphemeralState {
    command_count: u32,
    command_window_start: DateTime<Utc>,
    notified_quota_window: Option<DateTime<Utc>>,
    notified_command_window: Option<DateTime<Utc>>,
}

impl EphemeralState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            command_count: 0,
            command_window_start: now,
            notified_quota_window: None,
            notified_command_window: None,
        }
    }
}

/// Meters message forwarding against the free-plan daily allowance and
/// commands against a short rolling window. Message counters live on the
/// user row (shared critical section with the subscription ledger, so
/// check-then-increment is atomic per user).
pub struct QuotaTracker {
    ledger: Arc<SubscriptionLedger>,
    limits: LimitsConfig,
    ephemeral: Mutex<HashMap<i64, EphemeralState>>,
}

impl QuotaTracker {
    pub fn new(ledger: Arc<SubscriptionLedger>, limits: LimitsConfig) -> Self {
        Self {
            ledger,
            limits,
            ephemeral: Mutex::new(HashMap::new()),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.limits.free_daily_messages
    }

    /// One forwarding attempt for the owning user. Premium users pass
    /// without touching the counter; free users consume exactly one slot
    /// per allowed call. Unknown users are denied (fail closed).
    pub fn try_consume_message_quota(&self, user_id: i64, now: DateTime<Utc>) -> GateOutcome {
        let limit = self.limits.free_daily_messages as i32;

        let decision = self.ledger.with_user_mut(user_id, |user| {
            let mut changed = false;
            if now - user.last_reset >= Duration::hours(24) {
                user.daily_messages = 0;
                user.last_reset = now;
                changed = true;
            }

            if is_active_premium(user, now) {
                return ((true, user.last_reset), changed);
            }

            if user.daily_messages >= limit {
                ((false, user.last_reset), changed)
            } else {
                user.daily_messages += 1;
                ((true, user.last_reset), true)
            }
        });

        match decision {
            None => GateOutcome::Denied,
            Some((true, _)) => GateOutcome::Allowed,
            Some((false, window_start)) => {
                let mut ephemeral = self.ephemeral.lock();
                let state = ephemeral
                    .entry(user_id)
                    .or_insert_with(|| EphemeralState::new(now));
                if state.notified_quota_window == Some(window_start) {
                    GateOutcome::Denied
                } else {
                    state.notified_quota_window = Some(window_start);
                    GateOutcome::DeniedNotify
                }
            }
        }
    }

    /// One command attempt: at most `command_limit` per rolling window.
    /// A rejected command does not execute and has no other side effect.
    pub fn check_command_rate(&self, user_id: i64, now: DateTime<Utc>) -> GateOutcome {
        let window = Duration::seconds(self.limits.command_window_secs as i64);
        let mut ephemeral = self.ephemeral.lock();
        let state = ephemeral
            .entry(user_id)
            .or_insert_with(|| EphemeralState::new(now));

        if now - state.command_window_start < window {
            state.command_count += 1;
        } else {
            state.command_window_start = now;
            state.command_count = 1;
        }

        if state.command_count <= self.limits.command_limit {
            GateOutcome::Allowed
        } else if state.notified_command_window == Some(state.command_window_start) {
            GateOutcome::Denied
        } else {
            state.notified_command_window = Some(state.command_window_start);
            GateOutcome::DeniedNotify
        }
    }
}
