use std::collections::HashMap;

use parking_lot::Mutex;

/// A source chat the wizard has already resolved and validated.
#[derive(Debug, Clone)]
pub struct PendingSource {
    pub chat_id: i64,
    pub title: String,
}

#[derive(Debug, Clone)]
pub enum WizardStep {
    AwaitingSource,
    AwaitingDestination(PendingSource),
}

/// Per-user two-step conversation for creating a forwarding rule. State
/// is in memory only; a restart simply drops half-finished wizards.
#[derive(Default)]
pub struct RuleWizard {
    sessions: Mutex<HashMap<i64, WizardStep>>,
}

impl RuleWizard {
    pub fn begin(&self, user_id: i64) {
        self.sessions
            .lock()
            .insert(user_id, WizardStep::AwaitingSource);
    }

    pub fn step(&self, user_id: i64) -> Option<WizardStep> {
        self.sessions.lock().get(&user_id).cloned()
    }

    pub fn await_destination(&self, user_id: i64, source: PendingSource) {
        self.sessions
            .lock()
            .insert(user_id, WizardStep::AwaitingDestination(source));
    }

    pub fn finish(&self, user_id: i64) {
        self.sessions.lock().remove(&user_id);
    }

    /// Returns whether there was a wizard to abort.
    pub fn cancel(&self, user_id: i64) -> bool {
        self.sessions.lock().remove(&user_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingSource, RuleWizard, WizardStep};

    #[test]
    fn cancel_reports_whether_a_wizard_was_active() {
        let wizard = RuleWizard::default();
        assert!(!wizard.cancel(1));

        wizard.begin(1);
        assert!(matches!(wizard.step(1), Some(WizardStep::AwaitingSource)));
        assert!(wizard.cancel(1));
        assert!(wizard.step(1).is_none());
    }

    #[test]
    fn sessions_are_per_user() {
        let wizard = RuleWizard::default();
        wizard.begin(1);
        wizard.await_destination(
            1,
            PendingSource {
                chat_id: -100,
                title: "News".to_string(),
            },
        );
        assert!(wizard.step(2).is_none());
        match wizard.step(1) {
            Some(WizardStep::AwaitingDestination(source)) => {
                assert_eq!(source.chat_id, -100);
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }
}
