//! The escalation policy: deterministic, evaluated in rule order.

use convoy_config::EscalationConfig;
use convoy_resolver::Answer;

/// Why (and whether) a session escalates to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Keep the AI on it.
    Stay,
    /// Escalate with the transfer reason to record.
    Escalate(&'static str),
}

/// Evaluates the four escalation rules in order.
pub struct EscalationPolicy {
    config: EscalationConfig,
    confidence_threshold: f64,
}

impl EscalationPolicy {
    /// Build a policy.
    #[must_use]
    pub fn new(config: EscalationConfig, confidence_threshold: f64) -> Self {
        Self {
            config,
            confidence_threshold,
        }
    }

    /// How many recent messages the AI history window wants.
    #[must_use]
    pub fn history_window(&self) -> usize {
        self.config.history_window
    }

    /// How many recent customer messages the phrase rule inspects.
    #[must_use]
    pub fn phrase_window(&self) -> usize {
        self.config.phrase_window
    }

    /// Evaluate the rules, in order:
    ///
    /// 1. answer confidence below the threshold;
    /// 2. an escalation phrase in the recent customer messages;
    /// 3. the channel adapter demanded escalation;
    /// 4. too many AI answers without resolution, and the latest
    ///    message is not a terminator.
    #[must_use]
    pub fn decide(
        &self,
        answer: &Answer,
        recent_customer_messages: &[String],
        adapter_force: bool,
        ai_answers: u32,
    ) -> EscalationDecision {
        if answer.confidence < self.confidence_threshold {
            return EscalationDecision::Escalate("low-confidence");
        }

        let window = recent_customer_messages
            .iter()
            .rev()
            .take(self.config.phrase_window);
        for message in window {
            let lowered = message.to_lowercase();
            if self
                .config
                .phrases
                .iter()
                .any(|phrase| lowered.contains(&phrase.to_lowercase()))
            {
                return EscalationDecision::Escalate("policy");
            }
        }

        if adapter_force {
            return EscalationDecision::Escalate("policy");
        }

        if ai_answers > self.config.max_ai_answers {
            let latest_is_terminator = recent_customer_messages.last().is_some_and(|latest| {
                let lowered = latest.to_lowercase();
                self.config
                    .terminators
                    .iter()
                    .any(|t| lowered.contains(&t.to_lowercase()))
            });
            if !latest_is_terminator {
                return EscalationDecision::Escalate("policy");
            }
        }

        EscalationDecision::Stay
    }
}
