//! Budget fitting.
//!
//! Scans an oldest → newest sequence from the newest end, accepting messages
//! while the running total stays within `max_context_tokens`. The first
//! message that would overflow ends the scan under the discard strategy.
//! Under the refine strategy it and everything older are routed to the
//! refinement set instead, together with one boundary message evicted from
//! the accepted context, so the refiner always sees a contiguous block of
//! the oldest history.

use chatweave_config::ContextStrategy;
use chatweave_core::error::ContextError;
use chatweave_core::message::PromptMessage;
use serde::Serialize;

/// Tokens reserved for the reply-start framing (`<|start|>assistant<|message|>`).
pub const PRIMING_TOKENS: usize = 3;

/// Running token total against a fixed maximum.
///
/// `used() + remaining() == max()` holds after every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetLedger {
    max: usize,
    used: usize,
}

impl BudgetLedger {
    /// A ledger already charged with [`PRIMING_TOKENS`].
    pub fn primed(max: usize) -> Result<Self, ContextError> {
        if max <= PRIMING_TOKENS {
            return Err(ContextError::ConfigurationInvalid(format!(
                "max_context_tokens ({max}) must exceed the {PRIMING_TOKENS} priming tokens"
            )));
        }
        Ok(Self {
            max,
            used: PRIMING_TOKENS,
        })
    }

    /// Charge `tokens` if they fit. Returns whether they were charged.
    pub fn try_charge(&mut self, tokens: usize) -> bool {
        match self.used.checked_add(tokens) {
            Some(total) if total <= self.max => {
                self.used = total;
                true
            }
            _ => false,
        }
    }

    /// Return previously charged tokens to the budget.
    pub fn refund(&mut self, tokens: usize) {
        self.used = self.used.saturating_sub(tokens).max(PRIMING_TOKENS);
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.max - self.used
    }
}

/// Outcome of [`fit`].
#[derive(Debug, Clone, Default)]
pub struct FitResult {
    /// Accepted messages, oldest first.
    pub context: Vec<PromptMessage>,
    pub remaining_context_tokens: usize,
    /// Overflow routed to refinement, oldest first. Empty under discard.
    pub messages_to_refine: Vec<PromptMessage>,
    /// Input position of the newest message in `messages_to_refine`: where a
    /// refined summary stands in for the original history.
    pub refine_index: Option<usize>,
}

/// Fit `messages` (oldest → newest, token counts attached) into
/// `max_context_tokens`.
///
/// Fails with [`ContextError::BudgetExceededBySingleMessage`] when the newest
/// message alone cannot be served, or when boundary eviction would have to
/// move it out of an otherwise empty context.
pub fn fit(
    messages: &[PromptMessage],
    max_context_tokens: usize,
    strategy: ContextStrategy,
) -> Result<FitResult, ContextError> {
    let mut ledger = BudgetLedger::primed(max_context_tokens)?;
    let mut context: Vec<PromptMessage> = Vec::new();
    let mut to_refine: Vec<PromptMessage> = Vec::new();
    let mut refine_index = None;
    let newest = messages.len().checked_sub(1);

    for (i, message) in messages.iter().enumerate().rev() {
        let tokens = message.tokens();

        if to_refine.is_empty() && ledger.try_charge(tokens) {
            context.push(message.clone());
            continue;
        }

        if Some(i) == newest {
            return Err(unservable(message, tokens, max_context_tokens));
        }

        match strategy {
            ContextStrategy::Discard => break,
            ContextStrategy::Refine => {
                if to_refine.is_empty() {
                    refine_index = Some(i);
                    // The two oldest positions never trigger eviction.
                    if i != 0 && i != 1 {
                        if let Some(boundary) = context.pop() {
                            // Only the newest message was accepted; evicting
                            // it would leave nothing to answer.
                            if context.is_empty() {
                                let required = boundary.tokens().saturating_add(tokens);
                                return Err(unservable(&boundary, required, max_context_tokens));
                            }
                            ledger.refund(boundary.tokens());
                            to_refine.push(boundary);
                            refine_index = Some(i + 1);
                        }
                    }
                }
                to_refine.push(message.clone());
            }
        }
    }

    context.reverse();
    to_refine.reverse();

    Ok(FitResult {
        context,
        remaining_context_tokens: ledger.remaining(),
        messages_to_refine: to_refine,
        refine_index,
    })
}

fn unservable(message: &PromptMessage, token_count: usize, max_context_tokens: usize) -> ContextError {
    ContextError::BudgetExceededBySingleMessage {
        message_id: message
            .source_id
            .clone()
            .or_else(|| message.name.clone())
            .unwrap_or_else(|| message.role.to_string()),
        token_count,
        max_context_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::sized;
    use chatweave_core::message::Role;

    fn uniform(count: usize, tokens: usize) -> Vec<PromptMessage> {
        (0..count)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                sized(&format!("m{i}"), role, tokens)
            })
            .collect()
    }

    fn ids(messages: &[PromptMessage]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|m| m.source_id.as_deref())
            .collect()
    }

    #[test]
    fn ledger_invariant_holds() {
        let mut ledger = BudgetLedger::primed(100).unwrap();
        assert_eq!(ledger.used() + ledger.remaining(), ledger.max());
        assert!(ledger.try_charge(90));
        assert!(!ledger.try_charge(8));
        assert_eq!(ledger.used() + ledger.remaining(), 100);
        ledger.refund(90);
        assert_eq!(ledger.used(), PRIMING_TOKENS);
        assert_eq!(ledger.remaining(), 97);
    }

    #[test]
    fn tiny_budget_is_rejected() {
        assert!(BudgetLedger::primed(3).is_err());
        assert!(fit(&[], 2, ContextStrategy::Discard).is_err());
    }

    #[test]
    fn everything_fits() {
        let messages = uniform(4, 10);
        let result = fit(&messages, 100, ContextStrategy::Discard).unwrap();
        assert_eq!(ids(&result.context), ["m0", "m1", "m2", "m3"]);
        assert!(result.messages_to_refine.is_empty());
        assert_eq!(result.remaining_context_tokens, 100 - 3 - 40);
        assert_eq!(result.refine_index, None);
    }

    #[test]
    fn exact_fit_is_accepted() {
        let messages = uniform(2, 10);
        let result = fit(&messages, 23, ContextStrategy::Discard).unwrap();
        assert_eq!(result.context.len(), 2);
        assert_eq!(result.remaining_context_tokens, 0);
    }

    #[test]
    fn discard_keeps_newest_suffix() {
        let messages = uniform(5, 50);
        let result = fit(&messages, 180, ContextStrategy::Discard).unwrap();
        assert_eq!(ids(&result.context), ["m2", "m3", "m4"]);
        assert!(result.messages_to_refine.is_empty());
        assert_eq!(result.remaining_context_tokens, 180 - 153);
    }

    #[test]
    fn discard_never_includes_older_after_overflow() {
        // m1 overflows; m0 would fit on its own but must not be included.
        let mut messages = uniform(4, 40);
        messages[1].token_count = Some(100);
        messages[0].token_count = Some(1);
        let result = fit(&messages, 100, ContextStrategy::Discard).unwrap();
        assert_eq!(ids(&result.context), ["m2", "m3"]);
    }

    #[test]
    fn refine_routes_two_oldest_without_eviction() {
        let messages = uniform(5, 50);
        let result = fit(&messages, 180, ContextStrategy::Refine).unwrap();
        assert_eq!(ids(&result.context), ["m2", "m3", "m4"]);
        assert_eq!(ids(&result.messages_to_refine), ["m0", "m1"]);
        assert_eq!(result.refine_index, Some(1));
        assert_eq!(result.remaining_context_tokens, 27);
    }

    #[test]
    fn refine_evicts_one_boundary_message() {
        let messages = uniform(6, 50);
        let result = fit(&messages, 180, ContextStrategy::Refine).unwrap();
        // m2 overflows; m3 (oldest accepted) is evicted back.
        assert_eq!(ids(&result.context), ["m4", "m5"]);
        assert_eq!(ids(&result.messages_to_refine), ["m0", "m1", "m2", "m3"]);
        assert_eq!(result.refine_index, Some(3));
        assert_eq!(result.remaining_context_tokens, 180 - 103);
    }

    #[test]
    fn oversized_instructions_cannot_displace_the_newest_message() {
        let messages = vec![
            sized("m0", Role::User, 10),
            sized("m1", Role::Assistant, 10),
            sized("instructions", Role::System, 500),
            sized("m3", Role::User, 20),
        ];
        let err = fit(&messages, 100, ContextStrategy::Refine).unwrap_err();
        match err {
            ContextError::BudgetExceededBySingleMessage {
                message_id,
                token_count,
                max_context_tokens,
            } => {
                assert_eq!(message_id, "m3");
                assert_eq!(token_count, 520);
                assert_eq!(max_context_tokens, 100);
            }
            other => panic!("unexpected error: {other}"),
        }

        // Discard keeps the newest message and drops the rest.
        let result = fit(&messages, 100, ContextStrategy::Discard).unwrap();
        assert_eq!(ids(&result.context), ["m3"]);
    }

    #[test]
    fn refine_set_is_contiguous_oldest_block() {
        let mut messages = uniform(8, 30);
        messages[4].token_count = Some(200);
        messages[1].token_count = Some(1);
        let result = fit(&messages, 150, ContextStrategy::Refine).unwrap();

        let refined = ids(&result.messages_to_refine);
        let kept = ids(&result.context);
        let expected: Vec<String> = (0..refined.len()).map(|i| format!("m{i}")).collect();
        assert_eq!(refined, expected);
        assert_eq!(refined.len() + kept.len(), 8);
        assert_eq!(result.refine_index, Some(refined.len() - 1));
    }

    #[test]
    fn newest_message_alone_over_budget() {
        let mut messages = uniform(3, 10);
        messages[2].token_count = Some(500);
        for strategy in [ContextStrategy::Discard, ContextStrategy::Refine] {
            let err = fit(&messages, 100, strategy).unwrap_err();
            match err {
                ContextError::BudgetExceededBySingleMessage {
                    message_id,
                    token_count,
                    max_context_tokens,
                } => {
                    assert_eq!(message_id, "m2");
                    assert_eq!(token_count, 500);
                    assert_eq!(max_context_tokens, 100);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn budget_property_holds() {
        let sizes = [17usize, 3, 44, 9, 28, 61, 5, 12, 33, 7];
        for max in [20usize, 50, 90, 150, 400] {
            for strategy in [ContextStrategy::Discard, ContextStrategy::Refine] {
                let messages: Vec<PromptMessage> = sizes
                    .iter()
                    .enumerate()
                    .map(|(i, &t)| sized(&format!("m{i}"), Role::User, t))
                    .collect();
                let Ok(result) = fit(&messages, max, strategy) else {
                    continue;
                };
                let used: usize = result.context.iter().map(|m| m.tokens()).sum();
                assert!(used + PRIMING_TOKENS <= max);
                assert_eq!(used + PRIMING_TOKENS + result.remaining_context_tokens, max);
            }
        }
    }

    #[test]
    fn empty_input_fits_trivially() {
        let result = fit(&[], 50, ContextStrategy::Refine).unwrap();
        assert!(result.context.is_empty());
        assert_eq!(result.remaining_context_tokens, 47);
    }
}
