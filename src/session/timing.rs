//! # Time Budget Monitor
//!
//! Computes elapsed/remaining interview time and maps it onto pacing
//! tiers. The monitor is consulted at the start of handling every
//! inbound message (there is no ticking timer), which guarantees no
//! extra turn is produced after expiry while never preempting a turn
//! already being generated.

use crate::session::conversation::ConversationState;

/// Rough planning heuristic: one question-and-answer exchange takes
/// about a minute and a half.
const MINUTES_PER_QUESTION: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingTier {
    /// Budget spent. The session is forced to COMPLETED and no
    /// further LLM turn is generated.
    Exhausted,
    /// At most one minute left: conclude on this turn.
    ConcludeNow,
    /// One to two minutes left: begin wrapping up.
    WrapUp,
    /// Two to three minutes left: room for one or two more exchanges.
    FinalExchanges,
    Normal,
}

#[derive(Debug, Clone)]
pub struct TimeBudget {
    pub elapsed_minutes: f64,
    pub remaining_minutes: f64,
    pub total_minutes: f64,
    pub tier: PacingTier,
}

impl TimeBudget {
    pub fn for_session(state: &ConversationState) -> Self {
        Self::from_elapsed(state.elapsed_minutes(), state.budget_minutes)
    }

    pub fn from_elapsed(elapsed_minutes: f64, total_minutes: f64) -> Self {
        let remaining_minutes = total_minutes - elapsed_minutes;
        Self {
            elapsed_minutes,
            remaining_minutes,
            total_minutes,
            tier: tier_for(remaining_minutes),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.tier == PacingTier::Exhausted
    }

    /// Estimated number of exchanges that still fit in the budget.
    pub fn remaining_question_estimate(&self) -> u32 {
        if self.remaining_minutes <= 0.0 {
            0
        } else {
            (self.remaining_minutes / MINUTES_PER_QUESTION).ceil() as u32
        }
    }

    /// Pacing instruction injected into the LLM context for this turn.
    /// `None` means normal pacing guidance only.
    pub fn pacing_instruction(&self) -> Option<String> {
        match self.tier {
            PacingTier::Exhausted => None,
            PacingTier::ConcludeNow => Some(
                "TIME IS UP. Conclude the interview with this message: thank the candidate \
                 and close. Do not ask any further question."
                    .to_string(),
            ),
            PacingTier::WrapUp => Some(
                "Less than 2 minutes remain. Begin wrapping up: at most one short final \
                 question, then move toward closing."
                    .to_string(),
            ),
            PacingTier::FinalExchanges => Some(
                "Less than 3 minutes remain. You have time for 1-2 more exchanges; keep \
                 questions brief."
                    .to_string(),
            ),
            PacingTier::Normal => Some(format!(
                "Pacing: {:.1} of {:.0} minutes remain (~{} more questions at ~1.5 minutes \
                 each). Pace the interview accordingly.",
                self.remaining_minutes,
                self.total_minutes,
                self.remaining_question_estimate()
            )),
        }
    }
}

fn tier_for(remaining_minutes: f64) -> PacingTier {
    if remaining_minutes <= 0.0 {
        PacingTier::Exhausted
    } else if remaining_minutes <= 1.0 {
        PacingTier::ConcludeNow
    } else if remaining_minutes <= 2.0 {
        PacingTier::WrapUp
    } else if remaining_minutes <= 3.0 {
        PacingTier::FinalExchanges
    } else {
        PacingTier::Normal
    }
}

/// Fixed utterance sent when the budget expires mid-session.
pub const TIME_UP_MESSAGE: &str =
    "Thank you, we have reached the end of our allotted time. The interview is now \
     complete. We appreciate you taking the time to speak with us today.";
