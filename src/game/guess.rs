use tokio::time::Instant;

use crate::game::Identity;

/// Overlay state for the last-impostor guess window.
///
/// Entered only when a vote eliminates the final living impostor. Not a
/// phase: the room sits in `Results` while a guess is pending and moves
/// to `Ended` when it resolves.
#[derive(Debug, Clone)]
pub enum GuessState {
    Idle,
    Awaiting { guesser: Identity, deadline: Instant },
}

impl GuessState {
    pub fn is_pending(&self) -> bool {
        matches!(self, GuessState::Awaiting { .. })
    }

    pub fn pending_guesser(&self) -> Option<&Identity> {
        match self {
            GuessState::Awaiting { guesser, .. } => Some(guesser),
            GuessState::Idle => None,
        }
    }

    /// Whole seconds left before the window closes, clamped at zero.
    pub fn seconds_remaining(&self) -> u64 {
        match self {
            GuessState::Awaiting { deadline, .. } => {
                deadline.saturating_duration_since(Instant::now()).as_secs()
            }
            GuessState::Idle => 0,
        }
    }
}

/// The three events that can close a pending guess window. Whichever
/// arrives first wins; the rest become no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessTrigger {
    Submitted(String),
    TimedOut,
    Disconnected,
}

/// Case-insensitive, whitespace-trimmed equality against the secret word.
pub fn is_correct_guess(secret: &str, guess: &str) -> bool {
    secret.trim().to_lowercase() == guess.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[test]
    fn guess_comparison_normalizes_case_and_whitespace() {
        assert!(is_correct_guess("Dog ", "dog"));
        assert!(is_correct_guess("dog", "  DOG  "));
        assert!(!is_correct_guess("dog", "cat"));
        assert!(!is_correct_guess("hot dog", "hotdog"));
    }

    #[tokio::test(start_paused = true)]
    async fn seconds_remaining_counts_down_to_zero() {
        let state = GuessState::Awaiting {
            guesser: "p1".to_string(),
            deadline: Instant::now() + Duration::from_secs(30),
        };
        assert_eq!(state.seconds_remaining(), 30);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(state.seconds_remaining(), 0);
    }

    #[test]
    fn idle_state_has_no_guesser() {
        assert!(!GuessState::Idle.is_pending());
        assert!(GuessState::Idle.pending_guesser().is_none());
    }
}
