#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue,
    TerminalFail,
}

/// `attempts_after_claim` already counts the attempt that just failed.
pub fn decide(attempts_after_claim: i32, max_attempts: i32) -> RetryDecision {
    if attempts_after_claim < max_attempts {
        RetryDecision::Requeue
    } else {
        RetryDecision::TerminalFail
    }
}
