//! Per-chunk retry budget.

/// What to do after a chunk went unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the same chunk again; `attempt` is the 1-based attempt about to
    /// be made.
    Retry { attempt: u32 },
    /// Budget exhausted after `attempts` tries.
    GiveUp { attempts: u32 },
}

/// Counts attempts for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRetry {
    max_attempts: u32,
    attempt: u32,
}

impl ChunkRetry {
    /// A fresh budget; the first attempt is already counted.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt: 1,
        }
    }

    /// The attempt currently in flight, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retries made so far.
    pub fn retries(&self) -> u32 {
        self.attempt - 1
    }

    /// Records a failed attempt.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.attempt >= self.max_attempts {
            RetryDecision::GiveUp {
                attempts: self.attempt,
            }
        } else {
            self.attempt += 1;
            RetryDecision::Retry {
                attempt: self.attempt,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_attempts_means_two_retries() {
        let mut retry = ChunkRetry::new(3);
        assert_eq!(retry.on_failure(), RetryDecision::Retry { attempt: 2 });
        assert_eq!(retry.on_failure(), RetryDecision::Retry { attempt: 3 });
        assert_eq!(retry.retries(), 2);
        assert_eq!(retry.on_failure(), RetryDecision::GiveUp { attempts: 3 });
        assert_eq!(retry.on_failure(), RetryDecision::GiveUp { attempts: 3 });
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        let mut retry = ChunkRetry::new(0);
        assert_eq!(retry.attempt(), 1);
        assert_eq!(retry.on_failure(), RetryDecision::GiveUp { attempts: 1 });
    }
}
