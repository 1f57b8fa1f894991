//! Per-(server, user) spam tracking: a 30s sliding window, a threshold of
//! 10 messages, and a 60-minute cooldown once tripped.

use std::time::Instant;

use aviary_core::config::{SPAM_COOLDOWN_MINUTES, SPAM_THRESHOLD, SPAM_WINDOW_SECS};

/// One user's recent message timestamps plus an optional active cooldown.
#[derive(Default)]
pub struct SpamRecord {
    timestamps: Vec<Instant>,
    blocked_until: Option<Instant>,
}

pub enum SpamCheck {
    Allowed,
    /// Newly tripped this call — the caller should send a one-time notice.
    JustBlocked,
    /// Already under a cooldown from a previous call.
    StillBlocked,
}

impl SpamRecord {
    /// Evict stale timestamps, record `now`, and evaluate the window/cooldown.
    pub fn check(&mut self, now: Instant) -> SpamCheck {
        if let Some(until) = self.blocked_until {
            if now < until {
                return SpamCheck::StillBlocked;
            }
            self.blocked_until = None;
        }

        let window = std::time::Duration::from_secs(SPAM_WINDOW_SECS);
        self.timestamps.retain(|t| now.duration_since(*t) < window);
        self.timestamps.push(now);

        if self.timestamps.len() as u32 >= SPAM_THRESHOLD {
            self.blocked_until = Some(now + std::time::Duration::from_secs(SPAM_COOLDOWN_MINUTES * 60));
            self.timestamps.clear();
            return SpamCheck::JustBlocked;
        }

        SpamCheck::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_under_threshold() {
        let mut record = SpamRecord::default();
        let now = Instant::now();
        for _ in 0..9 {
            assert!(matches!(record.check(now), SpamCheck::Allowed));
        }
    }

    #[test]
    fn trips_at_threshold_and_then_stays_blocked() {
        let mut record = SpamRecord::default();
        let now = Instant::now();
        for _ in 0..9 {
            record.check(now);
        }
        assert!(matches!(record.check(now), SpamCheck::JustBlocked));
        assert!(matches!(record.check(now), SpamCheck::StillBlocked));
    }

    #[test]
    fn window_slides_old_timestamps_out() {
        let mut record = SpamRecord::default();
        let now = Instant::now();
        for _ in 0..9 {
            record.check(now);
        }
        let later = now + std::time::Duration::from_secs(SPAM_WINDOW_SECS + 1);
        assert!(matches!(record.check(later), SpamCheck::Allowed));
    }
}
