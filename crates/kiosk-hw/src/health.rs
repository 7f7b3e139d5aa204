//! Black-frame health tracking.
//!
//! Some camera drivers report an active stream that never delivers real
//! pixels. The monitor counts consecutive black samples and asks for a full
//! restart once the streak reaches its limit.

/// Consecutive black samples that trigger a restart.
pub const DEFAULT_BLACK_LIMIT: u32 = 3;

/// What the caller should do after a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Black, but the streak has not reached the limit yet.
    Suspect { consecutive: u32 },
    /// Streak reached the limit; the counter has been reset.
    Restart,
}

#[derive(Debug)]
pub struct BlackFrameMonitor {
    consecutive: u32,
    limit: u32,
    restarts: u64,
}

impl BlackFrameMonitor {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
            restarts: 0,
        }
    }

    /// Record one sample.
    pub fn observe(&mut self, black: bool) -> HealthVerdict {
        if !black {
            if self.consecutive > 0 {
                tracing::debug!(streak = self.consecutive, "frames recovered");
            }
            self.consecutive = 0;
            return HealthVerdict::Healthy;
        }

        self.consecutive += 1;
        if self.consecutive >= self.limit {
            tracing::warn!(streak = self.consecutive, "black frame streak, restart required");
            self.consecutive = 0;
            self.restarts += 1;
            HealthVerdict::Restart
        } else {
            HealthVerdict::Suspect {
                consecutive: self.consecutive,
            }
        }
    }

    pub fn consecutive_black(&self) -> u32 {
        self.consecutive
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }
}

impl Default for BlackFrameMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_BLACK_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_black_samples_restart_once() {
        let mut monitor = BlackFrameMonitor::default();
        assert_eq!(monitor.observe(true), HealthVerdict::Suspect { consecutive: 1 });
        assert_eq!(monitor.observe(true), HealthVerdict::Suspect { consecutive: 2 });
        assert_eq!(monitor.observe(true), HealthVerdict::Restart);
        assert_eq!(monitor.consecutive_black(), 0);
        assert_eq!(monitor.restarts(), 1);
    }

    #[test]
    fn test_bright_sample_resets_streak() {
        let mut monitor = BlackFrameMonitor::default();
        monitor.observe(true);
        monitor.observe(true);
        assert_eq!(monitor.observe(false), HealthVerdict::Healthy);
        assert_eq!(monitor.consecutive_black(), 0);
        monitor.observe(true);
        monitor.observe(true);
        assert_eq!(monitor.restarts(), 0);
    }

    #[test]
    fn test_long_black_run_restarts_every_third_sample() {
        let mut monitor = BlackFrameMonitor::default();
        let restarts = (0..9)
            .filter(|_| monitor.observe(true) == HealthVerdict::Restart)
            .count();
        assert_eq!(restarts, 3);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut monitor = BlackFrameMonitor::new(0);
        assert_eq!(monitor.observe(true), HealthVerdict::Restart);
    }
}
