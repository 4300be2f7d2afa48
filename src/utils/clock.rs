use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Wall-clock source for deadline checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio's timer, so paused-time tests see
/// deadlines move exactly as far as the runtime clock does.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    instant_anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            wall_anchor: Utc::now(),
            instant_anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.instant_anchor);
        self.wall_anchor + ChronoDuration::from_std(elapsed).unwrap_or_else(|_| ChronoDuration::zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }
}
