//! Sleep schedules
//!
//! A schedule is a fixed ladder of wait times, e.g. "10,30": the first
//! failure waits 10s, the second 30s, and every failure after that repeats
//! the last value. Used both for the backend-error backoff and for the
//! idle-poll interval; `reset()` rewinds to the start once the backend is
//! healthy again or work was found.

use anyhow::Result;
use std::time::Duration;
use tracing::debug;

/// A fixed, non-exponential backoff ladder
#[derive(Debug, Clone)]
pub struct SleepSchedule {
    steps: Vec<u64>,
    current: usize,
}

impl SleepSchedule {
    /// Parses a comma-separated list of seconds (e.g. "10, 30")
    pub fn parse(schedule: &str) -> Result<Self> {
        let steps = schedule
            .split(',')
            .map(|s| s.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("invalid schedule '{}': {}", schedule, e))?;

        Self::new(steps)
    }

    pub fn new(steps: Vec<u64>) -> Result<Self> {
        if steps.is_empty() {
            anyhow::bail!("schedule must have at least one element");
        }
        Ok(Self { steps, current: 0 })
    }

    /// The wait the next `sleep()` call will perform
    pub fn current_wait(&self) -> Duration {
        Duration::from_secs(self.steps[self.current])
    }

    /// Sleeps for the current step's duration
    pub async fn sleep(&self) {
        let wait = self.current_wait();
        debug!("waiting {:?} before retrying", wait);
        tokio::time::sleep(wait).await;
    }

    /// Moves to the next step, clamping at the last one
    pub fn advance(&mut self) {
        if self.current + 1 < self.steps.len() {
            self.current += 1;
        }
    }

    /// Rewinds the schedule to its first step
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_spaces() {
        let schedule = SleepSchedule::parse("10, 30").unwrap();
        assert_eq!(schedule.current_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_schedule_rejected() {
        assert!(SleepSchedule::parse("").is_err());
        assert!(SleepSchedule::new(vec![]).is_err());
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert!(SleepSchedule::parse("10,fast").is_err());
    }

    #[test]
    fn test_ladder_clamps_at_last_value() {
        // three consecutive failures with "10,30" wait 10s, 30s, 30s
        let mut schedule = SleepSchedule::parse("10,30").unwrap();
        assert_eq!(schedule.current_wait(), Duration::from_secs(10));
        schedule.advance();
        assert_eq!(schedule.current_wait(), Duration::from_secs(30));
        schedule.advance();
        assert_eq!(schedule.current_wait(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset_rewinds() {
        let mut schedule = SleepSchedule::parse("5,15,60").unwrap();
        schedule.advance();
        schedule.advance();
        assert_eq!(schedule.current_wait(), Duration::from_secs(60));
        schedule.reset();
        assert_eq!(schedule.current_wait(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_uses_current_step() {
        let schedule = SleepSchedule::parse("10").unwrap();
        let before = tokio::time::Instant::now();
        schedule.sleep().await;
        assert_eq!(before.elapsed(), Duration::from_secs(10));
    }
}
