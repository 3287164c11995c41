//! Human-like pacing
//!
//! Each job's delay is an offset from the moment the batch is submitted: a
//! running sum of uniform integer draws from `[min_secs, max_secs]`. The
//! first job always goes out immediately. The schedule is recomputed from
//! scratch for every submission (create, promotion, resume) and never stored.

use crate::error::CampaignError;
use pulsecast_common::config::DispatchConfig;
use rand::Rng;
use std::time::Duration;

/// Inclusive range of seconds between consecutive sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min_secs: u32,
    max_secs: u32,
}

impl DelayRange {
    pub fn new(min_secs: u32, max_secs: u32) -> Result<Self, CampaignError> {
        if min_secs > max_secs {
            return Err(CampaignError::InvalidPacing(format!(
                "delay_min ({}) must not exceed delay_max ({})",
                min_secs, max_secs
            )));
        }
        Ok(Self { min_secs, max_secs })
    }

    /// Range configured as the fallback for campaigns without pacing
    pub fn from_config(config: &DispatchConfig) -> Self {
        let min_secs = config.default_delay_min_secs;
        Self {
            min_secs,
            max_secs: config.default_delay_max_secs.max(min_secs),
        }
    }

    /// Range stored on a campaign; zero or negative bounds take the fallback's
    pub fn resolve(delay_min: i32, delay_max: i32, fallback: DelayRange) -> Self {
        let min_secs = u32::try_from(delay_min)
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(fallback.min_secs);
        let max_secs = u32::try_from(delay_max)
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(fallback.max_secs);
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
        }
    }

    pub fn min_secs(&self) -> u32 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u32 {
        self.max_secs
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        u64::from(rng.gen_range(self.min_secs..=self.max_secs))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_secs: 5,
            max_secs: 15,
        }
    }
}

/// Cumulative offsets for `count` jobs
///
/// Job 0 is zero. Job `i > 0` is the sum of draws `0..=i`, so the first draw
/// still pushes out every later job.
pub fn cumulative_delays<R: Rng + ?Sized>(
    count: usize,
    range: DelayRange,
    rng: &mut R,
) -> Vec<Duration> {
    let mut total_secs = 0u64;
    (0..count)
        .map(|i| {
            total_secs += range.draw(rng);
            if i == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs(total_secs)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_first_job_is_immediate() {
        let mut rng = StdRng::seed_from_u64(7);
        let delays = cumulative_delays(5, DelayRange::new(5, 15).unwrap(), &mut rng);
        assert_eq!(delays.len(), 5);
        assert_eq!(delays[0], Duration::ZERO);
    }

    #[test]
    fn test_delays_are_cumulative_and_bounded() {
        let mut rng = StdRng::seed_from_u64(42);
        let range = DelayRange::new(5, 15).unwrap();
        let delays = cumulative_delays(50, range, &mut rng);

        for i in 1..delays.len() {
            let step = delays[i] - if i == 1 { Duration::ZERO } else { delays[i - 1] };
            // Job 1 includes draw 0 as well as its own
            let (lo, hi) = if i == 1 { (10, 30) } else { (5, 15) };
            assert!(
                step >= Duration::from_secs(lo) && step <= Duration::from_secs(hi),
                "step {} out of range: {:?}",
                i,
                step
            );
        }
    }

    #[test]
    fn test_fixed_range_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        let delays = cumulative_delays(4, DelayRange::new(3, 3).unwrap(), &mut rng);
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_secs(6),
                Duration::from_secs(9),
                Duration::from_secs(12),
            ]
        );
    }

    #[test]
    fn test_empty_batch() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(cumulative_delays(0, DelayRange::default(), &mut rng).is_empty());
    }

    #[test]
    fn test_range_validation_and_fallback() {
        assert!(DelayRange::new(10, 5).is_err());

        let fallback = DelayRange::default();
        assert_eq!(DelayRange::resolve(0, 0, fallback), fallback);
        assert_eq!(
            DelayRange::resolve(20, 0, fallback),
            DelayRange::new(20, 20).unwrap()
        );
        assert_eq!(
            DelayRange::resolve(2, 4, fallback),
            DelayRange::new(2, 4).unwrap()
        );
    }
}
