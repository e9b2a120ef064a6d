//! Strategies for walking the rx gain toward a target amplitude.
//!
//! The calibration engine owns the hardware loop (capture, estimate, apply);
//! a [`GainSearch`] only decides what gain to try next.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::RX_GAIN_MAX;

/// Upward steps are drawn from this range (dB)
pub const UP_STEP_DB: (f64, f64) = (1.21, 5.7);
/// Downward steps are drawn from this range (dB)
pub const DOWN_STEP_DB: (f64, f64) = (0.2, 2.3);

/// Which end of the gain range stopped a search
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rail {
    Upper,
    Lower,
}

/// What to do after one amplitude measurement
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SearchStep {
    /// Amplitude is inside the tolerance band
    Converged,
    /// Try this gain next
    Retry(f64),
    /// The band is out of reach at the current rail
    Rail(Rail),
    /// The strategy has nothing left to try
    Stalled,
}

pub trait GainSearch: Send {
    fn name(&self) -> &'static str;

    /// Forget any state from the previous (channel, frequency) search
    fn reset(&mut self);

    fn next_step(&mut self, gain: f64, amplitude: f32, target: f32, tolerance: f32) -> SearchStep;
}

/// Where `amplitude` sits relative to `[target - tolerance, target + tolerance]`
fn band_position(amplitude: f32, target: f32, tolerance: f32) -> std::cmp::Ordering {
    if amplitude < target - tolerance {
        std::cmp::Ordering::Less
    } else if amplitude > target + tolerance {
        std::cmp::Ordering::Greater
    } else {
        std::cmp::Ordering::Equal
    }
}

/// Randomized hill climb.
///
/// Steps up by a uniform draw from [`UP_STEP_DB`] and down by a draw from
/// [`DOWN_STEP_DB`]. There is no convergence bound, callers cap the number of
/// iterations.
pub struct RandomStepSearch {
    rng: StdRng,
}

impl RandomStepSearch {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible step sequence
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomStepSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl GainSearch for RandomStepSearch {
    fn name(&self) -> &'static str {
        "random-step"
    }

    fn reset(&mut self) {}

    fn next_step(&mut self, gain: f64, amplitude: f32, target: f32, tolerance: f32) -> SearchStep {
        use std::cmp::Ordering::*;
        match band_position(amplitude, target, tolerance) {
            Equal => SearchStep::Converged,
            Less => {
                if gain >= RX_GAIN_MAX {
                    SearchStep::Rail(Rail::Upper)
                } else {
                    let step = self.rng.gen_range(UP_STEP_DB.0..=UP_STEP_DB.1);
                    SearchStep::Retry((gain + step).min(RX_GAIN_MAX))
                }
            }
            Greater => {
                if gain <= 0.0 {
                    SearchStep::Rail(Rail::Lower)
                } else {
                    let step = self.rng.gen_range(DOWN_STEP_DB.0..=DOWN_STEP_DB.1);
                    SearchStep::Retry((gain - step).max(0.0))
                }
            }
        }
    }
}

/// Bisection over `[0, RX_GAIN_MAX]`, assuming amplitude rises with gain
pub struct BisectionSearch {
    lo: f64,
    hi: f64,
    /// Stop once the bracket is narrower than this (dB)
    resolution: f64,
}

impl BisectionSearch {
    pub fn new(resolution: f64) -> Self {
        Self {
            lo: 0.0,
            hi: RX_GAIN_MAX,
            resolution,
        }
    }
}

impl Default for BisectionSearch {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl GainSearch for BisectionSearch {
    fn name(&self) -> &'static str {
        "bisection"
    }

    fn reset(&mut self) {
        self.lo = 0.0;
        self.hi = RX_GAIN_MAX;
    }

    fn next_step(&mut self, gain: f64, amplitude: f32, target: f32, tolerance: f32) -> SearchStep {
        use std::cmp::Ordering::*;
        match band_position(amplitude, target, tolerance) {
            Equal => SearchStep::Converged,
            Less => {
                if gain >= RX_GAIN_MAX {
                    return SearchStep::Rail(Rail::Upper);
                }
                self.lo = self.lo.max(gain);
                if self.hi - self.lo < self.resolution {
                    // Only the top of the range is left to try
                    return if self.hi >= RX_GAIN_MAX {
                        SearchStep::Retry(RX_GAIN_MAX)
                    } else {
                        SearchStep::Stalled
                    };
                }
                SearchStep::Retry((self.lo + self.hi) / 2.0)
            }
            Greater => {
                if gain <= 0.0 {
                    return SearchStep::Rail(Rail::Lower);
                }
                self.hi = self.hi.min(gain);
                if self.hi - self.lo < self.resolution {
                    return if self.lo <= 0.0 {
                        SearchStep::Retry(0.0)
                    } else {
                        SearchStep::Stalled
                    };
                }
                SearchStep::Retry((self.lo + self.hi) / 2.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_step_ranges() {
        let mut search = RandomStepSearch::seeded(7);
        for _ in 0..1000 {
            match search.next_step(30.0, 0.1, 0.6, 0.03) {
                SearchStep::Retry(g) => {
                    let step = g - 30.0;
                    assert!(step > UP_STEP_DB.0 - 1e-9 && step < UP_STEP_DB.1 + 1e-9, "{step}");
                }
                other => panic!("{other:?}"),
            }
            match search.next_step(30.0, 0.9, 0.6, 0.03) {
                SearchStep::Retry(g) => {
                    let step = 30.0 - g;
                    assert!(step > DOWN_STEP_DB.0 - 1e-9 && step < DOWN_STEP_DB.1 + 1e-9, "{step}");
                }
                other => panic!("{other:?}"),
            }
        }
    }

    #[test]
    fn test_band_edges_converge() {
        let mut search = RandomStepSearch::seeded(1);
        assert_eq!(search.next_step(10.0, 0.6, 0.6, 0.03), SearchStep::Converged);
        assert_eq!(search.next_step(10.0, 0.58, 0.6, 0.03), SearchStep::Converged);
        assert_eq!(search.next_step(10.0, 0.62, 0.6, 0.03), SearchStep::Converged);
    }

    #[test]
    fn test_random_step_rails() {
        let mut search = RandomStepSearch::seeded(3);
        assert_eq!(
            search.next_step(RX_GAIN_MAX, 0.1, 0.6, 0.03),
            SearchStep::Rail(Rail::Upper)
        );
        assert_eq!(search.next_step(0.0, 0.9, 0.6, 0.03), SearchStep::Rail(Rail::Lower));
        // Steps near a rail are clamped to it
        assert_eq!(
            search.next_step(75.0, 0.1, 0.6, 0.03),
            SearchStep::Retry(RX_GAIN_MAX)
        );
        assert_eq!(search.next_step(0.1, 0.9, 0.6, 0.03), SearchStep::Retry(0.0));
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = RandomStepSearch::seeded(42);
        let mut b = RandomStepSearch::seeded(42);
        for _ in 0..10 {
            assert_eq!(
                a.next_step(20.0, 0.1, 0.6, 0.03),
                b.next_step(20.0, 0.1, 0.6, 0.03)
            );
        }
    }

    #[test]
    fn test_bisection_converges_on_monotone_model() {
        let model = |g: f64| (0.01 * (1.0 + g)) as f32;
        let mut search = BisectionSearch::default();
        search.reset();
        let mut gain = 0.0;
        for _ in 0..40 {
            match search.next_step(gain, model(gain), 0.6, 0.03) {
                SearchStep::Converged => {
                    assert!((model(gain) - 0.6).abs() <= 0.03);
                    return;
                }
                SearchStep::Retry(g) => gain = g,
                other => panic!("{other:?}"),
            }
        }
        panic!("bisection did not converge");
    }

    #[test]
    fn test_bisection_rails() {
        let mut search = BisectionSearch::default();
        let mut gain = 0.0;
        // Amplitude always too low: walks to the top and gives up there
        for _ in 0..40 {
            match search.next_step(gain, 0.0, 0.6, 0.03) {
                SearchStep::Retry(g) => gain = g,
                SearchStep::Rail(Rail::Upper) => {
                    assert_eq!(gain, RX_GAIN_MAX);
                    return;
                }
                other => panic!("{other:?}"),
            }
        }
        panic!("bisection never hit the rail");
    }
}
