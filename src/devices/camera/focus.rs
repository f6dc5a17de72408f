//! Auto-focus step estimator.
//!
//! A secant-style controller: each accepted FWHM together with the previous
//! (fwhm, step) pair yields a damped step estimate, which is then clamped by
//! magnitude onto the focuser's coarse step ladder. Convergence is declared
//! when the estimate falls below the finest rung.

/// Damping applied to the raw secant estimate.
const STEP_DAMPING: f64 = 0.80;
/// First step when no history exists.
const FIRST_STEP: i32 = 500;
/// Coarse-to-fine step ladder.
const STEP_LADDER: [i32; 3] = [5000, 2000, 500];
/// Finest rung; estimates below it terminate the procedure.
const STEP_MIN: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusStep {
    /// Drive the focuser by this signed step count.
    Move(i32),
    /// Image quality reached the expectation; stop.
    Converged,
}

pub struct FocusAlgo {
    expected_fwhm: f64,
    expected_err: f64,
    last_fwhm: Option<f64>,
    last_step: i32,
}

impl FocusAlgo {
    pub fn new(expected_fwhm: f64, expected_err: f64) -> Self {
        Self {
            expected_fwhm,
            expected_err,
            last_fwhm: None,
            last_step: 0,
        }
    }

    /// Feed the next accepted FWHM and obtain the focuser action.
    pub fn push(&mut self, fwhm: f64) -> FocusStep {
        if fwhm <= self.expected_fwhm + self.expected_err {
            return FocusStep::Converged;
        }

        let step = match self.last_fwhm {
            None => FIRST_STEP,
            Some(last_fwhm) => {
                let raw = (self.expected_fwhm - fwhm) * self.last_step as f64 * STEP_DAMPING
                    / (fwhm - last_fwhm);
                clamp_to_ladder(raw as i32)
            }
        };
        self.last_step = step;
        self.last_fwhm = Some(fwhm);

        if step.abs() < STEP_MIN {
            FocusStep::Converged
        } else {
            FocusStep::Move(step)
        }
    }
}

/// Clamp a raw estimate onto the step ladder, preserving sign. Estimates
/// between the finest rung and 100 collapse to ±100; smaller magnitudes pass
/// through and terminate the search.
fn clamp_to_ladder(raw: i32) -> i32 {
    let sign = if raw < 0 { -1 } else { 1 };
    let magnitude = raw.abs();
    for &rung in &STEP_LADDER {
        if magnitude > rung {
            return sign * rung;
        }
    }
    if magnitude > STEP_MIN {
        sign * STEP_MIN
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_is_plus_500() {
        let mut algo = FocusAlgo::new(3.0, 0.2);
        assert_eq!(algo.push(6.0), FocusStep::Move(500));
    }

    #[test]
    fn secant_estimate_is_clamped_to_the_ladder() {
        // fed 6.0 then 5.2: raw = (3.0-5.2)*500*0.80/(5.2-6.0) = +1100,
        // clamped to +500
        let mut algo = FocusAlgo::new(3.0, 0.2);
        assert_eq!(algo.push(6.0), FocusStep::Move(500));
        assert_eq!(algo.push(5.2), FocusStep::Move(500));
    }

    #[test]
    fn large_divergence_takes_the_coarse_rungs() {
        let mut algo = FocusAlgo::new(3.0, 0.2);
        algo.push(12.0); // +500
        // raw = (3-11.9)*500*0.8/(11.9-12) = +35600 -> +5000
        assert_eq!(algo.push(11.9), FocusStep::Move(5000));
        // raw = (3-10)*5000*0.8/(10-11.9) = +14736 -> +5000
        assert_eq!(algo.push(10.0), FocusStep::Move(5000));
    }

    #[test]
    fn sign_is_preserved_when_overshooting() {
        let mut algo = FocusAlgo::new(3.0, 0.2);
        algo.push(5.0); // +500
        // overshoot: fwhm got worse, reverse direction
        // raw = (3-6)*500*0.8/(6-5) = -1200 -> -500
        assert_eq!(algo.push(6.0), FocusStep::Move(-500));
    }

    #[test]
    fn converges_below_the_finest_rung() {
        let mut algo = FocusAlgo::new(3.0, 0.2);
        algo.push(5.0); // +500, last_fwhm 5.0
        // raw = (3-3.4)*500*0.8/(3.4-5.0) = +100 -> passes through, 100 rung
        // raw magnitudes below 100 terminate:
        // (3-3.3)*500*0.8/(3.3-5.0) = +70 -> |70| < 100 -> converged
        assert_eq!(algo.push(3.3), FocusStep::Converged);
    }

    #[test]
    fn reaching_expected_quality_terminates_immediately() {
        let mut algo = FocusAlgo::new(3.0, 0.2);
        assert_eq!(algo.push(3.1), FocusStep::Converged);
    }

    #[test]
    fn ladder_clamp_magnitudes() {
        assert_eq!(clamp_to_ladder(35_600), 5000);
        assert_eq!(clamp_to_ladder(-14_736), -5000);
        assert_eq!(clamp_to_ladder(3000), 2000);
        assert_eq!(clamp_to_ladder(1100), 500);
        assert_eq!(clamp_to_ladder(-1100), -500);
        assert_eq!(clamp_to_ladder(250), 100);
        assert_eq!(clamp_to_ladder(-250), -100);
        assert_eq!(clamp_to_ladder(70), 70);
        assert_eq!(clamp_to_ladder(-70), -70);
    }
}
