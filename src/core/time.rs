//! Fixed-step timing for the simulation

/// Accumulates frame time and hands out whole fixed steps.
///
/// Frame-rate variance never changes the step size; a long frame produces
/// more steps, capped at `max_steps`, and the excess is dropped.
#[derive(Clone, Debug)]
pub struct FixedTimestep {
    step: f32,
    max_steps: u32,
    accumulator: f32,
    total_steps: u64,
}

impl FixedTimestep {
    pub fn new(step: f32, max_steps: u32) -> Self {
        Self {
            step,
            max_steps: max_steps.max(1),
            accumulator: 0.0,
            total_steps: 0,
        }
    }

    /// Add frame time and return how many fixed steps to run now
    pub fn advance(&mut self, dt: f32) -> u32 {
        if dt.is_finite() && dt > 0.0 {
            self.accumulator += dt;
        }

        let mut steps = 0;
        while self.accumulator >= self.step && steps < self.max_steps {
            self.accumulator -= self.step;
            steps += 1;
        }

        if steps == self.max_steps && self.accumulator >= self.step {
            log::warn!(
                "Physics fell behind: dropping {:.3}s of simulation time",
                self.accumulator
            );
            self.accumulator %= self.step;
        }

        self.total_steps += steps as u64;
        steps
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Fraction of a step left in the accumulator (0.0 - 1.0), for interpolation
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.step
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_partial_frames() {
        let mut ts = FixedTimestep::new(0.1, 10);
        assert_eq!(ts.advance(0.05), 0);
        assert_eq!(ts.advance(0.06), 1);
        assert!((ts.alpha() - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_long_frame_is_capped() {
        let mut ts = FixedTimestep::new(0.01, 4);
        assert_eq!(ts.advance(1.0), 4);
        assert!(ts.alpha() < 1.0);
        assert_eq!(ts.total_steps(), 4);
    }

    #[test]
    fn test_ignores_bad_dt() {
        let mut ts = FixedTimestep::new(0.01, 4);
        assert_eq!(ts.advance(f32::NAN), 0);
        assert_eq!(ts.advance(-1.0), 0);
        assert_eq!(ts.alpha(), 0.0);
    }
}
