/// Doubling-hypothesis timing.
///
/// Times an action at input sizes `initial, 2*initial, ...` up to `limit`,
/// averaging each size over several trials, and fits `T(N) = a * N^b` from the
/// last two sizes.
use std::time::Instant;
use tracing::debug;

/// Workload under measurement. `before` runs untimed.
pub trait DoublingExperiment {
    fn before(&mut self, n: usize);
    fn action(&mut self, n: usize);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub n: usize,
    pub seconds: f64,
}

/// Fitted power law `T(N) = a * N^b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLaw {
    pub a: f64,
    pub b: f64,
}

impl PowerLaw {
    /// Fit from the last two measurements. `None` with fewer than two, or when
    /// the times do not allow a finite exponent.
    pub fn fit(measurements: &[Measurement]) -> Option<Self> {
        let [.., previous, last] = measurements else {
            return None;
        };
        if previous.seconds <= 0.0 || last.seconds <= 0.0 {
            return None;
        }
        let b = (last.seconds / previous.seconds).log2();
        let a = last.seconds / (last.n as f64).powf(b);
        (a.is_finite() && b.is_finite()).then_some(Self { a, b })
    }

    pub fn predict(&self, n: usize) -> f64 {
        self.a * (n as f64).powf(self.b)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DoublingHypothesis {
    pub initial: usize,
    pub limit: usize,
    pub trials: usize,
}

impl DoublingHypothesis {
    pub fn new(initial: usize, limit: usize, trials: usize) -> Self {
        Self {
            initial: initial.max(1),
            limit,
            trials: trials.max(1),
        }
    }

    /// Average seconds per size, smallest size first.
    pub fn measure(&self, experiment: &mut dyn DoublingExperiment) -> Vec<Measurement> {
        let mut measurements = Vec::new();
        let mut n = self.initial;
        while n <= self.limit {
            let mut total = 0.0;
            for _ in 0..self.trials {
                experiment.before(n);
                let started = Instant::now();
                experiment.action(n);
                total += started.elapsed().as_secs_f64();
            }
            let seconds = total / self.trials as f64;
            debug!(n, seconds, "Doubling step");
            measurements.push(Measurement { n, seconds });

            match n.checked_mul(2) {
                Some(next) => n = next,
                None => break,
            }
        }
        measurements
    }

    pub fn run(&self, experiment: &mut dyn DoublingExperiment) -> Option<PowerLaw> {
        PowerLaw::fit(&self.measure(experiment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        sizes: Vec<usize>,
        prepared: usize,
    }

    impl DoublingExperiment for Counting {
        fn before(&mut self, _n: usize) {
            self.prepared += 1;
        }

        fn action(&mut self, n: usize) {
            self.sizes.push(n);
        }
    }

    #[test]
    fn test_sizes_double_up_to_limit() {
        let mut experiment = Counting { sizes: Vec::new(), prepared: 0 };
        let measurements = DoublingHypothesis::new(100, 1_000, 2).measure(&mut experiment);
        let sizes: Vec<usize> = measurements.iter().map(|m| m.n).collect();
        assert_eq!(sizes, vec![100, 200, 400, 800]);
        assert_eq!(experiment.prepared, 8);
        assert_eq!(experiment.sizes.len(), 8);
    }

    #[test]
    fn test_fit_quadratic() {
        let measurements = vec![
            Measurement { n: 1_000, seconds: 0.25 },
            Measurement { n: 2_000, seconds: 1.0 },
        ];
        let law = PowerLaw::fit(&measurements).unwrap();
        assert!((law.b - 2.0).abs() < 1e-9);
        assert!((law.a - 1.0 / 4_000_000.0).abs() < 1e-15);
        assert!((law.predict(4_000) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_needs_two_positive_points() {
        assert!(PowerLaw::fit(&[]).is_none());
        assert!(PowerLaw::fit(&[Measurement { n: 1, seconds: 1.0 }]).is_none());
        assert!(PowerLaw::fit(&[
            Measurement { n: 1, seconds: 0.0 },
            Measurement { n: 2, seconds: 1.0 }
        ])
        .is_none());
    }
}
