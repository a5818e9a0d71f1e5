use std::time::Duration;

use gust_plan::prelude::ThinkTime;
use rand::Rng;

/// Samples a think-time pause. Pure over the supplied random source, so seeded tests get
/// reproducible schedules; there is no shared state between calls.
pub fn sample_think_time(think: &ThinkTime, rng: &mut impl Rng) -> Duration {
    match *think {
        ThinkTime::None => Duration::ZERO,
        ThinkTime::Fixed { ms } => Duration::from_millis(ms),
        ThinkTime::Uniform { min_ms, max_ms } => {
            let (low, high) = if min_ms <= max_ms {
                (min_ms, max_ms)
            } else {
                (max_ms, min_ms)
            };
            Duration::from_millis(rng.gen_range(low..=high))
        }
        ThinkTime::Gaussian {
            mean_ms,
            std_dev_ms,
        } => {
            // Box-Muller transform; rand itself only ships uniform sampling.
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen_range(0.0..1.0);
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            let sampled = mean_ms + z * std_dev_ms;
            Duration::from_millis(sampled.max(0.0) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fixed_and_none_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            sample_think_time(&ThinkTime::None, &mut rng),
            Duration::ZERO
        );
        assert_eq!(
            sample_think_time(&ThinkTime::Fixed { ms: 250 }, &mut rng),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn uniform_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(2);
        let think = ThinkTime::Uniform {
            min_ms: 100,
            max_ms: 500,
        };
        for _ in 0..200 {
            let pause = sample_think_time(&think, &mut rng);
            assert!(pause >= Duration::from_millis(100));
            assert!(pause <= Duration::from_millis(500));
        }
    }

    #[test]
    fn gaussian_centres_on_the_mean_and_never_goes_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        let think = ThinkTime::Gaussian {
            mean_ms: 300.0,
            std_dev_ms: 50.0,
        };

        let samples: Vec<_> = (0..2000)
            .map(|_| sample_think_time(&think, &mut rng).as_millis() as f64)
            .collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;

        assert!((mean - 300.0).abs() < 10.0, "mean drifted to {mean}");
        assert!(samples.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let think = ThinkTime::Uniform {
            min_ms: 0,
            max_ms: 10_000,
        };
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| sample_think_time(&think, &mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (0..10).map(|_| sample_think_time(&think, &mut rng)).collect()
        };
        assert_eq!(a, b);
    }
}
