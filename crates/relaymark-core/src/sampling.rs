//! Beta and Gamma variate samplers driven by [`Mulberry32`].
//!
//! Thompson-Sampling strategies draw relay scores from Beta(α, β)
//! posteriors. The samplers only consume randomness through the shared
//! generator, so a seeded run replays exactly.

use crate::rng::Mulberry32;

/// Draw from Beta(alpha, beta). Both parameters must be positive;
/// non-finite or non-positive inputs fall back to a uniform draw.
pub fn sample_beta(alpha: f64, beta: f64, rng: &mut Mulberry32) -> f64 {
    if !(alpha > 0.0 && beta > 0.0) || !alpha.is_finite() || !beta.is_finite() {
        return rng.next_f64();
    }
    // Beta(1, 1) is uniform.
    if alpha == 1.0 && beta == 1.0 {
        return rng.next_f64();
    }
    if alpha < 1.0 && beta < 1.0 {
        return sample_beta_johnk(alpha, beta, rng);
    }
    // General case: ratio of two Gamma variates.
    let x = sample_gamma(alpha, rng);
    let y = sample_gamma(beta, rng);
    if x + y == 0.0 {
        return 0.5;
    }
    x / (x + y)
}

/// Jöhnk's rejection method for alpha, beta < 1.
fn sample_beta_johnk(alpha: f64, beta: f64, rng: &mut Mulberry32) -> f64 {
    const MAX_TRIES: u32 = 100;
    for _ in 0..MAX_TRIES {
        let u = rng.next_positive();
        let v = rng.next_positive();
        let x = u.powf(1.0 / alpha);
        let y = v.powf(1.0 / beta);
        if x + y <= 1.0 {
            if x + y > 0.0 {
                return x / (x + y);
            }
            // Both underflowed to zero. Redo the ratio in log space.
            let log_x = u.ln() / alpha;
            let log_y = v.ln() / beta;
            let log_m = log_x.max(log_y);
            let ex = (log_x - log_m).exp();
            let ey = (log_y - log_m).exp();
            return ex / (ex + ey);
        }
    }
    // Rejection kept missing. The mean is the safe fallback.
    alpha / (alpha + beta)
}

/// Draw from Gamma(shape, 1) using Marsaglia–Tsang.
pub fn sample_gamma(shape: f64, rng: &mut Mulberry32) -> f64 {
    if !(shape > 0.0) || !shape.is_finite() {
        return 0.0;
    }
    if shape < 1.0 {
        // Boost: Gamma(shape) = Gamma(shape + 1) * U^(1/shape).
        let g = sample_gamma(shape + 1.0, rng);
        let u = rng.next_positive();
        return g * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = sample_standard_normal(rng);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }
        let v = v * v * v;
        let u = rng.next_positive();
        // Squeeze check first, then the full log acceptance test.
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Standard normal via Box–Muller.
fn sample_standard_normal(rng: &mut Mulberry32) -> f64 {
    let u1 = rng.next_positive();
    let u2 = rng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mean(alpha: f64, beta: f64, n: usize, seed: u32) -> f64 {
        let mut rng = Mulberry32::new(seed);
        let sum: f64 = (0..n).map(|_| sample_beta(alpha, beta, &mut rng)).sum();
        sum / n as f64
    }

    #[test]
    fn beta_uniform_case() {
        // Beta(1, 1) must consume exactly one draw and match the raw stream.
        let mut a = Mulberry32::new(5);
        let mut b = Mulberry32::new(5);
        for _ in 0..100 {
            assert_eq!(sample_beta(1.0, 1.0, &mut a), b.next_f64());
        }
    }

    #[test]
    fn beta_mean_matches_expectation() {
        // E[Beta(a, b)] = a / (a + b).
        let mean = sample_mean(2.0, 5.0, 20_000, 11);
        assert!((mean - 2.0 / 7.0).abs() < 0.01, "mean {mean}");

        let mean = sample_mean(6.0, 2.0, 20_000, 13);
        assert!((mean - 0.75).abs() < 0.01, "mean {mean}");
    }

    #[test]
    fn beta_johnk_small_shapes() {
        let mean = sample_mean(0.5, 0.5, 20_000, 17);
        assert!((mean - 0.5).abs() < 0.02, "mean {mean}");
        let mut rng = Mulberry32::new(19);
        for _ in 0..5_000 {
            let x = sample_beta(0.3, 0.7, &mut rng);
            assert!((0.0..=1.0).contains(&x));
            assert!(x.is_finite());
        }
    }

    #[test]
    fn beta_output_bounded() {
        let mut rng = Mulberry32::new(23);
        for _ in 0..5_000 {
            let x = sample_beta(3.0, 1.5, &mut rng);
            assert!((0.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn beta_degenerate_params_fall_back() {
        let mut rng = Mulberry32::new(29);
        let x = sample_beta(0.0, 2.0, &mut rng);
        assert!((0.0..1.0).contains(&x));
        let x = sample_beta(f64::NAN, 2.0, &mut rng);
        assert!((0.0..1.0).contains(&x));
    }

    #[test]
    fn gamma_mean_matches_shape() {
        // E[Gamma(k, 1)] = k.
        let mut rng = Mulberry32::new(31);
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| sample_gamma(3.0, &mut rng)).sum();
        let mean = sum / n as f64;
        assert!((mean - 3.0).abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn gamma_small_shape_positive() {
        let mut rng = Mulberry32::new(37);
        for _ in 0..5_000 {
            let x = sample_gamma(0.4, &mut rng);
            assert!(x >= 0.0 && x.is_finite());
        }
    }

    #[test]
    fn samplers_replay_with_same_seed() {
        let mut a = Mulberry32::new(41);
        let mut b = Mulberry32::new(41);
        for _ in 0..200 {
            assert_eq!(
                sample_beta(2.5, 0.8, &mut a),
                sample_beta(2.5, 0.8, &mut b)
            );
        }
    }
}
