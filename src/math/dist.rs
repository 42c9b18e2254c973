//! Student t distribution for confidence intervals.
//!
//! - `ln_gamma` uses the Lanczos approximation (absolute error ~1e-10).
//! - The CDF goes through the regularized incomplete beta function,
//!   evaluated with a modified Lentz continued fraction:
//!   `P(T <= t) = 1 - ½ I_{ν/(ν+t²)}(ν/2, ½)` for `t >= 0`.
//! - The quantile inverts the CDF by bisection; the CDF is monotone so this
//!   is slow but cannot fail to converge.

const LANCZOS: [f64; 6] = [
    76.180_091_729_471_46,
    -86.505_320_329_416_77,
    24.014_098_240_830_91,
    -1.231_739_572_450_155,
    0.120_865_097_386_617_9e-2,
    -0.539_523_938_495_3e-5,
];

const CF_MAX_ITER: usize = 10_000;
const CF_EPS: f64 = 3e-16;
const CF_TINY: f64 = 1e-300;

/// Natural log of the gamma function for `x > 0`.
pub fn ln_gamma(x: f64) -> f64 {
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for c in LANCZOS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Regularized incomplete beta function `I_x(a, b)`.
pub fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only below the mean; use the
    // symmetry I_x(a, b) = 1 - I_{1-x}(b, a) above it.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = clamp_tiny(1.0 - qab * x / qap).recip();
    let mut h = d;

    for m in 1..=CF_MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = clamp_tiny(1.0 + aa * d).recip();
        c = clamp_tiny(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < CF_EPS {
            break;
        }
    }

    h
}

fn clamp_tiny(v: f64) -> f64 {
    if v.abs() < CF_TINY { CF_TINY } else { v }
}

/// Cumulative distribution function of Student's t with `df` degrees of freedom.
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if t.is_infinite() {
        return if t > 0.0 { 1.0 } else { 0.0 };
    }
    let tail = 0.5 * incomplete_beta(0.5 * df, 0.5, df / (df + t * t));
    if t >= 0.0 { 1.0 - tail } else { tail }
}

/// Quantile function (inverse CDF) of Student's t.
///
/// Returns NaN when `p` is outside `(0, 1)` or `df <= 0`.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) || !(df > 0.0) {
        return f64::NAN;
    }
    if p == 0.5 {
        return 0.0;
    }

    // Work in the upper half and mirror.
    let upper = p.max(1.0 - p);

    let mut hi = 1.0;
    while student_t_cdf(hi, df) < upper {
        hi *= 2.0;
        if hi > 1e12 {
            break;
        }
    }
    let mut lo = 0.0;
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < upper {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo <= 1e-13 * hi.max(1.0) {
            break;
        }
    }

    let q = 0.5 * (lo + hi);
    if p > 0.5 { q } else { -q }
}

/// Two-sided critical value `t_{(1+level)/2, df}` for a confidence level.
pub fn t_critical(level: f64, df: usize) -> f64 {
    student_t_quantile(0.5 * (1.0 + level), df as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ln_gamma_matches_factorials() {
        // Γ(n) = (n-1)!
        assert!((ln_gamma(1.0)).abs() < 1e-9);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-9);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-9);
    }

    #[test]
    fn cdf_is_symmetric() {
        for &df in &[1.0, 3.0, 30.0] {
            assert!((student_t_cdf(0.0, df) - 0.5).abs() < 1e-12);
            let a = student_t_cdf(1.3, df);
            let b = student_t_cdf(-1.3, df);
            assert!((a + b - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn cauchy_cdf_closed_form() {
        // df = 1 is the Cauchy distribution: F(t) = 1/2 + atan(t)/π.
        for &t in &[-3.0, -0.5, 0.7, 2.0] {
            let expected = 0.5 + f64::atan(t) / std::f64::consts::PI;
            assert!((student_t_cdf(t, 1.0) - expected).abs() < 1e-9, "t={t}");
        }
    }

    #[test]
    fn quantiles_match_reference_tables() {
        let cases = [
            (0.975, 1.0, 12.706_204_736),
            (0.975, 2.0, 4.302_652_730),
            (0.975, 10.0, 2.228_138_852),
            (0.975, 30.0, 2.042_272_456),
            (0.95, 5.0, 2.015_048_373),
            (0.995, 20.0, 2.845_339_707),
        ];
        for (p, df, expected) in cases {
            let q = student_t_quantile(p, df);
            assert!((q - expected).abs() < 1e-6, "p={p} df={df}: {q} vs {expected}");
        }
    }

    #[test]
    fn quantile_approaches_normal_for_large_df() {
        let q = student_t_quantile(0.975, 1e6);
        assert!((q - 1.959_964).abs() < 1e-4);
    }

    #[test]
    fn quantile_lower_tail_is_negative() {
        let q = student_t_quantile(0.025, 10.0);
        assert!((q + 2.228_138_852).abs() < 1e-6);
    }

    #[test]
    fn quantile_rejects_bad_inputs() {
        assert!(student_t_quantile(0.0, 5.0).is_nan());
        assert!(student_t_quantile(1.0, 5.0).is_nan());
        assert!(student_t_quantile(0.5, 0.0).is_nan());
    }

    #[test]
    fn critical_value_for_95_percent() {
        assert!((t_critical(0.95, 10) - 2.228_138_852).abs() < 1e-6);
    }
}
