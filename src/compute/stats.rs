//! Statistical primitives: correlation, significance and eigen-decomposition.

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population variance; 0 for fewer than two values.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Pearson correlation of two equal-length series.
///
/// With a 0/1 series this is the point-biserial correlation. Returns `None`
/// when either series has zero variance or the lengths differ.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if !(denom > f64::EPSILON * (sxx + syy).max(1.0)) {
        return None;
    }
    Some((sxy / denom).clamp(-1.0, 1.0))
}

/// Two-sided p-value of a correlation `r` over `n` samples (Student-t, n-2 df).
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < 3 || !r.is_finite() {
        return 1.0;
    }
    let df = (n - 2) as f64;
    let r2 = r * r;
    if r2 >= 1.0 {
        return 0.0;
    }
    let t2 = r2 * df / (1.0 - r2);
    regularized_incomplete_beta(df / (df + t2), df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Natural log of the gamma function (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut series = 1.000_000_000_190_015;
    for c in COEFFS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only below the mean.
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPS: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Covariance matrix of row-major observations (rows = samples).
pub fn covariance_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dims = rows.first().map_or(0, Vec::len);
    let n = rows.len();
    let mut cov = vec![vec![0.0; dims]; dims];
    if n < 2 {
        return cov;
    }

    let means: Vec<f64> = (0..dims)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / n as f64)
        .collect();

    for row in rows {
        for i in 0..dims {
            let di = row[i] - means[i];
            for j in i..dims {
                cov[i][j] += di * (row[j] - means[j]);
            }
        }
    }
    for i in 0..dims {
        for j in i..dims {
            cov[i][j] /= (n - 1) as f64;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Eigenvalues of a symmetric matrix by cyclic Jacobi rotation, descending.
pub fn symmetric_eigenvalues(matrix: &[Vec<f64>]) -> Vec<f64> {
    const MAX_SWEEPS: usize = 100;
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();

    for _ in 0..MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-22 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k][p];
                    let akq = a[k][q];
                    a[k][p] = c * akp - s * akq;
                    a[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
            }
        }
    }

    let mut eigenvalues: Vec<f64> = (0..n).map(|i| a[i][i].max(0.0)).collect();
    eigenvalues.sort_by(|x, y| y.total_cmp(x));
    eigenvalues
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pearson_perfect() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        let r = pearson(&x, &y).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let z = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &z).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_degenerate() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), None);
        assert_eq!(pearson(&[1.0, 2.0], &[1.0]), None);
    }

    #[test]
    fn test_point_biserial() {
        let scores = [0.1, 0.2, 0.3, 0.8, 0.9, 1.0];
        let flags = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let r = pearson(&scores, &flags).unwrap();
        assert!(r > 0.9);
    }

    #[test]
    fn test_p_value_reference() {
        // r = 0.5, n = 20: t = 2.449, two-sided p ~= 0.0247
        let p = correlation_p_value(0.5, 20);
        assert!((p - 0.0247).abs() < 5e-4, "p = {p}");
        assert_eq!(correlation_p_value(0.0, 20), 1.0);
        assert_eq!(correlation_p_value(1.0, 20), 0.0);
        assert_eq!(correlation_p_value(0.3, 2), 1.0);
    }

    #[test]
    fn test_incomplete_beta_symmetry() {
        let v = regularized_incomplete_beta(0.3, 2.0, 3.0);
        let w = regularized_incomplete_beta(0.7, 3.0, 2.0);
        assert!((v + w - 1.0).abs() < 1e-10);
        assert!((regularized_incomplete_beta(0.5, 1.0, 1.0) - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_eigenvalues_diagonal_and_rotated() {
        let diag = vec![vec![3.0, 0.0], vec![0.0, 1.0]];
        let eig = symmetric_eigenvalues(&diag);
        assert!((eig[0] - 3.0).abs() < 1e-9 && (eig[1] - 1.0).abs() < 1e-9);

        let m = vec![vec![2.0, 1.0], vec![1.0, 2.0]];
        let eig = symmetric_eigenvalues(&m);
        assert!((eig[0] - 3.0).abs() < 1e-9, "{eig:?}");
        assert!((eig[1] - 1.0).abs() < 1e-9, "{eig:?}");
    }

    #[test]
    fn test_covariance_matrix() {
        let rows = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]];
        let cov = covariance_matrix(&rows);
        assert!((cov[0][0] - 1.0).abs() < 1e-12);
        assert!((cov[1][1] - 4.0).abs() < 1e-12);
        assert!((cov[0][1] - 2.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_correlation_and_p_bounded(
            pairs in proptest::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 3..60)
        ) {
            let (x, y): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            if let Some(r) = pearson(&x, &y) {
                prop_assert!((-1.0..=1.0).contains(&r));
                let p = correlation_p_value(r, x.len());
                prop_assert!((0.0..=1.0).contains(&p));
            }
        }
    }
}
