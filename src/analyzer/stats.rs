//! Small numerical helpers shared by the feature extractors.
//!
//! Correlations return `None` where they are undefined (fewer than two
//! points, or zero variance) so callers choose their own sentinel.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by n).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom < 1e-300 || !denom.is_finite() {
        return None;
    }
    Some((sxy / denom).clamp(-1.0, 1.0))
}

/// Kendall's tau-b, accounting for ties in either ranking.
pub fn kendall_tau(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut ties_x = 0i64;
    let mut ties_y = 0i64;
    for i in 0..x.len() {
        for j in (i + 1)..x.len() {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            match (dx == 0.0, dy == 0.0) {
                (true, true) => {}
                (true, false) => ties_x += 1,
                (false, true) => ties_y += 1,
                (false, false) if (dx > 0.0) == (dy > 0.0) => concordant += 1,
                (false, false) => discordant += 1,
            }
        }
    }
    let n1 = (concordant + discordant + ties_x) as f64;
    let n2 = (concordant + discordant + ties_y) as f64;
    if n1 == 0.0 || n2 == 0.0 {
        return None;
    }
    Some((concordant - discordant) as f64 / (n1 * n2).sqrt())
}

/// Piecewise-linear interpolation through `(xp, fp)`, `xp` ascending.
/// Outside `[xp[0], xp[last]]` the result is `fill`.
pub fn interp(x: f64, xp: &[f64], fp: &[f64], fill: f64) -> f64 {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return fill;
    };
    if x < first || x > last || x.is_nan() {
        return fill;
    }
    // first segment whose right end reaches x
    let k = xp.partition_point(|&v| v < x).max(1).min(xp.len() - 1);
    if xp.len() == 1 {
        return fp[0];
    }
    let (x0, x1) = (xp[k - 1], xp[k]);
    let (y0, y1) = (fp[k - 1], fp[k]);
    if x1 == x0 {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

/// Exact integral of the interpolant through `(xp, fp)` (zero outside).
pub fn trapezoid(xp: &[f64], fp: &[f64]) -> f64 {
    xp.windows(2)
        .zip(fp.windows(2))
        .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
        .sum()
}

pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Indices of local maxima of `y` whose topographic prominence is at least
/// `min_prominence`. A flat peak is reported at its middle sample (rounded
/// down); the first and last samples are never peaks.
pub fn find_peaks(y: &[f64], min_prominence: f64) -> Vec<usize> {
    let n = y.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let mut i = 1;
    while i < n - 1 {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }

    peaks.retain(|&p| prominence(y, p) >= min_prominence);
    peaks
}

fn prominence(y: &[f64], peak: usize) -> f64 {
    let height = y[peak];

    let mut left_min = height;
    for &v in y[..=peak].iter().rev() {
        if v > height {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = height;
    for &v in &y[peak..] {
        if v > height {
            break;
        }
        right_min = right_min.min(v);
    }

    height - left_min.max(right_min)
}

/// Two-parameter Levenberg–Marquardt least squares with a forward-difference
/// Jacobian. Steps producing non-finite residuals are rejected. Returns
/// `None` if the starting point already has non-finite residuals.
pub fn least_squares_2d<F>(residual: F, init: [f64; 2]) -> Option<[f64; 2]>
where
    F: Fn([f64; 2]) -> Vec<f64>,
{
    let cost = |r: &[f64]| r.iter().map(|v| v * v).sum::<f64>();
    let finite = |r: &[f64]| r.iter().all(|v| v.is_finite());

    let mut p = init;
    let mut r = residual(p);
    if !finite(&r) {
        return None;
    }
    let mut c = cost(&r);
    let mut lambda = 1e-3;

    for _ in 0..200 {
        // Jacobian columns
        let mut jac = [vec![0.0; r.len()], vec![0.0; r.len()]];
        for (k, col) in jac.iter_mut().enumerate() {
            let h = 1e-7 * p[k].abs().max(1.0);
            let mut shifted = p;
            shifted[k] += h;
            let rk = residual(shifted);
            if !finite(&rk) {
                return Some(p);
            }
            for (dst, (a, b)) in col.iter_mut().zip(rk.iter().zip(&r)) {
                *dst = (a - b) / h;
            }
        }

        let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();
        let a00 = dot(&jac[0], &jac[0]);
        let a01 = dot(&jac[0], &jac[1]);
        let a11 = dot(&jac[1], &jac[1]);
        let g0 = dot(&jac[0], &r);
        let g1 = dot(&jac[1], &r);
        if g0.abs().max(g1.abs()) < 1e-12 {
            break;
        }

        let mut improved = false;
        while lambda < 1e12 {
            let d00 = a00 + lambda * a00.max(1e-12);
            let d11 = a11 + lambda * a11.max(1e-12);
            let det = d00 * d11 - a01 * a01;
            if det.abs() < 1e-300 {
                lambda *= 10.0;
                continue;
            }
            let step = [-(d11 * g0 - a01 * g1) / det, -(d00 * g1 - a01 * g0) / det];
            let candidate = [p[0] + step[0], p[1] + step[1]];
            let rc = residual(candidate);
            if finite(&rc) && cost(&rc) < c {
                let gain = c - cost(&rc);
                p = candidate;
                c = cost(&rc);
                r = rc;
                lambda = (lambda / 10.0).max(1e-12);
                improved = gain > 1e-15 * c.max(1e-15);
                break;
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    Some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_std() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson() {
        let r = pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        let r = pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(pearson(&[1.0], &[1.0]).is_none());
    }

    #[test]
    fn test_kendall_tau() {
        assert_eq!(kendall_tau(&[1.0, 2.0], &[3.0, 4.0]), Some(1.0));
        assert_eq!(kendall_tau(&[1.0, 2.0], &[4.0, 3.0]), Some(-1.0));
        assert!(kendall_tau(&[1.0, 1.0], &[1.0, 1.0]).is_none());
        let tau = kendall_tau(&[1.0, 2.0, 3.0, 4.0], &[1.0, 3.0, 2.0, 4.0]).unwrap();
        assert!((tau - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_interp() {
        let xp = [0.0, 1.0, 3.0];
        let fp = [0.0, 10.0, 30.0];
        assert_eq!(interp(0.5, &xp, &fp, 0.0), 5.0);
        assert_eq!(interp(2.0, &xp, &fp, 0.0), 20.0);
        assert_eq!(interp(3.0, &xp, &fp, 0.0), 30.0);
        assert_eq!(interp(0.0, &xp, &fp, 0.0), 0.0);
        assert_eq!(interp(-1.0, &xp, &fp, -5.0), -5.0);
        assert_eq!(interp(4.0, &xp, &fp, 0.0), 0.0);
    }

    #[test]
    fn test_trapezoid() {
        assert!((trapezoid(&[0.0, 1.0, 3.0], &[0.0, 10.0, 10.0]) - 25.0).abs() < 1e-12);
        assert_eq!(trapezoid(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_linspace() {
        let x = linspace(0.0, 1.0, 5);
        assert_eq!(x, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(0.0, 0.0, 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_find_peaks_prominence() {
        let y = [0.0, 5.0, 0.0, 20.0, 20.0, 20.0, 0.0, 3.0, 1.0];
        assert_eq!(find_peaks(&y, 0.0), vec![1, 4, 7]);
        assert_eq!(find_peaks(&y, 10.0), vec![4]);
        assert!(find_peaks(&[1.0, 1.0, 1.0], 0.0).is_empty());
    }

    #[test]
    fn test_least_squares_recovers_line() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        let fit = least_squares_2d(
            |p| xs.iter().zip(&ys).map(|(x, y)| y - (p[0] * x + p[1])).collect(),
            [0.0, 0.0],
        )
        .unwrap();
        assert!((fit[0] - 2.0).abs() < 1e-6);
        assert!((fit[1] - 1.0).abs() < 1e-6);
    }
}
