//! Two-sample statistical tests used for column drift.
//!
//! Samples are sorted once on construction, so a reference can be scored
//! against many batches without re-sorting. Callers guarantee both samples
//! are non-empty.

use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Floor applied to empty histogram bins before comparing distributions
const EMPTY_BIN_FLOOR: f64 = 0.0001;

/// Floor for the reference standard deviation used to norm Wasserstein
const MIN_NORM: f64 = 0.001;

/// Column values kept sorted, with their distinct values and spread
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    sorted: Vec<f64>,
    distinct: Vec<f64>,
    std_dev: f64,
}

impl Sample {
    pub fn new(mut values: Vec<f64>) -> Self {
        values.sort_by(f64::total_cmp);
        let mut distinct = values.clone();
        distinct.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
        let std_dev = values.iter().population_std_dev();
        Self {
            sorted: values,
            distinct,
            std_dev,
        }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Values in ascending order
    pub fn values(&self) -> &[f64] {
        &self.sorted
    }

    pub fn distinct(&self) -> &[f64] {
        &self.distinct
    }

    /// Population standard deviation, NaN for an empty sample
    pub fn std_dev(&self) -> f64 {
        self.std_dev
    }
}

impl From<&[f64]> for Sample {
    fn from(values: &[f64]) -> Self {
        Self::new(values.to_vec())
    }
}

/// Number of elements `<= value` in a sorted slice
fn count_le(sorted: &[f64], value: f64) -> usize {
    sorted.partition_point(|x| x.total_cmp(&value) != Ordering::Greater)
}

/// Union of two ascending slices of distinct values
fn merge_distinct(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    loop {
        let next = match (a.get(i), b.get(j)) {
            (Some(&x), Some(&y)) => match x.total_cmp(&y) {
                Ordering::Less => {
                    i += 1;
                    x
                }
                Ordering::Greater => {
                    j += 1;
                    y
                }
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                    x
                }
            },
            (Some(&x), None) => {
                i += 1;
                x
            }
            (None, Some(&y)) => {
                j += 1;
                y
            }
            (None, None) => break,
        };
        out.push(next);
    }
    out
}

/// Distinct values across both samples, ascending
pub fn distinct_values(reference: &Sample, current: &Sample) -> Vec<f64> {
    merge_distinct(&reference.distinct, &current.distinct)
}

fn counts_for(keys: &[f64], sample: &Sample) -> Vec<f64> {
    let values = &sample.sorted;
    keys.iter()
        .map(|&k| {
            let lo = values.partition_point(|x| x.total_cmp(&k) == Ordering::Less);
            (count_le(values, k) - lo) as f64
        })
        .collect()
}

fn stats_error(err: impl std::fmt::Display) -> Error {
    Error::Statistics(err.to_string())
}

/// Kolmogorov distribution survival function Q(λ)
fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = sign * 2.0 * (-2.0 * j * j * lambda * lambda).exp();
        sum += term;
        if term.abs() <= 1e-12 * sum.abs() {
            break;
        }
        sign = -sign;
    }
    sum.clamp(0.0, 1.0)
}

/// Two-sample Kolmogorov-Smirnov statistic D
pub fn ks_statistic(reference: &Sample, current: &Sample) -> f64 {
    let (a, b) = (&reference.sorted, &current.sorted);
    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = if a[i] <= b[j] { a[i] } else { b[j] };
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

/// Two-sided K-S p-value from the asymptotic Kolmogorov distribution,
/// scaled by `(√ne + 0.12 + 0.11/√ne)·D`.
///
/// No exact small-sample distribution is used, so for batches of a few
/// dozen rows the value is an approximation.
pub fn ks_p_value(reference: &Sample, current: &Sample) -> f64 {
    let d = ks_statistic(reference, current);
    let (n, m) = (reference.len() as f64, current.len() as f64);
    let en = (n * m / (n + m)).sqrt();
    kolmogorov_q((en + 0.12 + 0.11 / en) * d)
}

/// First Wasserstein distance between the empirical distributions
pub fn wasserstein_distance(reference: &Sample, current: &Sample) -> f64 {
    let (u, v) = (&reference.sorted, &current.sorted);
    let (n, m) = (u.len() as f64, v.len() as f64);
    distinct_values(reference, current)
        .windows(2)
        .map(|w| {
            let u_cdf = count_le(u, w[0]) as f64 / n;
            let v_cdf = count_le(v, w[0]) as f64 / m;
            (u_cdf - v_cdf).abs() * (w[1] - w[0])
        })
        .sum()
}

/// Wasserstein distance normed by the reference standard deviation
pub fn wasserstein_normed(reference: &Sample, current: &Sample) -> f64 {
    let norm = reference.std_dev.max(MIN_NORM);
    wasserstein_distance(reference, current) / norm
}

/// Jensen-Shannon distance (natural log) between category frequencies
pub fn jensen_shannon_distance(reference: &Sample, current: &Sample) -> f64 {
    let keys = distinct_values(reference, current);
    let to_percents = |sample: &Sample| -> Vec<f64> {
        let n = sample.len() as f64;
        counts_for(&keys, sample)
            .into_iter()
            .map(|c| if c == 0.0 { EMPTY_BIN_FLOOR } else { c / n })
            .collect()
    };
    let p = normalize(to_percents(reference));
    let q = normalize(to_percents(current));

    let rel_entr = |a: f64, b: f64| if a > 0.0 { a * (a / b).ln() } else { 0.0 };
    let js: f64 = p
        .iter()
        .zip(&q)
        .map(|(&pi, &qi)| {
            let mi = (pi + qi) / 2.0;
            rel_entr(pi, mi) + rel_entr(qi, mi)
        })
        .sum::<f64>()
        / 2.0;
    js.max(0.0).sqrt()
}

fn normalize(values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    values.into_iter().map(|v| v / total).collect()
}

/// Two-sided Z-test for the difference in share of the reference's most
/// frequent category
pub fn proportion_z_p_value(reference: &Sample, current: &Sample) -> Result<f64> {
    let keys = distinct_values(reference, current);
    if keys.len() <= 1 {
        return Ok(1.0);
    }

    let ref_counts = counts_for(&keys, reference);
    let cur_counts = counts_for(&keys, current);
    let top = ref_counts
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let (n1, n2) = (reference.len() as f64, current.len() as f64);
    let p1 = ref_counts[top] / n1;
    let p2 = cur_counts[top] / n2;
    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let denom = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if denom == 0.0 {
        return Ok(1.0);
    }
    let z = (p1 - p2) / denom;
    let normal = Normal::new(0.0, 1.0).map_err(stats_error)?;
    Ok(2.0 * normal.sf(z.abs()))
}

/// Chi-square goodness of fit of current category counts against the
/// reference frequencies scaled to the current size
pub fn chi_square_p_value(reference: &Sample, current: &Sample) -> Result<f64> {
    let keys = distinct_values(reference, current);
    if keys.len() <= 1 {
        return Ok(1.0);
    }

    let scale = current.len() as f64 / reference.len() as f64;
    let observed = counts_for(&keys, current);
    let expected: Vec<f64> = counts_for(&keys, reference)
        .into_iter()
        .map(|c| c * scale)
        .collect();

    let mut statistic = 0.0;
    for (o, e) in observed.iter().zip(&expected) {
        if *e == 0.0 {
            if *o > 0.0 {
                return Ok(0.0);
            }
            continue;
        }
        statistic += (o - e).powi(2) / e;
    }
    let dof = (keys.len() - 1) as f64;
    let chi2 = ChiSquared::new(dof).map_err(stats_error)?;
    Ok(chi2.sf(statistic))
}
