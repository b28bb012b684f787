// src/metrics.rs
//
// Statistics helpers shared by the policy comparer and the action selectors.
// - OnlineStats: Welford running mean/variance
// - PolicyComparison: means, standard errors, paired errors and z statistics
//   for several (possibly unequal-length) sample vectors
// - normal_cdf: standard normal CDF
//
// Deterministic: no randomness, no hidden state.

use crate::error::{EngineError, Result};

/// Cap on reported z statistics; also the value used when the paired error
/// vanishes but the difference does not.
pub const Z_CAP: f64 = 100.0;

const SE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
}

impl OnlineStats {
    /// Adds a sample if finite. Non-finite samples are ignored.
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / (self.n as f64);
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn from_slice(xs: &[f64]) -> Self {
        let mut stats = Self::default();
        for &x in xs {
            stats.add(x);
        }
        stats
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (divide by n-1).
    pub fn variance_sample(&self) -> f64 {
        if self.n <= 1 {
            0.0
        } else {
            self.m2 / ((self.n as f64) - 1.0)
        }
    }

    /// Standard error of the mean.
    pub fn standard_error(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            (self.variance_sample() / self.n as f64).sqrt()
        }
    }
}

/// Sample covariance over the first `min(a.len(), b.len())` entries.
pub fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n <= 1 {
        return 0.0;
    }
    let ma = a[..n].iter().sum::<f64>() / n as f64;
    let mb = b[..n].iter().sum::<f64>() / n as f64;
    let s: f64 = a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum();
    s / (n as f64 - 1.0)
}

// Numerical Recipes erfc, fractional error below 1.2e-7.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Summary statistics for a set of competing sample vectors.
///
/// Entry `i` is the vector of returns observed for candidate `i`. Pairing
/// uses the common prefix of two vectors: sample `r` of both candidates was
/// produced with the same random streams.
#[derive(Debug, Clone)]
pub struct PolicyComparison {
    means: Vec<f64>,
    variances: Vec<f64>,
    lens: Vec<usize>,
    covariances: Vec<Vec<f64>>,
    samples: Vec<Vec<f64>>,
}

impl PolicyComparison {
    pub fn new(samples: &[Vec<f64>]) -> Result<Self> {
        if samples.is_empty() {
            return Err(EngineError::logic("policy comparison needs at least one candidate"));
        }
        if let Some(i) = samples.iter().position(|s| s.is_empty()) {
            return Err(EngineError::logic(format!(
                "policy comparison: candidate {i} has no samples"
            )));
        }

        let stats: Vec<OnlineStats> = samples.iter().map(|s| OnlineStats::from_slice(s)).collect();
        let k = samples.len();
        let mut covariances = vec![vec![0.0; k]; k];
        for i in 0..k {
            for j in i..k {
                let c = if i == j {
                    stats[i].variance_sample()
                } else {
                    sample_covariance(&samples[i], &samples[j])
                };
                covariances[i][j] = c;
                covariances[j][i] = c;
            }
        }

        Ok(Self {
            means: stats.iter().map(OnlineStats::mean).collect(),
            variances: stats.iter().map(OnlineStats::variance_sample).collect(),
            lens: samples.iter().map(Vec::len).collect(),
            covariances,
            samples: samples.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.means.len()
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    pub fn mean(&self, i: usize) -> f64 {
        self.means[i]
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn standard_error(&self, i: usize) -> f64 {
        (self.variances[i] / self.lens[i] as f64).sqrt()
    }

    /// Mean of `x_i[r] - x_j[r]` over the common prefix.
    pub fn mean_difference(&self, i: usize, j: usize) -> f64 {
        if self.lens[i] == self.lens[j] {
            return self.means[i] - self.means[j];
        }
        let n = self.lens[i].min(self.lens[j]);
        let total: f64 = self.samples[i][..n]
            .iter()
            .zip(&self.samples[j][..n])
            .map(|(a, b)| a - b)
            .sum();
        total / n as f64
    }

    /// Standard error of `mean(i) - mean(j)` for paired samples.
    pub fn paired_standard_error(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let n = self.lens[i].min(self.lens[j]) as f64;
        let var = self.variances[i] + self.variances[j] - 2.0 * self.covariances[i][j];
        (var.max(0.0) / n).sqrt()
    }

    /// Index of the largest mean; ties go to the lowest index.
    pub fn best(&self) -> usize {
        let mut best = 0;
        for (i, m) in self.means.iter().enumerate() {
            if *m > self.means[best] {
                best = i;
            }
        }
        best
    }

    /// z statistic of `best` against every candidate; `0` at `best` itself.
    /// Larger means are better.
    pub fn z_statistics(&self, best: usize) -> Vec<f64> {
        (0..self.len())
            .map(|i| {
                if i == best {
                    return 0.0;
                }
                let diff = self.mean_difference(best, i);
                let se = self.paired_standard_error(best, i);
                if se < SE_EPS {
                    if diff > 0.0 {
                        Z_CAP
                    } else {
                        0.0
                    }
                } else {
                    (diff / se).min(Z_CAP)
                }
            })
            .collect()
    }

    /// Smallest z over the non-best candidates, `Z_CAP` when there are none.
    pub fn min_z_statistic(&self, best: usize) -> f64 {
        self.z_statistics(best)
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best)
            .fold(Z_CAP, |acc, (_, z)| acc.min(*z))
    }

    /// Value-based action probabilities: weight 1 for `best`,
    /// `min(1, 2 * Phi(-z_i))` otherwise, normalised.
    pub fn probabilities(&self, best: usize) -> Vec<f64> {
        let z = self.z_statistics(best);
        let weights: Vec<f64> = z
            .iter()
            .enumerate()
            .map(|(i, z)| {
                if i == best {
                    1.0
                } else {
                    (2.0 * normal_cdf(-z)).min(1.0)
                }
            })
            .collect();
        let total: f64 = weights.iter().sum();
        weights.into_iter().map(|w| w / total).collect()
    }
}

/// Probability one on `best`.
pub fn one_hot(len: usize, best: usize) -> Vec<f64> {
    (0..len).map(|i| if i == best { 1.0 } else { 0.0 }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_two_pass() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = OnlineStats::from_slice(&xs);
        assert_eq!(s.n(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.variance_sample() - 32.0 / 7.0).abs() < 1e-12);
        assert!((s.standard_error() - (32.0 / 7.0 / 8.0_f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975_002_1).abs() < 1e-6);
        assert!((normal_cdf(-1.0) - 0.158_655_25).abs() < 1e-6);
        assert!(normal_cdf(-40.0) >= 0.0);
    }

    #[test]
    fn paired_samples_shrink_error() {
        // Candidate 1 is candidate 0 shifted by a constant: the paired
        // difference has zero variance.
        let a: Vec<f64> = (0..50).map(|i| (i % 7) as f64).collect();
        let b: Vec<f64> = a.iter().map(|x| x + 2.0).collect();
        let cmp = PolicyComparison::new(&[a, b]).unwrap();
        assert_eq!(cmp.best(), 1);
        assert!(cmp.paired_standard_error(0, 1) < 1e-6);
        assert!(cmp.standard_error(0) > 0.1);
        assert_eq!(cmp.z_statistics(1)[0], Z_CAP);
        assert_eq!(cmp.min_z_statistic(1), Z_CAP);
        let p = cmp.probabilities(1);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[1] > 0.99);
    }

    #[test]
    fn indistinguishable_candidates_share_probability() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let cmp = PolicyComparison::new(&[a.clone(), a]).unwrap();
        assert_eq!(cmp.best(), 0);
        assert_eq!(cmp.min_z_statistic(0), 0.0);
        let p = cmp.probabilities(0);
        assert!((p[0] - 0.5).abs() < 1e-6 && (p[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unequal_lengths_pair_on_common_prefix() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![0.0, 1.0, 2.0];
        let cmp = PolicyComparison::new(&[a, b]).unwrap();
        assert!((cmp.mean(0) - 3.5).abs() < 1e-12);
        assert!((cmp.mean(1) - 1.0).abs() < 1e-12);
        // Paired over the first three entries only.
        assert!((cmp.mean_difference(0, 1) - 1.0).abs() < 1e-12);
        assert!(cmp.paired_standard_error(0, 1).is_finite());
        assert!(PolicyComparison::new(&[vec![1.0], vec![]]).is_err());
    }

    #[test]
    fn one_hot_sums_to_one() {
        assert_eq!(one_hot(3, 1), vec![0.0, 1.0, 0.0]);
    }
}
