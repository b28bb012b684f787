// src/dcl/sample.rs
//
// One labeled training sample and its on-disk record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::mdp::Mdp;
use crate::trajectory::ErasedState;

const PROBABILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct Sample {
    pub sample_number: u64,
    pub action_label: usize,
    pub state: ErasedState,
    pub q_hat: f64,
    pub z_stat: f64,
    /// Mean cost per allowed action, in ascending action order.
    pub q_hat_vec: Vec<f64>,
    /// Mean cost difference to the rollout policy's own action.
    pub cost_improvement: Vec<f64>,
    pub probabilities: Vec<f64>,
}

impl Sample {
    /// Probabilities sum to one and every value is finite.
    pub fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("sample {}: {name}", self.sample_number);

        if !self.q_hat.is_finite() {
            return Err(EngineError::validation(field("q_hat"), "not finite"));
        }
        if !self.z_stat.is_finite() {
            return Err(EngineError::validation(field("z_stat"), "not finite"));
        }
        for (name, values) in [
            ("q_hat_vec", &self.q_hat_vec),
            ("cost_improvement", &self.cost_improvement),
            ("probabilities", &self.probabilities),
        ] {
            if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
                return Err(EngineError::validation(
                    field(name),
                    format!("entry {pos} is not finite"),
                ));
            }
        }
        if self.q_hat_vec.len() != self.probabilities.len()
            || self.cost_improvement.len() != self.probabilities.len()
        {
            return Err(EngineError::validation(
                field("probabilities"),
                format!(
                    "length mismatch: q_hat_vec {}, cost_improvement {}, probabilities {}",
                    self.q_hat_vec.len(),
                    self.cost_improvement.len(),
                    self.probabilities.len()
                ),
            ));
        }
        let total: f64 = self.probabilities.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(EngineError::validation(
                field("probabilities"),
                format!("sum to {total}, expected 1"),
            ));
        }
        Ok(())
    }

    /// Validate and convert to the serialisable form.
    pub fn to_record(&self, mdp: &dyn Mdp, with_features: bool) -> Result<SampleRecord> {
        self.validate()?;
        let features = if with_features && mdp.num_flat_features().is_some() {
            Some(mdp.flat_features(&self.state)?)
        } else {
            None
        };
        Ok(SampleRecord {
            sample_number: self.sample_number,
            action_label: self.action_label,
            state: mdp.state_to_value(&self.state)?,
            q_hat: self.q_hat,
            z_stat: self.z_stat,
            q_hat_vec: self.q_hat_vec.clone(),
            cost_improvement: self.cost_improvement.clone(),
            probabilities: self.probabilities.clone(),
            features,
        })
    }

    pub fn from_record(record: SampleRecord, mdp: &dyn Mdp) -> Result<Self> {
        let sample = Sample {
            sample_number: record.sample_number,
            action_label: record.action_label,
            state: mdp.state_from_value(&record.state)?,
            q_hat: record.q_hat,
            z_stat: record.z_stat,
            q_hat_vec: record.q_hat_vec,
            cost_improvement: record.cost_improvement,
            probabilities: record.probabilities,
        };
        sample.validate()?;
        Ok(sample)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_number: u64,
    pub action_label: usize,
    pub state: Value,
    pub q_hat: f64,
    pub z_stat: f64,
    pub q_hat_vec: Vec<f64>,
    pub cost_improvement: Vec<f64>,
    pub probabilities: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFile {
    pub mdp_identifier: String,
    pub num_samples: usize,
    pub samples: Vec<SampleRecord>,
}

/// Logic error unless sample numbers strictly increase.
pub fn check_strictly_increasing(samples: &[Sample]) -> Result<()> {
    for pair in samples.windows(2) {
        if pair[1].sample_number <= pair[0].sample_number {
            return Err(EngineError::logic(format!(
                "sample numbers are not strictly increasing: {} followed by {}",
                pair[0].sample_number, pair[1].sample_number
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(number: u64, probabilities: Vec<f64>) -> Sample {
        let k = probabilities.len();
        Sample {
            sample_number: number,
            action_label: 0,
            state: ErasedState::new(1, 0_i64),
            q_hat: 1.0,
            z_stat: 2.0,
            q_hat_vec: vec![1.0; k],
            cost_improvement: vec![0.0; k],
            probabilities,
        }
    }

    #[test]
    fn probabilities_must_sum_to_one() {
        assert!(sample(0, vec![0.25, 0.75]).validate().is_ok());
        assert!(sample(0, vec![0.5, 0.5 + 1e-7]).validate().is_ok());
        let err = sample(0, vec![0.5, 0.6]).validate().unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }), "{err}");
    }

    #[test]
    fn non_finite_values_rejected() {
        let mut s = sample(3, vec![1.0]);
        s.q_hat_vec[0] = f64::NAN;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("q_hat_vec"), "{err}");

        let mut s = sample(3, vec![1.0]);
        s.z_stat = f64::INFINITY;
        assert!(s.validate().is_err());
    }

    #[test]
    fn ordering_check() {
        let ok = vec![sample(1, vec![1.0]), sample(4, vec![1.0])];
        assert!(check_strictly_increasing(&ok).is_ok());
        let dup = vec![sample(4, vec![1.0]), sample(4, vec![1.0])];
        assert!(check_strictly_increasing(&dup).unwrap_err().is_logic());
    }
}
