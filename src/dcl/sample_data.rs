// src/dcl/sample_data.rs
//
// In-memory collection of samples for one mdp, with JSON persistence.

use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use super::sample::{Sample, SampleFile};
use crate::error::{EngineError, Result};
use crate::io::{atomic_write, read_document};
use crate::mdp::Mdp;

pub struct SampleData {
    mdp: Arc<dyn Mdp>,
    samples: Vec<Sample>,
}

impl SampleData {
    pub fn new(mdp: Arc<dyn Mdp>) -> Self {
        Self {
            mdp,
            samples: Vec::new(),
        }
    }

    pub fn load(mdp: Arc<dyn Mdp>, path: &Path) -> Result<Self> {
        let mut data = Self::new(mdp);
        data.add_from_file(path)?;
        Ok(data)
    }

    /// Append the samples stored at `path`. The file must have been written
    /// for an mdp with the same identifier.
    pub fn add_from_file(&mut self, path: &Path) -> Result<()> {
        let doc = read_document(path)?;
        let file: SampleFile =
            serde_json::from_value(doc).map_err(|e| EngineError::parse(path, e))?;
        if file.mdp_identifier != self.mdp.identifier() {
            return Err(EngineError::config(format!(
                "{} holds samples for {}, expected {}",
                path.display(),
                file.mdp_identifier,
                self.mdp.identifier()
            )));
        }
        if file.num_samples != file.samples.len() {
            return Err(EngineError::parse(
                path,
                format!(
                    "num_samples is {} but {} samples are present",
                    file.num_samples,
                    file.samples.len()
                ),
            ));
        }
        self.samples.reserve(file.samples.len());
        for record in file.samples {
            self.samples.push(Sample::from_record(record, self.mdp.as_ref())?);
        }
        Ok(())
    }

    /// Write the sample file; `indent` selects pretty output with that many
    /// spaces per level, `None` compact JSON.
    pub fn save(&self, path: &Path, with_features: bool, indent: Option<usize>) -> Result<()> {
        let records = self
            .samples
            .iter()
            .map(|s| s.to_record(self.mdp.as_ref(), with_features))
            .collect::<Result<Vec<_>>>()?;
        let file = SampleFile {
            mdp_identifier: self.mdp.identifier().to_string(),
            num_samples: records.len(),
            samples: records,
        };
        let bytes = match indent {
            None => serde_json::to_vec(&file),
            Some(width) => {
                let spaces = " ".repeat(width);
                let mut out = Vec::new();
                let formatter = PrettyFormatter::with_indent(spaces.as_bytes());
                let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
                file.serialize(&mut ser).map(|_| out)
            }
        }
        .map_err(|e| EngineError::validation("sample file", e.to_string()))?;
        atomic_write(path, &bytes)
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.extend(samples);
    }

    pub fn shuffle(&mut self, rng: &mut ChaCha8Rng) {
        self.samples.shuffle(rng);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mdp(&self) -> &Arc<dyn Mdp> {
        &self.mdp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VarGroup;
    use crate::registry::Registry;
    use crate::rng::{SeedDomain, SeedKey};
    use crate::trajectory::Trajectory;

    fn countdown(length: i64) -> Arc<dyn Mdp> {
        let cfg = VarGroup::new()
            .with("id", "countdown")
            .unwrap()
            .with("length", length)
            .unwrap();
        Registry::with_reference_models().get_mdp(&cfg).unwrap()
    }

    fn sample_for(mdp: &dyn Mdp, number: u64) -> Sample {
        let mut t = vec![Trajectory::new(number, SeedKey::new(0, SeedDomain::Sampling))];
        mdp.initiate_state(&mut t).unwrap();
        Sample {
            sample_number: number,
            action_label: 1,
            state: t[0].require_state().unwrap().clone(),
            q_hat: 4.0,
            z_stat: 1.5,
            q_hat_vec: vec![5.0, 4.0],
            cost_improvement: vec![0.0, -1.0],
            probabilities: vec![0.2, 0.8],
        }
    }

    #[test]
    fn save_and_load_preserve_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        let mdp = countdown(5);

        let mut data = SampleData::new(mdp.clone());
        data.push(sample_for(mdp.as_ref(), 3));
        data.push(sample_for(mdp.as_ref(), 8));
        data.save(&path, true, None).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["num_samples"], 2);
        assert_eq!(raw["samples"][0]["features"].as_array().unwrap().len(), 2);

        let loaded = SampleData::load(mdp.clone(), &path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.samples()[1].sample_number, 8);
        assert!(mdp.is_conformant(&loaded.samples()[0].state));
    }

    #[test]
    fn foreign_sample_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        let a = countdown(5);
        let mut data = SampleData::new(a.clone());
        data.push(sample_for(a.as_ref(), 0));
        data.save(&path, false, Some(2)).unwrap();

        let err = SampleData::load(countdown(7), &path).err().unwrap();
        assert!(matches!(err, EngineError::Config(_)), "{err}");
    }

    #[test]
    fn indent_selects_pretty_output() {
        let dir = tempfile::tempdir().unwrap();
        let (compact, pretty) = (dir.path().join("c.json"), dir.path().join("p.json"));
        let mdp = countdown(5);
        let mut data = SampleData::new(mdp.clone());
        data.push(sample_for(mdp.as_ref(), 1));
        data.save(&compact, false, None).unwrap();
        data.save(&pretty, false, Some(4)).unwrap();

        let compact_text = std::fs::read_to_string(&compact).unwrap();
        let pretty_text = std::fs::read_to_string(&pretty).unwrap();
        assert!(!compact_text.contains('\n'));
        assert!(pretty_text.contains("\n    \"mdp_identifier\""));

        let a = SampleData::load(mdp.clone(), &compact).unwrap();
        let b = SampleData::load(mdp, &pretty).unwrap();
        assert_eq!(a.samples()[0].sample_number, b.samples()[0].sample_number);
    }

    #[test]
    fn invalid_sample_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        let mdp = countdown(5);
        let mut bad = sample_for(mdp.as_ref(), 0);
        bad.probabilities = vec![0.7, 0.7];
        let mut data = SampleData::new(mdp);
        data.push(bad);
        assert!(data.save(&path, false, None).is_err());
        assert!(!path.exists());
    }
}
