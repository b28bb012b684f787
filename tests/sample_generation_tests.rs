use std::path::Path;
use std::sync::Arc;

use mdpsim::{
    LocalNode, Mdp, Node, Registry, Runtime, SampleData, SampleGenerator, VarGroup,
};

fn noisy_countdown() -> Arc<dyn Mdp> {
    let cfg = VarGroup::new()
        .with("id", "countdown")
        .unwrap()
        .with("length", 6)
        .unwrap()
        .with("noise_max", 3)
        .unwrap()
        .with("action_penalty", 0.5)
        .unwrap();
    Registry::with_reference_models().get_mdp(&cfg).unwrap()
}

fn sampler_config(shuffle: bool) -> VarGroup {
    VarGroup::new()
        .with("N", 40)
        .unwrap()
        .with("M", 6)
        .unwrap()
        .with("samples_per_stream", 7)
        .unwrap()
        .with("sampling_probability", 0.6)
        .unwrap()
        .with("shuffle", shuffle)
        .unwrap()
        .with("silent", true)
        .unwrap()
}

/// (sample_number, action_label, q_hat) triples in file order.
fn summary(mdp: &Arc<dyn Mdp>, path: &Path) -> Vec<(u64, usize, f64)> {
    SampleData::load(mdp.clone(), path)
        .unwrap()
        .samples()
        .iter()
        .map(|s| (s.sample_number, s.action_label, s.q_hat))
        .collect()
}

fn generate_single(mdp: &Arc<dyn Mdp>, work: &Path, threads: usize, out: &Path) -> usize {
    let runtime = Runtime::new(work).with_threads(threads).unwrap();
    let mut generator = SampleGenerator::new(mdp.clone(), &sampler_config(false)).unwrap();
    generator.generate_samples(&runtime, None, out).unwrap()
}

fn generate_cluster(mdp: &Arc<dyn Mdp>, work: &Path, nodes: usize, out: &Path) -> usize {
    let cluster = LocalNode::cluster(nodes).unwrap();
    let counts: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|node| {
                let node: Arc<dyn Node> = Arc::new(node);
                let runtime = Runtime::new(work).with_threads(2).unwrap().with_node(node);
                scope.spawn(move || {
                    let mut generator =
                        SampleGenerator::new(mdp.clone(), &sampler_config(false)).unwrap();
                    generator.generate_samples(&runtime, None, out).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    counts[0]
}

#[test]
fn samples_are_independent_of_thread_count() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (dir.path().join("t1.json"), dir.path().join("t4.json"));

    assert_eq!(generate_single(&mdp, dir.path(), 1, &a), 40);
    assert_eq!(generate_single(&mdp, dir.path(), 4, &b), 40);

    let one = summary(&mdp, &a);
    assert_eq!(one, summary(&mdp, &b));
    assert!(one.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(one.first().map(|s| s.0), Some(0));
    assert_eq!(one.last().map(|s| s.0), Some(39));
}

#[test]
fn samples_are_independent_of_node_count() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let (single, multi) = (dir.path().join("n1.json"), dir.path().join("n3.json"));

    generate_single(&mdp, dir.path(), 1, &single);
    assert_eq!(generate_cluster(&mdp, dir.path(), 3, &multi), 40);
    assert_eq!(summary(&mdp, &single), summary(&mdp, &multi));

    // Per-node temporaries are gone once rank 0 has merged them.
    let temp = dir.path().join(mdp.identifier()).join("temp");
    let leftovers = std::fs::read_dir(&temp)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn failing_node_fails_the_whole_cluster() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    // A regular file as work dir: rank 1 cannot create its temp file.
    let work = dir.path().join("not_a_dir");
    std::fs::write(&work, b"").unwrap();
    let out_file = dir.path().join("samples.json");
    let out = out_file.as_path();

    let cluster = LocalNode::cluster(2).unwrap();
    let results: Vec<mdpsim::Result<usize>> = std::thread::scope(|scope| {
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|node| {
                let node: Arc<dyn Node> = Arc::new(node);
                let runtime = Runtime::new(&work).with_threads(2).unwrap().with_node(node);
                let mdp = mdp.clone();
                scope.spawn(move || {
                    SampleGenerator::new(mdp, &sampler_config(false))
                        .unwrap()
                        .generate_samples(&runtime, None, out)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(results[0].as_ref().unwrap_err().is_logic());
    assert!(results[1].is_err());
    assert!(!out_file.exists());
}

#[test]
fn more_nodes_than_streams_leaves_extra_nodes_idle() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let (single, multi) = (dir.path().join("a.json"), dir.path().join("b.json"));

    // 40 samples in streams of 7 -> 6 streams, 8 nodes.
    generate_single(&mdp, dir.path(), 2, &single);
    assert_eq!(generate_cluster(&mdp, dir.path(), 8, &multi), 40);
    assert_eq!(summary(&mdp, &single), summary(&mdp, &multi));
}

#[test]
fn shuffled_output_is_a_permutation() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let (ordered, shuffled) = (dir.path().join("o.json"), dir.path().join("s.json"));

    generate_single(&mdp, dir.path(), 3, &ordered);
    let runtime = Runtime::new(dir.path()).with_threads(3).unwrap();
    let mut generator = SampleGenerator::new(mdp.clone(), &sampler_config(true)).unwrap();
    generator.generate_samples(&runtime, None, &shuffled).unwrap();

    let a = summary(&mdp, &ordered);
    let mut b = summary(&mdp, &shuffled);
    assert_ne!(a, b);
    b.sort_by_key(|s| s.0);
    assert_eq!(a, b);
}

#[test]
fn generations_advance_the_seed_offset() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(2).unwrap();
    let mut generator = SampleGenerator::new(mdp.clone(), &sampler_config(false)).unwrap();
    let (g0, g1) = (dir.path().join("g0.json"), dir.path().join("g1.json"));

    generator.generate_samples(&runtime, None, &g0).unwrap();
    assert_eq!(generator.seed_offset(), 40);
    generator.generate_samples(&runtime, None, &g1).unwrap();
    assert_eq!(generator.seed_offset(), 80);

    assert_ne!(summary(&mdp, &g0), summary(&mdp, &g1));
}

#[test]
fn every_sample_is_well_formed() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("s.json");
    generate_single(&mdp, dir.path(), 2, &out);

    let data = SampleData::load(mdp.clone(), &out).unwrap();
    for s in data.samples() {
        s.validate().unwrap();
        let allowed = mdp.allowed_actions(&s.state).unwrap();
        assert!(allowed.len() > 1);
        assert_eq!(s.q_hat_vec.len(), allowed.len());
        assert!(allowed.contains(&s.action_label));
        let pos = allowed.iter().position(|&a| a == s.action_label).unwrap();
        assert_eq!(s.q_hat, s.q_hat_vec[pos]);
    }
}

#[test]
fn features_are_written_on_request() {
    let mdp = noisy_countdown();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Runtime::new(dir.path()).with_threads(1).unwrap();
    let cfg = sampler_config(false).with("features", true).unwrap();
    let out = dir.path().join("f.json");
    SampleGenerator::new(mdp.clone(), &cfg)
        .unwrap()
        .generate_samples(&runtime, None, &out)
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(raw["num_samples"], 40);
    assert_eq!(raw["mdp_identifier"], mdp.identifier());
    let first = &raw["samples"][0];
    assert_eq!(first["features"].as_array().map(|f| f.len()), Some(2));
}
