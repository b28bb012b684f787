// src/dcl/generator.rs
//
// Sample generator: collects N labeled samples along trajectories driven by a
// rollout policy, spread over threads and nodes.
//
// Work is divided into sample streams of `samples_per_stream` consecutive
// sample numbers. A stream is simulated by one trajectory with its own keyed
// random streams, so the sample set depends on neither thread nor node count.
//
// Flow per call:
// 1. streams are split over nodes, each node runs parallel_compute over its own
// 2. ranks > 0 write <work_dir>/<identifier>/temp/samples_node<rank>.json
// 3. barrier; rank 0 merges, checks ordering, optionally shuffles, writes
// 4. barrier; the seed offset advances by N
// A node that fails at any step aborts the barriers of the whole run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use super::rollout::RolloutContext;
use super::sample::{check_strictly_increasing, Sample};
use super::sample_data::SampleData;
use super::selector::{use_sequential_halving, ActionSelector};
use super::sequential_halving::SequentialHalving;
use super::uniform::UniformActionSelector;
use crate::config::VarGroup;
use crate::error::{EngineError, Result};
use crate::mdp::{Mdp, MAX_STEPS_WITHOUT_DECISION};
use crate::node::Runtime;
use crate::parallel::{get_chunks, get_splits, parallel_compute, ProgressReporter, Split};
use crate::policy::Policy;
use crate::rng::{SeedDomain, SeedKey};
use crate::trajectory::Trajectory;

pub const DEFAULT_SAMPLER_SEED: u64 = 15_112_017;

/// Exclusive upper bound on N.
const MAX_SAMPLES: usize = 1 << 30;

/// Warm-up aborts after this many actions per warm-up period.
const WARMUP_ACTIONS_PER_PERIOD: u64 = 10_000;

/// Consecutive episodes without a single real choice before giving up.
const MAX_IDLE_EPISODES: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub horizon: i64,
    pub m: usize,
    pub n: usize,
    pub sampling_probability: f64,
    pub warmup_periods: i64,
    pub reinitiate_counter: i64,
    pub rng_seed: u64,
    pub enable_sequential_halving: bool,
    pub samples_per_stream: usize,
    pub shuffle: bool,
    pub silent: bool,
    pub features: bool,
    /// Finite horizon only: an episode must reach Final within this many periods.
    pub max_periods_until_error: i64,
    /// Indent width of the written sample file; `None` writes compact JSON.
    pub json_indent: Option<usize>,
}

impl SamplerConfig {
    pub fn from_config(mdp: &dyn Mdp, config: &VarGroup, default_seed: u64) -> Result<Self> {
        let infinite = mdp.is_infinite_horizon();
        let horizon: i64 = config.get_or("H", if infinite { 40 } else { 256 })?;
        let m: i64 = config.get_or("M", 1000)?;
        let n: i64 = config.get_or("N", 5000)?;
        let sampling_probability: f64 = config.get_or("sampling_probability", 1.0)?;
        let (warmup_periods, reinitiate_counter) = if infinite {
            (
                config.get_or::<i64>("L", 100)?,
                config.get_or::<i64>("reinitiate_counter", 1_048_576)?,
            )
        } else {
            (0, 0)
        };
        let rng_seed: i64 = config.get_or("rng_seed", default_seed as i64)?;
        let samples_per_stream: i64 = config.get_or("samples_per_stream", 64)?;
        let max_periods_until_error: i64 = config.get_or("max_periods_until_error", 16384)?;
        let json_save_format: i64 = config.get_or("json_save_format", -1)?;

        if horizon < 1 {
            return Err(EngineError::config(format!("H must be >= 1, got {horizon}")));
        }
        if m < 1 {
            return Err(EngineError::config(format!("M must be >= 1, got {m}")));
        }
        if n < 1 || n as u64 >= MAX_SAMPLES as u64 {
            return Err(EngineError::config(format!(
                "N must be in [1, {MAX_SAMPLES}), got {n}"
            )));
        }
        if sampling_probability == 0.0 {
            return Err(EngineError::config(
                "sampling_probability 0 would never collect a sample; use a value in (0, 1]",
            ));
        }
        if !(sampling_probability > 0.0 && sampling_probability <= 1.0) {
            return Err(EngineError::config(format!(
                "sampling_probability must be in (0, 1], got {sampling_probability}"
            )));
        }
        if warmup_periods < 0 {
            return Err(EngineError::config(format!("L must be >= 0, got {warmup_periods}")));
        }
        if infinite && reinitiate_counter < 1 {
            return Err(EngineError::config("reinitiate_counter must be >= 1"));
        }
        if rng_seed < 0 {
            return Err(EngineError::config(format!("rng_seed must be >= 0, got {rng_seed}")));
        }
        if samples_per_stream < 1 {
            return Err(EngineError::config("samples_per_stream must be >= 1"));
        }
        if !infinite && max_periods_until_error < 1 {
            return Err(EngineError::config("max_periods_until_error must be >= 1"));
        }
        if json_save_format < -1 {
            return Err(EngineError::config(format!(
                "json_save_format must be -1 (compact) or an indent width, got {json_save_format}"
            )));
        }

        Ok(Self {
            horizon,
            m: m as usize,
            n: n as usize,
            sampling_probability,
            warmup_periods,
            reinitiate_counter,
            rng_seed: rng_seed as u64,
            enable_sequential_halving: config.get_or("enable_sequential_halving", true)?,
            samples_per_stream: samples_per_stream as usize,
            shuffle: config.get_or("shuffle", true)?,
            silent: config.get_or("silent", false)?,
            features: config.get_or("features", false)?,
            max_periods_until_error,
            json_indent: usize::try_from(json_save_format).ok(),
        })
    }
}

#[cfg(target_has_atomic = "64")]
mod progress {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    #[derive(Default)]
    pub(super) struct Progress {
        collected: AtomicU64,
    }

    impl Progress {
        pub(super) fn record(&self) {
            self.collected.fetch_add(1, Ordering::Relaxed);
        }

        pub(super) fn reporter(&self, total: usize) -> ProgressReporter<'_> {
            Box::new(move |signal| {
                let mut last = Instant::now();
                while !signal.should_stop() {
                    std::thread::sleep(Duration::from_millis(20));
                    if last.elapsed() >= Duration::from_secs(2) {
                        let done = self.collected.load(Ordering::Relaxed);
                        info!(collected = done, total, "collecting samples");
                        last = Instant::now();
                    }
                }
            })
        }
    }
}

#[cfg(not(target_has_atomic = "64"))]
mod progress {
    use super::*;

    #[derive(Default)]
    pub(super) struct Progress;

    impl Progress {
        pub(super) fn record(&self) {}

        pub(super) fn reporter(&self, total: usize) -> ProgressReporter<'_> {
            Box::new(move |_signal| {
                info!(total, "collecting samples; progress reporting not available");
            })
        }
    }
}

use progress::Progress;

pub struct SampleGenerator {
    mdp: Arc<dyn Mdp>,
    config: SamplerConfig,
    seed_offset: u64,
}

impl SampleGenerator {
    pub fn new(mdp: Arc<dyn Mdp>, config: &VarGroup) -> Result<Self> {
        Self::with_default_seed(mdp, config, DEFAULT_SAMPLER_SEED)
    }

    pub(crate) fn with_default_seed(
        mdp: Arc<dyn Mdp>,
        config: &VarGroup,
        default_seed: u64,
    ) -> Result<Self> {
        let config = SamplerConfig::from_config(mdp.as_ref(), config, default_seed)?;
        Ok(Self {
            mdp,
            config,
            seed_offset: 0,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Added to every stream key; advances by N per generation.
    pub fn seed_offset(&self) -> u64 {
        self.seed_offset
    }

    fn temp_path(&self, runtime: &Runtime, rank: usize) -> PathBuf {
        runtime
            .work_dir()
            .join(self.mdp.identifier())
            .join("temp")
            .join(format!("samples_node{rank}.json"))
    }

    /// Collect N samples under `policy` (random when `None`) and write them to
    /// `path` on rank 0. Returns the number of samples in the written file on
    /// rank 0 and the number collected locally on other ranks.
    ///
    /// A failure on any node aborts the run's barriers, so every node returns
    /// an error.
    pub fn generate_samples(
        &mut self,
        runtime: &Runtime,
        policy: Option<Arc<dyn Policy>>,
        path: &Path,
    ) -> Result<usize> {
        let result = self.generate_on_node(runtime, policy, path);
        if result.is_err() {
            runtime.node().abort();
        }
        result
    }

    fn generate_on_node(
        &mut self,
        runtime: &Runtime,
        policy: Option<Arc<dyn Policy>>,
        path: &Path,
    ) -> Result<usize> {
        let policy = match policy {
            Some(p) => p,
            None => self.mdp.get_policy("random")?,
        };
        if policy.mdp_identifier() != self.mdp.identifier() {
            return Err(EngineError::logic(format!(
                "sampling policy '{}' belongs to {}, not {}",
                policy.type_identifier(),
                policy.mdp_identifier(),
                self.mdp.identifier()
            )));
        }

        let node = runtime.node();
        let (rank, world) = (node.rank(), node.world_size());
        let streams = get_chunks(self.config.n, self.config.samples_per_stream)?;
        let active_nodes = world.min(streams.len());

        if !self.config.silent && node.is_root() {
            info!(
                mdp = self.mdp.identifier(),
                policy = policy.type_identifier(),
                n = self.config.n,
                streams = streams.len(),
                nodes = active_nodes,
                threads = runtime.threads(),
                "generating samples"
            );
        }

        let mut local: Vec<Sample> = Vec::new();
        if rank < active_nodes {
            let (first, last) = get_splits(streams.len(), active_nodes)?[rank];
            let mut per_stream: Vec<Vec<Sample>> = vec![Vec::new(); last - first];
            let progress = Progress::default();
            let reporter = if self.config.silent || !node.is_root() {
                None
            } else {
                Some(progress.reporter(self.config.n))
            };
            let this = &*self;
            let policy_ref = policy.as_ref();
            parallel_compute(
                &mut per_stream,
                |out: &mut [Vec<Sample>], offset| {
                    for (i, slot) in out.iter_mut().enumerate() {
                        let stream = first + offset + i;
                        *slot = this.sample_stream(policy_ref, stream, streams[stream], &progress)?;
                    }
                    Ok(())
                },
                runtime.threads(),
                reporter,
            )?;
            local = per_stream.into_iter().flatten().collect();
        }
        check_strictly_increasing(&local)?;
        let local_count = local.len();

        if rank > 0 && rank < active_nodes {
            let mut data = SampleData::new(self.mdp.clone());
            data.extend(std::mem::take(&mut local));
            data.save(&self.temp_path(runtime, rank), false, None)?;
        }
        node.barrier()?;

        let mut written = local_count;
        if node.is_root() {
            let mut data = SampleData::new(self.mdp.clone());
            data.extend(local);
            for other in 1..active_nodes {
                let temp = self.temp_path(runtime, other);
                data.add_from_file(&temp)?;
                node.remove_file(&temp)?;
            }
            check_strictly_increasing(data.samples())?;
            if self.config.shuffle {
                let mut rng = SeedKey::new(self.config.rng_seed, SeedDomain::Shuffle)
                    .offset(self.seed_offset)
                    .rng();
                data.shuffle(&mut rng);
            }
            data.save(path, self.config.features, self.config.json_indent)?;
            written = data.len();
            if !self.config.silent {
                info!(samples = written, path = %path.display(), "samples written");
            }
        }
        node.barrier()?;

        self.seed_offset += self.config.n as u64;
        Ok(written)
    }

    fn selector(&self, num_allowed: usize) -> Result<Box<dyn ActionSelector>> {
        let m = self.config.m;
        if use_sequential_halving(self.config.enable_sequential_halving, m, num_allowed) {
            Ok(Box::new(SequentialHalving::new(m)?))
        } else {
            Ok(Box::new(UniformActionSelector::new(m)?))
        }
    }

    /// The action the rollout policy would take, as a position in `allowed`.
    fn prescribed_position(
        &self,
        traj: &Trajectory,
        policy: &dyn Policy,
        allowed: &[usize],
    ) -> Result<Option<usize>> {
        // Decide on a copy so the main trajectory's policy stream is untouched.
        let mut probe = traj.clone();
        policy.set_action(std::slice::from_mut(&mut probe))?;
        Ok(probe
            .next_action
            .and_then(|a| allowed.iter().position(|x| *x == a)))
    }

    fn warm_up(&self, traj: &mut [Trajectory], policy: &dyn Policy) -> Result<()> {
        let cap = self.config.warmup_periods;
        let max_actions = WARMUP_ACTIONS_PER_PERIOD * cap.max(1) as u64;
        let mut actions = 0_u64;
        loop {
            self.mdp.incorporate_until_action(traj, Some(cap))?;
            let category = traj[0].category;
            if category.is_end_of_horizon() {
                return Ok(());
            }
            if category.is_final() {
                return Err(EngineError::logic(format!(
                    "{}: Final state during warm-up of an infinite-horizon mdp",
                    self.mdp.identifier()
                )));
            }
            if !category.is_await_action() {
                return Err(EngineError::logic(format!(
                    "{}: warm-up stopped in category {category}",
                    self.mdp.identifier()
                )));
            }
            self.mdp.incorporate_action_with(traj, policy)?;
            actions += 1;
            if actions > max_actions {
                return Err(EngineError::logic(format!(
                    "{}: more than {max_actions} actions during a {cap}-period warm-up; \
                     the mdp hardly advances time",
                    self.mdp.identifier()
                )));
            }
        }
    }

    fn sample_stream(
        &self,
        policy: &dyn Policy,
        stream: usize,
        (start, end): Split,
        progress: &Progress,
    ) -> Result<Vec<Sample>> {
        let cfg = &self.config;
        let mdp = self.mdp.as_ref();
        let infinite = mdp.is_infinite_horizon();
        let stream_key = self.seed_offset + stream as u64;
        let wanted = end - start;
        let cap = if infinite { None } else { Some(cfg.max_periods_until_error) };

        let mut samples = Vec::with_capacity(wanted);
        let mut gate = SeedKey::new(cfg.rng_seed, SeedDomain::Gate)
            .offset(stream_key)
            .rng();
        let mut traj = vec![Trajectory::new(
            stream as u64,
            SeedKey::new(cfg.rng_seed, SeedDomain::Sampling).offset(stream_key),
        )];
        let mut reached_final = false;
        let mut episodes = 0_u64;
        let mut idle_episodes = 0_u64;
        let mut had_choice = true;

        'episodes: while samples.len() < wanted {
            if had_choice {
                idle_episodes = 0;
            } else {
                idle_episodes += 1;
                if idle_episodes > MAX_IDLE_EPISODES {
                    return Err(EngineError::logic(format!(
                        "{}: {MAX_IDLE_EPISODES} episodes in a row without a state \
                         offering more than one action",
                        mdp.identifier()
                    )));
                }
            }
            had_choice = false;
            mdp.initiate_state(&mut traj)?;
            episodes += 1;
            if infinite {
                self.warm_up(&mut traj, policy)?;
            }

            let mut decisions = 0_u64;
            loop {
                let awaits = mdp.incorporate_until_action(&mut traj, cap)?;
                if !awaits {
                    let category = traj[0].category;
                    if category.is_final() {
                        if infinite {
                            return Err(EngineError::logic(format!(
                                "{}: infinite-horizon mdp reached a Final state",
                                mdp.identifier()
                            )));
                        }
                        reached_final = true;
                        continue 'episodes;
                    }
                    if category.is_end_of_horizon() {
                        return Err(EngineError::logic(format!(
                            "{}: no Final state within {} periods",
                            mdp.identifier(),
                            cfg.max_periods_until_error
                        )));
                    }
                    return Err(EngineError::logic(format!(
                        "{}: trajectory in category {category} after advancing",
                        mdp.identifier()
                    )));
                }
                decisions += 1;
                if decisions > MAX_STEPS_WITHOUT_DECISION {
                    return Err(EngineError::logic(format!(
                        "{}: more than {MAX_STEPS_WITHOUT_DECISION} decisions in one episode",
                        mdp.identifier()
                    )));
                }
                if infinite && traj[0].period_count >= cfg.reinitiate_counter + cfg.warmup_periods {
                    continue 'episodes;
                }

                let allowed = mdp.allowed_actions(traj[0].require_state()?)?;
                if allowed.len() > 1 {
                    had_choice = true;
                }
                if allowed.len() == 1 {
                    traj[0].next_action = Some(allowed[0]);
                } else if gate.gen::<f64>() < cfg.sampling_probability {
                    let sample_number = (start + samples.len()) as u64;
                    let prescribed = self.prescribed_position(&traj[0], policy, &allowed)?;
                    let root = traj[0].require_state()?;
                    let ctx = RolloutContext {
                        mdp,
                        policy,
                        root,
                        horizon: cfg.horizon,
                        base_seed: cfg.rng_seed,
                        stream_offset: self.seed_offset + sample_number,
                    };
                    let outcome = self.selector(allowed.len())?.select(&ctx, &allowed, prescribed)?;
                    samples.push(Sample {
                        sample_number,
                        action_label: outcome.action_label,
                        state: root.clone(),
                        q_hat: outcome.q_hat,
                        z_stat: outcome.z_stat,
                        q_hat_vec: outcome.q_hat_vec,
                        cost_improvement: outcome.cost_improvement,
                        probabilities: outcome.probabilities,
                    });
                    progress.record();
                    if samples.len() == wanted {
                        break 'episodes;
                    }
                    traj[0].next_action = Some(outcome.action_label);
                } else {
                    policy.set_action(&mut traj)?;
                }
                mdp.incorporate_action(&mut traj)?;
            }
        }

        if !infinite && !reached_final {
            warn!(
                mdp = mdp.identifier(),
                stream,
                "no trajectory of this stream reached a Final state; \
                 samples are skewed towards early periods (consider a smaller N or larger M)"
            );
        }
        debug!(stream, episodes, samples = samples.len(), "sample stream done");
        Ok(samples)
    }
}
