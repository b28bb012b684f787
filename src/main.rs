// src/main.rs
//
// Thin harness around the mdpsim library.
// - compare:  assess policies on a model, optionally against a benchmark
// - generate: collect DCL samples, optionally over in-process nodes
// - trace:    print one demonstrated trajectory
// - models:   list registered models
//
// Results go to stdout (or --out) as JSON; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::json;

use mdpsim::io::write_document;
use mdpsim::{
    logging, Demonstrator, LocalNode, Mdp, Node, Policy, PolicyComparer, Registry, Runtime,
    SampleGenerator, VarGroup,
};

/// Command-line arguments for the mdpsim binary.
#[derive(Parser, Debug)]
#[command(name = "mdpsim", version, about = "MDP simulation, DCL sampling and policy comparison")]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Registered model id (see `mdpsim models`).
    #[arg(long)]
    model: String,

    /// JSON or YAML file with model parameters.
    #[arg(long)]
    model_config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate the expected return of one or more policies.
    Compare {
        #[command(flatten)]
        model: ModelArgs,

        /// Policy id or policy config file; repeat for several policies.
        #[arg(long = "policy", required = true)]
        policies: Vec<String>,

        /// Index (into --policy) of the benchmark policy.
        #[arg(long)]
        benchmark: Option<usize>,

        #[arg(long)]
        trajectories: Option<i64>,

        #[arg(long)]
        threads: Option<usize>,

        #[arg(long)]
        seed: Option<i64>,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate labeled samples with rollouts.
    Generate {
        #[command(flatten)]
        model: ModelArgs,

        /// Rollout policy (default: random).
        #[arg(long)]
        policy: Option<String>,

        /// Number of samples.
        #[arg(long = "n")]
        n: i64,

        /// Rollouts per action.
        #[arg(long = "m")]
        m: i64,

        /// Rollout horizon in periods.
        #[arg(long = "horizon")]
        horizon: Option<i64>,

        /// Threads per node.
        #[arg(long)]
        threads: Option<usize>,

        /// Simulated in-process nodes.
        #[arg(long, default_value_t = 1)]
        nodes: usize,

        #[arg(long)]
        seed: Option<i64>,

        /// Keep samples in sample-number order.
        #[arg(long)]
        no_shuffle: bool,

        /// Store flat feature vectors alongside each sample.
        #[arg(long)]
        features: bool,

        /// Directory for per-node temporary files (default: next to --out).
        #[arg(long)]
        work_dir: Option<PathBuf>,

        #[arg(long)]
        out: PathBuf,
    },

    /// Print a single trajectory step by step.
    Trace {
        #[command(flatten)]
        model: ModelArgs,

        #[arg(long, default_value = "random")]
        policy: String,

        #[arg(long, default_value_t = 3)]
        periods: i64,

        #[arg(long)]
        seed: Option<i64>,
    },

    /// List registered models.
    Models,
}

fn build_mdp(registry: &Registry, args: &ModelArgs) -> Result<Arc<dyn Mdp>> {
    let mut config = match &args.model_config {
        Some(path) => VarGroup::load(path)
            .with_context(|| format!("loading model config {}", path.display()))?,
        None => VarGroup::new(),
    };
    config.set("id", &args.model)?;
    registry
        .get_mdp(&config)
        .with_context(|| format!("building model '{}'", args.model))
}

/// A policy spec is either a policy id or the path of a policy config file.
fn build_policy(mdp: &dyn Mdp, spec: &str) -> Result<Arc<dyn Policy>> {
    let path = Path::new(spec);
    let config = if path.is_file() {
        VarGroup::load(path).with_context(|| format!("loading policy config {spec}"))?
    } else {
        VarGroup::new().with("id", spec)?
    };
    mdp.create_policy(&config)
        .with_context(|| format!("creating policy '{spec}'"))
}

fn emit(value: &serde_json::Value, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            write_document(path, value).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let registry = Registry::with_reference_models();

    match cli.command {
        Command::Models => {
            let listing: Vec<_> = registry
                .list()
                .into_iter()
                .map(|(id, description)| json!({ "id": id, "description": description }))
                .collect();
            emit(&json!(listing), None)
        }

        Command::Compare {
            model,
            policies,
            benchmark,
            trajectories,
            threads,
            seed,
            out,
        } => {
            let mdp = build_mdp(&registry, &model)?;
            let mut config = VarGroup::new();
            if let Some(t) = trajectories {
                config.set("number_of_trajectories", t)?;
            }
            if let Some(s) = seed {
                config.set("rng_seed", s)?;
            }
            let mut comparer = PolicyComparer::new(mdp.clone(), &config)?;
            if let Some(t) = threads {
                comparer = comparer.with_threads(t)?;
            }
            let policies = policies
                .iter()
                .map(|spec| build_policy(mdp.as_ref(), spec))
                .collect::<Result<Vec<_>>>()?;
            let assessments = comparer.compare(&policies, benchmark)?;
            emit(&serde_json::to_value(&assessments)?, out.as_deref())
        }

        Command::Generate {
            model,
            policy,
            n,
            m,
            horizon,
            threads,
            nodes,
            seed,
            no_shuffle,
            features,
            work_dir,
            out,
        } => {
            let mdp = build_mdp(&registry, &model)?;
            let policy = policy
                .as_deref()
                .map(|spec| build_policy(mdp.as_ref(), spec))
                .transpose()?;

            let mut config = VarGroup::new()
                .with("N", n)?
                .with("M", m)?
                .with("shuffle", !no_shuffle)?
                .with("features", features)?
                .with("silent", cli.quiet)?;
            if let Some(h) = horizon {
                config.set("H", h)?;
            }
            if let Some(s) = seed {
                config.set("rng_seed", s)?;
            }

            let work_dir = work_dir.unwrap_or_else(|| {
                out.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."))
                    .join("mdpsim_work")
            });
            let mut runtime = Runtime::new(&work_dir);
            if let Some(t) = threads {
                runtime = runtime.with_threads(t)?;
            }

            let written = generate_on_nodes(&mdp, &config, policy, &runtime, nodes, &out)?;
            emit(
                &json!({
                    "mdp_identifier": mdp.identifier(),
                    "num_samples": written,
                    "path": out.display().to_string(),
                }),
                None,
            )
        }

        Command::Trace {
            model,
            policy,
            periods,
            seed,
        } => {
            let mdp = build_mdp(&registry, &model)?;
            let policy = build_policy(mdp.as_ref(), &policy)?;
            let mut config = VarGroup::new().with("max_period_count", periods)?;
            if let Some(s) = seed {
                config.set("rng_seed", s)?;
            }
            let trace = Demonstrator::new(&config)?.trace(mdp.as_ref(), policy.as_ref())?;
            emit(&serde_json::to_value(&trace)?, None)
        }
    }
}

/// Run the generator on `nodes` in-process nodes; returns rank 0's count.
fn generate_on_nodes(
    mdp: &Arc<dyn Mdp>,
    config: &VarGroup,
    policy: Option<Arc<dyn Policy>>,
    runtime: &Runtime,
    nodes: usize,
    out: &Path,
) -> Result<usize> {
    if nodes <= 1 {
        let mut generator = SampleGenerator::new(mdp.clone(), config)?;
        return Ok(generator.generate_samples(runtime, policy, out)?);
    }

    let cluster = LocalNode::cluster(nodes)?;
    let results: Vec<Result<usize>> = std::thread::scope(|scope| {
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|node| {
                let policy = policy.clone();
                let node: Arc<dyn Node> = Arc::new(node);
                let runtime = runtime.clone().with_node(node);
                scope.spawn(move || -> Result<usize> {
                    let mut generator = SampleGenerator::new(mdp.clone(), config)?;
                    Ok(generator.generate_samples(&runtime, policy, out)?)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("node thread panicked"))))
            .collect()
    });

    let mut root_count = 0;
    for (rank, result) in results.into_iter().enumerate() {
        let count = result.with_context(|| format!("node {rank}"))?;
        if rank == 0 {
            root_count = count;
        }
    }
    Ok(root_count)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(if cli.quiet { 0 } else { cli.verbose });
    run(cli)
}
