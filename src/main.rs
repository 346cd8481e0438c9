//! `mind-graph` CLI: compile a JSON model description and print its
//! schedule.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use log::info;

use mind_graph::ir::{format_graph, format_schedule};
use mind_graph::model::ModelDescription;
use mind_graph::ops::OpRegistry;
use mind_graph::options::SessionOptions;
use mind_graph::pipeline::compile_model;
use mind_graph::scheduler::{liveness_profile, peak_liveness, DependencyGraph, OpsBeforeKey};

/// Graph compiler for MIND training models.
#[derive(Parser, Debug)]
#[command(name = "mind-graph")]
#[command(about = "Differentiate, prune and schedule MIND model graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a model description
    Compile {
        /// Model description (JSON)
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Session options (TOML)
        #[arg(short, long, value_name = "FILE")]
        options: Option<PathBuf>,

        /// Loss tensor, overriding the options file
        #[arg(long)]
        loss: Option<String>,

        /// Disable pruning
        #[arg(long)]
        no_prune: bool,

        /// Print the whole graph instead of the schedule only
        #[arg(long)]
        graph: bool,
    },

    /// List the registered op types
    ListOps,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Compile {
            model,
            options,
            loss,
            no_prune,
            graph,
        }) => compile(model, options, loss, no_prune, graph),
        Some(Commands::ListOps) => {
            for sig in OpRegistry::builtin().signatures() {
                let grad = if sig.differentiable { "grad" } else { "-" };
                let arity = format!("{:?}", sig.arity);
                println!("{:<20} {arity:<20} {grad:<5} {}", sig.name, sig.summary);
            }
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn compile(
    model: PathBuf,
    options: Option<PathBuf>,
    loss: Option<String>,
    no_prune: bool,
    print_graph: bool,
) -> Result<()> {
    let description = ModelDescription::load(&model)
        .with_context(|| format!("loading model {}", model.display()))?;
    let mut session = match &options {
        Some(path) => SessionOptions::load(path)
            .with_context(|| format!("loading options {}", path.display()))?,
        None => SessionOptions::default(),
    };
    if loss.is_some() {
        session.loss = loss;
    }
    if no_prune {
        session.enable_pruning = false;
    }

    let registry = OpRegistry::builtin();
    let products = compile_model(&description, &registry, &session)
        .with_context(|| format!("compiling {}", model.display()))?;

    let dag = DependencyGraph::build(
        &products.graph,
        &OpsBeforeKey::new(),
        products.graph.scheduler_options(),
    )?;
    let nodes = dag.nodes_of(&products.schedule)?;
    let peak = peak_liveness(&liveness_profile(&dag, &nodes));
    info!("peak liveness {peak} bytes");

    if print_graph {
        print!("{}", format_graph(&products.graph));
    }
    print!("{}", format_schedule(&products.graph, &products.schedule));
    #[cfg(feature = "autodiff")]
    if let Some(gradients) = &products.gradients {
        println!("{gradients}");
    }
    if let Some(stats) = products.pruned {
        println!(
            "Pruned {} ops, {} tensors",
            stats.ops_removed, stats.tensors_removed
        );
    }
    println!("Peak liveness: {peak} bytes");
    Ok(())
}
