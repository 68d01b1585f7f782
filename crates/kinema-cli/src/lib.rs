//! # Kinema CLI
//!
//! Command-line tools for baked animation graphs.
//!
//! ## Commands
//! - `bake` - Bake an authoring JSON file into a runtime blob
//! - `inspect` - Dump a blob's states, transitions and parameters
//! - `validate` - Load a blob and check every invariant

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kinema_graph::{bake, blob, AuthorGraph, Blend2DAlgorithm, StateKind, NO_INDEX};

/// Kinema animation graph CLI
#[derive(Parser)]
#[command(name = "kinema")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Bake an authoring JSON file into a runtime blob
    Bake {
        /// Authoring graph JSON
        input: PathBuf,

        /// Output blob path (defaults to the input with a .dmsm extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Default weighting algorithm for unpinned 2D blend states
        #[arg(long, value_parser = parse_algorithm)]
        blend_2d: Option<Blend2DAlgorithm>,
    },

    /// Dump a blob's states, transitions and parameters
    Inspect {
        /// Baked blob path
        blob: PathBuf,
    },

    /// Load a blob and check every invariant
    Validate {
        /// Baked blob path
        blob: PathBuf,
    },
}

fn parse_algorithm(raw: &str) -> std::result::Result<Blend2DAlgorithm, String> {
    match raw {
        "inverse-distance" => Ok(Blend2DAlgorithm::InverseDistance),
        "gradient-band" => Ok(Blend2DAlgorithm::GradientBand),
        other => Err(format!(
            "unknown algorithm '{other}' (expected inverse-distance or gradient-band)"
        )),
    }
}

/// Execute a parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Bake {
            input,
            output,
            blend_2d,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let author: AuthorGraph =
                serde_json::from_str(&text).with_context(|| "parsing authoring graph")?;
            let baked = bake(&author, blend_2d)?;

            let output = output.unwrap_or_else(|| input.with_extension("dmsm"));
            let bytes = blob::encode(&baked.graph);
            std::fs::write(&output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;

            log::info!(
                "baked {} state(s), {} parameter name(s) -> {} ({} bytes)",
                baked.graph.state_count(),
                baked.names.parameters.len(),
                output.display(),
                bytes.len()
            );
            Ok(())
        }

        Commands::Inspect { blob: path } => {
            let graph = load(&path)?;

            log::info!("{}:", path.display());
            log::info!(
                "  parameters: {} bool, {} int, {} float",
                graph.bool_parameter_count(),
                graph.int_parameter_count(),
                graph.float_parameter_count()
            );
            log::info!(
                "  any-state transitions: {}",
                graph.any_transitions().len()
            );
            for (index, state) in graph.states().iter().enumerate() {
                let name = graph.debug_name(index as u16).unwrap_or("<unnamed>");
                let kind = match state.kind {
                    StateKind::Single => "single",
                    StateKind::Linear1D => "linear-1d",
                    StateKind::Directional2D => "directional-2d",
                };
                let default = if index as u16 == graph.default_state() {
                    " (default)"
                } else {
                    ""
                };
                log::info!(
                    "  [{index}] {name}: {kind}, speed {}, {} transition(s){}{}",
                    state.base_speed,
                    state.transition_count,
                    if state.exit_group != NO_INDEX {
                        ", exit state"
                    } else {
                        ""
                    },
                    default
                );
                let (_, outgoing) = graph.outgoing_with_base(state);
                for transition in outgoing {
                    let target = graph
                        .debug_name(transition.to_state)
                        .unwrap_or("<unnamed>");
                    log::info!(
                        "      -> [{}] {target}: {:.3}s, {} condition(s)",
                        transition.to_state,
                        transition.duration,
                        transition.condition_count
                    );
                }
            }
            Ok(())
        }

        Commands::Validate { blob: path } => {
            let graph = load(&path)?;
            log::info!(
                "{}: ok ({} states, {} transitions referenced)",
                path.display(),
                graph.state_count(),
                graph
                    .states()
                    .iter()
                    .map(|s| s.transition_count as usize)
                    .sum::<usize>()
            );
            Ok(())
        }
    }
}

fn load(path: &PathBuf) -> Result<kinema_graph::StateGraph> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let graph = blob::decode(&bytes).with_context(|| format!("decoding {}", path.display()))?;
    Ok(graph)
}
