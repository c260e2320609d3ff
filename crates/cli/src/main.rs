//! Ontoscope CLI — symbol queries, rename planning, and snapshot management
//! from the terminal. Calls `ontoscope-core` directly with no server overhead;
//! `onto mcp` runs the stdio MCP server for editor and assistant clients.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ontoscope_core::types::{CoreRequest, ResponseData};
use ontoscope_core::{CoreConfig, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;

/// Ontoscope — layered code intelligence for TypeScript, JavaScript, and Python.
#[derive(Parser)]
#[command(name = "onto", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root (default: current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the definition of a symbol
    Def {
        /// Symbol name
        symbol: String,
    },
    /// Find all references to a symbol
    Refs {
        /// Symbol name
        symbol: String,
    },
    /// Plan a rename (and optionally apply it)
    Rename {
        /// Current name
        from: String,

        /// New name
        to: String,

        /// Apply the staged snapshot (requires ONTOLOGY_APPLY=1)
        #[arg(long)]
        apply: bool,
    },
    /// Build the workspace symbol map (concepts, relationships)
    Map,
    /// Show a bounded overview of the workspace
    Explore {
        /// Maximum files to outline
        #[arg(long, default_value = "25")]
        max_files: usize,
    },
    /// Per-layer health, breaker states, and cache statistics
    Status,
    /// Manage snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Run as MCP stdio server (for Claude Code and other MCP clients)
    Mcp {
        /// Watch the workspace and invalidate caches on file changes
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// List snapshot ids
    List,
    /// Show a snapshot's status and staged diff
    Show { id: String },
    /// Apply a snapshot to the working tree
    Apply {
        id: String,

        /// Skip the base-revision check (pre-image checks still apply)
        #[arg(long)]
        no_check: bool,
    },
    /// Discard a snapshot
    Drop { id: String },
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot resolve current directory")?,
    };
    let config = CoreConfig::load(&root);
    let core = Orchestrator::init(config).await.context("core init failed")?;

    match cli.command {
        Commands::Def { symbol } => {
            let response =
                core.process(CoreRequest::FindDefinition { name: symbol, location: None }).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let ResponseData::Definitions { symbols } = &response.data {
                if symbols.is_empty() {
                    println!("no definition found");
                }
                for s in symbols {
                    println!(
                        "{}:{}:{}  {}  (confidence {:.2})",
                        s.location.uri(),
                        s.location.start.line + 1,
                        s.location.start.col + 1,
                        s.context.as_deref().unwrap_or(&s.name),
                        s.confidence
                    );
                }
            }
        }
        Commands::Refs { symbol } => {
            let response =
                core.process(CoreRequest::FindReferences { name: symbol, location: None }).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let ResponseData::References { symbols } = &response.data {
                println!("{} occurrence(s)", symbols.len());
                for s in symbols {
                    println!(
                        "{}:{}:{}{}",
                        s.location.uri(),
                        s.location.start.line + 1,
                        s.location.start.col + 1,
                        if s.is_definition { "  [definition]" } else { "" }
                    );
                }
            }
        }
        Commands::Rename { from, to, apply } => {
            let response = core.plan_rename(&from, &to).await?;
            let ResponseData::RenamePlan { plan } = &response.data else {
                anyhow::bail!("unexpected response shape");
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{} edit(s) across {} suggestion(s)", plan.edits.len(), plan.suggestions.len());
                for edit in &plan.edits {
                    println!("  {}:{}  {} -> {}", edit.uri, edit.line + 1, edit.old_text, edit.new_text);
                }
                for suggestion in &plan.suggestions {
                    println!(
                        "  suggest: {} -> {} ({}, confidence {:.2}{})",
                        suggestion.target,
                        suggestion.proposal,
                        suggestion.reason,
                        suggestion.confidence,
                        if suggestion.auto_apply { ", auto" } else { "" }
                    );
                }
            }
            if apply {
                let id = plan
                    .snapshot_id
                    .as_deref()
                    .context("nothing staged: no occurrences found")?;
                core.apply_rename(id, true).await?;
                let _ = core.pattern_learner().learn_from_rename(&from, &to, "cli");
                println!("applied snapshot {id}");
            } else if let Some(id) = &plan.snapshot_id {
                println!("staged as snapshot {id} (apply with `onto snapshot apply {id}`)");
            }
        }
        Commands::Map => {
            let summary = core.build_symbol_map().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} files, {} symbols, {} concepts, {} relationships ({} ms)",
                    summary.files,
                    summary.symbols,
                    summary.concepts,
                    summary.relationships,
                    summary.scan_ms
                );
            }
        }
        Commands::Explore { max_files } => {
            print!("{}", ontoscope_core::workspace::explore(core.config(), max_files)?);
        }
        Commands::Status => {
            let health = core.health();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                for layer in &health.layers {
                    println!(
                        "{:<12} enabled={} healthy={} breaker={} invocations={} failures={}",
                        layer.layer.label(),
                        layer.enabled,
                        layer.healthy,
                        layer.breaker,
                        layer.metrics.invocations,
                        layer.metrics.failures
                    );
                }
                println!("cache hit rate: {:.1}%", health.cache_hit_rate * 100.0);
                println!("negative cache entries: {}", health.negative_cache_entries);
                println!("cancellations: {}", health.cancellations);
            }
        }
        Commands::Snapshot { action } => match action {
            SnapshotAction::List => {
                for id in core.snapshot_store().list().await? {
                    println!("{id}");
                }
            }
            SnapshotAction::Show { id } => {
                let status = core.snapshot_store().status(&id).await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
                println!("{}", core.snapshot_store().overlay_diff(&id).await?);
            }
            SnapshotAction::Apply { id, no_check } => {
                core.apply_rename(&id, !no_check).await?;
                println!("applied snapshot {id}");
            }
            SnapshotAction::Drop { id } => {
                core.snapshot_store().drop_snapshot(&id).await?;
                println!("dropped snapshot {id}");
            }
        },
        Commands::Mcp { watch } => {
            let _watcher = if watch {
                ontoscope_core::watch::start_watcher(Arc::clone(&core))
            } else {
                None
            };
            ontoscope_mcp::run_stdio(core).await?;
        }
    }
    Ok(())
}
