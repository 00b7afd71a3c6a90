//! CLI for validating and simulating Switchboard breaker boards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use switchboard_core::{
    layout::{check_layout, SchemaError},
    BoardLayout, BoardSnapshot,
};
use switchboard_runtime::{BreakerRegistry, StaticProbe, TracingNotifier};

#[derive(Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Validate and simulate Switchboard breaker boards"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a layout file against the schema and structural rules
    Validate {
        /// Path to a layout file (YAML or JSON)
        layout: PathBuf,
    },

    /// Print the breaker tree a layout declares
    Inspect {
        /// Path to a layout file (YAML or JSON)
        layout: PathBuf,
    },

    /// Energize a board, run a scripted fault sequence, print the outcome
    Simulate {
        /// Path to a layout file (YAML or JSON)
        layout: PathBuf,

        /// Path to a fault script (YAML)
        #[arg(long)]
        faults: Option<PathBuf>,

        /// Print the final board state as JSON
        #[arg(long)]
        json: bool,
    },
}

/// One step of a simulation script.
#[derive(Debug, Deserialize)]
struct FaultStep {
    /// Circuit the step applies to.
    circuit: String,

    /// Successful calls to record first.
    #[serde(default)]
    requests: u32,

    /// Errors to report after the requests.
    #[serde(default)]
    errors: u32,

    /// Latency attached to each call, in milliseconds.
    #[serde(default = "default_latency")]
    latency_ms: f64,
}

fn default_latency() -> f64 {
    10.0
}

/// A simulation script: steps applied in order.
#[derive(Debug, Deserialize)]
struct FaultScript {
    faults: Vec<FaultStep>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { layout } => validate(&layout),
        Command::Inspect { layout } => inspect(&layout),
        Command::Simulate { layout, faults, json } => simulate(&layout, faults.as_deref(), json).await,
    }
}

fn load_layout(path: &Path) -> Result<BoardLayout> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    if path.extension().is_some_and(|ext| ext == "json") {
        BoardLayout::from_json(&contents)
    } else {
        BoardLayout::from_yaml(&contents)
    }
    .with_context(|| format!("parsing {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    // Schema first for precise error locations, then the structural rules
    // the schema cannot express.
    let value: serde_json::Value = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };

    if let Err(err) = check_layout(&value) {
        if let SchemaError::Violations(violations) = &err {
            for violation in violations {
                eprintln!("schema: {}", violation);
            }
        }
        bail!("{} failed schema validation", path.display());
    }

    let layout = load_layout(path)?;
    let circuits: usize = layout.panels.iter().map(|p| p.circuits.len()).sum();
    println!(
        "{}: ok ({} panels, {} circuits)",
        path.display(),
        layout.panels.len(),
        circuits
    );
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let layout = load_layout(path)?;

    println!("{} (layout {})", layout.name, layout.layout_version);
    let mut panels = layout.panels.clone();
    panels.sort_by_key(|p| p.position);
    for panel in &panels {
        println!("  [{}] {} ({})", panel.position, panel.id, panel.name);
        for circuit in &panel.circuits {
            let ceiling = circuit
                .max_latency_ms
                .map(|ms| format!(", ceiling {}ms", ms))
                .unwrap_or_default();
            println!(
                "      {} ({}, {}{})",
                circuit.id, circuit.name, circuit.category, ceiling
            );
        }
    }
    Ok(())
}

async fn simulate(path: &Path, faults: Option<&Path>, json: bool) -> Result<()> {
    let layout = load_layout(path)?;

    let registry = BreakerRegistry::builder()
        .probe(Arc::new(StaticProbe::healthy(2.0)))
        .notifier(Arc::new(TracingNotifier))
        .build();
    registry
        .apply_layout(&layout, "cli")
        .await
        .context("registering layout")?;
    registry.master_on("cli").await;
    tracing::info!(board = %layout.name, "board energized");

    if let Some(script_path) = faults {
        let contents = std::fs::read_to_string(script_path)
            .with_context(|| format!("reading {}", script_path.display()))?;
        let script: FaultScript =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", script_path.display()))?;

        for step in &script.faults {
            for _ in 0..step.requests {
                if !registry.record_request(&step.circuit, step.latency_ms).await {
                    bail!("unknown circuit in fault script: {}", step.circuit);
                }
            }
            for _ in 0..step.errors {
                if !registry
                    .report_error(&step.circuit, "scripted fault", Some(step.latency_ms))
                    .await
                {
                    bail!("unknown circuit in fault script: {}", step.circuit);
                }
            }
        }
    }

    let state = registry.state().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_state(&state);

        let alerts = registry.alerts(10).await;
        if !alerts.is_empty() {
            println!("\nrecent alerts:");
            for alert in &alerts {
                let ack = if alert.acknowledged { " (ack)" } else { "" };
                println!("  [{}] {}: {}{}", alert.level, alert.source, alert.message, ack);
            }
        }

        let audit = registry.audit_log(10).await;
        println!("\naudit tail:");
        for entry in &audit {
            println!("  #{} {} {} by {}", entry.id, entry.action, entry.target, entry.actor);
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn print_state(state: &BoardSnapshot) {
    println!(
        "master: {} (status {}, power cycles {})",
        state.master.state, state.master.system_status, state.master.power_cycles
    );
    for panel in &state.panels {
        let lock = if panel.panel.locked_out { ", locked" } else { "" };
        println!(
            "  panel {}: {} (health {}, {}/{} circuits active{})",
            panel.panel.id,
            panel.panel.state,
            panel.panel.health,
            panel.active_circuits,
            panel.total_circuits,
            lock
        );
        for circuit in &panel.panel.circuits {
            println!(
                "    circuit {}: {} (health {}, errors {}, trips {}, p95 {:.1}ms)",
                circuit.id,
                circuit.state,
                circuit.health,
                circuit.error_count,
                circuit.trip_count,
                circuit.latency.p95_ms
            );
        }
    }
}
