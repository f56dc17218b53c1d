// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use flowcore::protocol::{ComponentMessage, DisplayGeometry, InitRequest, MessageKind};
use flowcore::{AssetBuilder, AssetHeader, Assets, EngineMessage, Expression, FlowBuilder, HostMessage, Value};
use flownodes::flow::start;
use flownodes::host::host_message;
use flownodes::instrument::{connect, scpi};
use flownodes::log::log;
use flownodes::logic::{constant, math_with, MathOp};
use flowruntime::{EngineConfig, FlowRuntime, HostBridge, InstrumentHost};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compiled asset blob against a simulated instrument
    Run {
        /// Path to the asset blob
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Seconds to run before stopping the engine
        #[arg(short, long, default_value_t = 5)]
        duration: u64,

        /// Tick interval in milliseconds
        #[arg(long, default_value_t = 10)]
        tick_ms: u64,

        /// Seconds a hardware or host request may stay unanswered
        #[arg(long, default_value_t = 10)]
        request_timeout: u64,
    },

    /// Print the header and flows of an asset blob
    Inspect {
        /// Path to the asset blob
        file: PathBuf,
    },

    /// List available component types
    Components,

    /// Write a demo asset blob
    Init {
        /// Output file path
        #[arg(short, long, default_value = "demo.eflw")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            verbose,
            duration,
            tick_ms,
            request_timeout,
        } => {
            init_tracing(verbose);
            let config = EngineConfig {
                tick_interval: Duration::from_millis(tick_ms.max(1)),
                request_timeout: Duration::from_secs(request_timeout),
                ..Default::default()
            };
            run_assets(file, Duration::from_secs(duration), config).await?;
        }

        Commands::Inspect { file } => {
            inspect_assets(file)?;
        }

        Commands::Components => {
            list_components()?;
        }

        Commands::Init { output } => {
            create_demo_assets(output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Answers instrument traffic locally with canned readings
#[derive(Default)]
struct SimulatedHost {
    readings: AtomicU64,
}

#[async_trait]
impl InstrumentHost for SimulatedHost {
    async fn connect(&self, device_id: &str) -> Result<Option<Value>, String> {
        println!("  🔌 Connected to {}", device_id);
        Ok(Some(Value::from(device_id)))
    }

    async fn execute(
        &self,
        instrument_id: &str,
        command: &[u8],
        is_query: bool,
    ) -> Result<Option<Value>, String> {
        let command = String::from_utf8_lossy(command);
        println!("  📟 {} <- {}", instrument_id, command);
        tokio::time::sleep(Duration::from_millis(20)).await;

        if !is_query {
            return Ok(None);
        }
        let answer = match command.trim().to_ascii_uppercase().as_str() {
            "*IDN?" => Value::from(format!("Simulated,{},0,1.0", instrument_id)),
            c if c.starts_with("MEAS") => {
                let n = self.readings.fetch_add(1, Ordering::Relaxed);
                Value::Number(1.0 + (n % 10) as f64 * 0.01)
            }
            _ => Value::from("0"),
        };
        Ok(Some(answer))
    }

    async fn on_component_message(&self, message: &ComponentMessage) -> Option<Value> {
        println!("  💬 {} (auto-confirmed)", message.message);
        Some(Value::Bool(true))
    }
}

async fn run_assets(file: PathBuf, duration: Duration, config: EngineConfig) -> Result<()> {
    println!("🚀 Loading assets from: {}", file.display());
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let assets = Assets::from_bytes(&bytes)?;
    println!(
        "📋 {} flows, {} components, {} connections",
        assets.flows.len(),
        assets.component_count(),
        assets.connection_count()
    );
    println!();

    let registry = flownodes::standard_registry()?;
    let mut handle = FlowRuntime::spawn(registry, config);
    let bridge = HostBridge::new(Arc::new(SimulatedHost::default()), handle.sender());

    handle.send(HostMessage::init(InitRequest {
        assets: bytes,
        global_values: vec![],
        display: DisplayGeometry::default(),
    }))?;

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("⏱️  Run time elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Interrupted");
                break;
            }
            message = handle.recv() => match message {
                Some(message) => {
                    bridge.dispatch(&message);
                    if !report(&message) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    for message in handle.shutdown().await {
        report(&message);
    }
    Ok(())
}

/// Print what the host cares about. Returns false once the engine is done.
fn report(message: &EngineMessage) -> bool {
    if let Some(init) = &message.init {
        if init.ok {
            println!("▶️  Engine initialized");
        } else {
            println!(
                "💥 Initialization failed: {}",
                init.error.as_deref().unwrap_or("unknown error")
            );
            return false;
        }
    }
    for component_message in message.component_messages.iter().flatten() {
        let origin = match component_message.component {
            Some(component) => format!("#{}", component),
            None => "engine".to_string(),
        };
        match component_message.kind {
            MessageKind::Info => println!("  ℹ️  [{}] {}", origin, component_message.message),
            MessageKind::Warning => println!("  ⚠️  [{}] {}", origin, component_message.message),
            MessageKind::Error => println!("  ❌ [{}] {}", origin, component_message.message),
            MessageKind::Debug | MessageKind::Host => {}
        }
    }
    if message.stopped == Some(true) {
        println!("✨ Engine stopped");
        return false;
    }
    true
}

fn inspect_assets(file: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
    let header = AssetHeader::parse(&bytes)?;

    println!("📦 {}", file.display());
    println!("   Version: {}", header.version);
    println!("   Flows: {}", header.flow_count);
    println!("   Components: {}", header.component_count);
    println!("   Connections: {}", header.connection_count);
    println!("   Payload: {} bytes", header.payload_len);

    let assets = Assets::from_bytes(&bytes)?;
    let registry = flownodes::standard_registry()?;
    for (index, flow) in assets.flows.iter().enumerate() {
        let marker = if assets.start_flows.contains(&(index as u32)) {
            " (start)"
        } else {
            ""
        };
        println!();
        println!("  Flow {}: {}{}", index, flow.name, marker);
        for (component_index, component) in flow.components.iter().enumerate() {
            let type_name = registry
                .resolve(component.type_id)
                .map(|f| f.type_name().to_string())
                .unwrap_or_else(|| format!("unknown type {}", component.type_id));
            println!(
                "    #{} {} [{}]",
                component_index,
                component.name.as_deref().unwrap_or("-"),
                type_name
            );
        }
        for line in &flow.connections {
            println!(
                "    {}.{} -> {}.{}",
                line.source, line.output, line.target, line.input
            );
        }
    }
    if !assets.globals.is_empty() {
        println!();
        println!("  Globals:");
        for global in &assets.globals {
            println!("    {} = {}", global.name, global.default);
        }
    }
    Ok(())
}

fn list_components() -> Result<()> {
    let registry = flownodes::standard_registry()?;

    println!("📦 Available Component Types:");
    println!();

    for (type_id, name) in registry.list_component_types() {
        let Some(metadata) = registry.get_metadata(type_id) else {
            continue;
        };
        println!("  {:>3} {} ({})", type_id, name, metadata.category);
        if !metadata.description.is_empty() {
            println!("      {}", metadata.description);
        }
        for port in &metadata.inputs {
            let required = if port.required { " (required)" } else { "" };
            println!("      <- {}{}: {}", port.name, required, port.description);
        }
        for port in &metadata.outputs {
            println!("      -> {}: {}", port.name, port.description);
        }
    }
    Ok(())
}

/// start -> connect -> *IDN? -> log, with a small arithmetic chain on the side
fn create_demo_assets(output: PathBuf) -> Result<()> {
    let mut flow = FlowBuilder::new("main");
    let s = flow.add_entry(start());
    let dev = flow.add(connect("sim0"));
    let idn = flow.add(scpi("sim0", Expression::literal("*IDN?"), true));
    let show = flow.add(log(Expression::input(1)).with_data_input("value", false));
    let volt = flow.add(scpi("sim0", Expression::literal("MEAS:VOLT?"), true));
    let report = flow.add(log(Expression::input(1)).with_data_input("value", false));
    let confirm = flow.add(host_message(Expression::literal("Measurement done"), true));

    let c = flow.add_entry(constant(5.0));
    let add = flow.add(math_with(MathOp::Add, 3.0));
    let sum = flow.add(log(Expression::input(1)).with_data_input("value", false));
    let go = flow.add_entry(start());

    flow.connect(s, 0, dev, 0)
        .connect(dev, 0, idn, 0)
        .connect(idn, 0, show, 0)
        .connect(idn, 1, show, 1)
        .connect(show, 0, volt, 0)
        .connect(volt, 0, report, 0)
        .connect(volt, 1, report, 1)
        .connect(report, 0, confirm, 0)
        .connect(c, 0, add, 0)
        .connect(add, 0, sum, 1)
        .connect(go, 0, sum, 0);

    let mut builder = AssetBuilder::new();
    builder.add_start_flow(flow.build());
    let assets = builder.build()?;
    let bytes = assets.to_bytes()?;
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;

    println!("✨ Created demo assets: {}", output.display());
    println!("   Run with: flow run --file {}", output.display());
    Ok(())
}
