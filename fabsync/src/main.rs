//! fabsync CLI: apply, destroy, or inspect declared fabric state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fabsync::model::{DeployReport, DesiredState};
use fabsync::paths;
use fabsync::reconciler::interface::{InterfaceProbe, InterfaceReconciler};
use fabsync::reconciler::network::{NetworkProbe, NetworkReconciler};
use fabsync::reconciler::peering::{PeeringProbe, PeeringReconciler};
use fabsync::reconciler::switch::{SwitchProbe, SwitchReconciler};
use fabsync::reconciler::vrf::{VrfProbe, VrfReconciler};
use fabsync::reconciler::{Reconciler, StatusProbe};
use fabsync_client::{ApiClient, ClientConfig, HttpClient};

#[derive(Parser)]
#[command(name = "fabsync")]
#[command(about = "Fabric controller state synchronizer")]
struct Args {
    /// Controller base URL
    #[arg(long, env = "FABSYNC_URL")]
    url: String,

    /// Controller username
    #[arg(long, env = "FABSYNC_USERNAME")]
    username: String,

    /// Controller password
    #[arg(long, env = "FABSYNC_PASSWORD")]
    password: String,

    /// Accept self-signed controller certificates
    #[arg(long)]
    insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile declared state with the controller
    Apply {
        /// Desired-state JSON document
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Tear down every resource in the declared state
    Destroy {
        /// Desired-state JSON document
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Report convergence status per declared resource
    Status {
        /// Desired-state JSON document
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fabsync=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::new(&args.url, &args.username, &args.password);
    config.insecure = args.insecure;
    let client = HttpClient::new(config).context("Failed to build controller client")?;

    match args.command {
        Command::Apply { file } => apply(&client, &load(&file).await?).await,
        Command::Destroy { file } => destroy(&client, &load(&file).await?).await,
        Command::Status { file } => status(&client, &load(&file).await?).await,
    }
}

async fn load(path: &Path) -> Result<DesiredState> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn log_report(kind: &str, report: &DeployReport) {
    match &report.message {
        Some(message) => {
            warn!(kind, key = %report.key, deployed = report.deployed, %message, "Reconciled with warnings");
        }
        None => {
            info!(kind, key = %report.key, phase = ?report.phase, deployed = report.deployed, "Reconciled");
        }
    }
}

/// Reconcile every declared resource in dependency order: switches carry
/// VRFs, VRFs carry networks, interfaces and peerings come last.
async fn apply(client: &dyn ApiClient, state: &DesiredState) -> Result<()> {
    info!(fabric = %state.fabric, "Applying desired state");
    let mut failures = 0usize;

    let switches = SwitchReconciler::new(&state.fabric);
    for spec in &state.switches {
        match switches.reconcile(client, spec).await {
            Ok(report) => log_report("switch", &report),
            Err(e) => {
                failures += 1;
                error!(switch = %spec.ip_address, error = %e, "Switch reconciliation failed");
            }
        }
    }

    let vrfs = VrfReconciler::new(&state.fabric);
    for spec in &state.vrfs {
        match vrfs.reconcile(client, spec).await {
            Ok(report) => log_report("vrf", &report),
            Err(e) => {
                failures += 1;
                error!(vrf = %spec.name, error = %e, "VRF reconciliation failed");
            }
        }
    }

    let networks = NetworkReconciler::new(&state.fabric);
    for spec in &state.networks {
        match networks.reconcile(client, spec).await {
            Ok(report) => log_report("network", &report),
            Err(e) => {
                failures += 1;
                error!(network = %spec.name, error = %e, "Network reconciliation failed");
            }
        }
    }

    let interfaces = InterfaceReconciler::new(&state.fabric);
    for spec in &state.interfaces {
        match interfaces.reconcile(client, spec).await {
            Ok(report) => log_report("interface", &report),
            Err(e) => {
                failures += 1;
                error!(interface = %spec.entity_id(), error = %e, "Interface reconciliation failed");
            }
        }
    }

    let peerings = PeeringReconciler::new(&state.fabric);
    for spec in &state.peerings {
        match peerings.reconcile(client, spec).await {
            Ok(report) => log_report("peering", &report),
            Err(e) => {
                failures += 1;
                error!(peering = %spec.name, error = %e, "Route peering reconciliation failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} resource(s) failed to reconcile");
    }
    Ok(())
}

/// Tear down in reverse dependency order.
async fn destroy(client: &dyn ApiClient, state: &DesiredState) -> Result<()> {
    info!(fabric = %state.fabric, "Destroying declared state");
    let mut failures = 0usize;

    let peerings = PeeringReconciler::new(&state.fabric);
    for spec in &state.peerings {
        let key = spec.import_key(&state.fabric);
        match peerings.finalize(client, &key).await {
            Ok(report) => log_report("peering", &report),
            Err(e) => {
                failures += 1;
                error!(peering = %key, error = %e, "Route peering removal failed");
            }
        }
    }

    let interfaces = InterfaceReconciler::new(&state.fabric);
    for spec in &state.interfaces {
        let key = spec.entity_id();
        match interfaces.finalize(client, &key).await {
            Ok(report) => log_report("interface", &report),
            Err(e) => {
                failures += 1;
                error!(interface = %key, error = %e, "Interface removal failed");
            }
        }
    }

    let networks = NetworkReconciler::new(&state.fabric);
    for spec in &state.networks {
        match networks.finalize(client, &spec.name).await {
            Ok(report) => log_report("network", &report),
            Err(e) => {
                failures += 1;
                error!(network = %spec.name, error = %e, "Network removal failed");
            }
        }
    }

    let vrfs = VrfReconciler::new(&state.fabric);
    for spec in &state.vrfs {
        match vrfs.finalize(client, &spec.name).await {
            Ok(report) => log_report("vrf", &report),
            Err(e) => {
                failures += 1;
                error!(vrf = %spec.name, error = %e, "VRF removal failed");
            }
        }
    }

    let switches = SwitchReconciler::new(&state.fabric);
    for spec in &state.switches {
        match switch_serial(client, &state.fabric, &spec.ip_address).await? {
            Some(serial) => match switches.finalize(client, &serial).await {
                Ok(report) => log_report("switch", &report),
                Err(e) => {
                    failures += 1;
                    error!(switch = %serial, error = %e, "Switch removal failed");
                }
            },
            None => info!(switch = %spec.ip_address, "Switch not in inventory, nothing to remove"),
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} resource(s) failed to tear down");
    }
    Ok(())
}

/// Probe each declared resource once and print its collapsed status.
async fn status(client: &dyn ApiClient, state: &DesiredState) -> Result<()> {
    for spec in &state.switches {
        match switch_serial(client, &state.fabric, &spec.ip_address).await? {
            Some(serial) => {
                let probe = SwitchProbe::new(&state.fabric, &serial);
                println!("switch {serial}: {:?}", probe.probe(client).await?);
            }
            None => println!("switch {}: not in inventory", spec.ip_address),
        }
    }
    for spec in &state.vrfs {
        let probe = VrfProbe::new(&state.fabric, &spec.name);
        println!("vrf {}: {:?}", spec.name, probe.probe(client).await?);
    }
    for spec in &state.networks {
        let probe = NetworkProbe::new(&state.fabric, &spec.name);
        println!("network {}: {:?}", spec.name, probe.probe(client).await?);
    }
    for spec in &state.interfaces {
        let probe = InterfaceProbe::new(&spec.serial_number, &spec.name);
        println!("interface {}: {:?}", spec.entity_id(), probe.probe(client).await?);
    }
    for spec in &state.peerings {
        let probe = PeeringProbe::new(
            &state.fabric,
            &spec.service_node,
            &spec.attached_fabric,
            &spec.name,
        );
        println!(
            "peering {}: {:?}",
            spec.import_key(&state.fabric),
            probe.probe(client).await?
        );
    }
    Ok(())
}

/// Resolve a switch's serial number from its declared management IP.
async fn switch_serial(client: &dyn ApiClient, fabric: &str, ip: &str) -> Result<Option<String>> {
    let doc = client.get(&paths::inventory(fabric)).await?;
    Ok(doc.as_array().and_then(|entries| {
        entries
            .iter()
            .find(|e| e.get("ipAddress").and_then(Value::as_str) == Some(ip))
            .and_then(|e| e.get("serialNumber").and_then(Value::as_str))
            .map(str::to_string)
    }))
}
