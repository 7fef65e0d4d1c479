//! `policykit` developer CLI.
//!
//! Runs the policy agent against a simulated device so transitions, resets
//! and escalations can be exercised without a managed phone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::{eyre, Result, WrapErr};
use policykit_core::platform::memory::{DeviceSnapshot, MemoryPlatform};
use policykit_core::{
    ActionOutcome, AgentCommand, EscalationState, ManagedModeState, PolicyAgent, PolicyConfig,
    Restriction,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "policykit", version, about = "PolicyKit developer CLI")]
struct Cli {
    /// Configuration file (JSON). Defaults to `<config dir>/policykit/config.json`.
    #[arg(long, global = true, env = "POLICYKIT_CONFIG")]
    config: Option<PathBuf>,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration.
    Config,
    /// Run agent actions against a simulated device.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// The app is not device owner.
    #[arg(long)]
    not_device_owner: bool,
    /// The admin component is inactive.
    #[arg(long)]
    admin_inactive: bool,
    /// No privileged shell on the device.
    #[arg(long)]
    unprivileged: bool,
    /// Overlay permission not granted.
    #[arg(long)]
    no_overlay_permission: bool,
    /// Make a restriction key fail (repeatable), e.g. `no_safe_boot`.
    #[arg(long, value_parser = parse_restriction)]
    fail_restriction: Vec<Restriction>,
    /// Credential used by `reset`; falls back to the configured fixed credential.
    #[arg(long)]
    credential: Option<String>,
    /// Actions to run, in order.
    #[arg(value_enum, required = true)]
    steps: Vec<Step>,
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Step {
    Start,
    Enable,
    Disable,
    Lock,
    Reset,
    Escalate,
    Dismiss,
}

#[derive(Serialize)]
struct StepReport {
    step: Step,
    ok: bool,
    kind: Option<String>,
    message: String,
}

#[derive(Serialize)]
struct SimulationReport {
    steps: Vec<StepReport>,
    state: String,
    escalation: String,
    device: DeviceSnapshot,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate(args) => {
            let report = simulate(config, &args)?;
            print_report(cli.json, &report)?;
        }
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("failed to install tracing subscriber")?;
    tracing_log::LogTracer::init().wrap_err("failed to bridge log records")?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("policykit").join("config.json"))
}

fn load_config(explicit: Option<&Path>) -> Result<PolicyConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => path,
            None => {
                tracing::debug!("no config file, using defaults");
                return Ok(PolicyConfig::default());
            }
        },
    };

    let raw = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    let config = PolicyConfig::from_json(&raw)
        .wrap_err_with(|| format!("parsing {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

fn parse_restriction(raw: &str) -> Result<Restriction, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown restriction `{raw}`"))
}

fn simulate(config: PolicyConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    let platform = Arc::new(MemoryPlatform::new());
    platform.device.set_device_owner(!args.not_device_owner);
    platform.device.set_admin_active(!args.admin_inactive);
    platform.channel.set_available(!args.unprivileged);
    platform.permission.set_granted(!args.no_overlay_permission);
    for restriction in &args.fail_restriction {
        platform.device.fail_restriction(*restriction);
    }

    let agent = PolicyAgent::new(config, platform.clone())?;
    let steps = args
        .steps
        .iter()
        .map(|step| run_step(&agent, *step, args.credential.as_deref()))
        .collect();

    Ok(SimulationReport {
        steps,
        state: state_name(agent.state()).to_string(),
        escalation: escalation_name(agent.escalation_state()),
        device: platform.device.snapshot(),
    })
}

fn run_step(agent: &PolicyAgent, step: Step, credential: Option<&str>) -> StepReport {
    let outcome = match step {
        Step::Start => match agent.start() {
            Ok(state) => ActionOutcome::Completed {
                message: format!("started {}", state_name(state)),
            },
            Err(err) => ActionOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        },
        Step::Enable => agent.execute(AgentCommand::EnableManagedMode),
        Step::Disable => agent.execute(AgentCommand::DisableManagedMode),
        Step::Lock => agent.execute(AgentCommand::LockNow),
        Step::Reset => agent.execute(AgentCommand::ResetCredential {
            new_credential: credential.map(str::to_string),
        }),
        Step::Escalate => agent.execute(AgentCommand::EscalateToRestrictedSurface),
        Step::Dismiss => agent.execute(AgentCommand::DismissOverlay),
    };

    match outcome {
        ActionOutcome::Completed { message } => StepReport {
            step,
            ok: true,
            kind: None,
            message,
        },
        ActionOutcome::Failed { kind, message } => {
            tracing::warn!(?step, %kind, "step failed");
            StepReport {
                step,
                ok: false,
                kind: Some(kind.to_string()),
                message,
            }
        }
    }
}

const fn state_name(state: ManagedModeState) -> &'static str {
    match state {
        ManagedModeState::Managed => "managed",
        ManagedModeState::Unmanaged => "unmanaged",
    }
}

fn escalation_name(state: EscalationState) -> String {
    match state {
        EscalationState::Idle => "idle".to_string(),
        EscalationState::CommandDispatched => "command_dispatched".to_string(),
        EscalationState::OverlayShown { handle } => format!("overlay_shown({handle})"),
    }
}

fn print_report(json: bool, report: &SimulationReport) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for s in &report.steps {
        let status = if s.ok { "ok" } else { "failed" };
        println!("{:?}\t{status}\t{}", s.step, s.message);
    }
    println!("state: {}", report.state);
    println!("escalation: {}", report.escalation);
    let device = serde_json::to_string_pretty(&report.device)
        .map_err(|err| eyre!("rendering device snapshot: {err}"))?;
    println!("device: {device}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn args(steps: Vec<Step>) -> SimulateArgs {
        SimulateArgs {
            not_device_owner: false,
            admin_inactive: false,
            unprivileged: false,
            no_overlay_permission: false,
            fail_restriction: Vec::new(),
            credential: Some("2468".to_string()),
            steps,
        }
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"package_name": "com.acme.kiosk"}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.package_name, "com.acme.kiosk");
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dispatch_timeout_ms": 0}}"#).unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn restriction_keys_parse() {
        assert_eq!(
            parse_restriction("no_config_wifi").unwrap(),
            Restriction::ConfigWifi
        );
        assert!(parse_restriction("no_camera").is_err());
    }

    #[test]
    fn simulation_round_trip_leaves_device_clean() {
        let report = simulate(
            PolicyConfig::default(),
            &args(vec![Step::Start, Step::Reset, Step::Disable]),
        )
        .unwrap();

        assert!(report.steps.iter().all(|s| s.ok));
        assert_eq!(report.state, "unmanaged");
        assert!(report.device.disallowed.is_empty());
        assert_eq!(report.device.credential.as_deref(), Some("2468"));
    }

    #[test]
    fn simulation_reports_denied_escalation() {
        let mut simulate_args = args(vec![Step::Escalate]);
        simulate_args.unprivileged = true;

        let report = simulate(PolicyConfig::default(), &simulate_args).unwrap();

        assert!(!report.steps[0].ok);
        assert_eq!(report.steps[0].kind.as_deref(), Some("escalation_denied"));
        assert_eq!(report.escalation, "idle");
    }
}
