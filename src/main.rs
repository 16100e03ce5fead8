mod args;
mod config;
mod endpoint;
mod executor;
mod health;
mod launch;
mod locate;
mod platform;
mod rcfile;
mod reaper;
mod retry;
mod signals;
mod supervisor;

use clap::Parser;
use config::WrapperConfig;
use endpoint::{Endpoint, EndpointResolver};
use health::HttpHealthProbe;
use launch::ExecutorLauncher;
use locate::{Invocation, Located};
use platform::Platform;
use reaper::ProcessReaper;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use supervisor::{
    CollectorSupervisor, SkipReason, SupervisionOutcome, SupervisionRequest, SupervisorSettings,
    SystemClock,
};
use tracing_subscriber::EnvFilter;

/// Environment handed to the executor and read by the supervisor.
pub type EnvMap = HashMap<String, String>;

/// Env var through which the executor learns where the collector listens.
const COLLECTOR_ADDRESS_ENV: &str = "SISO_COLLECTOR_ADDRESS";

/// Wrapper around the siso build executor: finds the project's siso,
/// applies project defaults, keeps a telemetry collector alive, and runs
/// the build.
///
/// Every argument not listed here is passed through to siso unchanged.
#[derive(Parser, Debug)]
#[command(
    name = "siso",
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Wrapper config file (default: <config dir>/siso-wrapper/config.toml)
    #[arg(long = "wrapper-config", env = "SISO_WRAPPER_CONFIG", value_name = "PATH")]
    wrapper_config: Option<PathBuf>,

    /// Arguments for siso
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("siso: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    let platform = Platform::current();
    let config_path = cli
        .wrapper_config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let config = match WrapperConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring wrapper config");
            WrapperConfig::default()
        }
    };

    let mut env: EnvMap = std::env::vars().collect();
    executor::prepare_env(platform, &mut env);
    executor::raise_fd_limit();

    let mut args = cli.args;
    // siso.bat hands everything over as one quoted argument.
    if platform == Platform::Windows && args.len() == 1 {
        args = args[0].split_whitespace().map(str::to_string).collect();
    }

    let (subcmd, out_dir) = args::parse_args(&args);
    let collect_telemetry = config.telemetry_enabled(env.get(config::TELEMETRY_ENV).map(String::as_str));
    let cwd = std::env::current_dir()?;

    let Located {
        executor,
        args: mut exec_args,
        managed,
    } = locate::locate(
        &Invocation {
            cwd: &cwd,
            args: &args,
            subcmd: &subcmd,
            out_dir: &out_dir,
            collect_telemetry,
            platform,
        },
        &mut env,
    )?;

    if managed && args::collector_requested(&exec_args) {
        let request = SupervisionRequest {
            enabled: collect_telemetry,
            help: args::is_help_request(&subcmd, &exec_args),
            project: args::fetch_project(&exec_args, &env),
        };
        let outcome = supervise_collector(&config, platform, &executor, &request, &env).await;
        exec_args = advertise(outcome, exec_args, &mut env);
    }

    Ok(executor::run(platform, &executor, &exec_args, &env).await?)
}

async fn supervise_collector(
    config: &WrapperConfig,
    platform: Platform,
    executor: &Path,
    request: &SupervisionRequest,
    env: &EnvMap,
) -> SupervisionOutcome {
    let collector = &config.collector;
    let tcp_endpoint = Endpoint::parse_tcp(&collector.default_tcp_endpoint).unwrap_or_else(|| {
        tracing::warn!(
            endpoint = %collector.default_tcp_endpoint,
            "invalid default collector endpoint, using 127.0.0.1:4317"
        );
        Endpoint::TcpSocket {
            host: "127.0.0.1".to_string(),
            port: 4317,
        }
    });
    let probe = match HttpHealthProbe::new(collector.health_port, collector.request_timeout()) {
        Ok(probe) => probe,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build health client");
            return SupervisionOutcome::TimedOut { endpoint: None };
        }
    };

    let supervisor = CollectorSupervisor::new(
        EndpointResolver::new(platform, whoami::username(), tcp_endpoint),
        probe,
        ProcessReaper::new(reaper::system_table(platform)),
        ExecutorLauncher::new(executor),
        SystemClock,
        SupervisorSettings {
            health_port: collector.health_port,
            startup_timeout: collector.startup_timeout(),
            poll_interval: collector.poll_interval(),
        },
    );
    let outcome = supervisor.run(request, env).await;
    tracing::debug!(healthy = outcome.healthy(), ?outcome, "collector supervision finished");
    outcome
}

/// Point the executor at a healthy collector, or turn its collector off.
fn advertise(outcome: SupervisionOutcome, mut args: Vec<String>, env: &mut EnvMap) -> Vec<String> {
    if let Some(endpoint) = outcome.advertised_endpoint() {
        let uri = endpoint.uri();
        tracing::info!(endpoint = %uri, "collector is healthy");
        if endpoint.socket_path().is_some() {
            args.push(format!("--collector_address={uri}"));
        }
        env.insert(COLLECTOR_ADDRESS_ENV.to_string(), uri);
        return args;
    }
    match outcome {
        SupervisionOutcome::Skipped(SkipReason::NoProject) => args,
        SupervisionOutcome::Skipped(SkipReason::Disabled | SkipReason::Help) => {
            args::disable_collector(args)
        }
        _ => {
            tracing::warn!("collector never came to life, continuing without it");
            args::disable_collector(args)
        }
    }
}
