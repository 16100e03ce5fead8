//! Hands the build over to the executor and relays its exit code.
use crate::platform::Platform;
use crate::signals::SignalGuard;
use crate::EnvMap;
use std::path::{Path, PathBuf};

const NO_CAFFEINATE_FLAG: &str = "--no-caffeinate";

const CAFFEINATE_HELP: &str = "caffeinate:\n  --no-caffeinate  do not prepend `caffeinate` to ninja command\n";

/// Program and argv to run. On macOS the executor is wrapped in
/// `caffeinate` unless `--no-caffeinate` was given; the flag itself is
/// consumed.
pub fn command_line(platform: Platform, executor: &Path, args: &[String]) -> (PathBuf, Vec<String>) {
    let mut argv: Vec<String> = args.to_vec();
    if platform != Platform::Mac {
        return (executor.to_path_buf(), argv);
    }
    if argv.iter().any(|a| a == "-h" || a == "--help") {
        eprint!("{CAFFEINATE_HELP}");
    }
    if let Some(pos) = argv.iter().position(|a| a == NO_CAFFEINATE_FLAG) {
        argv.remove(pos);
        return (executor.to_path_buf(), argv);
    }
    argv.insert(0, executor.display().to_string());
    (PathBuf::from("caffeinate"), argv)
}

/// Scrub variables the host toolchain would otherwise pick up.
pub fn prepare_env(platform: Platform, env: &mut EnvMap) {
    if platform == Platform::Mac {
        for key in ["CPATH", "LIBRARY_PATH", "SDKROOT"] {
            env.remove(key);
        }
    }
    if env.get("PYTHONPYCACHEPREFIX").map_or(true, String::is_empty) {
        env.entry("PYTHONDONTWRITEBYTECODE".to_string())
            .or_insert_with(|| "1".to_string());
    }
}

/// Raise the soft open-file limit to the hard limit. Best effort.
#[cfg(unix)]
pub fn raise_fd_limit() {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) if soft < hard => {
            if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, hard, hard) {
                tracing::debug!(error = %e, soft, hard, "failed to raise open file limit");
            }
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "failed to read open file limit"),
    }
}

#[cfg(not(unix))]
pub fn raise_fd_limit() {}

/// Run the executor to completion. A signal death maps to exit code 1.
pub async fn run(
    platform: Platform,
    executor: &Path,
    args: &[String],
    env: &EnvMap,
) -> std::io::Result<i32> {
    let (program, argv) = command_line(platform, executor, args);
    tracing::debug!(program = %program.display(), args = ?argv, "running executor");

    let mut child = tokio::process::Command::new(&program)
        .args(&argv)
        .env_clear()
        .envs(env)
        .spawn()?;

    let _guard = SignalGuard::install()?;
    let status = child.wait().await?;
    if status.code().is_none() {
        tracing::warn!(%status, "executor terminated by signal");
    }
    Ok(status.code().unwrap_or(1))
}
