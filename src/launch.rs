/// Collector launch: probe the executor for the `collector` subcommand and
/// start it detached so it outlives the wrapper.
use crate::endpoint::Endpoint;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Starts collector processes.
pub trait Launcher {
    /// Whether the executor ships a `collector` subcommand at all.
    async fn collector_supported(&self) -> bool;

    /// Start a collector for `project` bound to `endpoint`. Must not wait
    /// for the child.
    fn spawn_collector(&self, project: &str, endpoint: &Endpoint) -> std::io::Result<()>;
}

/// Launches `<executor> collector` as a detached child.
pub struct ExecutorLauncher {
    executor: PathBuf,
}

impl ExecutorLauncher {
    pub fn new(executor: impl Into<PathBuf>) -> Self {
        Self {
            executor: executor.into(),
        }
    }
}

/// `<executor> help <subcommand>` exits 0 when the subcommand exists and 2
/// when it does not.
pub async fn subcommand_present(executor: &Path, subcommand: &str) -> bool {
    let status = tokio::process::Command::new(executor)
        .args(["help", subcommand])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) => s.success(),
        Err(e) => {
            tracing::debug!(error = %e, executor = %executor.display(), "failed to query subcommand");
            false
        }
    }
}

/// Arguments for `<executor> collector`.
pub fn collector_args(project: &str, endpoint: &Endpoint) -> Vec<String> {
    let mut args = vec![
        "collector".to_string(),
        "--project".to_string(),
        project.to_string(),
    ];
    if let Endpoint::UnixSocket { .. } = endpoint {
        args.push("--collector_address".to_string());
        args.push(endpoint.uri());
    }
    args
}

impl Launcher for ExecutorLauncher {
    async fn collector_supported(&self) -> bool {
        let present = subcommand_present(&self.executor, "collector").await;
        if !present {
            tracing::info!(
                executor = %self.executor.display(),
                "collector is not present in this executor"
            );
        }
        present
    }

    fn spawn_collector(&self, project: &str, endpoint: &Endpoint) -> std::io::Result<()> {
        let args = collector_args(project, endpoint);
        tracing::info!(
            command = %self.executor.display(),
            args = ?args,
            "spawning collector"
        );

        let mut cmd = std::process::Command::new(&self.executor);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd.spawn()?;
        tracing::info!(pid = child.id(), "collector started");
        // Never waited on: the collector is expected to outlive the wrapper.
        drop(child);
        Ok(())
    }
}

/// New session, so Ctrl-C aimed at the build does not reach the collector.
#[cfg(unix)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut std::process::Command) {}
