/// Finds and kills whatever process holds the collector's health port.
///
/// Two process-table backends: `lsof` (Linux/macOS) and `netstat` +
/// `taskkill` (Windows). The backend is picked once at startup.
use crate::platform::Platform;
use std::process::Command;

/// Errors from process-table queries and termination.
#[derive(Debug)]
pub enum ReapError {
    /// The query command could not be run at all.
    Query {
        command: &'static str,
        source: std::io::Error,
    },
    /// The query command ran but reported failure.
    QueryFailed {
        command: &'static str,
        stderr: String,
    },
    /// Termination of `pid` failed.
    Kill { pid: u32, reason: String },
}

impl std::fmt::Display for ReapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReapError::Query { command, source } => {
                write!(f, "failed to run {command}: {source}")
            }
            ReapError::QueryFailed { command, stderr } => {
                write!(f, "{command} failed: {}", stderr.trim())
            }
            ReapError::Kill { pid, reason } => {
                write!(f, "failed to kill process {pid}: {reason}")
            }
        }
    }
}

impl std::error::Error for ReapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReapError::Query { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Platform process-table access.
pub trait ProcessTable {
    /// PIDs of processes listening on `port`, in the order the OS lists them.
    fn find_listeners(&self, port: u16) -> Result<Vec<u32>, ReapError>;

    /// Forcefully terminate `pid`.
    fn kill(&self, pid: u32) -> Result<(), ReapError>;
}

/// Process table for the current platform.
pub fn system_table(platform: Platform) -> Box<dyn ProcessTable> {
    match platform {
        Platform::Windows => Box::new(NetstatTable),
        _ => Box::new(LsofTable),
    }
}

/// `lsof -t` for lookup, SIGKILL for termination.
pub struct LsofTable;

impl ProcessTable for LsofTable {
    fn find_listeners(&self, port: u16) -> Result<Vec<u32>, ReapError> {
        let output = Command::new("lsof")
            .args(["-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
            .output()
            .map_err(|e| ReapError::Query {
                command: "lsof",
                source: e,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        // lsof exits 1 with no output when nothing matches.
        if !output.status.success() && !(stdout.trim().is_empty() && stderr.trim().is_empty()) {
            return Err(ReapError::QueryFailed {
                command: "lsof",
                stderr: stderr.into_owned(),
            });
        }
        Ok(parse_pid_list(&stdout))
    }

    #[cfg(unix)]
    fn kill(&self, pid: u32) -> Result<(), ReapError> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ReapError::Kill {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        signal::kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| ReapError::Kill {
            pid,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn kill(&self, pid: u32) -> Result<(), ReapError> {
        Err(ReapError::Kill {
            pid,
            reason: "signals are not available on this platform".to_string(),
        })
    }
}

/// `netstat -aon` for lookup, `taskkill /F /T` (whole tree) for termination.
pub struct NetstatTable;

impl ProcessTable for NetstatTable {
    fn find_listeners(&self, port: u16) -> Result<Vec<u32>, ReapError> {
        let output = Command::new("netstat")
            .arg("-aon")
            .output()
            .map_err(|e| ReapError::Query {
                command: "netstat",
                source: e,
            })?;
        if !output.status.success() {
            return Err(ReapError::QueryFailed {
                command: "netstat",
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout), port))
    }

    fn kill(&self, pid: u32) -> Result<(), ReapError> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .map_err(|e| ReapError::Kill {
                pid,
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ReapError::Kill {
                pid,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Parse whitespace/newline separated PIDs (terse `lsof` output).
pub fn parse_pid_list(text: &str) -> Vec<u32> {
    text.split_whitespace()
        .filter_map(|tok| tok.parse().ok())
        .collect()
}

/// Extract PIDs from `netstat -aon` rows whose local address is
/// exactly `127.0.0.1:{port}`. The PID is the last column:
///
/// ```text
///   Proto  Local Address     Foreign Address   State       PID
///   TCP    127.0.0.1:13133   0.0.0.0:0         LISTENING   34228
/// ```
pub fn parse_netstat(text: &str, port: u16) -> Vec<u32> {
    let local = format!("127.0.0.1:{port}");
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 || parts[1] != local {
                return None;
            }
            parts.last()?.parse().ok()
        })
        .collect()
}

/// Drop PID 0 (a Windows artifact) and duplicates, keeping first-seen order.
pub fn kill_candidates(pids: Vec<u32>) -> Vec<u32> {
    let mut out: Vec<u32> = Vec::with_capacity(pids.len());
    for pid in pids {
        if pid != 0 && !out.contains(&pid) {
            out.push(pid);
        }
    }
    out
}

/// Something that can clear the health port.
pub trait Reap {
    /// True iff a listener was found and terminated.
    fn find_and_kill(&self, port: u16) -> bool;
}

pub struct ProcessReaper {
    table: Box<dyn ProcessTable>,
}

impl ProcessReaper {
    pub fn new(table: Box<dyn ProcessTable>) -> Self {
        Self { table }
    }
}

impl Reap for ProcessReaper {
    fn find_and_kill(&self, port: u16) -> bool {
        let pids = match self.table.find_listeners(port) {
            Ok(pids) => kill_candidates(pids),
            Err(e) => {
                tracing::warn!(error = %e, port, "failed to list processes on collector health port");
                return false;
            }
        };
        let Some(&pid) = pids.first() else {
            tracing::warn!(port, "no process detected on collector health port");
            return false;
        };
        if pids.len() > 1 {
            tracing::warn!(
                port,
                pids = ?pids,
                "multiple processes on collector health port, stopping the first"
            );
        }
        match self.table.kill(pid) {
            Ok(()) => {
                tracing::info!(pid, port, "killed collector holding health port");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, pid, port, "failed to kill collector");
                false
            }
        }
    }
}
