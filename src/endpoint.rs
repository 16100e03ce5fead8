/// Collector endpoint resolution.
///
/// On platforms with local sockets the collector listens on
/// `{runtime dir}/{user}/siso/{project}.sock`. Socket paths are length
/// limited by the OS, so the project part is cut to fit and an over-long
/// runtime dir falls back to `/tmp`.
use crate::platform::Platform;
use crate::EnvMap;
use std::path::{Path, PathBuf};

/// Conservative socket path ceiling (macOS `sun_path`; Linux allows 108).
pub const SOCKET_PATH_BUDGET: usize = 104;
/// Bytes reserved for the `/` separator and `.sock` suffix.
const SOCKET_NAME_RESERVE: usize = 6;
const FALLBACK_ROOT: &str = "/tmp";
const TOOL_DIR: &str = "siso";
pub const UNIX_SCHEME: &str = "unix://";

/// Address the collector receives telemetry on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    UnixSocket { path: PathBuf },
    TcpSocket { host: String, port: u16 },
}

impl Endpoint {
    /// Parse `host:port`.
    pub fn parse_tcp(s: &str) -> Option<Endpoint> {
        let (host, port) = s.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Endpoint::TcpSocket {
            host: host.to_string(),
            port,
        })
    }

    /// The form handed to the executor: `unix:///path.sock` or `host:port`.
    pub fn uri(&self) -> String {
        match self {
            Endpoint::UnixSocket { path } => format!("{UNIX_SCHEME}{}", path.display()),
            Endpoint::TcpSocket { host, port } => format!("{host}:{port}"),
        }
    }

    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Endpoint::UnixSocket { path } => Some(path),
            Endpoint::TcpSocket { .. } => None,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Errors from endpoint resolution.
#[derive(Debug)]
pub enum EndpointError {
    /// Failed to create the socket directory.
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Even the `/tmp` fallback leaves no room for a socket file name.
    PathBudget { dir: PathBuf },
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::CreateDir { path, source } => {
                write!(
                    f,
                    "failed to create socket directory {}: {}",
                    path.display(),
                    source
                )
            }
            EndpointError::PathBudget { dir } => write!(
                f,
                "socket directory {} leaves no room within the {SOCKET_PATH_BUDGET}-byte socket path limit",
                dir.display()
            ),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EndpointError::CreateDir { source, .. } => Some(source),
            EndpointError::PathBudget { .. } => None,
        }
    }
}

/// Derives the collector endpoint for a project.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    platform: Platform,
    user: String,
    tcp_endpoint: Endpoint,
}

impl EndpointResolver {
    pub fn new(platform: Platform, user: impl Into<String>, tcp_endpoint: Endpoint) -> Self {
        Self {
            platform,
            user: user.into(),
            tcp_endpoint,
        }
    }

    /// Socket directory and the byte budget left for the project name,
    /// without touching the filesystem.
    pub fn plan_socket_dir(&self, env: &EnvMap) -> Result<(PathBuf, usize), EndpointError> {
        let root = self
            .platform
            .runtime_dir_var()
            .and_then(|var| env.get(var))
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .unwrap_or(FALLBACK_ROOT);
        let (dir, allowed) = fit_socket_dir(tool_dir(Path::new(root), &self.user), &self.user);
        if allowed < 1 {
            return Err(EndpointError::PathBudget { dir });
        }
        Ok((dir, allowed as usize))
    }

    /// Resolve (and create, mode 0700) the socket directory.
    pub fn resolve(&self, env: &EnvMap) -> Result<(PathBuf, usize), EndpointError> {
        let (dir, allowed) = self.plan_socket_dir(env)?;
        create_private_dir(&dir).map_err(|e| EndpointError::CreateDir {
            path: dir.clone(),
            source: e,
        })?;
        Ok((dir, allowed))
    }

    /// Endpoint the collector for `project` should bind to.
    pub fn endpoint_for(&self, project: &str, env: &EnvMap) -> Result<Endpoint, EndpointError> {
        if !self.platform.has_local_sockets() {
            return Ok(self.tcp_endpoint.clone());
        }
        let (dir, allowed) = self.resolve(env)?;
        let name = truncate_bytes(project, allowed);
        Ok(Endpoint::UnixSocket {
            path: dir.join(format!("{name}.sock")),
        })
    }
}

fn tool_dir(root: &Path, user: &str) -> PathBuf {
    root.join(user).join(TOOL_DIR)
}

fn allowed_name_len(dir: &Path) -> isize {
    SOCKET_PATH_BUDGET as isize - dir.as_os_str().len() as isize - SOCKET_NAME_RESERVE as isize
}

/// Keep `dir` if a socket name fits under it, otherwise switch to the
/// `/tmp` based dir. Applying it to its own output is a no-op.
fn fit_socket_dir(dir: PathBuf, user: &str) -> (PathBuf, isize) {
    let allowed = allowed_name_len(&dir);
    if allowed >= 1 {
        return (dir, allowed);
    }
    let fallback = tool_dir(Path::new(FALLBACK_ROOT), user);
    let allowed = allowed_name_len(&fallback);
    (fallback, allowed)
}

/// Prefix of `s` no longer than `max` bytes, cut on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
