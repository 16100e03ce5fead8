/// Host platform, fixed at startup and threaded through explicitly so both
/// the socket and the TCP code paths can be exercised from any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Mac,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Other
        }
    }

    /// Whether the collector should listen on a local (unix) socket.
    pub fn has_local_sockets(self) -> bool {
        matches!(self, Platform::Linux | Platform::Mac)
    }

    /// Env var naming the per-user runtime/temp dir for socket files.
    pub fn runtime_dir_var(self) -> Option<&'static str> {
        match self {
            Platform::Linux => Some("XDG_RUNTIME_DIR"),
            Platform::Mac => Some("TMPDIR"),
            _ => None,
        }
    }

    /// Value used for the `host_os` metrics label.
    pub fn label(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Other => std::env::consts::OS,
        }
    }

    pub fn exe_suffix(self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            _ => "",
        }
    }
}
