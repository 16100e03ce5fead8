//! Finds the project-local executor and the per-project settings
//! (`.sisoenv`, `.sisorc`, backend config) that go with it.
use crate::args;
use crate::platform::Platform;
use crate::rcfile::RunControl;
use crate::EnvMap;
use std::path::{Path, PathBuf};

const SISO_PATH_ENV: &str = "SISO_PATH";

#[derive(Debug)]
pub enum LocateError {
    /// `SISO_PATH` is set but is not a file.
    SisoPathMissing { path: PathBuf },
    /// `backend_config/` exists without `backend.star`.
    BackendConfigMissing { corp: bool },
    Read { path: PathBuf, source: std::io::Error },
    ExecutorNotFound,
    NoSisoEnv,
    /// The out dir was last built by ninja.
    NinjaState { out_dir: String },
}

impl std::fmt::Display for LocateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocateError::SisoPathMissing { path } => {
                write!(f, "could not find siso at SISO_PATH {}", path.display())
            }
            LocateError::BackendConfigMissing { corp: true } => write!(
                f,
                "build/config/siso/backend_config/backend.star does not exist.\n\
                 backend.star is configured by gclient hook build/config/siso/configure_siso.py.\n\
                 Make sure `rbe_instance` gclient custom vars is correct.\n\
                 Did you run `gclient runhooks` ?"
            ),
            LocateError::BackendConfigMissing { corp: false } => write!(
                f,
                "build/config/siso/backend_config/backend.star does not exist.\n\
                 See build/config/siso/backend_config/README.md"
            ),
            LocateError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            LocateError::ExecutorNotFound => write!(
                f,
                "could not find siso in third_party/siso of the current project. \
                 Did you run gclient sync?"
            ),
            LocateError::NoSisoEnv => write!(
                f,
                "could not find .sisoenv under build/config/siso of the current project. \
                 Did you run gclient sync?"
            ),
            LocateError::NinjaState { out_dir } => write!(
                f,
                "{out_dir} contains Ninja state file.\n\
                 Use `autoninja` to use reclient,\n\
                 or run `gn clean {out_dir}` to switch from ninja to siso"
            ),
        }
    }
}

impl std::error::Error for LocateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocateError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// What the wrapper was asked to run, and from where.
pub struct Invocation<'a> {
    pub cwd: &'a Path,
    pub args: &'a [String],
    pub subcmd: &'a str,
    pub out_dir: &'a str,
    pub collect_telemetry: bool,
    pub platform: Platform,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Located {
    pub executor: PathBuf,
    pub args: Vec<String>,
    /// Found inside a source checkout; args were processed and the
    /// collector may be supervised.
    pub managed: bool,
}

/// Nearest ancestor of `start` holding a `.gclient` file.
pub fn find_gclient_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".gclient").is_file())
        .map(Path::to_path_buf)
}

/// Nearest ancestor of `start` that carries siso build config.
pub fn find_primary_solution(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| siso_config_dir(dir).is_dir())
        .map(Path::to_path_buf)
}

fn siso_config_dir(root: &Path) -> PathBuf {
    root.join("build").join("config").join("siso")
}

/// Candidate source roots for `out_dir`, de-duplicated in order.
pub fn source_roots(out_dir: &Path) -> Vec<PathBuf> {
    let gclient_root = find_gclient_root(out_dir);
    let candidates = [
        find_primary_solution(out_dir),
        gclient_root.clone(),
        gclient_root.map(|root| root.join("src")),
    ];
    let mut roots: Vec<PathBuf> = Vec::new();
    for root in candidates.into_iter().flatten() {
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

/// Apply `KEY=VALUE` lines to `env`. Lines without `=` are skipped.
pub fn load_sisoenv(text: &str, env: &mut EnvMap) {
    for line in text.lines() {
        let line = line.trim_end();
        match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.insert(key.to_string(), value.to_string());
            }
            _ => {
                if !line.is_empty() {
                    tracing::debug!(line, "skipping malformed .sisoenv line");
                }
            }
        }
    }
}

fn is_corp_machine() -> bool {
    which::which("gcert").is_ok()
}

/// Refuse to run siso over an out dir that ninja owns.
pub fn check_out_dir(cwd: &Path, out_dir: &str) -> Result<(), LocateError> {
    if cwd.join(out_dir).join(".ninja_deps").exists() {
        return Err(LocateError::NinjaState {
            out_dir: out_dir.to_string(),
        });
    }
    Ok(())
}

/// Resolve the executor for `inv`, loading project settings into `env`.
pub fn locate(inv: &Invocation<'_>, env: &mut EnvMap) -> Result<Located, LocateError> {
    let siso_override = env.get(SISO_PATH_ENV).filter(|p| !p.is_empty()).map(PathBuf::from);
    if let Some(path) = &siso_override {
        tracing::info!(path = %path.display(), "using siso binary from SISO_PATH");
        if !path.is_file() {
            return Err(LocateError::SisoPathMissing { path: path.clone() });
        }
    }

    let out_dir = inv.cwd.join(inv.out_dir);
    for root in source_roots(&out_dir) {
        let config_dir = siso_config_dir(&root);
        let sisoenv = config_dir.join(".sisoenv");
        if !sisoenv.exists() {
            continue;
        }
        let text = std::fs::read_to_string(&sisoenv).map_err(|e| LocateError::Read {
            path: sisoenv.clone(),
            source: e,
        })?;
        load_sisoenv(&text, env);

        let backend_config = config_dir.join("backend_config");
        if backend_config.exists() && !backend_config.join("backend.star").exists() {
            return Err(LocateError::BackendConfigMissing {
                corp: is_corp_machine(),
            });
        }

        let rc_path = config_dir.join(".sisorc");
        let rc = RunControl::load(&rc_path).map_err(|e| LocateError::Read {
            path: rc_path,
            source: e,
        })?;
        let processed = args::process_args(
            &rc,
            inv.args,
            inv.subcmd,
            inv.collect_telemetry,
            inv.platform,
            env,
        );

        let exe = format!("siso{}", inv.platform.exe_suffix());
        let candidates = [
            siso_override.clone(),
            Some(root.join("third_party").join("siso").join("cipd").join(&exe)),
            Some(root.join("third_party").join("siso").join(&exe)),
        ];
        let Some(executor) = candidates.into_iter().flatten().find(|p| p.is_file()) else {
            return Err(LocateError::ExecutorNotFound);
        };
        check_out_dir(inv.cwd, inv.out_dir)?;
        tracing::debug!(executor = %executor.display(), root = %root.display(), "located siso");
        return Ok(Located {
            executor,
            args: processed,
            managed: true,
        });
    }

    match siso_override {
        Some(executor) => Ok(Located {
            executor,
            args: inv.args.to_vec(),
            managed: false,
        }),
        None => Err(LocateError::NoSisoEnv),
    }
}
