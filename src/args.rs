/// Scanning and rewriting of the executor's command line.
///
/// The wrapper does not own the executor's flag grammar; it only looks for
/// the handful of flags it cares about. Go-style flags are accepted with
/// one or two dashes, with the value either after `=` or as the next arg.
use crate::platform::Platform;
use crate::rcfile::RunControl;
use crate::EnvMap;

const METRICS_PROJECT_ENV: &str = "RBE_metrics_project";
const PROJECT_ENV: &str = "SISO_PROJECT";
const CLIENT_CERT_ENV: &str = "GOOGLE_API_USE_CLIENT_CERTIFICATE";

const TELEMETRY_FLAGS: [&str; 4] = [
    "enable_cloud_monitoring",
    "enable_cloud_profiler",
    "enable_cloud_trace",
    "enable_cloud_logging",
];

/// Subcommand (first non-flag arg) and `-C` out dir (default ".").
pub fn parse_args(args: &[String]) -> (String, String) {
    let mut subcmd = String::new();
    let mut out_dir = ".".to_string();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-C" {
            if let Some(dir) = iter.next() {
                out_dir = dir.clone();
            }
        } else if let Some(dir) = arg.strip_prefix("-C") {
            out_dir = dir.to_string();
        } else if !arg.starts_with('-') && subcmd.is_empty() {
            subcmd = arg.clone();
        }
    }
    (subcmd, out_dir)
}

/// Strip one or two leading dashes.
fn flag_body(arg: &str) -> Option<&str> {
    arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'))
}

/// Last value given for flag `name` (`-name v`, `--name=v`, ...).
pub fn flag_value(args: &[String], name: &str) -> Option<String> {
    let mut found = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let Some(body) = flag_body(arg) else {
            continue;
        };
        if body == name {
            if let Some(value) = iter.next() {
                found = Some(value.clone());
            }
        } else if let Some(value) = body.strip_prefix(name).and_then(|r| r.strip_prefix('=')) {
            found = Some(value.to_string());
        }
    }
    found
}

/// Whether flag `name` appears in any form.
pub fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().filter_map(|a| flag_body(a)).any(|body| {
        body == name || body.strip_prefix(name).is_some_and(|r| r.starts_with('='))
    })
}

/// Telemetry project: `--metrics_project`, `--project`, then the
/// `RBE_metrics_project` and `SISO_PROJECT` env vars.
pub fn fetch_project(args: &[String], env: &EnvMap) -> Option<String> {
    flag_value(args, "metrics_project")
        .or_else(|| flag_value(args, "project"))
        .or_else(|| env.get(METRICS_PROJECT_ENV).cloned())
        .or_else(|| env.get(PROJECT_ENV).cloned())
        .filter(|p| !p.is_empty())
}

/// `-enable_collector` / `--enable_collector`, bare or `=true`.
pub fn collector_requested(args: &[String]) -> bool {
    args.iter().filter_map(|a| flag_body(a)).any(|body| {
        body == "enable_collector" || body == "enable_collector=true" || body == "enable_collector=1"
    })
}

/// Turn a collector request off explicitly.
pub fn disable_collector(args: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = args
        .into_iter()
        .filter(|a| !matches!(flag_body(a), Some(body) if body.starts_with("enable_collector")))
        .collect();
    out.push("--enable_collector=false".to_string());
    out
}

pub fn is_help_request(subcmd: &str, args: &[String]) -> bool {
    subcmd == "help" || args.iter().any(|a| a == "-h" || a == "--help")
}

/// Add default metrics labels unless the user supplied their own.
pub fn apply_metrics_labels(mut args: Vec<String>, platform: Platform) -> Vec<String> {
    if has_flag(&args, "metrics_labels") {
        return args;
    }
    args.push("--metrics_labels".to_string());
    args.push(format!(
        "type=developer,tool=siso,host_os={}",
        platform.label()
    ));
    args
}

/// Enable cloud telemetry when a metrics project is known.
///
/// Flags the user already set (in any form) are left alone.
/// `--metrics_project` is added when the project only came from
/// `--project` or `SISO_PROJECT`. Sets the client-certificate default in
/// the executor env.
pub fn apply_telemetry_flags(mut args: Vec<String>, env: &mut EnvMap) -> Vec<String> {
    env.entry(CLIENT_CERT_ENV.to_string())
        .or_insert_with(|| "false".to_string());

    let missing: Vec<String> = TELEMETRY_FLAGS
        .iter()
        .filter(|flag| !has_flag(&args, flag))
        .map(|flag| format!("--{flag}"))
        .collect();

    if env.contains_key(METRICS_PROJECT_ENV) || flag_value(&args, "metrics_project").is_some() {
        args.extend(missing);
        return args;
    }
    let project = flag_value(&args, "project").or_else(|| env.get(PROJECT_ENV).cloned());
    if let Some(project) = project {
        args.extend(missing);
        args.push(format!("--metrics_project={project}"));
    }
    args
}

/// Run-control flags plus, for `ninja`, metrics labels and (when consented)
/// telemetry flags.
pub fn process_args(
    rc: &RunControl,
    args: &[String],
    subcmd: &str,
    collect_telemetry: bool,
    platform: Platform,
    env: &mut EnvMap,
) -> Vec<String> {
    let mut new_args = if rc.is_empty() {
        args.to_vec()
    } else {
        rc.apply(args, subcmd)
    };
    if new_args != args {
        tracing::info!(args = %shell_join(&new_args), "applied run-control flags");
    }
    if subcmd == "ninja" {
        new_args = apply_metrics_labels(new_args, platform);
        if collect_telemetry {
            new_args = apply_telemetry_flags(new_args, env);
        }
    }
    new_args
}

pub fn shell_join(args: &[String]) -> String {
    shlex::try_join(args.iter().map(String::as_str)).unwrap_or_else(|_| args.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn env(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn labels() -> String {
        format!("type=developer,tool=siso,host_os={}", Platform::Linux.label())
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(
            parse_args(&v(&["ninja", "-C", "out/Default"])),
            ("ninja".to_string(), "out/Default".to_string())
        );
        assert_eq!(
            parse_args(&v(&["-Cout/Release", "ninja"])),
            ("ninja".to_string(), "out/Release".to_string())
        );
        assert_eq!(
            parse_args(&v(&["-C", "out/x", "ninja"])),
            ("ninja".to_string(), "out/x".to_string())
        );
        assert_eq!(parse_args(&v(&["-version"])), (String::new(), ".".to_string()));
    }

    #[test]
    fn test_flag_value_forms() {
        assert_eq!(flag_value(&v(&["--project", "a"]), "project").as_deref(), Some("a"));
        assert_eq!(flag_value(&v(&["-project=b"]), "project").as_deref(), Some("b"));
        assert_eq!(
            flag_value(&v(&["--project=a", "-project", "c"]), "project").as_deref(),
            Some("c")
        );
        assert_eq!(flag_value(&v(&["--projectx=a"]), "project"), None);
        assert_eq!(flag_value(&v(&["--metrics_project=m"]), "project"), None);
    }

    #[test]
    fn test_fetch_project_precedence() {
        let e = env(&[("RBE_metrics_project", "rbe"), ("SISO_PROJECT", "siso")]);
        assert_eq!(
            fetch_project(&v(&["--project", "p", "--metrics_project=m"]), &e).as_deref(),
            Some("m")
        );
        assert_eq!(fetch_project(&v(&["-project=p"]), &e).as_deref(), Some("p"));
        assert_eq!(fetch_project(&v(&[]), &e).as_deref(), Some("rbe"));
        assert_eq!(
            fetch_project(&v(&[]), &env(&[("SISO_PROJECT", "siso")])).as_deref(),
            Some("siso")
        );
        assert_eq!(fetch_project(&v(&["ninja"]), &HashMap::new()), None);
        assert_eq!(fetch_project(&v(&["--project="]), &HashMap::new()), None);
    }

    #[test]
    fn test_collector_requested() {
        assert!(collector_requested(&v(&["ninja", "-enable_collector"])));
        assert!(collector_requested(&v(&["--enable_collector=true"])));
        assert!(!collector_requested(&v(&["--enable_collector=false"])));
        assert!(!collector_requested(&v(&["ninja"])));
    }

    #[test]
    fn test_disable_collector() {
        assert_eq!(
            disable_collector(v(&["ninja", "--enable_collector", "-C", "out"])),
            v(&["ninja", "-C", "out", "--enable_collector=false"])
        );
        assert_eq!(
            disable_collector(v(&["-enable_collector", "ninja"])),
            v(&["ninja", "--enable_collector=false"])
        );
    }

    #[test]
    fn test_is_help_request() {
        assert!(is_help_request("help", &v(&["help"])));
        assert!(is_help_request("ninja", &v(&["ninja", "-h"])));
        assert!(!is_help_request("ninja", &v(&["ninja"])));
    }

    #[test]
    fn test_apply_metrics_labels() {
        assert_eq!(
            apply_metrics_labels(v(&["ninja", "-C", "out/Default"]), Platform::Linux),
            v(&["ninja", "-C", "out/Default", "--metrics_labels", &labels()])
        );
        assert_eq!(
            apply_metrics_labels(
                v(&["ninja", "-C", "out/Default", "--metrics_labels=foo=bar"]),
                Platform::Linux
            ),
            v(&["ninja", "-C", "out/Default", "--metrics_labels=foo=bar"])
        );
    }

    #[test]
    fn test_telemetry_flags_without_project_unchanged() {
        let mut e = HashMap::new();
        let got = apply_telemetry_flags(v(&["ninja", "-C", "out/Default"]), &mut e);
        assert_eq!(got, v(&["ninja", "-C", "out/Default"]));
        assert_eq!(e.get(CLIENT_CERT_ENV).map(String::as_str), Some("false"));
    }

    #[test]
    fn test_telemetry_flags_metrics_project_flag() {
        let got = apply_telemetry_flags(
            v(&["ninja", "--metrics_project", "some_project"]),
            &mut HashMap::new(),
        );
        assert_eq!(
            got,
            v(&[
                "ninja",
                "--metrics_project",
                "some_project",
                "--enable_cloud_monitoring",
                "--enable_cloud_profiler",
                "--enable_cloud_trace",
                "--enable_cloud_logging",
            ])
        );
    }

    #[test]
    fn test_telemetry_flags_metrics_env_adds_no_project_flag() {
        let mut e = env(&[("RBE_metrics_project", "some_project")]);
        let got = apply_telemetry_flags(v(&["ninja"]), &mut e);
        assert_eq!(
            got,
            v(&[
                "ninja",
                "--enable_cloud_monitoring",
                "--enable_cloud_profiler",
                "--enable_cloud_trace",
                "--enable_cloud_logging",
            ])
        );
    }

    #[test]
    fn test_telemetry_flags_project_sets_metrics_project() {
        let got = apply_telemetry_flags(v(&["ninja", "--project", "p"]), &mut HashMap::new());
        assert_eq!(got.last().map(String::as_str), Some("--metrics_project=p"));

        let mut e = env(&[("SISO_PROJECT", "envp")]);
        let got = apply_telemetry_flags(v(&["ninja"]), &mut e);
        assert_eq!(got.last().map(String::as_str), Some("--metrics_project=envp"));
    }

    #[test]
    fn test_telemetry_flags_respect_user_settings() {
        let mut e = env(&[("SISO_PROJECT", "some_project")]);
        let got = apply_telemetry_flags(
            v(&["ninja", "-C", "out/Default", "--enable_cloud_profiler=false"]),
            &mut e,
        );
        assert_eq!(
            got,
            v(&[
                "ninja",
                "-C",
                "out/Default",
                "--enable_cloud_profiler=false",
                "--enable_cloud_monitoring",
                "--enable_cloud_trace",
                "--enable_cloud_logging",
                "--metrics_project=some_project",
            ])
        );
    }

    #[test]
    fn test_client_cert_default_not_overridden() {
        let mut e = env(&[(CLIENT_CERT_ENV, "true")]);
        apply_telemetry_flags(v(&["ninja"]), &mut e);
        assert_eq!(e.get(CLIENT_CERT_ENV).map(String::as_str), Some("true"));
    }

    #[test]
    fn test_process_args_non_ninja_untouched() {
        let got = process_args(
            &RunControl::default(),
            &v(&["other", "-C", "out/Default"]),
            "other",
            true,
            Platform::Linux,
            &mut env(&[("SISO_PROJECT", "p")]),
        );
        assert_eq!(got, v(&["other", "-C", "out/Default"]));
    }

    #[test]
    fn test_process_args_ninja_with_rc_and_telemetry() {
        let rc = RunControl {
            global: v(&["-gflag"]),
            subcommands: [("ninja".to_string(), v(&["-sflag"]))].into_iter().collect(),
        };
        let got = process_args(
            &rc,
            &v(&["ninja", "-C", "out/Default"]),
            "ninja",
            true,
            Platform::Linux,
            &mut env(&[("SISO_PROJECT", "telemetry-project")]),
        );
        assert_eq!(
            got,
            v(&[
                "-gflag",
                "ninja",
                "-sflag",
                "-C",
                "out/Default",
                "--metrics_labels",
                &labels(),
                "--enable_cloud_monitoring",
                "--enable_cloud_profiler",
                "--enable_cloud_trace",
                "--enable_cloud_logging",
                "--metrics_project=telemetry-project",
            ])
        );
    }

    #[test]
    fn test_process_args_ninja_without_consent() {
        let got = process_args(
            &RunControl::default(),
            &v(&["ninja", "-C", "out/Default", "--project=p"]),
            "ninja",
            false,
            Platform::Linux,
            &mut HashMap::new(),
        );
        assert_eq!(
            got,
            v(&["ninja", "-C", "out/Default", "--project=p", "--metrics_labels", &labels()])
        );
    }

    #[test]
    fn test_shell_join_quotes() {
        assert_eq!(shell_join(&v(&["ninja", "a b"])), "ninja 'a b'");
    }
}
