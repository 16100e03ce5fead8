//! `.sisorc` run-control file: default flags injected into every invocation.
//!
//! ```text
//! # comment
//! -global_flag=1
//! ninja -k=0 --strict
//! ```
//!
//! Lines starting with `-` are global flags; any other line names a
//! subcommand followed by its flags. Words are shell-split.
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunControl {
    pub global: Vec<String>,
    pub subcommands: HashMap<String, Vec<String>>,
}

impl RunControl {
    /// Load `path`. A missing file is an empty run-control.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut rc = Self::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(words) = shlex::split(line) else {
                tracing::warn!(line = lineno + 1, "ignoring unparsable .sisorc line");
                continue;
            };
            let mut words = words.into_iter();
            if line.starts_with('-') {
                rc.global.extend(words);
            } else if let Some(subcmd) = words.next() {
                rc.subcommands.entry(subcmd).or_default().extend(words);
            }
        }
        rc
    }

    /// Global flags go before the first arg; `subcmd`'s flags go right
    /// after its first occurrence.
    pub fn apply(&self, args: &[String], subcmd: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() + self.global.len());
        out.extend(self.global.iter().cloned());
        let mut injected = false;
        for arg in args {
            out.push(arg.clone());
            if !injected && !subcmd.is_empty() && arg == subcmd {
                injected = true;
                if let Some(flags) = self.subcommands.get(subcmd) {
                    out.extend(flags.iter().cloned());
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.subcommands.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_global_and_subcommand_lines() {
        let rc = RunControl::parse(
            "# defaults\n\n-gflag_1=value -gflag_2\nninja -k=0 --strict\nninja \"-label=a b\"\nquery -x\n",
        );
        assert_eq!(rc.global, v(&["-gflag_1=value", "-gflag_2"]));
        assert_eq!(rc.subcommands["ninja"], v(&["-k=0", "--strict", "-label=a b"]));
        assert_eq!(rc.subcommands["query"], v(&["-x"]));
    }

    #[test]
    fn test_parse_skips_bad_quoting() {
        let rc = RunControl::parse("ninja \"unterminated\n-ok\n");
        assert!(!rc.subcommands.contains_key("ninja"));
        assert_eq!(rc.global, v(&["-ok"]));
    }

    #[test]
    fn test_apply_injects_in_place() {
        let rc = RunControl::parse("-gflag_1=value -gflag_2\nninja -sflag_1=value -sflag_2\n");
        assert_eq!(
            rc.apply(&v(&["ninja", "-C", "out/Default"]), "ninja"),
            v(&[
                "-gflag_1=value",
                "-gflag_2",
                "ninja",
                "-sflag_1=value",
                "-sflag_2",
                "-C",
                "out/Default"
            ])
        );
    }

    #[test]
    fn test_apply_other_subcommand_gets_only_globals() {
        let rc = RunControl::parse("-g\nninja -s\n");
        assert_eq!(
            rc.apply(&v(&["query", "-C", "out"]), "query"),
            v(&["-g", "query", "-C", "out"])
        );
    }

    #[test]
    fn test_apply_empty_is_identity() {
        let rc = RunControl::default();
        assert!(rc.is_empty());
        let args = v(&["ninja", "-C", "out"]);
        assert_eq!(rc.apply(&args, "ninja"), args);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rc = RunControl::load(&dir.path().join(".sisorc")).unwrap();
        assert!(rc.is_empty());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".sisorc");
        std::fs::write(&path, "ninja -k=0\n").unwrap();
        let rc = RunControl::load(&path).unwrap();
        assert_eq!(rc.subcommands["ninja"], v(&["-k=0"]));
    }
}
