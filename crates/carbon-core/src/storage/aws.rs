use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use super::ObjectStore;
use crate::error::{Error, Result};

/// S3 through the `aws` command-line client.
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
}

fn credentials_file() -> Option<PathBuf> {
    if let Some(path) = env::var_os("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    env::var_os("HOME").map(|home| Path::new(&home).join(".aws").join("credentials"))
}

fn env_set(key: &str) -> bool {
    env::var(key).map(|v| !v.is_empty()).unwrap_or(false)
}

impl AwsCli {
    /// A client when credentials are visible to the `aws` tool, else `None`.
    pub fn from_env() -> Option<Self> {
        let from_vars = env_set("AWS_ACCESS_KEY_ID") && env_set("AWS_SECRET_ACCESS_KEY");
        let from_file = credentials_file().is_some_and(|p| p.is_file());
        (from_vars || from_file).then(|| Self::with_program("aws"))
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    fn run(&self, args: &[OsString]) -> Result<std::process::Output> {
        debug!(
            "{} {}",
            self.program,
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );
        Command::new(&self.program).args(args).output().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    fn copy(&self, from: OsString, to: OsString, include: &str) -> Result<()> {
        let mut args: Vec<OsString> = vec!["s3".into(), "cp".into(), from, to];
        for a in ["--recursive", "--exclude", "*", "--include", include, "--no-progress"] {
            args.push(a.into());
        }
        let out = self.run(&args)?;
        if !out.status.success() {
            return Err(Error::ExternalTool {
                program: self.program.clone(),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// Object names from `aws s3 ls` output; sub-prefixes (`PRE name/`) are skipped.
pub(crate) fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|l| !l.trim_start().starts_with("PRE "))
        .filter_map(|l| l.split_whitespace().last())
        .map(str::to_owned)
        .collect()
}

impl ObjectStore for AwsCli {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let out = self.run(&["s3".into(), "ls".into(), dir.into()])?;
        let stderr = String::from_utf8_lossy(&out.stderr);
        // `aws s3 ls` exits 1 with no output when the prefix holds nothing
        if !out.status.success() && !stderr.trim().is_empty() {
            return Err(Error::Storage(format!("listing {dir} failed: {}", stderr.trim())));
        }
        Ok(parse_listing(&String::from_utf8_lossy(&out.stdout)))
    }

    fn download(&self, dir: &str, include: &str, dest: &Path) -> Result<()> {
        self.copy(dir.into(), dest.into(), include)
    }

    fn upload(&self, src: &Path, include: &str, dir: &str) -> Result<()> {
        self.copy(src.into(), dir.into(), include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_takes_last_column() {
        let stdout = "\
                           PRE per_pixel/
2020-01-01 10:00:00   12345678 00N_000E_gain_year_count.tif
2020-01-01 10:00:01   23456789 00N_110E_gain_year_count.tif
";
        assert_eq!(
            parse_listing(stdout),
            ["00N_000E_gain_year_count.tif", "00N_110E_gain_year_count.tif"]
        );
    }

    #[test]
    fn listing_of_empty_prefix() {
        assert!(parse_listing("").is_empty());
    }

    #[test]
    fn failed_copy_reports_tool_error() {
        let store = AwsCli::with_program("false");
        let err = store.download("s3://bucket/dir/", "*.tif", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
    }
}
