//! Fetcher backed by the package manager's command-line tool.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use super::{DataFetcher, FetchFailure, FetchResult, PackageInventory};
use crate::namespace::EntityKind;

/// Runs `<package_bin>` / `<docs_bin>` subprocesses to answer cache misses.
///
/// Children are killed when the fetch future is dropped, so wrapping this in
/// a [`super::TimeoutFetcher`] terminates runaway invocations.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    package_bin: String,
    docs_bin: String,
}

impl CommandFetcher {
    pub fn new(package_bin: impl Into<String>, docs_bin: impl Into<String>) -> Self {
        Self {
            package_bin: package_bin.into(),
            docs_bin: docs_bin.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, FetchFailure> {
        debug!("executing {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FetchFailure {
                message: format!("failed to execute {program}: {e}"),
                exit_code: None,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code();
            Err(FetchFailure {
                message: format!(
                    "{program} {} failed with exit code {}: {}",
                    args.join(" "),
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                ),
                exit_code: code,
            })
        }
    }

    async fn info_with_deps(&self, package: &str) -> Result<Value, FetchFailure> {
        let info = self.run(&self.package_bin, &["info", package]).await?;
        // Relationship lookups are best effort: a package without
        // dependencies still has valid info.
        let dependencies = self
            .run(&self.package_bin, &["deps", package])
            .await
            .map(|out| non_blank_lines(&out))
            .unwrap_or_default();
        let dependents = self
            .run(&self.package_bin, &["uses", "--installed", package])
            .await
            .map(|out| non_blank_lines(&out))
            .unwrap_or_default();

        Ok(json!({
            "name": package,
            "output": info,
            "dependencies": dependencies,
            "dependents": dependents,
        }))
    }
}

#[async_trait]
impl DataFetcher for CommandFetcher {
    async fn fetch(&self, identifier: &str, kind: EntityKind) -> FetchResult {
        let result = match kind {
            EntityKind::Info => self
                .run(&self.package_bin, &["info", identifier])
                .await
                .map(Value::String),
            EntityKind::InfoWithDeps => self.info_with_deps(identifier).await,
            EntityKind::Commands => self
                .run(&self.package_bin, &["list", identifier])
                .await
                .map(|out| json!(bin_commands(&out))),
            EntityKind::Documentation => self
                .run(&self.docs_bin, &[identifier])
                .await
                .map(Value::String),
        };

        match result {
            Ok(value) => FetchResult::ok(value),
            Err(failure) => FetchResult::failed(failure.message, failure.exit_code),
        }
    }
}

#[async_trait]
impl PackageInventory for CommandFetcher {
    async fn installed_packages(&self) -> Result<Vec<String>, FetchFailure> {
        let out = self.run(&self.package_bin, &["list", "-1"]).await?;
        Ok(non_blank_lines(&out))
    }
}

fn non_blank_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// File names of listed paths that sit directly in a `bin` directory.
fn bin_commands(listing: &str) -> Vec<String> {
    let mut commands: Vec<String> = listing
        .lines()
        .map(|line| Path::new(line.trim()))
        .filter(|path| {
            path.parent()
                .and_then(Path::file_name)
                .is_some_and(|dir| dir == "bin")
        })
        .filter_map(|path| path.file_name()?.to_str().map(str::to_string))
        .collect();
    commands.sort();
    commands.dedup();
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_commands() {
        let listing = "\
/opt/homebrew/Cellar/node/22.1.0/bin/node
/opt/homebrew/Cellar/node/22.1.0/bin/npm
/opt/homebrew/Cellar/node/22.1.0/bin/npx
/opt/homebrew/Cellar/node/22.1.0/include/node/ (120 files)
/opt/homebrew/Cellar/node/22.1.0/share/man/man1/node.1
";
        assert_eq!(bin_commands(listing), vec!["node", "npm", "npx"]);
    }

    #[test]
    fn test_non_blank_lines() {
        assert_eq!(non_blank_lines("a\n\n  b \n"), vec!["a", "b"]);
        assert!(non_blank_lines("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_info_runs_program() {
        let fetcher = CommandFetcher::new("echo", "echo");
        let result = fetcher.fetch("node", EntityKind::Info).await;
        assert!(result.success);
        assert_eq!(result.value, Value::String("info node\n".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_info_with_deps_shape() {
        let fetcher = CommandFetcher::new("echo", "echo");
        let value = fetcher
            .fetch("node", EntityKind::InfoWithDeps)
            .await
            .into_result()
            .unwrap();
        assert_eq!(value["name"], "node");
        assert_eq!(value["dependencies"], json!(["deps node"]));
        assert_eq!(value["dependents"], json!(["uses --installed node"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let fetcher = CommandFetcher::new("false", "false");
        let result = fetcher.fetch("badpkg", EntityKind::Info).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let fetcher = CommandFetcher::new("definitely-not-a-real-binary-4711", "x");
        let result = fetcher.fetch("node", EntityKind::Commands).await;
        assert!(!result.success);
        assert!(result
            .error_message
            .unwrap()
            .starts_with("failed to execute"));
        assert_eq!(result.exit_code, None);
    }
}
