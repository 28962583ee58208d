use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use clap::Parser;
use cuels_conf::Settings;
use cuels_server::Client;
use cuels_server::WorkspaceHandle;
use cuels_source::DocumentUri;
use cuels_workspace::DiagnosticsLog;
use cuels_workspace::DiagnosticsSink;
use cuels_workspace::FileModification;
use tower_lsp_server::ls_types::Diagnostic;
use tower_lsp_server::ls_types::MessageType;
use tracing::debug;

use crate::args::Args;
use crate::commands::Command;
use crate::exit::Exit;
use crate::walk::walk_cue_files;

#[derive(Debug, Parser)]
pub struct Check {
    /// Files or directories to check. Defaults to the current directory.
    paths: Vec<Utf8PathBuf>,
}

impl Command for Check {
    async fn execute(&self, args: &Args) -> Result<Exit> {
        let project_root = resolve_project_root()?;
        let settings =
            Settings::new(project_root.as_std_path()).context("Failed to load settings")?;

        let files = walk_cue_files(&self.resolve_paths(&project_root));
        if files.is_empty() {
            return Ok(Exit::success());
        }

        let client = Arc::new(CheckClient::default());
        let workspace =
            WorkspaceHandle::from_settings(&settings, Arc::clone(&client) as Arc<dyn Client>)?;

        // Every file is opened as a buffer so that each one gets diagnostics.
        let mut modifications = Vec::with_capacity(files.len());
        for path in &files {
            let text =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
            let uri = DocumentUri::from_path(path).with_context(|| format!("Invalid path {path}"))?;
            modifications.push(FileModification::open(uri, 1, text));
        }
        debug!("Checking {} files", modifications.len());
        workspace.did_modify_files(modifications).await?;

        let mut error_count: usize = 0;
        let mut file_count: usize = 0;
        for (uri, diagnostics) in client.log.with_errors() {
            file_count += 1;
            error_count += diagnostics.len();
            if args.global.quiet {
                continue;
            }
            let path = uri.path();
            let shown = path.strip_prefix(&project_root).unwrap_or(path.as_path());
            for diagnostic in &diagnostics {
                let start = diagnostic.range.start;
                println!(
                    "{shown}:{}:{}: {}",
                    start.line + 1,
                    start.character + 1,
                    diagnostic.message
                );
            }
        }

        if error_count == 0 {
            return Ok(Exit::success());
        }
        if args.global.quiet {
            return Ok(Exit::error());
        }
        let file_word = if file_count == 1 { "file" } else { "files" };
        let error_word = if error_count == 1 { "error" } else { "errors" };
        Ok(Exit::error().with_message(format!(
            "Found {error_count} {error_word} in {file_count} {file_word}."
        )))
    }
}

impl Check {
    fn resolve_paths(&self, project_root: &Utf8Path) -> Vec<Utf8PathBuf> {
        if self.paths.is_empty() {
            return vec![project_root.to_owned()];
        }
        self.paths
            .iter()
            .map(|path| {
                if path.is_relative() {
                    project_root.join(path)
                } else {
                    path.clone()
                }
            })
            .collect()
    }
}

/// Keeps the latest diagnostics per file; log messages are already on
/// stderr through tracing.
#[derive(Default)]
struct CheckClient {
    log: DiagnosticsLog,
}

impl Client for CheckClient {
    fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        self.log.publish_diagnostics(uri, version, diagnostics);
    }

    fn log_message(&self, _message_type: MessageType, _message: String) {}
}

fn resolve_project_root() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|_| anyhow::anyhow!("Current directory is not valid UTF-8"))
}
