//! The thread that owns the [`Workspace`]. Reloads run one at a time, in the
//! order requests arrive; everything else holds a [`WorkspaceHandle`].

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use cuels_conf::Settings;
use cuels_source::DocumentUri;
use cuels_workspace::FileModification;
use cuels_workspace::FolderOptions;
use cuels_workspace::Location;
use cuels_workspace::WatchPattern;
use cuels_workspace::Workspace;
use cuels_workspace::WorkspaceError;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tower_lsp_server::ls_types::CompletionItem;
use tower_lsp_server::ls_types::DocumentSymbol;
use tower_lsp_server::ls_types::Hover;
use tower_lsp_server::ls_types::Position;
use tracing::debug;
use tracing::error;
use tracing::instrument;

use crate::client::Client;
use crate::client::ClientDiagnostics;

const MAILBOX_SIZE: usize = 32;

#[derive(Debug)]
enum Request {
    AddFolder {
        dir: DocumentUri,
        name: String,
        reply: oneshot::Sender<Result<(), WorkspaceError>>,
    },
    RemoveFolder {
        dir: DocumentUri,
        reply: oneshot::Sender<()>,
    },
    ModifyFiles {
        modifications: Vec<FileModification>,
        reply: oneshot::Sender<Result<(), WorkspaceError>>,
    },
    WatchPatterns {
        reply: oneshot::Sender<BTreeSet<WatchPattern>>,
    },
    Definition {
        uri: DocumentUri,
        position: Position,
        reply: oneshot::Sender<Vec<Location>>,
    },
    Hover {
        uri: DocumentUri,
        position: Position,
        reply: oneshot::Sender<Option<Hover>>,
    },
    Completion {
        uri: DocumentUri,
        position: Position,
        reply: oneshot::Sender<Vec<CompletionItem>>,
    },
    References {
        uri: DocumentUri,
        position: Position,
        include_declaration: bool,
        reply: oneshot::Sender<Vec<Location>>,
    },
    DocumentSymbols {
        uri: DocumentUri,
        reply: oneshot::Sender<Vec<DocumentSymbol>>,
    },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::AddFolder { .. } => "add_folder",
            Request::RemoveFolder { .. } => "remove_folder",
            Request::ModifyFiles { .. } => "modify_files",
            Request::WatchPatterns { .. } => "watch_patterns",
            Request::Definition { .. } => "definition",
            Request::Hover { .. } => "hover",
            Request::Completion { .. } => "completion",
            Request::References { .. } => "references",
            Request::DocumentSymbols { .. } => "document_symbols",
        }
    }
}

struct Actor {
    workspace: Workspace,
    extra_watch_patterns: Vec<String>,
}

impl Actor {
    /// Serve requests until every handle is gone. Reloads read the disk and
    /// can take a while, so this runs on its own thread rather than on a
    /// runtime worker.
    fn run(mut self, mut mailbox: mpsc::Receiver<Request>) {
        while let Some(request) = mailbox.blocking_recv() {
            self.handle(request);
        }
        debug!("Workspace mailbox closed");
    }

    // A dropped reply only means the caller stopped waiting.
    #[instrument(skip_all, fields(request = request.name()))]
    fn handle(&mut self, request: Request) {
        match request {
            Request::AddFolder { dir, name, reply } => {
                let _ = reply.send(self.add_folder(&dir, &name));
            }
            Request::RemoveFolder { dir, reply } => {
                self.workspace.remove_folder(&dir);
                let _ = reply.send(());
            }
            Request::ModifyFiles {
                modifications,
                reply,
            } => {
                let result = self.workspace.did_modify_files(&modifications);
                if let Err(err) = &result {
                    error!("Failed to apply file modifications: {}", err);
                }
                let _ = reply.send(result);
            }
            Request::WatchPatterns { reply } => {
                let _ = reply.send(self.workspace.file_watching_glob_patterns());
            }
            Request::Definition {
                uri,
                position,
                reply,
            } => {
                let _ = reply.send(self.workspace.definition(&uri, position));
            }
            Request::Hover {
                uri,
                position,
                reply,
            } => {
                let _ = reply.send(self.workspace.hover(&uri, position));
            }
            Request::Completion {
                uri,
                position,
                reply,
            } => {
                let _ = reply.send(self.workspace.completion(&uri, position));
            }
            Request::References {
                uri,
                position,
                include_declaration,
                reply,
            } => {
                let _ = reply.send(self.workspace.references(&uri, position, include_declaration));
            }
            Request::DocumentSymbols { uri, reply } => {
                let _ = reply.send(self.workspace.document_symbols(&uri));
            }
        }
    }

    fn add_folder(&mut self, dir: &DocumentUri, name: &str) -> Result<(), WorkspaceError> {
        self.workspace.ensure_folder(dir, name)?;
        let extra_watch_patterns = &self.extra_watch_patterns;
        let options = self.workspace.update_folder_options(|_| {
            Ok::<_, std::convert::Infallible>(FolderOptions {
                extra_watch_patterns: extra_watch_patterns.clone(),
            })
        });
        if let Err(never) = options {
            match never {}
        }
        Ok(())
    }
}

/// A cheap, cloneable way to reach the workspace thread.
///
/// The thread stops once every handle is dropped.
#[derive(Clone, Debug)]
pub struct WorkspaceHandle {
    sender: mpsc::Sender<Request>,
}

impl WorkspaceHandle {
    /// Move `workspace` onto a dedicated thread. Must be called within a
    /// tokio runtime, which the thread keeps entered so that client
    /// notifications can still be spawned from it.
    pub fn spawn(workspace: Workspace, extra_watch_patterns: Vec<String>) -> Result<Self> {
        let runtime = Handle::current();
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let actor = Actor {
            workspace,
            extra_watch_patterns,
        };
        std::thread::Builder::new()
            .name("cuels-workspace".to_string())
            .spawn(move || {
                let _guard = runtime.enter();
                actor.run(receiver);
            })
            .context("Failed to start the workspace thread")?;
        Ok(Self { sender })
    }

    /// Spawn a workspace configured from `settings` that publishes its
    /// diagnostics to `client`.
    pub fn from_settings(settings: &Settings, client: Arc<dyn Client>) -> Result<Self> {
        let sink = Arc::new(ClientDiagnostics::new(client));
        let workspace =
            Workspace::from_settings(settings, sink).context("Invalid registry location")?;
        Self::spawn(workspace, settings.watch.extra_patterns.clone())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("Workspace thread has stopped"))?;
        response.await.context("Workspace thread dropped the request")
    }

    pub async fn add_folder(&self, dir: DocumentUri, name: String) -> Result<()> {
        let context = format!("Failed to add workspace folder {dir}");
        self.request(|reply| Request::AddFolder { dir, name, reply })
            .await?
            .context(context)
    }

    pub async fn remove_folder(&self, dir: DocumentUri) -> Result<()> {
        self.request(|reply| Request::RemoveFolder { dir, reply }).await
    }

    /// Apply a batch of editor or watcher events. Diagnostics are published
    /// before this returns.
    pub async fn did_modify_files(&self, modifications: Vec<FileModification>) -> Result<()> {
        self.request(|reply| Request::ModifyFiles {
            modifications,
            reply,
        })
        .await?
        .context("Failed to apply file modifications")
    }

    pub async fn watch_patterns(&self) -> Result<BTreeSet<WatchPattern>> {
        self.request(|reply| Request::WatchPatterns { reply }).await
    }

    pub async fn definition(&self, uri: DocumentUri, position: Position) -> Result<Vec<Location>> {
        self.request(|reply| Request::Definition {
            uri,
            position,
            reply,
        })
        .await
    }

    pub async fn hover(&self, uri: DocumentUri, position: Position) -> Result<Option<Hover>> {
        self.request(|reply| Request::Hover {
            uri,
            position,
            reply,
        })
        .await
    }

    pub async fn completion(
        &self,
        uri: DocumentUri,
        position: Position,
    ) -> Result<Vec<CompletionItem>> {
        self.request(|reply| Request::Completion {
            uri,
            position,
            reply,
        })
        .await
    }

    pub async fn references(
        &self,
        uri: DocumentUri,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>> {
        self.request(|reply| Request::References {
            uri,
            position,
            include_declaration,
            reply,
        })
        .await
    }

    pub async fn document_symbols(&self, uri: DocumentUri) -> Result<Vec<DocumentSymbol>> {
        self.request(|reply| Request::DocumentSymbols { uri, reply })
            .await
    }
}
