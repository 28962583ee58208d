use std::sync::Arc;

use cuels_source::DocumentUri;
use cuels_workspace::DiagnosticsSink;
use tokio::runtime::Handle;
use tower_lsp_server::ls_types::Diagnostic;
use tower_lsp_server::ls_types::MessageType;
use tower_lsp_server::ls_types::Uri;

/// The notifications the workspace sends to the editor.
pub trait Client: Send + Sync + 'static {
    fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>, version: Option<i32>);

    fn log_message(&self, message_type: MessageType, message: String);
}

impl Client for tower_lsp_server::Client {
    fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
        let Ok(uri) = uri.as_str().parse::<Uri>() else {
            tracing::warn!("Cannot publish diagnostics for malformed URI {}", uri);
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let client = self.clone();
        runtime.spawn(async move {
            client.publish_diagnostics(uri, diagnostics, version).await;
        });
    }

    fn log_message(&self, message_type: MessageType, message: String) {
        // Events can fire before the runtime starts or after it stops.
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let client = self.clone();
        runtime.spawn(async move {
            client.log_message(message_type, message).await;
        });
    }
}

/// Forwards workspace diagnostics to a [`Client`].
pub struct ClientDiagnostics {
    client: Arc<dyn Client>,
}

impl ClientDiagnostics {
    #[must_use]
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }
}

impl DiagnosticsSink for ClientDiagnostics {
    fn publish_diagnostics(&self, uri: &DocumentUri, version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        self.client.publish_diagnostics(uri, diagnostics, version);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, usize, Option<i32>)>>,
    }

    impl Client for Recorder {
        fn publish_diagnostics(&self, uri: &DocumentUri, diagnostics: Vec<Diagnostic>, version: Option<i32>) {
            self.published
                .lock()
                .unwrap()
                .push((uri.to_string(), diagnostics.len(), version));
        }

        fn log_message(&self, _message_type: MessageType, _message: String) {}
    }

    #[test]
    fn test_sink_forwards_to_client() {
        let recorder = Arc::new(Recorder::default());
        let sink = ClientDiagnostics::new(Arc::clone(&recorder) as Arc<dyn Client>);
        let uri = DocumentUri::parse("file:///work/a.cue").unwrap();

        sink.publish_diagnostics(&uri, Some(3), vec![Diagnostic::default()]);
        sink.publish_diagnostics(&uri, None, Vec::new());

        assert_eq!(
            *recorder.published.lock().unwrap(),
            vec![
                ("file:///work/a.cue".to_string(), 1, Some(3)),
                ("file:///work/a.cue".to_string(), 0, None),
            ]
        );
    }
}
