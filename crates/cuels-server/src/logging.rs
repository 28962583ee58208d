//! Tracing setup for the language server: a daily log file plus a layer that
//! forwards INFO and above to the editor as log messages.

use std::sync::Arc;

use tower_lsp_server::ls_types::MessageType;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

use crate::client::Client;

/// A tracing layer that hands each event's message to a callback, typically
/// [`Client::log_message`].
pub struct ClientLayer {
    send_message: Arc<dyn Fn(MessageType, String) + Send + Sync>,
}

impl ClientLayer {
    pub fn new<F>(send_message: F) -> Self
    where
        F: Fn(MessageType, String) + Send + Sync + 'static,
    {
        Self {
            send_message: Arc::new(send_message),
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}

impl<S> Layer<S> for ClientLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let message_type = match *event.metadata().level() {
            Level::ERROR => MessageType::ERROR,
            Level::WARN => MessageType::WARNING,
            Level::INFO => MessageType::INFO,
            Level::DEBUG => MessageType::LOG,
            Level::TRACE => return,
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            (self.send_message)(message_type, message);
        }
    }
}

/// Install the global subscriber: `/tmp/cuels.log`, rotated daily and
/// filtered by `RUST_LOG` (default `info`), plus INFO and above sent to
/// `client`.
///
/// The returned guard flushes the file writer when dropped, so it must live
/// as long as the server.
pub fn init_tracing(client: Arc<dyn Client>) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("/tmp", "cuels.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let client_layer = ClientLayer::new(move |message_type, message| {
        client.log_message(message_type, message);
    })
    .with_filter(LevelFilter::INFO);

    Registry::default().with(file_layer).with(client_layer).init();

    guard
}
