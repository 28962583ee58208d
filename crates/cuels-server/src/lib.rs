mod actor;
mod client;
pub mod logging;

pub use actor::WorkspaceHandle;
pub use client::Client;
pub use client::ClientDiagnostics;
