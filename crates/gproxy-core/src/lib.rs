pub mod bootstrap;
pub mod engine;
pub mod engine_adapter;
pub mod proxy_engine;
pub mod state;
pub mod telemetry;
pub mod upstream_client;
pub mod video_task;

pub use state::{AppState, CredentialInsertInput, ProviderRuntime};
