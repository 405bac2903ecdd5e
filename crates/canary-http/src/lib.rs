//! # Canary HTTP
//!
//! HTTP surface of the orchestration layer:
//!
//! - `POST /api/chat` and `POST /api/chat/stream` run chat requests, the
//!   latter delivering each run's events as named Server-Sent Events
//! - `/api/mcp/servers` administers the tool-server registry and reconciles
//!   live connections after every change
//! - `/api/mcp/status` and `/api/mcp/logs` expose connection state and
//!   tool-server log notifications
//! - `/health` for liveness probes
//!
//! ```rust,no_run
//! use canary_http::{AppConfigBuilder, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfigBuilder::from_env()?.build()?;
//!     let report = serve(config).await?;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod streaming;

pub use config::{AppConfig, AppConfigBuilder, ConfigError, DEFAULT_BIND_ADDR};
pub use error::{ApiError, ErrorResponse};
pub use router::router;
pub use server::{ServeError, build_state, serve, serve_with_shutdown};
pub use shutdown::shutdown_signal;
pub use state::AppState;
pub use streaming::{chat_event_stream, tool_log_stream};
