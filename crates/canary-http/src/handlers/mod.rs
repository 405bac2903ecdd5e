//! HTTP request handlers

pub mod chat;
pub mod health;
pub mod servers;

pub use chat::{chat, chat_stream};
pub use health::health_check;
pub use servers::{
    delete_server, list_servers, replace_servers, server_logs, server_status, upsert_server,
};
