//! One-shot chat from the command line

use crate::error::CliError;
use canary_chat::{ChatReply, ChatRequest};
use canary_http::{AppConfig, AppState, build_state};
use std::time::Duration;
use tracing::{info, warn};

pub async fn run_chat(
    config: &AppConfig,
    message: String,
    connect_timeout: Duration,
) -> Result<(), CliError> {
    let state = build_state(config)?;
    let result = ask(&state, message, connect_timeout).await;

    let report = state.manager.shutdown().await;
    for (server_id, error) in &report.failures {
        warn!(%server_id, %error, "Connection did not close cleanly");
    }

    let reply = result?;
    print_reply(&reply)
}

async fn ask(
    state: &AppState,
    message: String,
    connect_timeout: Duration,
) -> Result<ChatReply, CliError> {
    let definitions = state.registry.list()?;
    state.manager.reconcile(definitions).await?;
    if !state.manager.wait_until_settled(connect_timeout).await {
        warn!(
            timeout_secs = connect_timeout.as_secs(),
            "Some tool servers are still connecting; continuing with the ready ones"
        );
    }
    info!(tools = state.manager.catalog().len(), "Tool catalog ready");

    Ok(state.orchestrator.chat(ChatRequest::new(message)).await?)
}

fn print_reply(reply: &ChatReply) -> Result<(), CliError> {
    println!("{}", reply.reply);
    for call in &reply.tool_calls {
        println!("🔧 {} ({})", call.tool, call.group);
    }
    if let Some(graph) = &reply.graph_json {
        println!("\nGRAPH_JSON:\n{}", serde_json::to_string_pretty(graph)?);
    }
    if let Some(chart) = &reply.chart_json {
        println!("\nCHART_JSON:\n{}", serde_json::to_string_pretty(chart)?);
    }
    Ok(())
}
