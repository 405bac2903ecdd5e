//! Property-Based Tests for Catalog Aggregation and Run Termination
//!
//! These tests generate random server fleets and random model scripts and
//! check the invariants that must hold for all of them: the catalog is the
//! union of what ready servers offer with collisions resolved towards the
//! most recently ready server, and every run ends with exactly one terminal
//! event.

use canary_chat::{ChatRequest, Orchestrator, OrchestratorConfig, StreamEvent};
use canary_mcp::{ConnectionManager, ConnectionPolicy, ConnectionState};
use canary_registry::{ServerDefinition, ServerSpec};
use canary_testing::{ScriptedConnector, ScriptedModel, ScriptedServer, ScriptedTurn};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);
const TOOL_POOL: [&str; 4] = ["search", "neo4j_find_node", "generate_line_chart", "fetch"];

fn fast_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        handshake_timeout: Duration::from_secs(1),
        close_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

fn definition(id: &str) -> ServerDefinition {
    ServerDefinition::new(id, ServerSpec::process("scripted", Vec::<String>::new()))
}

#[derive(Debug, Clone)]
struct ServerPlan {
    tools: BTreeSet<&'static str>,
    reachable: bool,
}

// Strategy for a fleet of 1-5 servers, each offering a subset of the pool
fn fleet_strategy() -> impl Strategy<Value = Vec<ServerPlan>> {
    let plan = (
        prop::collection::btree_set(prop::sample::select(TOOL_POOL.to_vec()), 0..=3),
        prop::bool::weighted(0.75),
    )
        .prop_map(|(tools, reachable)| ServerPlan { tools, reachable });
    prop::collection::vec(plan, 1..=5)
}

#[derive(Debug, Clone)]
enum Step {
    Text(String),
    Call(&'static str),
    Fail,
}

// Strategy for one model turn; tools may or may not exist in the catalog
fn turn_strategy() -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        4 => "[A-Za-z ,.]{1,12}".prop_map(Step::Text),
        2 => prop::sample::select(vec!["neo4j_find_node", "missing_tool"]).prop_map(Step::Call),
        1 => Just(Step::Fail),
        1 => Just(Step::Text("GRAPH_JSON: {\"nodes\":[],\"edges\":[]}".to_string())),
    ];
    prop::collection::vec(step, 0..5)
}

fn scripted_turn(steps: &[Step]) -> ScriptedTurn {
    steps
        .iter()
        .enumerate()
        .fold(ScriptedTurn::new(), |turn, (i, step)| match step {
            Step::Text(text) => turn.text(text.clone()),
            Step::Call(name) => turn.tool_call(format!("c{i}"), *name, json!({})),
            Step::Fail => turn.error("scripted stream failure"),
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: the catalog holds exactly the tools of ready servers, each
    /// owned by the latest-ready server offering it
    #[test]
    fn prop_catalog_is_union_of_ready_servers(fleet in fleet_strategy()) {
        tokio_test::block_on(async {
            let connector = fleet.iter().enumerate().fold(ScriptedConnector::new(), |connector, (i, plan)| {
                let server = plan.tools.iter().fold(ScriptedServer::new(format!("s{i}")), |server, tool| {
                    server.with_tool(*tool, "generated")
                });
                connector.with_server(if plan.reachable { server } else { server.unreachable() })
            });
            let manager = ConnectionManager::new(Arc::new(connector), fast_policy());
            let definitions = (0..fleet.len()).map(|i| definition(&format!("s{i}"))).collect();
            manager.reconcile(definitions).await.unwrap();
            prop_assert!(manager.wait_until_settled(SETTLE).await);

            let status = manager.status();
            let ready_order: BTreeMap<String, u64> = status
                .iter()
                .filter(|s| s.state == ConnectionState::Ready)
                .map(|s| (s.id.clone(), s.ready_order.unwrap()))
                .collect();
            let ready_count = fleet.iter().filter(|plan| plan.reachable).count();
            prop_assert_eq!(ready_order.len(), ready_count);

            let mut offered: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for (i, plan) in fleet.iter().enumerate().filter(|(_, plan)| plan.reachable) {
                for tool in &plan.tools {
                    offered.entry(*tool).or_default().push(format!("s{i}"));
                }
            }

            let catalog = manager.catalog();
            let expected: Vec<String> = offered.keys().map(|name| name.to_string()).collect();
            prop_assert_eq!(catalog.names(), expected);

            for (tool, servers) in &offered {
                let winner = servers.iter().max_by_key(|id| ready_order[*id]).unwrap();
                prop_assert_eq!(catalog.get(tool).unwrap().owning_server_id(), winner.as_str());
            }
            let losers: usize = offered.values().map(|servers| servers.len() - 1).sum();
            prop_assert_eq!(catalog.conflicts().len(), losers);

            manager.shutdown().await;
            Ok(())
        })?;
    }

    /// Property: whatever the model does, the stream ends with exactly one
    /// terminal event and nothing follows it
    #[test]
    fn prop_run_ends_with_one_terminal_event(
        turns in prop::collection::vec(turn_strategy(), 0..4)
    ) {
        tokio_test::block_on(async {
            let connector = ScriptedConnector::new().with_server(
                ScriptedServer::new("graph").with_tool("neo4j_find_node", "Find a node"),
            );
            let manager = ConnectionManager::new(Arc::new(connector), fast_policy());
            manager.reconcile(vec![definition("graph")]).await.unwrap();
            prop_assert!(manager.wait_until_settled(SETTLE).await);

            let model = turns
                .iter()
                .fold(ScriptedModel::new(), |model, steps| model.then_turn(scripted_turn(steps)));
            let config = OrchestratorConfig {
                max_tool_rounds: 2,
                ..Default::default()
            };
            let orchestrator = Orchestrator::new(Arc::new(model), manager.subscribe_catalog(), config);

            let mut stream = orchestrator.stream(ChatRequest::new("Who does Bob know?")).unwrap();
            let mut events = Vec::new();
            while let Some(event) = stream.recv().await {
                events.push(event);
            }

            let terminals = events.iter().filter(|event| event.is_terminal()).count();
            prop_assert_eq!(terminals, 1);
            prop_assert!(events.last().unwrap().is_terminal());
            prop_assert_eq!(events.first(), Some(&StreamEvent::status("thinking")));

            manager.shutdown().await;
            Ok(())
        })?;
    }
}
