use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

use baton_core::app::{Coordinator, CoordinatorBuilder, SubmitOutcome};
use baton_core::domain::{Direction, Manifest, NodeId, TaskPayload};
use baton_core::impls::{LoopbackTransport, RuleManifestMatcher, StaticTopology, TaskHandler};
use baton_core::observability::{DEFAULT_FILTER, init_tracing};
use baton_core::ports::PipelineError;
use baton_core::{BatonConfig, CoordinationError};

#[derive(Debug, Deserialize)]
struct GreetPayload {
    name: String,
}

/// Prints a greeting for every task it receives.
struct GreetHandler {
    node: &'static str,
}

#[async_trait]
impl TaskHandler for GreetHandler {
    async fn handle(&self, payload: &TaskPayload) -> Result<(), PipelineError> {
        let p: GreetPayload = serde_json::from_value(payload.body.clone())
            .map_err(|e| PipelineError::Rejected(format!("json decode: {e}")))?;
        println!("[{}] Hello, {}! (task {})", self.node, p.name, payload.task_id());
        Ok(())
    }
}

fn node_config(base: &BatonConfig, node: &str) -> BatonConfig {
    let mut config = base.clone();
    config.node.node_id = node.to_string();
    config
}

/// Two nodes on one loopback transport: "P-greeter" lives on node-a, "P-remote" on node-b.
fn build_nodes(base: &BatonConfig) -> Result<(Coordinator, Coordinator), Box<dyn std::error::Error>> {
    let node_a = NodeId::new("node-a");
    let node_b = NodeId::new("node-b");
    let topology = StaticTopology::new(node_a.clone())
        .with_participant("P-greeter", node_a.clone())
        .with_participant("P-remote", node_b.clone());
    let transport = Arc::new(LoopbackTransport::new());

    let a = CoordinatorBuilder::new(node_config(base, "node-a"))
        .register("P-greeter", Arc::new(GreetHandler { node: "node-a" }))?
        .expect_participants(&["P-greeter"])
        .topology(Arc::new(topology.clone()))
        .transport(transport.clone())
        .manifest_matcher(Arc::new(
            RuleManifestMatcher::new()
                .route(Direction::Inbound, Some("application/json"), "P-greeter")
                .route(Direction::Inbound, Some("application/json"), "P-remote"),
        ))
        .build()?;

    let b = CoordinatorBuilder::new(node_config(base, "node-b"))
        .register("P-remote", Arc::new(GreetHandler { node: "node-b" }))?
        .topology(Arc::new(topology.as_seen_from(node_b.clone())))
        .transport(transport.clone())
        .build()?;

    transport.register(node_b, b.inbox());
    Ok((a, b))
}

async fn wait_until_settled(node: &Coordinator, outcomes: &[SubmitOutcome]) -> Result<(), CoordinationError> {
    for outcome in outcomes {
        let SubmitOutcome::Enqueued { task_id, .. } = outcome else {
            continue;
        };
        loop {
            let state = node.get(*task_id).await?.state();
            // FINISHED から FINALISED へは flusher の次の周期で進む
            if state.is_terminal() {
                println!("task {task_id}: {state}");
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&format!("{DEFAULT_FILTER},baton_cli=info"));

    // (A) 設定（引数で設定ファイルを渡せる。BATON__* 環境変数が上書き）
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = BatonConfig::load(path.as_deref())?;

    // (B) 2 ノードを組み立てて background loop を起動
    let (a, b) = build_nodes(&config)?;
    let workers_a = a.spawn_background();
    let workers_b = b.spawn_background();

    // (C) manifest で配布（ローカルは enqueue、リモートは handover）
    let manifest = Manifest::new(Direction::Inbound, "application/json");
    let outcomes = a.submit(&manifest, serde_json::json!({ "name": "baton" })).await?;
    for outcome in &outcomes {
        println!("submitted: {outcome:?}");
    }

    // (D) ローカルのタスクが終わるのを待つ
    wait_until_settled(&a, &outcomes).await?;

    // (E) 止めて集計を出す
    workers_a.shutdown_and_join().await;
    workers_b.shutdown_and_join().await;
    println!("node-a counts: {}", serde_json::to_string(&a.status().await?)?);
    println!("node-b counts: {}", serde_json::to_string(&b.status().await?)?);
    tracing::info!("demo finished");
    Ok(())
}
