//! Cache-disabled clustering observed through full passes.

use crate::common::{TestWorkspace, build_graph, cobuild, initial_pass};
use cairn::coordinator::ExecutionRecord;
use cairn::graph::{OperationId, OperationStatus};
use cairn::test_utils::PassDriver;

fn records(ids: &[OperationId]) -> Vec<ExecutionRecord> {
    ids.iter().copied().map(ExecutionRecord::new).collect()
}

#[tokio::test]
async fn disabled_operation_shares_a_cluster_id_with_its_consumer() {
    let workspace = TestWorkspace::new(build_graph(&["p", "c", "other"], &[("c", "p")]));
    let p = workspace.graph.get("p#build").unwrap();
    let c = workspace.graph.get("c#build").unwrap();
    let other = workspace.graph.get("other#build").unwrap();

    // "p" carries no cache configuration, so its consumer is pulled into the
    // same cluster.
    let mut configs = workspace.default_project_configs();
    configs.remove("p");
    let agent = workspace.agent_with_configs(Some(cobuild("agent-1")), configs);

    agent
        .coordinator
        .before_all(&records(&workspace.graph.ids()), &initial_pass())
        .await
        .unwrap();

    let mut cluster_ids = Vec::new();
    for id in [p, c, other] {
        let context = agent.coordinator.context(id).unwrap();
        let cluster_id = context.lock().await.cobuild_cluster_id.clone();
        cluster_ids.push(cluster_id.unwrap());
    }
    assert_eq!(cluster_ids[0], cluster_ids[1]);
    assert_ne!(cluster_ids[0], cluster_ids[2]);
}

#[tokio::test]
async fn clustered_consumer_is_shared_through_the_published_state() {
    let graph = build_graph(&["p", "c"], &[("c", "p")]);
    let workspace = TestWorkspace::new(graph);
    let p = workspace.graph.get("p#build").unwrap();
    let c = workspace.graph.get("c#build").unwrap();

    let mut configs = workspace.default_project_configs();
    configs.remove("p");
    let first = workspace.agent_with_configs(Some(cobuild("agent-1")), configs.clone());
    let second = workspace.agent_with_configs(Some(cobuild("agent-2")), configs);

    let driver = PassDriver::new(&workspace.graph);
    let statuses = driver.run(&first.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&p], OperationStatus::Success);
    assert_eq!(statuses[&c], OperationStatus::Success);
    // Only the consumer has a cache entry; the disabled operation never
    // writes.
    assert_eq!(workspace.cache_store.write_log().len(), 1);

    // If the consumer executed locally on the second agent it would fail;
    // restoring the first agent's published result reports success instead.
    let driver = PassDriver::new(&workspace.graph).with_status(c, OperationStatus::Failure);
    let statuses = driver.run(&second.hooks, &initial_pass()).await.unwrap();
    // The disabled operation must execute on every agent.
    assert_eq!(statuses[&p], OperationStatus::Success);
    assert_eq!(statuses[&c], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 1);
}
