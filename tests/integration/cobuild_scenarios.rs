//! Multi-agent cobuild coordination: ownership races, published results,
//! status-qualified cache ids, and crash recovery.

use crate::common::{TestWorkspace, build_graph, cobuild, initial_pass};
use cairn::coordinator::{ExecutionRecord, PassContext};
use cairn::graph::{OperationId, OperationStatus};
use cairn::test_utils::PassDriver;

fn records(ids: &[OperationId]) -> Vec<ExecutionRecord> {
    ids.iter().copied().map(ExecutionRecord::new).collect()
}

#[tokio::test]
async fn losing_agent_reports_remote_executing_without_blocking() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let loser = workspace.agent(Some(cobuild("agent-2")));

    let pass_records = records(&workspace.graph.ids());
    winner
        .coordinator
        .before_all(&pass_records, &initial_pass())
        .await
        .unwrap();
    loser
        .coordinator
        .before_all(&pass_records, &initial_pass())
        .await
        .unwrap();

    let record = ExecutionRecord::new(a);
    assert_eq!(winner.coordinator.before_one(&record).await.unwrap(), None);
    assert_eq!(
        loser.coordinator.before_one(&record).await.unwrap(),
        Some(OperationStatus::RemoteExecuting)
    );
}

#[tokio::test]
async fn published_result_short_circuits_the_next_pass() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let peer = workspace.agent(Some(cobuild("agent-2")));

    let driver = PassDriver::new(&workspace.graph);
    let statuses = driver.run(&winner.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 1);

    // If the peer executed locally it would fail; it restores the published
    // result instead and adopts the published status.
    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Failure);
    let statuses = driver.run(&peer.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 1);
}

#[tokio::test]
async fn published_result_overrides_disallowed_incremental_settings() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let peer = workspace.agent(Some(cobuild("agent-2")));

    let driver = PassDriver::new(&workspace.graph);
    driver.run(&winner.hooks, &initial_pass()).await.unwrap();

    // Cache reads are off for the peer, but a published completed state is
    // authoritative regardless.
    let no_reads = PassContext::new(true, false).with_env(Default::default());
    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Failure);
    let statuses = driver.run(&peer.hooks, &no_reads).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
}

#[tokio::test]
async fn failure_is_published_under_a_qualified_cache_id() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let peer = workspace.agent(Some(cobuild("agent-2")));

    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Failure);
    let statuses = driver.run(&winner.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Failure);
    let writes = workspace.cache_store.write_log();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].ends_with("-ctx-failed"));

    // The peer adopts the failure instead of re-executing.
    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Success);
    let statuses = driver.run(&peer.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Failure);
}

#[tokio::test]
async fn disallowed_warnings_are_published_under_a_qualified_cache_id() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let peer = workspace.agent(Some(cobuild("agent-2")));

    let driver =
        PassDriver::new(&workspace.graph).with_status(a, OperationStatus::SuccessWithWarning);
    driver.run(&winner.hooks, &initial_pass()).await.unwrap();
    let writes = workspace.cache_store.write_log();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].ends_with("-ctx-warnings"));

    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Success);
    let statuses = driver.run(&peer.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::SuccessWithWarning);
}

#[tokio::test]
async fn expired_lease_lets_a_peer_take_over() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let a = workspace.graph.get("a#build").unwrap();
    let crashed = workspace.agent(Some(cobuild("agent-1")));
    let survivor = workspace.agent(Some(cobuild("agent-2")));

    let pass_records = records(&workspace.graph.ids());
    crashed
        .coordinator
        .before_all(&pass_records, &initial_pass())
        .await
        .unwrap();
    let record = ExecutionRecord::new(a);
    assert_eq!(crashed.coordinator.before_one(&record).await.unwrap(), None);

    // The first agent dies without publishing; its lease expires on its own.
    let cluster_id = {
        let context = crashed.coordinator.context(a).unwrap();
        let context = context.lock().await;
        context.cobuild_lock.as_ref().unwrap().cluster_id().to_string()
    };
    workspace
        .lease_store
        .expire(&format!("cobuild:ctx:lock:{cluster_id}"));

    let driver = PassDriver::new(&workspace.graph);
    let statuses = driver.run(&survivor.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 1);
}

#[tokio::test]
async fn winner_executes_full_graph_and_peer_restores_everything() {
    let workspace = TestWorkspace::new(build_graph(&["a", "b", "c"], &[("b", "a"), ("c", "b")]));
    let winner = workspace.agent(Some(cobuild("agent-1")));
    let peer = workspace.agent(Some(cobuild("agent-2")));

    let driver = PassDriver::new(&workspace.graph);
    let statuses = driver.run(&winner.hooks, &initial_pass()).await.unwrap();
    assert!(
        statuses
            .values()
            .all(|&status| status == OperationStatus::Success)
    );
    assert_eq!(workspace.cache_store.write_log().len(), 3);

    let statuses = driver.run(&peer.hooks, &initial_pass()).await.unwrap();
    assert!(
        statuses
            .values()
            .all(|&status| status == OperationStatus::Success)
    );
    assert_eq!(workspace.cache_store.write_log().len(), 3);
}
