//! Single-agent cache behavior across passes.

use crate::common::{TestWorkspace, build_graph, initial_pass};
use cairn::coordinator::PassContext;
use cairn::graph::OperationStatus;
use cairn::metadata::MetadataStore;
use cairn::test_utils::{PassDriver, chain_graph, diamond_graph};
use std::collections::BTreeMap;

#[tokio::test]
async fn miss_then_hit_then_invalidated_by_edited_input() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let driver = PassDriver::new(&workspace.graph);

    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 1);

    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::FromCache);
    assert_eq!(workspace.cache_store.write_log().len(), 1);

    workspace.analyzer.set_project_hashes(
        "a",
        BTreeMap::from([("src/index.ts".to_string(), "edited".to_string())]),
    );
    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert_eq!(workspace.cache_store.write_log().len(), 2);
}

#[tokio::test]
async fn dependency_chain_restores_end_to_end() {
    let workspace = TestWorkspace::new(chain_graph(&["a", "b", "c"]));
    let agent = workspace.agent(None);
    let driver = PassDriver::new(&workspace.graph);

    driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(workspace.cache_store.write_log().len(), 3);

    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert!(
        statuses
            .values()
            .all(|&status| status == OperationStatus::FromCache)
    );
}

#[tokio::test]
async fn non_initial_pass_reuses_but_never_writes() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let driver = PassDriver::new(&workspace.graph);

    let repass = PassContext::new(false, true).with_env(Default::default());
    let statuses = driver.run(&agent.hooks, &repass).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
    assert!(workspace.cache_store.write_log().is_empty());

    // A real initial pass fills the cache; the repass then reads it.
    driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    let statuses = driver.run(&agent.hooks, &repass).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::FromCache);
    assert_eq!(workspace.cache_store.write_log().len(), 1);
}

#[tokio::test]
async fn disallowed_incremental_skips_restores() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let driver = PassDriver::new(&workspace.graph);

    driver.run(&agent.hooks, &initial_pass()).await.unwrap();

    let full_rebuild = PassContext::new(true, false).with_env(Default::default());
    let statuses = driver.run(&agent.hooks, &full_rebuild).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Success);
}

#[tokio::test]
async fn skipped_upstream_suppresses_downstream_writes() {
    let workspace = TestWorkspace::new(build_graph(&["a", "b"], &[("b", "a")]));
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let b = workspace.graph.get("b#build").unwrap();

    let driver = PassDriver::new(&workspace.graph).with_status(a, OperationStatus::Skipped);
    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::Skipped);
    assert_eq!(statuses[&b], OperationStatus::Success);
    // Neither the skipped operation nor its poisoned consumer wrote.
    assert!(workspace.cache_store.write_log().is_empty());
}

#[tokio::test]
async fn suppression_cascades_through_a_diamond() {
    let workspace = TestWorkspace::new(diamond_graph("base", "left", "right", "top"));
    let agent = workspace.agent(None);
    let base = workspace.graph.get("base#build").unwrap();

    let driver = PassDriver::new(&workspace.graph).with_status(base, OperationStatus::Skipped);
    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&base], OperationStatus::Skipped);
    // The revocation propagates hop by hop as each poisoned operation
    // finishes, so nothing downstream of the skip is cached.
    assert!(workspace.cache_store.write_log().is_empty());
}

#[tokio::test]
async fn failed_cache_write_reports_success_with_warnings() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    workspace.cache_store.reject_writes(true);
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let driver = PassDriver::new(&workspace.graph);

    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::SuccessWithWarning);
}

#[tokio::test]
async fn unreachable_cache_store_degrades_to_warnings_without_aborting() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    workspace.cache_store.break_writes(true);
    let agent = workspace.agent(None);
    let a = workspace.graph.get("a#build").unwrap();
    let driver = PassDriver::new(&workspace.graph);

    // The write errors out rather than being rejected; the pass still
    // completes and only the status reflects the trouble.
    let statuses = driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(statuses[&a], OperationStatus::SuccessWithWarning);
    assert!(workspace.cache_store.write_log().is_empty());
}

#[tokio::test]
async fn metadata_is_saved_on_execution_and_kept_on_restore() {
    let workspace = TestWorkspace::new(build_graph(&["a"], &[]));
    let agent = workspace.agent(None);
    let driver = PassDriver::new(&workspace.graph);

    driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    assert_eq!(workspace.metadata_store.saved_names(), vec!["a#build"]);
    let saved = workspace
        .metadata_store
        .try_restore("a#build")
        .await
        .unwrap()
        .unwrap();
    assert!((saved.duration_seconds - 1.0).abs() < f64::EPSILON);

    // The restoring pass must not overwrite the original duration.
    driver.run(&agent.hooks, &initial_pass()).await.unwrap();
    let saved = workspace
        .metadata_store
        .try_restore("a#build")
        .await
        .unwrap()
        .unwrap();
    assert!((saved.duration_seconds - 1.0).abs() < f64::EPSILON);
}
