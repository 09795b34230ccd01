//! End-to-end migration behavior against in-memory systems.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use opsmigrate::compare::ComparisonRequest;
use opsmigrate::executor::Executor;
use opsmigrate::state::{CopyOptions, JsonFileTaskStore, NoOpTaskStore, TaskStore};
use opsmigrate::{
    CompareRequest, ConnectionRef, ConnectorCatalog, CreateTaskRequest, MigrateError,
    MigrationTask, MigrationUnit, ResourceSelector, RowCursor, SystemKind, TaskStatus,
    WriteOptions,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

fn request(h: &Harness, selectors: Vec<ResourceSelector>) -> CreateTaskRequest {
    CreateTaskRequest::new(h.source.clone(), h.target.clone(), selectors)
}

async fn run_to_end(h: &Harness, request: CreateTaskRequest) -> MigrationTask {
    let id = h.service.create_task(request).await.unwrap();
    h.service.start_task(&id).await.unwrap();
    h.service.wait(&id).await.unwrap();
    h.service.task_record(&id).await.unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_two_tables_into_empty_target() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 100).add_table("shop", "orders", 50);

    let mut req = request(&h, vec![ResourceSelector::units("shop", ["users", "orders"])]);
    req.batch_size = Some(10);
    req.create_schema = Some(true);
    let task = run_to_end(&h, req).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.outcomes.len(), 2);
    assert!(task.outcomes.iter().all(|o| o.success));
    assert_eq!(task.rows_migrated, 150);
    // ten batches for users, five for orders; the final empty read writes nothing
    assert_eq!(h.dst.row_writes(), 15);

    let result = h
        .service
        .compare(CompareRequest {
            source_config: h.source.clone().into(),
            target_config: h.target.clone().into(),
            collection: "shop".into(),
            target_collection: None,
            units: vec!["users".into(), "orders".into()],
        })
        .await
        .unwrap();

    assert_eq!(result.source_count, 2);
    assert_eq!(result.target_count, 2);
    assert!(result.counts_equal);
    for unit in &result.units {
        assert!(!unit.divergent, "{} diverged", unit.unit);
        assert_eq!(unit.row_count_source, unit.row_count_target);
    }
}

#[tokio::test]
async fn test_one_failed_object_still_completes() {
    let h = Harness::kubernetes();
    h.src
        .add_object("prod", "deployments", "web")
        .add_object("prod", "services", "web")
        .add_object("prod", "secrets", "tls");
    h.dst
        .fail_writes_for(&MigrationUnit::new("prod", "secrets", "tls"));

    let task = run_to_end(
        &h,
        request(
            &h,
            vec![ResourceSelector::types(
                "prod",
                ["deployments", "services", "secrets"],
            )],
        ),
    )
    .await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100.0);
    let failed: Vec<_> = task.outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].unit.name, "tls");
    assert!(!failed[0].error.as_deref().unwrap_or("").is_empty());
    assert!(h.dst.has_unit(&MigrationUnit::new("prod", "deployments", "web")));
    assert!(task.error_message.is_none());
}

#[tokio::test]
async fn test_all_units_failing_fails_task() {
    let h = Harness::mysql();
    h.src
        .add_table("shop", "users", 3)
        .add_table("shop", "orders", 3)
        .add_table("shop", "items", 3);
    h.dst.fail_all_writes("connection lost");

    let task = run_to_end(&h, request(&h, vec![ResourceSelector::types("shop", ["table"])])).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.as_deref().is_some_and(|m| !m.is_empty()));
    assert_eq!(task.outcomes.len(), task.units.len());
    assert_eq!(task.outcomes.iter().filter(|o| o.success).count(), 0);
}

#[tokio::test]
async fn test_target_lost_mid_run_fails_task() {
    let h = Harness::mysql();
    h.src
        .add_table("shop", "users", 3)
        .add_table("shop", "orders", 3)
        .add_table("shop", "items", 3);
    let dst = h.dst.clone();
    h.dst.set_write_hook(Arc::new(move |unit: &MigrationUnit| {
        if unit.name == "orders" {
            dst.set_offline(true);
        }
    }));

    let task = run_to_end(&h, request(&h, vec![ResourceSelector::types("shop", ["table"])])).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.as_deref().is_some_and(|m| !m.is_empty()));
    assert_eq!(task.units.len(), 3);
    assert_eq!(task.outcomes.len(), 2);
    assert_eq!(task.outcomes[0].unit.name, "users");
    assert!(task.outcomes[0].success);
    assert_eq!(task.outcomes[1].unit.name, "orders");
    assert!(!task.outcomes[1].success);
    assert!(task.outcomes.iter().all(|o| o.unit.name != "items"));
    assert!(!h.dst.has_unit(&MigrationUnit::new("shop", "table", "items")));
}

#[tokio::test]
async fn test_cancel_after_second_unit() {
    let src = opsmigrate::connectors::MemorySystem::new("src");
    let dst = opsmigrate::connectors::MemorySystem::new("dst");
    for name in ["a", "b", "c", "d", "e"] {
        src.add_object("prod", "configmaps", name);
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    dst.set_write_hook(Arc::new(move |unit: &MigrationUnit| {
        if unit.name == "b" {
            trigger.cancel();
        }
    }));

    let catalog = ConnectorCatalog::new().with(Arc::new(
        opsmigrate::connectors::MemoryConnector::new(SystemKind::Kubernetes)
            .with_system("src", src.clone())
            .with_system("dst", dst.clone()),
    ));
    let executor = Executor::new(Arc::new(catalog), Arc::new(NoOpTaskStore::new()));

    let mut task = MigrationTask::new(
        common::kubernetes("src"),
        common::kubernetes("dst"),
        vec![ResourceSelector::types("prod", ["configmaps"])],
        CopyOptions::default(),
    );
    task.mark_running().unwrap();
    let task = Arc::new(RwLock::new(task));

    let status = executor.run(task.clone(), cancel).await;

    assert_eq!(status, TaskStatus::Cancelled);
    let task = task.read().await;
    assert_eq!(task.units.len(), 5);
    assert_eq!(task.outcomes.len(), 2);
    assert_eq!(task.progress, 40.0);
    assert_eq!(dst.definition_writes(), 2);
    for name in ["c", "d", "e"] {
        assert!(!dst.has_unit(&MigrationUnit::new("prod", "configmaps", name)));
    }
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let h = Harness::mysql();
    for i in 0..8 {
        h.src.add_table("shop", &format!("t{}", i), 20);
    }
    h.dst.set_write_hook(Arc::new(|_: &MigrationUnit| {
        std::thread::sleep(Duration::from_millis(5));
    }));

    let id = h
        .service
        .create_task(request(&h, vec![ResourceSelector::types("shop", ["table"])]))
        .await
        .unwrap();
    h.service.start_task(&id).await.unwrap();

    let mut samples = Vec::new();
    loop {
        let progress = h.service.get_progress(&id).await.unwrap();
        samples.push(progress.progress);
        if progress.status.is_terminal() {
            assert_eq!(progress.status, TaskStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{:?}", samples);
    assert_eq!(*samples.last().unwrap(), 100.0);
}

#[tokio::test]
async fn test_outcome_per_resolved_unit() {
    let h = Harness::mysql();
    h.src
        .add_table("shop", "users", 1)
        .add_table("shop", "orders", 1)
        .add_table("crm", "leads", 1);
    h.dst.fail_writes_for(&MigrationUnit::new("shop", "table", "orders"));

    let task = run_to_end(
        &h,
        request(
            &h,
            vec![
                ResourceSelector::types("shop", ["table"]),
                ResourceSelector::units("crm", ["leads"]),
                ResourceSelector::units("shop", ["users"]),
            ],
        ),
    )
    .await;

    assert_eq!(task.units.len(), 3);
    assert_eq!(task.outcomes.len(), task.units.len());
    let order: Vec<String> = task.outcomes.iter().map(|o| o.unit.to_string()).collect();
    assert_eq!(
        order,
        vec!["shop/table/users", "shop/table/orders", "crm/table/leads"]
    );
}

#[tokio::test]
async fn test_definition_writes_are_idempotent() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 4);

    let catalog = h.service.catalog();
    let source = catalog.connect(&h.source).await.unwrap();
    let target = catalog.connect(&h.target).await.unwrap();
    let unit = MigrationUnit::new("shop", "table", "users");
    let definition = source.fetch_definition(&unit).await.unwrap();
    let options = WriteOptions::default();

    target.write_definition(&unit, &definition, &options).await.unwrap();
    let rows = source.read_rows(&unit, &definition, &RowCursor::start(), 100).await.unwrap();
    target.write_rows(&unit, rows.clone()).await.unwrap();
    let first = h.dst.rows(&unit);

    target.write_definition(&unit, &definition, &options).await.unwrap();
    target.write_rows(&unit, rows).await.unwrap();
    assert_eq!(h.dst.rows(&unit), first);
    assert_eq!(first.map(|r| r.len()), Some(4));
}

#[tokio::test]
async fn test_manifest_writes_are_idempotent() {
    let h = Harness::kubernetes();
    h.src.add_object("prod", "configmaps", "settings");

    let catalog = h.service.catalog();
    let source = catalog.connect(&h.source).await.unwrap();
    let target = catalog.connect(&h.target).await.unwrap();
    let unit = MigrationUnit::new("prod", "configmaps", "settings");
    let definition = source.fetch_definition(&unit).await.unwrap();

    target
        .write_definition(&unit, &definition, &WriteOptions::default())
        .await
        .unwrap();
    let first = h.dst.manifest(&unit);
    target
        .write_definition(&unit, &definition, &WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(h.dst.manifest(&unit), first);
    assert!(first.is_some());
}

#[tokio::test]
async fn test_migrated_units_compare_equal() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 7).add_table("shop", "empty", 0);

    let mut req = request(
        &h,
        vec![ResourceSelector::types("shop", ["table"]).with_target_collection("shop_copy")],
    );
    req.batch_size = Some(3);
    let task = run_to_end(&h, req).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let result = h
        .service
        .compare(CompareRequest {
            source_config: ConnectionRef::Named("src".into()),
            target_config: ConnectionRef::Named("dst".into()),
            collection: "shop".into(),
            target_collection: Some("shop_copy".into()),
            units: vec!["users".into(), "table/empty".into()],
        })
        .await
        .unwrap();

    for unit in &result.units {
        assert!(unit.exists_in_source && unit.exists_in_target);
        assert_eq!(unit.row_count_source, unit.row_count_target);
    }
    assert!(result.is_consistent());
}

#[tokio::test]
async fn test_empty_selection_persists_nothing() {
    let h = Harness::mysql();
    h.src.add_collection("empty");

    let err = h
        .service
        .create_task(request(&h, vec![ResourceSelector::types("empty", ["table"])]))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::EmptySelection(_)));
    assert!(h.service.list_tasks().await.is_empty());
    assert_eq!(h.dst.definition_writes(), 0);
}

// =============================================================================
// Task lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_requires_pending() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);

    let id = h
        .service
        .create_task(request(&h, vec![ResourceSelector::units("shop", ["users"])]))
        .await
        .unwrap();
    assert_eq!(h.service.get_progress(&id).await.unwrap().status, TaskStatus::Pending);

    h.service.start_task(&id).await.unwrap();
    h.service.wait(&id).await.unwrap();

    let err = h.service.start_task(&id).await.unwrap_err();
    assert!(matches!(err, MigrateError::InvalidState(_)));
    let err = h.service.cancel_task(&id).await.unwrap_err();
    assert!(matches!(err, MigrateError::InvalidState(_)));
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);

    let id = h
        .service
        .create_task(request(&h, vec![ResourceSelector::units("shop", ["users"])]))
        .await
        .unwrap();
    assert_eq!(h.service.cancel_task(&id).await.unwrap(), TaskStatus::Cancelled);

    let progress = h.service.wait(&id).await.unwrap();
    assert_eq!(progress.status, TaskStatus::Cancelled);
    assert!(matches!(
        h.service.start_task(&id).await,
        Err(MigrateError::InvalidState(_))
    ));
    assert_eq!(h.dst.definition_writes(), 0);
}

#[tokio::test]
async fn test_wait_on_unstarted_task_is_rejected() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);

    let id = h
        .service
        .create_task(request(&h, vec![ResourceSelector::units("shop", ["users"])]))
        .await
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(5), h.service.wait(&id))
        .await
        .expect("wait returned");
    assert!(matches!(waited, Err(MigrateError::InvalidState(_))));
    assert_eq!(h.service.get_progress(&id).await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_run_reresolves_source_state() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);

    let id = h
        .service
        .create_task(request(&h, vec![ResourceSelector::types("shop", ["table"])]))
        .await
        .unwrap();
    h.src.add_table("shop", "orders", 2);

    h.service.start_task(&id).await.unwrap();
    h.service.wait(&id).await.unwrap();
    let task = h.service.task_record(&id).await.unwrap();
    assert_eq!(task.units.len(), 2);
}

#[tokio::test]
async fn test_unknown_task() {
    let h = Harness::mysql();
    assert!(matches!(
        h.service.get_progress("nope").await,
        Err(MigrateError::TaskNotFound(_))
    ));
    assert!(matches!(
        h.service.start_task("nope").await,
        Err(MigrateError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_tasks_newest_first() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = h
            .service
            .create_task(request(&h, vec![ResourceSelector::units("shop", ["users"])]))
            .await
            .unwrap();
        ids.push(id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let listed: Vec<String> = h.service.list_tasks().await.into_iter().map(|s| s.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_unreachable_target_fails_at_start() {
    let h = Harness::mysql();
    h.src.add_table("shop", "users", 1);
    h.dst.set_offline(true);

    let task = run_to_end(&h, request(&h, vec![ResourceSelector::units("shop", ["users"])])).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.outcomes.is_empty());
    assert!(task.error_message.unwrap().contains("dst"));
}

#[tokio::test]
async fn test_restart_marks_running_tasks_failed() {
    let dir = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(JsonFileTaskStore::new(dir.path()));
    store.init().await.unwrap();

    let mut running = MigrationTask::new(
        common::mysql("src"),
        common::mysql("dst"),
        vec![ResourceSelector::units("shop", ["users"])],
        CopyOptions::default(),
    );
    running.mark_running().unwrap();
    store.save(&running).await.unwrap();

    let pending = MigrationTask::new(
        common::mysql("src"),
        common::mysql("dst"),
        vec![ResourceSelector::units("shop", ["orders"])],
        CopyOptions::default(),
    );
    store.save(&pending).await.unwrap();

    let h = Harness::with_store(SystemKind::Mysql, store.clone());
    assert_eq!(h.service.restore().await.unwrap(), 2);

    let restored = h.service.get_progress(&running.id).await.unwrap();
    assert_eq!(restored.status, TaskStatus::Failed);
    assert_eq!(
        restored.error_message.as_deref(),
        Some(opsmigrate::service::INTERRUPTED_MESSAGE)
    );
    assert_eq!(
        h.service.get_progress(&pending.id).await.unwrap().status,
        TaskStatus::Pending
    );

    let reloaded = store.load_all().await.unwrap();
    let saved = reloaded.iter().find(|t| t.id == running.id).unwrap();
    assert_eq!(saved.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_batch_compare_reports_each_collection() {
    let h = Harness::mysql();
    h.src.add_table("a", "t1", 2).add_table("b", "t2", 2);
    h.dst.add_table("a", "t1", 2).add_table("b", "t2", 1);
    h.dst.fail_counts_for("a");

    let results = h
        .service
        .compare_batch(opsmigrate::service::CompareBatchRequest {
            source_config: "src".into(),
            target_config: "dst".into(),
            collections: vec![
                ComparisonRequest::new("a", ["t1"]),
                ComparisonRequest::new("b", ["t2"]),
            ],
        })
        .await
        .unwrap();

    assert_eq!(results[0].collection, "a");
    assert!(results[0].error.is_some());
    let b = results[1].result.as_ref().unwrap();
    assert_eq!(b.divergent_count(), 1);
}

#[tokio::test]
async fn test_connection_check_reports_failure() {
    let h = Harness::mysql();
    assert!(h.service.test_connection(&"src".into()).await.ok);

    h.src.set_offline(true);
    let result = h.service.test_connection(&"src".into()).await;
    assert!(!result.ok);
    assert!(!result.message.is_empty());

    let result = h.service.test_connection(&"missing".into()).await;
    assert!(!result.ok);

    // a kubernetes config has no connector in a mysql-only catalog
    let result = h
        .service
        .test_connection(&common::kubernetes("src").into())
        .await;
    assert!(!result.ok);
}
