use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::Arc;

use workspace_sync_metadata::test_utils::{
    Fault, FaultInjectingStore, RecordingLogSink, RecordingMigrationRunner,
};
use workspace_sync_metadata::*;

const WORKSPACE: &str = "workspace-1";

fn context() -> WorkspaceSyncContext {
    WorkspaceSyncContext::new(WORKSPACE, "data-source-1")
}

fn flags(enabled: &[&str]) -> StaticFeatureFlagResolver {
    let overrides = enabled.iter().map(|k| (k.to_string(), true)).collect();
    StaticFeatureFlagResolver::new(FeatureFlagMap::new()).with_workspace(WORKSPACE, overrides)
}

struct Harness {
    service: WorkspaceSyncMetadataService,
    runner: RecordingMigrationRunner,
    sink: RecordingLogSink,
}

fn harness(
    store: Arc<dyn MetadataStore>,
    resolver: StaticFeatureFlagResolver,
    runner: RecordingMigrationRunner,
) -> Harness {
    let sink = RecordingLogSink::new();
    let service = WorkspaceSyncMetadataService::new(
        store,
        Arc::new(resolver),
        Arc::new(runner.clone()),
        Arc::new(sink.clone()),
    );
    Harness {
        service,
        runner,
        sink,
    }
}

fn default_harness(store: &InMemoryMetadataStore) -> Harness {
    harness(
        Arc::new(store.clone()),
        flags(&[]),
        RecordingMigrationRunner::new(),
    )
}

#[tokio::test]
async fn fresh_workspace_creates_every_active_definition_once() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);

    let report = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    let schema = standard_schema();
    let no_flags = FeatureFlagMap::new();
    let expected_objects = schema.active_objects(&no_flags).count();
    let expected_fields: usize = schema
        .active_objects(&no_flags)
        .map(|o| o.active_fields(&no_flags).count())
        .sum();
    let expected_relations = schema.active_relations(&no_flags).count();

    assert_eq!(report.summary.objects.created, expected_objects);
    assert_eq!(report.summary.fields.created, expected_fields);
    assert_eq!(report.summary.relations.created, expected_relations);
    assert_eq!(report.summary.objects.updated + report.summary.objects.deleted, 0);

    // one CREATE table per object, one join migration per relation
    let creates = report
        .migrations
        .iter()
        .filter(|m| m.actions[0].kind == TableActionKind::Create)
        .count();
    assert_eq!(creates, expected_objects);
    assert_eq!(report.migrations.len(), expected_objects + expected_relations);
    assert!(!report
        .migrations
        .iter()
        .any(|m| m.name == "create-company-name"));
}

#[tokio::test]
async fn relations_resolve_objects_created_in_the_same_run() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);

    let report = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    let snapshot = store.snapshot().await;
    let company = snapshot
        .objects
        .values()
        .find(|o| o.name() == "company")
        .unwrap();
    let person = snapshot
        .objects
        .values()
        .find(|o| o.name() == "person")
        .unwrap();
    assert!(snapshot.relations.values().any(|r| {
        r.from_object_metadata_id == company.id && r.to_object_metadata_id == person.id
    }));

    // relation migrations come after every table is created
    let first_relation = report
        .migrations
        .iter()
        .position(|m| m.name.starts_with("create-relation-"))
        .unwrap();
    assert!(report.migrations[first_relation..]
        .iter()
        .all(|m| m.actions[0].kind == TableActionKind::Alter));
}

#[tokio::test]
async fn second_run_without_changes_is_empty() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);

    h.service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();
    let before = store.snapshot().await.to_bytes();

    let report = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.total(), 0);
    assert!(report.migrations.is_empty());
    assert_eq!(store.snapshot().await.to_bytes(), before);
    assert_eq!(h.runner.calls().len(), 2);
}

#[tokio::test]
async fn disabled_flag_turns_gated_entities_into_delete_candidates() {
    let store = InMemoryMetadataStore::new();
    let enabled = harness(
        Arc::new(store.clone()),
        flags(&[keys::IS_BLOCKLIST_ENABLED]),
        RecordingMigrationRunner::new(),
    );
    enabled
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    let disabled = default_harness(&store);
    let report = disabled
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.objects.deleted, 1);
    assert_eq!(report.summary.relations.deleted, 1);
    // blocklist's own fields plus workspaceMember.blocklist
    let blocklist_fields = standard_schema()
        .find_object("blocklist")
        .unwrap()
        .fields
        .len();
    assert_eq!(report.summary.fields.deleted, blocklist_fields + 1);

    // the join column lived on the dropped table, so only the DROP remains
    let names: Vec<&str> = report.migrations.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["drop-blocklist"]);

    let snapshot = store.snapshot().await;
    let blocklist = snapshot
        .objects
        .values()
        .find(|o| o.name() == "blocklist")
        .unwrap();
    assert!(!blocklist.is_active);

    // already soft-deleted, so the next run has nothing to do
    let again = disabled
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(again.summary.total(), 0);
}

#[tokio::test]
async fn dry_run_leaves_store_untouched_and_logs_full_diff() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);
    let before = store.snapshot().await.to_bytes();

    let report = h
        .service
        .synchronize(&context(), SyncOptions::dry_run())
        .await
        .unwrap();

    assert_eq!(store.snapshot().await.to_bytes(), before);
    assert!(h.runner.calls().is_empty());
    assert_eq!(report.final_state, SyncState::DryRunRollback);

    let entries = h.sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].context, context());
    assert_eq!(entries[0].summary, report.summary);
    assert_eq!(entries[0].migrations, report.migrations);
    assert!(entries[0].summary.total() > 0);
}

#[tokio::test]
async fn commit_path_persists_diffs_and_runs_migrations_once() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);

    let report = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.objects.len(), report.summary.objects.created);
    assert_eq!(snapshot.fields.len(), report.summary.fields.created);
    assert_eq!(snapshot.relations.len(), report.summary.relations.created);
    assert_eq!(snapshot.migrations.len(), report.migrations.len());
    assert!(snapshot.migrations.iter().all(|m| m.is_pending()));

    assert_eq!(h.runner.calls(), vec![WORKSPACE.to_string()]);
    assert_eq!(report.final_state, SyncState::Done);
    assert!(h.sink.entries().is_empty());
}

#[tokio::test]
async fn failure_during_relation_sync_rolls_everything_back() {
    let store = InMemoryMetadataStore::new();
    let faulty = FaultInjectingStore::new(Arc::new(store.clone()), Fault::SaveRelation);
    let h = harness(
        Arc::new(faulty.clone()),
        flags(&[]),
        RecordingMigrationRunner::new(),
    );
    let before = store.snapshot().await.to_bytes();

    let err = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(StoreError::Backend(_))));
    assert!(!err.is_post_commit());
    assert_eq!(store.snapshot().await.to_bytes(), before);
    assert!(h.runner.calls().is_empty());
    assert_eq!(faulty.releases(), 1);
}

#[tokio::test]
async fn unreachable_store_fails_before_diffing() {
    let store = InMemoryMetadataStore::new();
    store.set_reachable(false);
    let h = default_harness(&store);

    let err = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connectivity(StoreError::Unreachable(_))));
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn failed_transaction_start_still_releases_connection() {
    let store = InMemoryMetadataStore::new();
    let faulty = FaultInjectingStore::new(Arc::new(store.clone()), Fault::StartTransaction);
    let h = harness(
        Arc::new(faulty.clone()),
        flags(&[]),
        RecordingMigrationRunner::new(),
    );

    let err = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Connectivity(_)));
    assert_eq!(faulty.releases(), 1);
}

#[tokio::test]
async fn commit_failure_keeps_metadata_unchanged() {
    let store = InMemoryMetadataStore::new();
    let faulty = FaultInjectingStore::new(Arc::new(store.clone()), Fault::Commit);
    let h = harness(
        Arc::new(faulty.clone()),
        flags(&[]),
        RecordingMigrationRunner::new(),
    );
    let before = store.snapshot().await.to_bytes();

    let err = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Commit(_)));
    assert_eq!(store.snapshot().await.to_bytes(), before);
    assert!(h.runner.calls().is_empty());
    assert_eq!(faulty.releases(), 1);
}

#[tokio::test]
async fn migration_failure_is_reported_after_commit() {
    let store = InMemoryMetadataStore::new();
    let h = harness(
        Arc::new(store.clone()),
        flags(&[]),
        RecordingMigrationRunner::failing("ddl exploded"),
    );

    let err = h
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_post_commit());
    assert!(matches!(
        err,
        SyncError::MigrationExecution { ref workspace_id, .. } if workspace_id == WORKSPACE
    ));
    // metadata and the pending queue are durable
    let snapshot = store.snapshot().await;
    assert!(!snapshot.objects.is_empty());
    assert!(!snapshot.migrations.is_empty());
    assert_eq!(h.runner.calls().len(), 1);
}

#[tokio::test]
async fn runner_drains_migrations_left_by_earlier_runs() {
    let store = InMemoryMetadataStore::new();
    let failing = harness(
        Arc::new(store.clone()),
        flags(&[]),
        RecordingMigrationRunner::failing("offline"),
    );
    failing
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();
    let queued = store.snapshot().await.migrations.len();
    assert!(queued > 0);

    let shared: Arc<dyn MetadataStore> = Arc::new(store.clone());
    let applying = harness(
        shared.clone(),
        flags(&[]),
        RecordingMigrationRunner::applying(shared),
    );
    let report = applying
        .service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap();

    assert!(report.migrations.is_empty());
    assert_eq!(report.executed_migrations, queued);
    assert!(store
        .snapshot()
        .await
        .migrations
        .iter()
        .all(|m| !m.is_pending()));
}

#[tokio::test]
async fn log_sink_failure_is_surfaced_on_dry_run() {
    let store = InMemoryMetadataStore::new();
    let service = WorkspaceSyncMetadataService::new(
        Arc::new(store.clone()),
        Arc::new(flags(&[])),
        Arc::new(RecordingMigrationRunner::new()),
        Arc::new(RecordingLogSink::failing("disk full")),
    );

    let err = service
        .synchronize(&context(), SyncOptions::dry_run())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::LogPersistence(_)));
    assert!(store.snapshot().await.objects.is_empty());
}

struct BrokenResolver;

#[async_trait]
impl FeatureFlagResolver for BrokenResolver {
    async fn resolve(&self, _context: &WorkspaceSyncContext) -> anyhow::Result<FeatureFlagMap> {
        Err(anyhow!("flag service down"))
    }
}

#[tokio::test]
async fn flag_resolution_failure_aborts_run() {
    let store = InMemoryMetadataStore::new();
    let runner = RecordingMigrationRunner::new();
    let service = WorkspaceSyncMetadataService::new(
        Arc::new(store.clone()),
        Arc::new(BrokenResolver),
        Arc::new(runner.clone()),
        Arc::new(RecordingLogSink::new()),
    );

    let err = service
        .synchronize(&context(), SyncOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::FeatureFlags(_)));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn different_workspaces_sync_concurrently() {
    let store = InMemoryMetadataStore::new();
    let h = default_harness(&store);
    let first = WorkspaceSyncContext::new("workspace-a", "ds");
    let second = WorkspaceSyncContext::new("workspace-b", "ds");

    let (a, b) = tokio::join!(
        h.service.synchronize(&first, SyncOptions::default()),
        h.service.synchronize(&second, SyncOptions::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.summary, b.summary);
    let snapshot = store.snapshot().await;
    assert_eq!(
        snapshot.objects.len(),
        a.summary.objects.created + b.summary.objects.created
    );
}
