//! Reconciles standard objects and fields against persisted metadata.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::flags::FeatureFlagMap;
use crate::migration::{ColumnAction, ColumnDefinition, TableAction, WorkspaceMigration};
use crate::standard::{StandardFieldDefinition, StandardObjectDefinition, StandardSchema};
use crate::storage::SyncStorage;
use crate::store::MetadataTransaction;
use crate::types::{FieldMetadata, FieldShape, ObjectMetadata, WorkspaceSyncContext};

/// Migrations grouped so they come out objects-first, then create, update, delete.
#[derive(Default)]
struct MigrationBuckets {
    object_creates: Vec<WorkspaceMigration>,
    object_updates: Vec<WorkspaceMigration>,
    object_deletes: Vec<WorkspaceMigration>,
    field_creates: Vec<WorkspaceMigration>,
    field_updates: Vec<WorkspaceMigration>,
    field_deletes: Vec<WorkspaceMigration>,
}

impl MigrationBuckets {
    fn into_ordered(self) -> Vec<WorkspaceMigration> {
        [
            self.object_creates,
            self.object_updates,
            self.object_deletes,
            self.field_creates,
            self.field_updates,
            self.field_deletes,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Synchronizes standard objects, then their fields.
pub struct ObjectMetadataSynchronizer {
    schema: Arc<StandardSchema>,
}

impl ObjectMetadataSynchronizer {
    pub fn new(schema: Arc<StandardSchema>) -> Self {
        Self { schema }
    }

    /// Diff objects and fields, write the results through `manager` and
    /// record them in `storage`.
    ///
    /// Returned migrations are also inserted through `manager`, so they only
    /// become pending if the surrounding transaction commits.
    pub async fn synchronize(
        &self,
        context: &WorkspaceSyncContext,
        manager: &mut dyn MetadataTransaction,
        storage: &mut SyncStorage,
        flags: &FeatureFlagMap,
    ) -> Result<Vec<WorkspaceMigration>> {
        self.schema.validate()?;

        let workspace_id = context.workspace_id.as_str();
        let active: Vec<&StandardObjectDefinition> = self.schema.active_objects(flags).collect();
        let persisted = manager.list_objects(workspace_id).await?;

        let mut standard_by_name: HashMap<&str, &ObjectMetadata> = HashMap::new();
        for object in &persisted {
            if object.is_custom {
                if active.iter().any(|d| d.name() == object.name()) {
                    return Err(SyncError::DiffComputation(format!(
                        "standard object '{}' collides with a custom object",
                        object.name()
                    )));
                }
                continue;
            }
            standard_by_name.insert(object.name(), object);
        }

        let mut buckets = MigrationBuckets::default();
        // Objects whose table is (re)created by this run.
        let mut rebuilt: HashSet<&str> = HashSet::new();

        for definition in &active {
            match standard_by_name.get(definition.name()) {
                None => {
                    let object = ObjectMetadata {
                        id: Uuid::new_v4(),
                        workspace_id: workspace_id.to_string(),
                        data_source_id: context.data_source_id.clone(),
                        is_active: true,
                        is_custom: false,
                        shape: definition.shape.clone(),
                    };
                    debug!("Creating object '{}'", definition.name());
                    manager.save_object(&object).await?;
                    storage.objects_mut().push_create(object);
                    buckets
                        .object_creates
                        .push(create_table(workspace_id, definition, flags));
                    rebuilt.insert(definition.name());
                }
                Some(existing) if !existing.is_active => {
                    let mut object = (*existing).clone();
                    object.is_active = true;
                    object.shape = definition.shape.clone();
                    debug!("Reactivating object '{}'", definition.name());
                    manager.save_object(&object).await?;
                    storage.objects_mut().push_update((*existing).clone(), object);
                    buckets
                        .object_updates
                        .push(create_table(workspace_id, definition, flags));
                    rebuilt.insert(definition.name());
                }
                Some(existing) if existing.shape != definition.shape => {
                    let mut object = (*existing).clone();
                    object.shape = definition.shape.clone();
                    debug!("Updating object '{}'", definition.name());
                    manager.save_object(&object).await?;
                    storage.objects_mut().push_update((*existing).clone(), object);
                }
                Some(_) => debug!("Object '{}' is up to date", definition.name()),
            }
        }

        let active_names: HashSet<&str> = active.iter().map(|d| d.name()).collect();
        let mut stale: Vec<&ObjectMetadata> = standard_by_name
            .values()
            .copied()
            .filter(|o| o.is_active && !active_names.contains(o.name()))
            .collect();
        stale.sort_by(|a, b| a.name().cmp(b.name()));

        let mut dropped: HashSet<Uuid> = HashSet::new();
        for existing in stale {
            let mut object = existing.clone();
            object.is_active = false;
            debug!("Deactivating object '{}'", existing.name());
            manager.save_object(&object).await?;
            storage.objects_mut().push_delete(existing.clone());
            buckets.object_deletes.push(WorkspaceMigration::new(
                workspace_id,
                format!("drop-{}", existing.name()),
                vec![TableAction::drop(existing.name())],
            ));
            dropped.insert(existing.id);
        }

        // Re-read so objects created above resolve to their new identifiers.
        let objects = manager.list_objects(workspace_id).await?;
        let fields = manager.list_fields(workspace_id).await?;

        for definition in &active {
            let object = objects
                .iter()
                .find(|o| !o.is_custom && o.name() == definition.name())
                .ok_or_else(|| {
                    SyncError::DiffComputation(format!(
                        "object '{}' is not visible after synchronization",
                        definition.name()
                    ))
                })?;
            self.synchronize_fields(
                manager,
                storage,
                flags,
                definition,
                object,
                rebuilt.contains(definition.name()),
                &fields,
                &mut buckets,
            )
            .await?;
        }

        // Fields of dropped objects go with their table.
        for field in fields
            .iter()
            .filter(|f| dropped.contains(&f.object_metadata_id) && f.is_active && !f.is_custom)
        {
            let mut deactivated = field.clone();
            deactivated.is_active = false;
            manager.save_field(&deactivated).await?;
            storage.fields_mut().push_delete(field.clone());
        }

        let migrations = buckets.into_ordered();
        manager.insert_migrations(&migrations).await?;

        let summary = storage.summary();
        info!(
            "Object sync for workspace {}: objects {:?}, fields {:?}, {} migrations",
            workspace_id,
            summary.objects,
            summary.fields,
            migrations.len()
        );

        Ok(migrations)
    }

    #[allow(clippy::too_many_arguments)]
    async fn synchronize_fields(
        &self,
        manager: &mut dyn MetadataTransaction,
        storage: &mut SyncStorage,
        flags: &FeatureFlagMap,
        definition: &StandardObjectDefinition,
        object: &ObjectMetadata,
        table_rebuilt: bool,
        fields: &[FieldMetadata],
        buckets: &mut MigrationBuckets,
    ) -> Result<()> {
        let table = object.name();
        let mut standard_by_name: HashMap<&str, &FieldMetadata> = HashMap::new();
        let active: Vec<&StandardFieldDefinition> = definition.active_fields(flags).collect();

        for field in fields.iter().filter(|f| f.object_metadata_id == object.id) {
            if field.is_custom {
                if active.iter().any(|d| d.name() == field.name()) {
                    return Err(SyncError::DiffComputation(format!(
                        "standard field '{}.{}' collides with a custom field",
                        table,
                        field.name()
                    )));
                }
                continue;
            }
            standard_by_name.insert(field.name(), field);
        }

        for field_definition in &active {
            let name = field_definition.name();
            match standard_by_name.get(name) {
                None => {
                    let field = FieldMetadata {
                        id: Uuid::new_v4(),
                        workspace_id: object.workspace_id.clone(),
                        object_metadata_id: object.id,
                        is_active: true,
                        is_custom: false,
                        shape: field_definition.shape.clone(),
                    };
                    debug!("Creating field '{}.{}'", table, name);
                    manager.save_field(&field).await?;
                    storage.fields_mut().push_create(field);
                    if !table_rebuilt {
                        if let Some(column) = ColumnDefinition::for_field(&field_definition.shape) {
                            buckets.field_creates.push(WorkspaceMigration::new(
                                &object.workspace_id,
                                format!("create-{}-{}", table, name),
                                vec![TableAction::alter(table, vec![ColumnAction::Create(column)])],
                            ));
                        }
                    }
                }
                Some(existing) if !existing.is_active => {
                    let mut field = (*existing).clone();
                    field.is_active = true;
                    field.shape = field_definition.shape.clone();
                    debug!("Reactivating field '{}.{}'", table, name);
                    manager.save_field(&field).await?;
                    storage.fields_mut().push_update((*existing).clone(), field);
                    if !table_rebuilt {
                        if let Some(column) = ColumnDefinition::for_field(&field_definition.shape) {
                            buckets.field_creates.push(WorkspaceMigration::new(
                                &object.workspace_id,
                                format!("create-{}-{}", table, name),
                                vec![TableAction::alter(table, vec![ColumnAction::Create(column)])],
                            ));
                        }
                    }
                }
                Some(existing) if existing.shape != field_definition.shape => {
                    let mut field = (*existing).clone();
                    field.shape = field_definition.shape.clone();
                    debug!("Updating field '{}.{}'", table, name);
                    manager.save_field(&field).await?;
                    storage.fields_mut().push_update((*existing).clone(), field);
                    if !table_rebuilt && existing.shape.column_differs(&field_definition.shape) {
                        let actions = alter_column(&existing.shape, &field_definition.shape);
                        if !actions.is_empty() {
                            buckets.field_updates.push(WorkspaceMigration::new(
                                &object.workspace_id,
                                format!("alter-{}-{}", table, name),
                                vec![TableAction::alter(table, actions)],
                            ));
                        }
                    }
                }
                Some(_) => {}
            }
        }

        let active_names: HashSet<&str> = active.iter().map(|d| d.name()).collect();
        let mut stale: Vec<&FieldMetadata> = standard_by_name
            .values()
            .copied()
            .filter(|f| f.is_active && !active_names.contains(f.name()))
            .collect();
        stale.sort_by(|a, b| a.name().cmp(b.name()));

        for existing in stale {
            let mut field = existing.clone();
            field.is_active = false;
            debug!("Deactivating field '{}.{}'", table, existing.name());
            manager.save_field(&field).await?;
            storage.fields_mut().push_delete(existing.clone());
            if !table_rebuilt && ColumnDefinition::for_field(&existing.shape).is_some() {
                buckets.field_deletes.push(WorkspaceMigration::new(
                    &object.workspace_id,
                    format!("drop-{}-{}", table, existing.name()),
                    vec![TableAction::alter(
                        table,
                        vec![ColumnAction::Drop {
                            column_name: existing.name().to_string(),
                        }],
                    )],
                ));
            }
        }

        Ok(())
    }
}

fn create_table(
    workspace_id: &str,
    definition: &StandardObjectDefinition,
    flags: &FeatureFlagMap,
) -> WorkspaceMigration {
    let columns = definition
        .active_fields(flags)
        .filter_map(|f| ColumnDefinition::for_field(&f.shape))
        .collect();
    WorkspaceMigration::new(
        workspace_id,
        format!("create-{}", definition.name()),
        vec![TableAction::create(definition.name(), columns)],
    )
}

fn alter_column(before: &FieldShape, after: &FieldShape) -> Vec<ColumnAction> {
    match (
        ColumnDefinition::for_field(before),
        ColumnDefinition::for_field(after),
    ) {
        (Some(current), Some(altered)) => vec![ColumnAction::Alter { current, altered }],
        (None, Some(altered)) => vec![ColumnAction::Create(altered)],
        (Some(current), None) => vec![ColumnAction::Drop {
            column_name: current.column_name,
        }],
        (None, None) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::keys;
    use crate::memory_store::InMemoryMetadataStore;
    use crate::migration::TableActionKind;
    use crate::standard::{StandardFieldDefinition, StandardObjectDefinition};
    use crate::store::MetadataStore;
    use crate::types::FieldType;

    fn schema() -> Arc<StandardSchema> {
        Arc::new(
            StandardSchema::new()
                .object(
                    StandardObjectDefinition::new("company", "companies")
                        .field(StandardFieldDefinition::new("name", FieldType::Text, "Name"))
                        .field(
                            StandardFieldDefinition::new("tagline", FieldType::Text, "Tagline")
                                .gated_by(keys::IS_CALENDAR_ENABLED),
                        ),
                )
                .object(
                    StandardObjectDefinition::new("calendarEvent", "calendarEvents")
                        .gated_by(keys::IS_CALENDAR_ENABLED),
                ),
        )
    }

    fn context() -> WorkspaceSyncContext {
        WorkspaceSyncContext::new("ws-1", "ds-1")
    }

    async fn run(
        store: &InMemoryMetadataStore,
        schema: Arc<StandardSchema>,
        flags: &FeatureFlagMap,
    ) -> (SyncStorage, Vec<WorkspaceMigration>) {
        let mut conn = store.connect().await.unwrap();
        conn.start_transaction().await.unwrap();
        let mut storage = SyncStorage::new();
        let migrations = ObjectMetadataSynchronizer::new(schema)
            .synchronize(&context(), conn.manager(), &mut storage, flags)
            .await
            .unwrap();
        conn.commit_transaction().await.unwrap();
        (storage, migrations)
    }

    #[tokio::test]
    async fn creates_objects_with_fields_folded_into_create_table() {
        let store = InMemoryMetadataStore::new();
        let (storage, migrations) = run(&store, schema(), &FeatureFlagMap::new()).await;

        assert_eq!(storage.objects().creates().len(), 1);
        assert_eq!(storage.fields().creates().len(), 4);
        assert_eq!(migrations.len(), 1);
        let action = &migrations[0].actions[0];
        assert_eq!(action.kind, TableActionKind::Create);
        assert_eq!(action.table, "company");
        assert_eq!(action.columns.len(), 4);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.migrations.len(), 1);
        assert!(snapshot
            .fields
            .values()
            .all(|f| snapshot.objects.contains_key(&f.object_metadata_id)));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = InMemoryMetadataStore::new();
        run(&store, schema(), &FeatureFlagMap::new()).await;
        let (storage, migrations) = run(&store, schema(), &FeatureFlagMap::new()).await;

        assert!(storage.is_empty());
        assert!(migrations.is_empty());
    }

    #[tokio::test]
    async fn enabling_a_flag_adds_gated_object_and_field() {
        let store = InMemoryMetadataStore::new();
        run(&store, schema(), &FeatureFlagMap::new()).await;

        let flags = FeatureFlagMap::new().with_flag(keys::IS_CALENDAR_ENABLED, true);
        let (storage, migrations) = run(&store, schema(), &flags).await;

        assert_eq!(storage.objects().creates().len(), 1);
        assert_eq!(storage.objects().creates()[0].name(), "calendarEvent");
        let names: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["create-calendarEvent", "create-company-tagline"]);
    }

    #[tokio::test]
    async fn disabling_a_flag_soft_deletes_gated_entities() {
        let store = InMemoryMetadataStore::new();
        let on = FeatureFlagMap::new().with_flag(keys::IS_CALENDAR_ENABLED, true);
        run(&store, schema(), &on).await;

        let (storage, migrations) = run(&store, schema(), &FeatureFlagMap::new()).await;

        assert_eq!(storage.objects().deletes().len(), 1);
        // tagline on company plus the three base fields of calendarEvent
        assert_eq!(storage.fields().deletes().len(), 4);
        let names: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["drop-calendarEvent", "drop-company-tagline"]);

        let snapshot = store.snapshot().await;
        let calendar = snapshot
            .objects
            .values()
            .find(|o| o.name() == "calendarEvent")
            .unwrap();
        assert!(!calendar.is_active);
    }

    #[tokio::test]
    async fn reactivation_recreates_table() {
        let store = InMemoryMetadataStore::new();
        let on = FeatureFlagMap::new().with_flag(keys::IS_CALENDAR_ENABLED, true);
        run(&store, schema(), &on).await;
        run(&store, schema(), &FeatureFlagMap::new()).await;

        let (storage, migrations) = run(&store, schema(), &on).await;

        assert!(storage.objects().creates().is_empty());
        assert_eq!(storage.objects().updates().len(), 1);
        assert!(storage.objects().updates()[0].after.is_active);
        let names: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["create-calendarEvent", "create-company-tagline"]);
    }

    #[tokio::test]
    async fn pending_queue_matches_returned_order() {
        let gated = Arc::new(
            StandardSchema::new()
                .object(
                    StandardObjectDefinition::new("company", "companies")
                        .gated_by(keys::IS_CALENDAR_ENABLED),
                )
                .object(
                    StandardObjectDefinition::new("person", "people")
                        .gated_by(keys::IS_BLOCKLIST_ENABLED),
                ),
        );
        let company_only = FeatureFlagMap::new().with_flag(keys::IS_CALENDAR_ENABLED, true);
        let both = company_only.clone().with_flag(keys::IS_BLOCKLIST_ENABLED, true);

        let store = InMemoryMetadataStore::new();
        run(&store, gated.clone(), &company_only).await;
        run(&store, gated.clone(), &FeatureFlagMap::new()).await;
        let (_, migrations) = run(&store, gated, &both).await;

        let returned: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(returned, vec!["create-person", "create-company"]);

        let mut conn = store.connect().await.unwrap();
        let pending = conn.manager().list_pending_migrations("ws-1").await.unwrap();
        let tail: Vec<_> = pending[pending.len() - migrations.len()..]
            .iter()
            .map(|m| m.id)
            .collect();
        let expected: Vec<_> = migrations.iter().map(|m| m.id).collect();
        assert_eq!(tail, expected);
    }

    #[tokio::test]
    async fn label_change_is_metadata_only() {
        let store = InMemoryMetadataStore::new();
        run(&store, schema(), &FeatureFlagMap::new()).await;

        let relabelled = Arc::new(
            StandardSchema::new().object(
                StandardObjectDefinition::new("company", "companies")
                    .labels("Organisation", "Organisations")
                    .field(StandardFieldDefinition::new("name", FieldType::Text, "Legal name")),
            ),
        );
        let (storage, migrations) = run(&store, relabelled, &FeatureFlagMap::new()).await;

        assert_eq!(storage.objects().updates().len(), 1);
        assert_eq!(storage.fields().updates().len(), 1);
        assert!(migrations.is_empty());
    }

    #[tokio::test]
    async fn type_change_alters_column() {
        let store = InMemoryMetadataStore::new();
        run(&store, schema(), &FeatureFlagMap::new()).await;

        let retyped = Arc::new(
            StandardSchema::new().object(
                StandardObjectDefinition::new("company", "companies")
                    .field(StandardFieldDefinition::new("name", FieldType::Text, "Name").required()),
            ),
        );
        let (_, migrations) = run(&store, retyped, &FeatureFlagMap::new()).await;

        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].name, "alter-company-name");
        assert!(matches!(
            &migrations[0].actions[0].columns[0],
            ColumnAction::Alter { current, altered } if current.is_nullable && !altered.is_nullable
        ));
    }

    #[tokio::test]
    async fn custom_entities_are_never_deleted() {
        let store = InMemoryMetadataStore::new();
        run(&store, schema(), &FeatureFlagMap::new()).await;

        let mut conn = store.connect().await.unwrap();
        let company_id = store
            .snapshot()
            .await
            .objects
            .values()
            .find(|o| o.name() == "company")
            .unwrap()
            .id;
        let custom = FieldMetadata {
            id: Uuid::new_v4(),
            workspace_id: "ws-1".to_string(),
            object_metadata_id: company_id,
            is_active: true,
            is_custom: true,
            shape: StandardFieldDefinition::new("rating", FieldType::Number, "Rating").shape,
        };
        conn.manager().save_field(&custom).await.unwrap();

        let (storage, _) = run(&store, schema(), &FeatureFlagMap::new()).await;
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn invalid_schema_is_a_diff_computation_error() {
        let store = InMemoryMetadataStore::new();
        let broken = Arc::new(
            StandardSchema::new()
                .object(StandardObjectDefinition::new("company", "companies"))
                .object(StandardObjectDefinition::new("company", "companies")),
        );

        let mut conn = store.connect().await.unwrap();
        conn.start_transaction().await.unwrap();
        let err = ObjectMetadataSynchronizer::new(broken)
            .synchronize(
                &context(),
                conn.manager(),
                &mut SyncStorage::new(),
                &FeatureFlagMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DiffComputation(_)));
    }
}
