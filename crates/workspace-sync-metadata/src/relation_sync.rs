//! Reconciles standard relations.
//!
//! Must run after [`crate::object_sync::ObjectMetadataSynchronizer`] on the
//! same transaction: relation endpoints are resolved against objects and
//! fields that may have been created earlier in the run and not committed yet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::flags::FeatureFlagMap;
use crate::migration::{ColumnAction, ColumnDefinition, TableAction, WorkspaceMigration};
use crate::standard::StandardSchema;
use crate::storage::SyncStorage;
use crate::store::MetadataTransaction;
use crate::types::{
    join_column_name, FieldMetadata, ObjectMetadata, RelationMetadata, RelationShape,
    WorkspaceSyncContext,
};

/// Identifiers a relation definition resolves to in one workspace.
struct ResolvedRelation<'a> {
    from_object: &'a ObjectMetadata,
    to_object: &'a ObjectMetadata,
    from_field: &'a FieldMetadata,
    to_field: &'a FieldMetadata,
}

/// Lookup tables over the workspace's current objects and fields.
struct MetadataIndex<'a> {
    objects_by_id: HashMap<Uuid, &'a ObjectMetadata>,
    active_objects: HashMap<&'a str, &'a ObjectMetadata>,
    fields_by_id: HashMap<Uuid, &'a FieldMetadata>,
    active_fields: HashMap<Uuid, HashMap<&'a str, &'a FieldMetadata>>,
}

impl<'a> MetadataIndex<'a> {
    fn new(objects: &'a [ObjectMetadata], fields: &'a [FieldMetadata]) -> Self {
        let mut active_fields: HashMap<Uuid, HashMap<&'a str, &'a FieldMetadata>> = HashMap::new();
        for field in fields.iter().filter(|f| f.is_active && !f.is_custom) {
            active_fields
                .entry(field.object_metadata_id)
                .or_default()
                .insert(field.name(), field);
        }
        Self {
            objects_by_id: objects.iter().map(|o| (o.id, o)).collect(),
            active_objects: objects
                .iter()
                .filter(|o| o.is_active && !o.is_custom)
                .map(|o| (o.name(), o))
                .collect(),
            fields_by_id: fields.iter().map(|f| (f.id, f)).collect(),
            active_fields,
        }
    }

    fn resolve(&self, shape: &RelationShape) -> Result<ResolvedRelation<'a>> {
        let object = |name: &str| {
            self.active_objects
                .get(name)
                .copied()
                .ok_or_else(|| SyncError::ReferentialIntegrity {
                    relation: shape.describe(),
                    missing: format!("object '{}'", name),
                })
        };
        let from_object = object(&shape.from_object)?;
        let to_object = object(&shape.to_object)?;

        let field = |owner: &ObjectMetadata, name: &str| {
            self.active_fields
                .get(&owner.id)
                .and_then(|by_name| by_name.get(name))
                .copied()
                .ok_or_else(|| SyncError::ReferentialIntegrity {
                    relation: shape.describe(),
                    missing: format!("field '{}.{}'", owner.name(), name),
                })
        };
        let from_field = field(from_object, &shape.from_field)?;
        let to_field = field(to_object, &shape.to_field)?;

        Ok(ResolvedRelation {
            from_object,
            to_object,
            from_field,
            to_field,
        })
    }

    fn table_name(&self, object_id: Uuid) -> Option<&'a str> {
        self.objects_by_id.get(&object_id).map(|o| o.name())
    }

    fn is_object_active(&self, object_id: Uuid) -> bool {
        self.objects_by_id
            .get(&object_id)
            .map_or(false, |o| o.is_active)
    }

    fn field_name(&self, field_id: Uuid) -> Option<&'a str> {
        self.fields_by_id.get(&field_id).map(|f| f.name())
    }
}

/// Synchronizes standard relations between standard objects.
pub struct RelationMetadataSynchronizer {
    schema: Arc<StandardSchema>,
}

impl RelationMetadataSynchronizer {
    pub fn new(schema: Arc<StandardSchema>) -> Self {
        Self { schema }
    }

    pub async fn synchronize(
        &self,
        context: &WorkspaceSyncContext,
        manager: &mut dyn MetadataTransaction,
        storage: &mut SyncStorage,
        flags: &FeatureFlagMap,
    ) -> Result<Vec<WorkspaceMigration>> {
        let workspace_id = context.workspace_id.as_str();
        let objects = manager.list_objects(workspace_id).await?;
        let fields = manager.list_fields(workspace_id).await?;
        let persisted = manager.list_relations(workspace_id).await?;
        let index = MetadataIndex::new(&objects, &fields);

        let standard_by_from_field: HashMap<Uuid, &RelationMetadata> = persisted
            .iter()
            .filter(|r| !r.is_custom)
            .map(|r| (r.from_field_metadata_id, r))
            .collect();

        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        let mut declared: HashSet<Uuid> = HashSet::new();

        for definition in self.schema.active_relations(flags) {
            let shape = &definition.shape;
            let resolved = index.resolve(shape)?;
            declared.insert(resolved.from_field.id);

            let candidate = RelationMetadata {
                id: Uuid::new_v4(),
                workspace_id: workspace_id.to_string(),
                is_active: true,
                is_custom: false,
                relation_type: shape.relation_type,
                from_object_metadata_id: resolved.from_object.id,
                to_object_metadata_id: resolved.to_object.id,
                from_field_metadata_id: resolved.from_field.id,
                to_field_metadata_id: resolved.to_field.id,
                on_delete: shape.on_delete,
            };

            match standard_by_from_field.get(&resolved.from_field.id) {
                None => {
                    debug!("Creating relation {}", shape.describe());
                    manager.save_relation(&candidate).await?;
                    storage.relations_mut().push_create(candidate);
                    creates.push(create_join(workspace_id, shape, &resolved));
                }
                Some(existing) if !existing.is_active => {
                    let relation = RelationMetadata {
                        id: existing.id,
                        ..candidate
                    };
                    debug!("Reactivating relation {}", shape.describe());
                    manager.save_relation(&relation).await?;
                    storage
                        .relations_mut()
                        .push_update((*existing).clone(), relation);
                    updates.push(create_join(workspace_id, shape, &resolved));
                }
                Some(existing) if !existing.same_shape(&candidate) => {
                    let relation = RelationMetadata {
                        id: existing.id,
                        ..candidate
                    };
                    debug!("Updating relation {}", shape.describe());
                    if let Some(migration) =
                        alter_join(workspace_id, &index, existing, &relation, shape, &resolved)
                    {
                        updates.push(migration);
                    }
                    manager.save_relation(&relation).await?;
                    storage
                        .relations_mut()
                        .push_update((*existing).clone(), relation);
                }
                Some(_) => debug!("Relation {} is up to date", shape.describe()),
            }
        }

        let mut stale: Vec<&RelationMetadata> = standard_by_from_field
            .values()
            .copied()
            .filter(|r| r.is_active && !declared.contains(&r.from_field_metadata_id))
            .collect();
        stale.sort_by_key(|r| r.id);

        for existing in stale {
            let mut relation = existing.clone();
            relation.is_active = false;
            manager.save_relation(&relation).await?;
            storage.relations_mut().push_delete(existing.clone());

            if !index.is_object_active(existing.to_object_metadata_id) {
                // join column went away with its table
                continue;
            }
            match drop_join(workspace_id, &index, existing) {
                Some(migration) => deletes.push(migration),
                None => warn!(
                    "Relation {} references unknown metadata, skipping join column drop",
                    existing.id
                ),
            }
        }

        let migrations: Vec<WorkspaceMigration> =
            creates.into_iter().chain(updates).chain(deletes).collect();
        manager.insert_migrations(&migrations).await?;

        info!(
            "Relation sync for workspace {}: {:?}, {} migrations",
            workspace_id,
            storage.relations().counts(),
            migrations.len()
        );

        Ok(migrations)
    }
}

fn join_actions(shape: &RelationShape, from_table: &str) -> Vec<ColumnAction> {
    let column = shape.join_column();
    vec![
        ColumnAction::Create(ColumnDefinition::join_column(column.clone())),
        ColumnAction::CreateForeignKey {
            column_name: column,
            referenced_table: from_table.to_string(),
            referenced_column: "id".to_string(),
            on_delete: shape.on_delete,
        },
    ]
}

fn create_join(
    workspace_id: &str,
    shape: &RelationShape,
    resolved: &ResolvedRelation<'_>,
) -> WorkspaceMigration {
    WorkspaceMigration::new(
        workspace_id,
        format!("create-relation-{}-{}", shape.from_object, shape.from_field),
        vec![TableAction::alter(
            resolved.to_object.name(),
            join_actions(shape, resolved.from_object.name()),
        )],
    )
}

/// Drops the join column. The foreign key is only dropped while the
/// referenced table still exists; dropping that table took the key with it.
fn drop_join(
    workspace_id: &str,
    index: &MetadataIndex<'_>,
    relation: &RelationMetadata,
) -> Option<WorkspaceMigration> {
    let to_table = index.table_name(relation.to_object_metadata_id)?;
    let from_table = index.table_name(relation.from_object_metadata_id)?;
    let from_field = index.field_name(relation.from_field_metadata_id)?;
    let column = join_column_name(index.field_name(relation.to_field_metadata_id)?);

    let mut actions = Vec::new();
    if index.is_object_active(relation.from_object_metadata_id) {
        actions.push(ColumnAction::DropForeignKey {
            column_name: column.clone(),
        });
    }
    actions.push(ColumnAction::Drop {
        column_name: column,
    });

    Some(WorkspaceMigration::new(
        workspace_id,
        format!("drop-relation-{}-{}", from_table, from_field),
        vec![TableAction::alter(to_table, actions)],
    ))
}

fn alter_join(
    workspace_id: &str,
    index: &MetadataIndex<'_>,
    before: &RelationMetadata,
    after: &RelationMetadata,
    shape: &RelationShape,
    resolved: &ResolvedRelation<'_>,
) -> Option<WorkspaceMigration> {
    let name = format!("alter-relation-{}-{}", shape.from_object, shape.from_field);

    if before.to_object_metadata_id != after.to_object_metadata_id
        || before.to_field_metadata_id != after.to_field_metadata_id
    {
        let mut actions = Vec::new();
        if index.is_object_active(before.to_object_metadata_id) {
            if let Some(dropped) = drop_join(workspace_id, index, before) {
                actions.extend(dropped.actions);
            }
        }
        actions.push(TableAction::alter(
            resolved.to_object.name(),
            join_actions(shape, resolved.from_object.name()),
        ));
        return Some(WorkspaceMigration::new(workspace_id, name, actions));
    }

    if before.on_delete != after.on_delete {
        let column = shape.join_column();
        return Some(WorkspaceMigration::new(
            workspace_id,
            name,
            vec![TableAction::alter(
                resolved.to_object.name(),
                vec![
                    ColumnAction::DropForeignKey {
                        column_name: column.clone(),
                    },
                    ColumnAction::CreateForeignKey {
                        column_name: column,
                        referenced_table: resolved.from_object.name().to_string(),
                        referenced_column: "id".to_string(),
                        on_delete: after.on_delete,
                    },
                ],
            )],
        ));
    }

    None
}
