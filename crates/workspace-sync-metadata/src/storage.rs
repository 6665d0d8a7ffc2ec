//! Per-run accumulator of computed metadata diffs.

use serde::Serialize;

use crate::types::{EntityKind, FieldMetadata, MetadataEntity, ObjectMetadata, RelationMetadata};

/// An entity before and after an update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityUpdate<T> {
    pub before: T,
    pub after: T,
}

/// Ordered creates, updates and deletes for one entity kind.
///
/// Identical entries for the same entity are recorded once.
#[derive(Debug, Clone, Serialize)]
pub struct DiffSet<T> {
    creates: Vec<T>,
    updates: Vec<EntityUpdate<T>>,
    deletes: Vec<T>,
}

impl<T> Default for DiffSet<T> {
    fn default() -> Self {
        Self {
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<T: MetadataEntity> DiffSet<T> {
    /// Records a create; returns false when it was already recorded.
    pub fn push_create(&mut self, entity: T) -> bool {
        if self.creates.contains(&entity) {
            return false;
        }
        self.creates.push(entity);
        true
    }

    pub fn push_update(&mut self, before: T, after: T) -> bool {
        let update = EntityUpdate { before, after };
        if self.updates.contains(&update) {
            return false;
        }
        self.updates.push(update);
        true
    }

    pub fn push_delete(&mut self, entity: T) -> bool {
        if self.deletes.contains(&entity) {
            return false;
        }
        self.deletes.push(entity);
        true
    }

    pub fn creates(&self) -> &[T] {
        &self.creates
    }

    pub fn updates(&self) -> &[EntityUpdate<T>] {
        &self.updates
    }

    pub fn deletes(&self) -> &[T] {
        &self.deletes
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            created: self.creates.len(),
            updated: self.updates.len(),
            deleted: self.deletes.len(),
        }
    }

    /// Whether any diff was recorded for the entity with this id.
    pub fn touches(&self, id: uuid::Uuid) -> bool {
        self.creates.iter().any(|e| e.id() == id)
            || self.updates.iter().any(|u| u.after.id() == id)
            || self.deletes.iter().any(|e| e.id() == id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl DiffCounts {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Counts per entity kind for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub objects: DiffCounts,
    pub fields: DiffCounts,
    pub relations: DiffCounts,
}

impl SyncSummary {
    pub fn total(&self) -> usize {
        self.objects.total() + self.fields.total() + self.relations.total()
    }

    pub fn for_kind(&self, kind: EntityKind) -> DiffCounts {
        match kind {
            EntityKind::Object => self.objects,
            EntityKind::Field => self.fields,
            EntityKind::Relation => self.relations,
        }
    }
}

/// Diffs accumulated by one sync run. Never shared across runs or workspaces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStorage {
    objects: DiffSet<ObjectMetadata>,
    fields: DiffSet<FieldMetadata>,
    relations: DiffSet<RelationMetadata>,
}

impl SyncStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &DiffSet<ObjectMetadata> {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut DiffSet<ObjectMetadata> {
        &mut self.objects
    }

    pub fn fields(&self) -> &DiffSet<FieldMetadata> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut DiffSet<FieldMetadata> {
        &mut self.fields
    }

    pub fn relations(&self) -> &DiffSet<RelationMetadata> {
        &self.relations
    }

    pub fn relations_mut(&mut self) -> &mut DiffSet<RelationMetadata> {
        &mut self.relations
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.fields.is_empty() && self.relations.is_empty()
    }

    pub fn summary(&self) -> SyncSummary {
        SyncSummary {
            objects: self.objects.counts(),
            fields: self.fields.counts(),
            relations: self.relations.counts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectShape;
    use uuid::Uuid;

    fn object(name: &str) -> ObjectMetadata {
        ObjectMetadata {
            id: Uuid::new_v4(),
            workspace_id: "ws".to_string(),
            data_source_id: "ds".to_string(),
            is_active: true,
            is_custom: false,
            shape: ObjectShape {
                name_singular: name.to_string(),
                name_plural: format!("{}s", name),
                label_singular: name.to_string(),
                label_plural: format!("{}s", name),
                description: None,
                icon: None,
                is_system: false,
            },
        }
    }

    #[test]
    fn identical_entries_are_recorded_once() {
        let mut storage = SyncStorage::new();
        let company = object("company");

        assert!(storage.objects_mut().push_create(company.clone()));
        assert!(!storage.objects_mut().push_create(company.clone()));
        assert_eq!(storage.objects().creates().len(), 1);

        let mut renamed = company.clone();
        renamed.shape.label_singular = "Organisation".to_string();
        assert!(storage.objects_mut().push_update(company.clone(), renamed.clone()));
        assert!(!storage.objects_mut().push_update(company, renamed));
        assert_eq!(storage.objects().updates().len(), 1);
    }

    #[test]
    fn summary_counts_each_kind() {
        let mut storage = SyncStorage::new();
        assert!(storage.is_empty());

        let company = object("company");
        let person = object("person");
        storage.objects_mut().push_create(company.clone());
        storage.objects_mut().push_delete(person);

        let summary = storage.summary();
        assert_eq!(summary.objects.created, 1);
        assert_eq!(summary.objects.deleted, 1);
        assert_eq!(summary.fields.total(), 0);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.for_kind(EntityKind::Object), summary.objects);
        assert_eq!(summary.for_kind(EntityKind::Relation).total(), 0);
        assert!(storage.objects().touches(company.id));
        assert!(!storage.is_empty());
    }
}
