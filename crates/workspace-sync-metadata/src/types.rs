//! Shapes and persisted records for workspace metadata.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the workspace a sync run targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceSyncContext {
    pub workspace_id: String,
    pub data_source_id: String,
}

impl WorkspaceSyncContext {
    pub fn new(workspace_id: impl Into<String>, data_source_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            data_source_id: data_source_id.into(),
        }
    }
}

/// Key for naming per-workspace storage such as database schemas and log
/// directories.
///
/// The readable prefix is lossy, so a digest of the raw id follows it and
/// distinct ids never share a key.
pub fn workspace_storage_key(workspace_id: &str) -> String {
    let prefix: String = workspace_id
        .chars()
        .take(32)
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let digest = blake3::hash(workspace_id.as_bytes()).to_hex();
    format!("{}_{}", prefix, &digest[..12])
}

/// Field types understood by the standard schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Uuid,
    Text,
    Email,
    Phone,
    Link,
    Number,
    Boolean,
    DateTime,
    Select,
    Position,
    RawJson,
    Relation,
}

impl FieldType {
    /// Storage column type, or `None` when the field has no column of its own.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            FieldType::Uuid => Some(ColumnType::Uuid),
            FieldType::Text
            | FieldType::Email
            | FieldType::Phone
            | FieldType::Link
            | FieldType::Select => Some(ColumnType::Text),
            FieldType::Number | FieldType::Position => Some(ColumnType::Double),
            FieldType::Boolean => Some(ColumnType::Boolean),
            FieldType::DateTime => Some(ColumnType::Timestamp),
            FieldType::RawJson => Some(ColumnType::Json),
            FieldType::Relation => None,
        }
    }
}

/// Backend-neutral column types carried by migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Uuid,
    Text,
    Double,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDeleteAction {
    Cascade,
    SetNull,
    Restrict,
}

/// The kinds of metadata entity a sync run reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Object,
    Field,
    Relation,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Object => write!(f, "object"),
            EntityKind::Field => write!(f, "field"),
            EntityKind::Relation => write!(f, "relation"),
        }
    }
}

/// Comparable shape of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectShape {
    pub name_singular: String,
    pub name_plural: String,
    pub label_singular: String,
    pub label_plural: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub is_system: bool,
}

/// Comparable shape of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub field_type: FieldType,
    pub label: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub is_nullable: bool,
    pub is_system: bool,
    pub default_value: Option<serde_json::Value>,
}

impl FieldShape {
    /// Whether moving from `self` to `other` changes the backing column.
    pub fn column_differs(&self, other: &FieldShape) -> bool {
        self.field_type != other.field_type
            || self.is_nullable != other.is_nullable
            || self.default_value != other.default_value
    }
}

/// Declared shape of a relation, referencing objects and fields by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationShape {
    pub relation_type: RelationType,
    pub from_object: String,
    pub from_field: String,
    pub to_object: String,
    pub to_field: String,
    pub on_delete: OnDeleteAction,
}

impl RelationShape {
    /// Join column created on the `to_object` table.
    pub fn join_column(&self) -> String {
        join_column_name(&self.to_field)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.from_object, self.from_field, self.to_object, self.to_field
        )
    }
}

pub fn join_column_name(to_field: &str) -> String {
    format!("{}Id", to_field)
}

/// A persisted object row for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub id: Uuid,
    pub workspace_id: String,
    pub data_source_id: String,
    pub is_active: bool,
    pub is_custom: bool,
    pub shape: ObjectShape,
}

impl ObjectMetadata {
    pub fn name(&self) -> &str {
        &self.shape.name_singular
    }
}

/// A persisted field row for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub id: Uuid,
    pub workspace_id: String,
    pub object_metadata_id: Uuid,
    pub is_active: bool,
    pub is_custom: bool,
    pub shape: FieldShape,
}

impl FieldMetadata {
    pub fn name(&self) -> &str {
        &self.shape.name
    }
}

/// A persisted relation row; endpoints are resolved identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    pub id: Uuid,
    pub workspace_id: String,
    pub is_active: bool,
    pub is_custom: bool,
    pub relation_type: RelationType,
    pub from_object_metadata_id: Uuid,
    pub to_object_metadata_id: Uuid,
    pub from_field_metadata_id: Uuid,
    pub to_field_metadata_id: Uuid,
    pub on_delete: OnDeleteAction,
}

impl RelationMetadata {
    /// Compares everything except identity and activity.
    pub fn same_shape(&self, other: &RelationMetadata) -> bool {
        self.relation_type == other.relation_type
            && self.from_object_metadata_id == other.from_object_metadata_id
            && self.to_object_metadata_id == other.to_object_metadata_id
            && self.from_field_metadata_id == other.from_field_metadata_id
            && self.to_field_metadata_id == other.to_field_metadata_id
            && self.on_delete == other.on_delete
    }
}

/// Common access to persisted metadata rows.
pub trait MetadataEntity: Clone + PartialEq {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;
}

impl MetadataEntity for ObjectMetadata {
    const KIND: EntityKind = EntityKind::Object;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl MetadataEntity for FieldMetadata {
    const KIND: EntityKind = EntityKind::Field;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl MetadataEntity for RelationMetadata {
    const KIND: EntityKind = EntityKind::Relation;

    fn id(&self) -> Uuid {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(name: &str) -> FieldShape {
        FieldShape {
            name: name.to_string(),
            field_type: FieldType::Text,
            label: "Name".to_string(),
            description: None,
            icon: None,
            is_nullable: true,
            is_system: false,
            default_value: None,
        }
    }

    #[test]
    fn label_change_does_not_touch_column() {
        let before = text_field("name");
        let mut after = before.clone();
        after.label = "Company name".to_string();

        assert_ne!(before, after);
        assert!(!before.column_differs(&after));
    }

    #[test]
    fn nullability_change_touches_column() {
        let before = text_field("name");
        let mut after = before.clone();
        after.is_nullable = false;

        assert!(before.column_differs(&after));
    }

    #[test]
    fn relation_fields_have_no_column() {
        assert_eq!(FieldType::Relation.column_type(), None);
        assert_eq!(FieldType::Email.column_type(), Some(ColumnType::Text));
    }

    #[test]
    fn field_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&FieldType::DateTime).unwrap();
        assert_eq!(json, "\"DATE_TIME\"");
    }

    #[test]
    fn storage_keys_distinguish_ids_with_the_same_prefix() {
        let keys: std::collections::HashSet<String> = ["ws-1", "ws_1", "WS.1", "a/b", "a_b"]
            .iter()
            .map(|id| workspace_storage_key(id))
            .collect();
        assert_eq!(keys.len(), 5);

        let key = workspace_storage_key("Acme-Corp/1");
        assert!(key.starts_with("acme_corp_1_"));
        assert_eq!(key, workspace_storage_key("Acme-Corp/1"));
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn join_column_uses_to_field_name() {
        let shape = RelationShape {
            relation_type: RelationType::OneToMany,
            from_object: "company".to_string(),
            from_field: "people".to_string(),
            to_object: "person".to_string(),
            to_field: "company".to_string(),
            on_delete: OnDeleteAction::SetNull,
        };
        assert_eq!(shape.join_column(), "companyId");
    }
}
