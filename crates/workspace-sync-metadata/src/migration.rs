//! Workspace migrations derived from metadata diffs.
//!
//! A migration is a durable record of table changes for one workspace. It is
//! pending until a migration runner sets `applied_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ColumnType, FieldShape, OnDeleteAction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMigration {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub is_custom: bool,
    pub actions: Vec<TableAction>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl WorkspaceMigration {
    pub fn new(workspace_id: &str, name: impl Into<String>, actions: Vec<TableAction>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.to_string(),
            name: name.into(),
            is_custom: false,
            actions,
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableActionKind {
    Create,
    Alter,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAction {
    pub table: String,
    pub kind: TableActionKind,
    pub columns: Vec<ColumnAction>,
}

impl TableAction {
    pub fn create(table: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table: table.into(),
            kind: TableActionKind::Create,
            columns: columns.into_iter().map(ColumnAction::Create).collect(),
        }
    }

    pub fn alter(table: impl Into<String>, columns: Vec<ColumnAction>) -> Self {
        Self {
            table: table.into(),
            kind: TableActionKind::Alter,
            columns,
        }
    }

    pub fn drop(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind: TableActionKind::Drop,
            columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub column_name: String,
    pub column_type: ColumnType,
    pub is_nullable: bool,
    pub default_value: Option<serde_json::Value>,
}

impl ColumnDefinition {
    /// Column backing a field, or `None` for fields without storage.
    pub fn for_field(shape: &FieldShape) -> Option<Self> {
        shape.field_type.column_type().map(|column_type| Self {
            column_name: shape.name.clone(),
            column_type,
            is_nullable: shape.is_nullable,
            default_value: shape.default_value.clone(),
        })
    }

    pub fn join_column(name: impl Into<String>) -> Self {
        Self {
            column_name: name.into(),
            column_type: ColumnType::Uuid,
            is_nullable: true,
            default_value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ColumnAction {
    Create(ColumnDefinition),
    Alter {
        current: ColumnDefinition,
        altered: ColumnDefinition,
    },
    Drop {
        column_name: String,
    },
    CreateForeignKey {
        column_name: String,
        referenced_table: String,
        referenced_column: String,
        on_delete: OnDeleteAction,
    },
    DropForeignKey {
        column_name: String,
    },
}
