//! Renders workspace migrations to DuckDB DDL.

use serde_json::Value;
use tracing::debug;

use workspace_sync_metadata::{
    workspace_storage_key, ColumnAction, ColumnDefinition, ColumnType, TableAction,
    TableActionKind,
};

/// Schema holding the data tables of one workspace.
pub fn workspace_schema_name(workspace_id: &str) -> String {
    format!("ws_{}", workspace_storage_key(workspace_id))
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_type_sql(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Uuid => "UUID",
        ColumnType::Text => "VARCHAR",
        ColumnType::Double => "DOUBLE",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMP",
        // kept as text so no extension is required
        ColumnType::Json => "VARCHAR",
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn column_sql(column: &ColumnDefinition, allow_not_null: bool) -> String {
    let mut sql = format!(
        "{} {}",
        quote_identifier(&column.column_name),
        column_type_sql(column.column_type)
    );
    if allow_not_null && !column.is_nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&literal(default));
    }
    sql
}

/// Statements for one table action, qualified with `schema`.
pub fn render_table_action(schema: &str, action: &TableAction) -> Vec<String> {
    let table = format!("{}.{}", quote_identifier(schema), quote_identifier(&action.table));

    match action.kind {
        TableActionKind::Create => {
            let columns: Vec<String> = action
                .columns
                .iter()
                .filter_map(|c| match c {
                    ColumnAction::Create(column) => Some(column_sql(column, true)),
                    _ => None,
                })
                .collect();
            vec![format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table,
                columns.join(", ")
            )]
        }
        TableActionKind::Drop => vec![format!("DROP TABLE IF EXISTS {}", table)],
        TableActionKind::Alter => action
            .columns
            .iter()
            .flat_map(|c| render_column_action(&table, c))
            .collect(),
    }
}

fn render_column_action(table: &str, action: &ColumnAction) -> Vec<String> {
    match action {
        // existing rows would violate NOT NULL, so added columns stay nullable
        ColumnAction::Create(column) => vec![format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            table,
            column_sql(column, false)
        )],
        ColumnAction::Alter { current, altered } => {
            let column = quote_identifier(&altered.column_name);
            let mut statements = Vec::new();
            if current.column_type != altered.column_type {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
                    table,
                    column,
                    column_type_sql(altered.column_type)
                ));
            }
            if current.default_value != altered.default_value {
                statements.push(match &altered.default_value {
                    Some(default) => format!(
                        "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                        table,
                        column,
                        literal(default)
                    ),
                    None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", table, column),
                });
            }
            if current.is_nullable != altered.is_nullable {
                let change = if altered.is_nullable {
                    "DROP NOT NULL"
                } else {
                    "SET NOT NULL"
                };
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} {}",
                    table, column, change
                ));
            }
            statements
        }
        ColumnAction::Drop { column_name } => vec![format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
            table,
            quote_identifier(column_name)
        )],
        ColumnAction::CreateForeignKey { column_name, .. }
        | ColumnAction::DropForeignKey { column_name } => {
            debug!(
                "Skipping foreign key change on {}.{}: not supported by ALTER TABLE",
                table, column_name
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use workspace_sync_metadata::OnDeleteAction;

    fn column(name: &str, column_type: ColumnType, is_nullable: bool) -> ColumnDefinition {
        ColumnDefinition {
            column_name: name.to_string(),
            column_type,
            is_nullable,
            default_value: None,
        }
    }

    #[test]
    fn schema_names_are_sanitized() {
        let name = workspace_schema_name("Acme-Corp/1");
        assert!(name.starts_with("ws_acme_corp_1_"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn schema_names_never_collide_across_workspaces() {
        let a = workspace_schema_name("ws-1");
        let b = workspace_schema_name("ws_1");
        let c = workspace_schema_name("WS.1");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn create_table_keeps_not_null_and_defaults() {
        let mut flag = column("isActive", ColumnType::Boolean, false);
        flag.default_value = Some(json!(false));
        let action = TableAction::create(
            "company",
            vec![column("id", ColumnType::Uuid, false), flag],
        );

        assert_eq!(
            render_table_action("ws_1", &action),
            vec![
                "CREATE TABLE IF NOT EXISTS \"ws_1\".\"company\" \
                 (\"id\" UUID NOT NULL, \"isActive\" BOOLEAN NOT NULL DEFAULT FALSE)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn added_columns_are_nullable() {
        let action = TableAction::alter(
            "company",
            vec![ColumnAction::Create(column("name", ColumnType::Text, false))],
        );
        assert_eq!(
            render_table_action("ws_1", &action),
            vec![
                "ALTER TABLE \"ws_1\".\"company\" ADD COLUMN IF NOT EXISTS \"name\" VARCHAR"
                    .to_string()
            ]
        );
    }

    #[test]
    fn alter_renders_only_what_changed() {
        let current = column("employees", ColumnType::Text, true);
        let altered = column("employees", ColumnType::Double, false);
        let action = TableAction::alter(
            "company",
            vec![ColumnAction::Alter { current, altered }],
        );

        let statements = render_table_action("ws_1", &action);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("SET DATA TYPE DOUBLE"));
        assert!(statements[1].ends_with("SET NOT NULL"));
    }

    #[test]
    fn foreign_keys_render_nothing() {
        let action = TableAction::alter(
            "person",
            vec![
                ColumnAction::Create(ColumnDefinition::join_column("companyId")),
                ColumnAction::CreateForeignKey {
                    column_name: "companyId".to_string(),
                    referenced_table: "company".to_string(),
                    referenced_column: "id".to_string(),
                    on_delete: OnDeleteAction::SetNull,
                },
            ],
        );
        assert_eq!(render_table_action("ws_1", &action).len(), 1);
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(literal(&json!("it's")), "'it''s'");
        assert_eq!(literal(&json!(["a"])), "'[\"a\"]'");
    }
}
