//! Code-declared standard objects, fields and relations.
//!
//! Definitions are immutable for the lifetime of a build. Each one may carry a
//! feature-flag gate; a gated definition is only considered when its flag is
//! enabled for the workspace being synced.

mod builtin;

pub use builtin::standard_schema;

use serde::Serialize;
use std::collections::HashSet;

use crate::error::{Result, SyncError};
use crate::flags::FeatureFlagMap;
use crate::types::{FieldShape, FieldType, ObjectShape, OnDeleteAction, RelationShape, RelationType};

/// A standard field declared on a standard object.
#[derive(Debug, Clone, Serialize)]
pub struct StandardFieldDefinition {
    pub shape: FieldShape,
    pub gate: Option<String>,
}

impl StandardFieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType, label: impl Into<String>) -> Self {
        Self {
            shape: FieldShape {
                name: name.into(),
                field_type,
                label: label.into(),
                description: None,
                icon: None,
                is_nullable: true,
                is_system: false,
                default_value: None,
            },
            gate: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.shape.description = Some(description.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.shape.icon = Some(icon.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.shape.is_nullable = false;
        self
    }

    pub fn system(mut self) -> Self {
        self.shape.is_system = true;
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.shape.default_value = Some(value);
        self
    }

    pub fn gated_by(mut self, flag: impl Into<String>) -> Self {
        self.gate = Some(flag.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.shape.name
    }
}

/// A standard object together with its fields.
#[derive(Debug, Clone, Serialize)]
pub struct StandardObjectDefinition {
    pub shape: ObjectShape,
    pub gate: Option<String>,
    pub fields: Vec<StandardFieldDefinition>,
}

impl StandardObjectDefinition {
    /// Creates an object carrying the `id`, `createdAt` and `updatedAt` base fields.
    pub fn new(name_singular: impl Into<String>, name_plural: impl Into<String>) -> Self {
        let name_singular = name_singular.into();
        let name_plural = name_plural.into();
        Self {
            shape: ObjectShape {
                label_singular: name_singular.clone(),
                label_plural: name_plural.clone(),
                name_singular,
                name_plural,
                description: None,
                icon: None,
                is_system: false,
            },
            gate: None,
            fields: base_fields(),
        }
    }

    pub fn labels(mut self, singular: impl Into<String>, plural: impl Into<String>) -> Self {
        self.shape.label_singular = singular.into();
        self.shape.label_plural = plural.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.shape.description = Some(description.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.shape.icon = Some(icon.into());
        self
    }

    pub fn system(mut self) -> Self {
        self.shape.is_system = true;
        self
    }

    pub fn gated_by(mut self, flag: impl Into<String>) -> Self {
        self.gate = Some(flag.into());
        self
    }

    pub fn field(mut self, field: StandardFieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.shape.name_singular
    }

    pub fn find_field(&self, name: &str) -> Option<&StandardFieldDefinition> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Fields whose gate is open. Does not look at the object's own gate.
    pub fn active_fields<'a>(
        &'a self,
        flags: &'a FeatureFlagMap,
    ) -> impl Iterator<Item = &'a StandardFieldDefinition> + 'a {
        self.fields
            .iter()
            .filter(move |f| flags.is_gate_open(f.gate.as_deref()))
    }
}

fn base_fields() -> Vec<StandardFieldDefinition> {
    vec![
        StandardFieldDefinition::new("id", FieldType::Uuid, "Id")
            .description("Id")
            .icon("IconKey")
            .required()
            .system(),
        StandardFieldDefinition::new("createdAt", FieldType::DateTime, "Creation date")
            .description("Creation date")
            .icon("IconCalendar")
            .required()
            .system(),
        StandardFieldDefinition::new("updatedAt", FieldType::DateTime, "Update date")
            .description("Update date")
            .icon("IconCalendar")
            .required()
            .system(),
    ]
}

/// A standard relation between two standard objects.
#[derive(Debug, Clone, Serialize)]
pub struct StandardRelationDefinition {
    pub shape: RelationShape,
    pub gate: Option<String>,
}

impl StandardRelationDefinition {
    pub fn new(
        relation_type: RelationType,
        from: (&str, &str),
        to: (&str, &str),
        on_delete: OnDeleteAction,
    ) -> Self {
        Self {
            shape: RelationShape {
                relation_type,
                from_object: from.0.to_string(),
                from_field: from.1.to_string(),
                to_object: to.0.to_string(),
                to_field: to.1.to_string(),
                on_delete,
            },
            gate: None,
        }
    }

    pub fn gated_by(mut self, flag: impl Into<String>) -> Self {
        self.gate = Some(flag.into());
        self
    }
}

/// The full set of standard definitions shipped with a build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StandardSchema {
    objects: Vec<StandardObjectDefinition>,
    relations: Vec<StandardRelationDefinition>,
}

impl StandardSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, object: StandardObjectDefinition) -> Self {
        self.objects.push(object);
        self
    }

    pub fn relation(mut self, relation: StandardRelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn objects(&self) -> &[StandardObjectDefinition] {
        &self.objects
    }

    pub fn relations(&self) -> &[StandardRelationDefinition] {
        &self.relations
    }

    pub fn find_object(&self, name: &str) -> Option<&StandardObjectDefinition> {
        self.objects.iter().find(|o| o.name() == name)
    }

    pub fn active_objects<'a>(
        &'a self,
        flags: &'a FeatureFlagMap,
    ) -> impl Iterator<Item = &'a StandardObjectDefinition> + 'a {
        self.objects
            .iter()
            .filter(move |o| flags.is_gate_open(o.gate.as_deref()))
    }

    pub fn active_relations<'a>(
        &'a self,
        flags: &'a FeatureFlagMap,
    ) -> impl Iterator<Item = &'a StandardRelationDefinition> + 'a {
        self.relations
            .iter()
            .filter(move |r| flags.is_gate_open(r.gate.as_deref()))
    }

    /// Checks that every definition can be compared.
    ///
    /// Flag gating is not taken into account here; a relation whose endpoint
    /// is gated off is caught when relations are resolved.
    pub fn validate(&self) -> Result<()> {
        let mut object_names = HashSet::new();
        for object in &self.objects {
            let shape = &object.shape;
            if shape.name_singular.trim().is_empty() || shape.name_plural.trim().is_empty() {
                return Err(SyncError::DiffComputation(
                    "standard object with an empty name".to_string(),
                ));
            }
            if !object_names.insert(shape.name_singular.as_str()) {
                return Err(SyncError::DiffComputation(format!(
                    "standard object '{}' is declared twice",
                    shape.name_singular
                )));
            }

            let mut field_names = HashSet::new();
            for field in &object.fields {
                if field.name().trim().is_empty() {
                    return Err(SyncError::DiffComputation(format!(
                        "standard object '{}' has a field with an empty name",
                        shape.name_singular
                    )));
                }
                if !field_names.insert(field.name()) {
                    return Err(SyncError::DiffComputation(format!(
                        "field '{}' is declared twice on '{}'",
                        field.name(),
                        shape.name_singular
                    )));
                }
            }
        }

        let mut from_fields = HashSet::new();
        for relation in &self.relations {
            let shape = &relation.shape;
            for (object_name, field_name) in [
                (&shape.from_object, &shape.from_field),
                (&shape.to_object, &shape.to_field),
            ] {
                let field = self
                    .find_object(object_name)
                    .and_then(|o| o.find_field(field_name))
                    .ok_or_else(|| {
                        SyncError::DiffComputation(format!(
                            "relation {} references undeclared field {}.{}",
                            shape.describe(),
                            object_name,
                            field_name
                        ))
                    })?;
                if field.shape.field_type != FieldType::Relation {
                    return Err(SyncError::DiffComputation(format!(
                        "relation {} uses {}.{} which is not a RELATION field",
                        shape.describe(),
                        object_name,
                        field_name
                    )));
                }
            }
            if !from_fields.insert((shape.from_object.as_str(), shape.from_field.as_str())) {
                return Err(SyncError::DiffComputation(format!(
                    "relation {} is declared twice",
                    shape.describe()
                )));
            }
        }

        Ok(())
    }
}
