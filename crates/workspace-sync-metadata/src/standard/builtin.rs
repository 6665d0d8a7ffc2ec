use serde_json::json;

use super::{
    StandardFieldDefinition as Field, StandardObjectDefinition as Object,
    StandardRelationDefinition as Relation, StandardSchema,
};
use crate::flags::keys;
use crate::types::{FieldType, OnDeleteAction, RelationType};

/// Standard schema shipped with this build.
pub fn standard_schema() -> StandardSchema {
    StandardSchema::new()
        .object(company())
        .object(person())
        .object(opportunity())
        .object(workspace_member())
        .object(blocklist())
        .object(calendar_event())
        .relation(Relation::new(
            RelationType::OneToMany,
            ("company", "people"),
            ("person", "company"),
            OnDeleteAction::SetNull,
        ))
        .relation(Relation::new(
            RelationType::OneToMany,
            ("company", "opportunities"),
            ("opportunity", "company"),
            OnDeleteAction::SetNull,
        ))
        .relation(Relation::new(
            RelationType::OneToMany,
            ("person", "pointOfContactForOpportunities"),
            ("opportunity", "pointOfContact"),
            OnDeleteAction::SetNull,
        ))
        .relation(Relation::new(
            RelationType::OneToMany,
            ("workspaceMember", "accountOwnerForCompanies"),
            ("company", "accountOwner"),
            OnDeleteAction::SetNull,
        ))
        .relation(
            Relation::new(
                RelationType::OneToMany,
                ("workspaceMember", "blocklist"),
                ("blocklist", "workspaceMember"),
                OnDeleteAction::Cascade,
            )
            .gated_by(keys::IS_BLOCKLIST_ENABLED),
        )
}

fn company() -> Object {
    Object::new("company", "companies")
        .labels("Company", "Companies")
        .description("A company")
        .icon("IconBuildingSkyscraper")
        .field(Field::new("name", FieldType::Text, "Name").icon("IconBuildingSkyscraper"))
        .field(
            Field::new("domainName", FieldType::Link, "Domain Name")
                .description("The company website URL")
                .icon("IconLink"),
        )
        .field(Field::new("address", FieldType::Text, "Address").icon("IconMap"))
        .field(
            Field::new("employees", FieldType::Number, "Employees")
                .description("Number of employees in the company")
                .icon("IconUsers"),
        )
        .field(
            Field::new("idealCustomerProfile", FieldType::Boolean, "ICP")
                .icon("IconTarget")
                .required()
                .default_value(json!(false)),
        )
        .field(Field::new("position", FieldType::Position, "Position").system())
        .field(Field::new("people", FieldType::Relation, "People").icon("IconUsers"))
        .field(
            Field::new("opportunities", FieldType::Relation, "Opportunities")
                .icon("IconTargetArrow"),
        )
        .field(
            Field::new("accountOwner", FieldType::Relation, "Account Owner")
                .icon("IconUserCircle"),
        )
}

fn person() -> Object {
    Object::new("person", "people")
        .labels("Person", "People")
        .description("A person")
        .icon("IconUser")
        .field(Field::new("firstName", FieldType::Text, "First name"))
        .field(Field::new("lastName", FieldType::Text, "Last name"))
        .field(Field::new("email", FieldType::Email, "Email").icon("IconMail"))
        .field(Field::new("phone", FieldType::Phone, "Phone").icon("IconPhone"))
        .field(Field::new("city", FieldType::Text, "City").icon("IconMap"))
        .field(Field::new("position", FieldType::Position, "Position").system())
        .field(Field::new("company", FieldType::Relation, "Company").icon("IconBuildingSkyscraper"))
        .field(
            Field::new(
                "pointOfContactForOpportunities",
                FieldType::Relation,
                "POC for Opportunities",
            )
            .icon("IconArrowTarget"),
        )
}

fn opportunity() -> Object {
    Object::new("opportunity", "opportunities")
        .labels("Opportunity", "Opportunities")
        .description("An opportunity")
        .icon("IconTargetArrow")
        .field(Field::new("name", FieldType::Text, "Name"))
        .field(Field::new("amount", FieldType::Number, "Amount").icon("IconCurrencyDollar"))
        .field(Field::new("closeDate", FieldType::DateTime, "Close date").icon("IconCalendarEvent"))
        .field(
            Field::new("stage", FieldType::Select, "Stage")
                .icon("IconProgressCheck")
                .required()
                .default_value(json!("NEW")),
        )
        .field(Field::new("position", FieldType::Position, "Position").system())
        .field(Field::new("company", FieldType::Relation, "Company"))
        .field(Field::new("pointOfContact", FieldType::Relation, "Point of Contact"))
}

fn workspace_member() -> Object {
    Object::new("workspaceMember", "workspaceMembers")
        .labels("Workspace Member", "Workspace Members")
        .description("A workspace member")
        .icon("IconUserCircle")
        .system()
        .field(Field::new("firstName", FieldType::Text, "First name"))
        .field(Field::new("lastName", FieldType::Text, "Last name"))
        .field(
            Field::new("colorScheme", FieldType::Text, "Color Scheme")
                .icon("IconColorSwatch")
                .required()
                .default_value(json!("Light")),
        )
        .field(
            Field::new("locale", FieldType::Text, "Language")
                .icon("IconLanguage")
                .required()
                .default_value(json!("en")),
        )
        .field(
            Field::new("userId", FieldType::Uuid, "User Id")
                .description("Associated User Id")
                .required()
                .system(),
        )
        .field(Field::new(
            "accountOwnerForCompanies",
            FieldType::Relation,
            "Account Owner For Companies",
        ))
        .field(
            Field::new("blocklist", FieldType::Relation, "Blocklist")
                .icon("IconForbid2")
                .gated_by(keys::IS_BLOCKLIST_ENABLED),
        )
}

fn blocklist() -> Object {
    Object::new("blocklist", "blocklists")
        .labels("Blocklist", "Blocklists")
        .icon("IconForbid2")
        .system()
        .gated_by(keys::IS_BLOCKLIST_ENABLED)
        .field(Field::new("handle", FieldType::Text, "Handle").icon("IconAt"))
        .field(Field::new("workspaceMember", FieldType::Relation, "Workspace Member"))
}

fn calendar_event() -> Object {
    Object::new("calendarEvent", "calendarEvents")
        .labels("Calendar event", "Calendar events")
        .icon("IconCalendar")
        .system()
        .gated_by(keys::IS_CALENDAR_ENABLED)
        .field(Field::new("title", FieldType::Text, "Title"))
        .field(
            Field::new("isFullDay", FieldType::Boolean, "Is Full Day")
                .required()
                .default_value(json!(false)),
        )
        .field(Field::new("startsAt", FieldType::DateTime, "Start DateTime"))
        .field(Field::new("endsAt", FieldType::DateTime, "End DateTime"))
        .field(Field::new("location", FieldType::Text, "Location").icon("IconMapPin"))
        .field(Field::new("description", FieldType::Text, "Description"))
        .field(Field::new("conferenceUri", FieldType::Link, "Conference URI"))
        .field(Field::new("eventDetails", FieldType::RawJson, "Event details"))
}
