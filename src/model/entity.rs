use serde::{Deserialize, Serialize};

use crate::model::field::{FieldDef, FieldKind};
use crate::model::Id;

/// Entity types mirrored from the upstream time-tracking service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Project,
    Activity,
    Tag,
    User,
    Timesheet,
}

const CUSTOMER_FIELDS: &[FieldDef] = &[
    FieldDef::new("amount", FieldKind::Number),
    FieldDef::new("status", FieldKind::Text),
    FieldDef::new("color", FieldKind::Text),
];

const PROJECT_FIELDS: &[FieldDef] = &[
    FieldDef::new("amount", FieldKind::Number),
    FieldDef::new("status", FieldKind::Text),
    FieldDef::new("prospective", FieldKind::Flag),
    FieldDef::new("color", FieldKind::Text),
];

const ACTIVITY_FIELDS: &[FieldDef] = &[
    FieldDef::new("status", FieldKind::Text),
    FieldDef::new("billable", FieldKind::Flag),
];

const TAG_FIELDS: &[FieldDef] = &[FieldDef::new("color", FieldKind::Text)];

const USER_FIELDS: &[FieldDef] = &[FieldDef::new("status", FieldKind::Text)];

const TIMESHEET_FIELDS: &[FieldDef] = &[
    FieldDef::new("amount", FieldKind::Number),
    FieldDef::new("billable", FieldKind::Flag),
    FieldDef::new("exported", FieldKind::Flag),
];

impl EntityKind {
    /// Stage order used by provisioning; later kinds may reference earlier ones
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Customer,
        EntityKind::User,
        EntityKind::Activity,
        EntityKind::Tag,
        EntityKind::Project,
        EntityKind::Timesheet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Project => "project",
            EntityKind::Activity => "activity",
            EntityKind::Tag => "tag",
            EntityKind::User => "user",
            EntityKind::Timesheet => "timesheet",
        }
    }

    /// Collection segment of the upstream REST API (`/api/<collection>`)
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Project => "projects",
            EntityKind::Activity => "activities",
            EntityKind::Tag => "tags",
            EntityKind::User => "users",
            EntityKind::Timesheet => "timesheets",
        }
    }

    /// Field used to match local names against upstream entities
    pub fn natural_key(&self) -> &'static str {
        match self {
            EntityKind::User => "username",
            EntityKind::Timesheet => "description",
            _ => "name",
        }
    }

    /// Fields that may be overridden locally and are merged on read
    pub fn fields(&self) -> &'static [FieldDef] {
        match self {
            EntityKind::Customer => CUSTOMER_FIELDS,
            EntityKind::Project => PROJECT_FIELDS,
            EntityKind::Activity => ACTIVITY_FIELDS,
            EntityKind::Tag => TAG_FIELDS,
            EntityKind::User => USER_FIELDS,
            EntityKind::Timesheet => TIMESHEET_FIELDS,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields().iter().find(|def| def.name == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" | "customers" => Ok(EntityKind::Customer),
            "project" | "projects" => Ok(EntityKind::Project),
            "activity" | "activities" => Ok(EntityKind::Activity),
            "tag" | "tags" => Ok(EntityKind::Tag),
            "user" | "users" => Ok(EntityKind::User),
            "timesheet" | "timesheets" => Ok(EntityKind::Timesheet),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// Storage key shared by snapshots and overrides
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Id,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<Id>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_singular_and_plural() {
        assert_eq!("projects".parse::<EntityKind>(), Ok(EntityKind::Project));
        assert_eq!("Activity".parse::<EntityKind>(), Ok(EntityKind::Activity));
        assert!("invoice".parse::<EntityKind>().is_err());
    }

    #[test]
    fn project_field_group_includes_prospective_flag() {
        let def = EntityKind::Project.field("prospective").unwrap();
        assert_eq!(def.kind, FieldKind::Flag);
        assert!(EntityKind::Tag.field("prospective").is_none());
    }

    #[test]
    fn customers_are_provisioned_before_projects() {
        let position = |kind| EntityKind::ALL.iter().position(|k| *k == kind).unwrap();
        assert!(position(EntityKind::Customer) < position(EntityKind::Project));
        assert!(position(EntityKind::Project) < position(EntityKind::Timesheet));
    }
}
