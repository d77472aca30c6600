use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of record a status change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Order,
    Payment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::Payment => "payment",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(EntityKind::Order),
            "payment" => Ok(EntityKind::Payment),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// One entry of the append-only status history.
///
/// `from` is `None` for the entry written when the record is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub from: Option<String>,
    pub to: String,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(
        entity: EntityKind,
        entity_id: Uuid,
        from: Option<&str>,
        to: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity,
            entity_id,
            from: from.map(str::to_string),
            to: to.to_string(),
            at,
        }
    }
}
