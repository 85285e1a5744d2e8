use serde::{Deserialize, Serialize};

/// A single listen event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPlay {
    pub user_id: String,
    pub track_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub signature: String,
    pub city: String,
    pub region: String,
    pub country: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPlays {
    pub plays: Vec<TrackPlay>,
}

/// Legacy entity management record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManageEntity {
    pub user_id: i64,
    pub entity_type: String,
    pub entity_id: i64,
    /// Free form action name. `Create`, `Update` and `Delete` are ordered.
    pub action: String,
    pub metadata: String,
    pub signature: String,
    /// Wallet that must have signed the enclosing transaction.
    pub signer: String,
    pub nonce: String,
}

impl ManageEntity {
    pub fn parsed_action(&self) -> Option<EntityAction> {
        EntityAction::parse(&self.action)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityAction {
    Create,
    Update,
    Delete,
}

impl EntityAction {
    /// Case insensitive.
    pub fn parse(action: &str) -> Option<Self> {
        if action.eq_ignore_ascii_case("create") {
            Some(Self::Create)
        } else if action.eq_ignore_ascii_case("update") {
            Some(Self::Update)
        } else if action.eq_ignore_ascii_case("delete") {
            Some(Self::Delete)
        } else {
            None
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Create", Some(EntityAction::Create))]
    #[test_case("create", Some(EntityAction::Create))]
    #[test_case("UPDATE", Some(EntityAction::Update))]
    #[test_case("Delete", Some(EntityAction::Delete))]
    #[test_case("Follow", None)]
    fn parses_actions(action: &str, expected: Option<EntityAction>) {
        assert_eq!(EntityAction::parse(action), expected);
    }
}
