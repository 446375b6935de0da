use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of conversation a message log belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// Multi-party group thread.
    Group,
    /// One-to-one direct thread.
    Direct,
}

impl ConversationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Direct => "direct",
        }
    }
}

impl TryFrom<&str> for ConversationKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "group" => Ok(Self::Group),
            "direct" => Ok(Self::Direct),
            _ => Err("invalid conversation kind"),
        }
    }
}

/// Stable identity of a selected conversation.
///
/// Changing either field means switching conversations: every subscription
/// and per-conversation cache is keyed by the full pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationRef {
    pub kind: ConversationKind,
    pub id: Uuid,
}

impl ConversationRef {
    #[must_use]
    pub const fn group(id: Uuid) -> Self {
        Self {
            kind: ConversationKind::Group,
            id,
        }
    }

    #[must_use]
    pub const fn direct(id: Uuid) -> Self {
        Self {
            kind: ConversationKind::Direct,
            id,
        }
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl std::str::FromStr for ConversationRef {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value.split_once(':').ok_or("expected kind:id")?;
        Ok(Self {
            kind: ConversationKind::try_from(kind)?,
            id: id.parse().map_err(|_| "invalid conversation id")?,
        })
    }
}
