use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Backend responders the client knows how to badge. Labels arriving on the
/// wire are kept verbatim on the message; this is only a lookup for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    HrAssistant,
    ItAssistant,
    ImageGenerator,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [
        AgentKind::HrAssistant,
        AgentKind::ItAssistant,
        AgentKind::ImageGenerator,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    pub fn label(self) -> &'static str {
        match self {
            AgentKind::HrAssistant => "HR Assistant",
            AgentKind::ItAssistant => "IT Assistant",
            AgentKind::ImageGenerator => "Image-Generator",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            AgentKind::HrAssistant => "👔",
            AgentKind::ItAssistant => "💻",
            AgentKind::ImageGenerator => "🎨",
        }
    }
}
