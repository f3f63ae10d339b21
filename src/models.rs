use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// Who authored a message in the assistant conversation
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// Represents a single message in the assistant conversation
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")] // Generate a new UUID if missing during deserialization
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation mode chosen by the technician in the assistant panel.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Fast,
    Search,
    Thinking,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatMode::Fast => "fast",
            ChatMode::Search => "search",
            ChatMode::Thinking => "thinking",
        };
        f.write_str(name)
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ChatMode::Fast),
            "search" => Ok(ChatMode::Search),
            "thinking" => Ok(ChatMode::Thinking),
            other => Err(format!("Unknown chat mode: {}", other)),
        }
    }
}

// A web citation surfaced by search grounding
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// One-shot request to analyze a reported equipment issue.
#[derive(Clone, Debug, Default)]
pub struct AnalysisRequest {
    pub title: String,
    pub description: String,
    pub device_name: String,
    pub use_thinking: bool,
    pub image: Option<Vec<u8>>,
    pub mime_type: Option<String>,
}

impl AnalysisRequest {
    /// Image bytes and MIME type, only when both were supplied.
    pub fn attached_image(&self) -> Option<(&str, &[u8])> {
        match (&self.image, &self.mime_type) {
            (Some(data), Some(mime)) if !mime.trim().is_empty() => Some((mime.as_str(), data.as_slice())),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegistryCheckResult {
    pub text: String,
    pub sources: Vec<GroundingSource>,
}

// --- Inventory ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Operational,
    MaintenanceRequired,
    OutOfOrder,
    UnderRepair,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TicketPriority::Low),
            "medium" => Ok(TicketPriority::Medium),
            "high" => Ok(TicketPriority::High),
            "critical" => Ok(TicketPriority::Critical),
            other => Err(format!("Unknown ticket priority: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
}

// A device tracked in the hospital inventory
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub serial_number: String,
    pub location: String, // "<city> - <facility>"
    pub department: String,
    pub status: DeviceStatus,
    pub last_maintenance: String,
    pub next_maintenance: String,
}

// A maintenance ticket raised against a device
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub equipment_id: String,
    pub title: String,
    pub description: String,
    pub reported_by: String,
    pub date_created: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
}
