use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::MessageType;
use super::user::UserRef;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationThread {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub subject: String,
    pub created_by: Uuid,
    pub is_urgent: bool,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: String,
    pub is_ai_generated: bool,
    pub ai_template_used: Option<String>,
    pub attached_files: Vec<Uuid>,
    pub referenced_visits: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub message_type: MessageType,
    pub template_content: String,
    pub variables: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    pub read_by: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePreview {
    pub id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// List projection of a thread, computed for one reader.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: CommunicationThread,
    pub patient_name: String,
    pub participants: Vec<UserRef>,
    pub unread_count: i64,
    pub message_count: i64,
    pub last_message: Option<MessagePreview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: CommunicationThread,
    pub patient_name: String,
    pub participants: Vec<UserRef>,
    pub messages: Vec<MessageView>,
}
