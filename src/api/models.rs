use crate::session::UserProfile;
use serde::{Deserialize, Serialize};

/// User record as returned by `/users/login` and `/api/users`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: String,
    pub email: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            phone: user.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MailStats {
    #[serde(default)]
    pub total_emails: u64,
    #[serde(default)]
    pub sent_emails: u64,
    #[serde(default)]
    pub pending_emails: u64,
    #[serde(default)]
    pub total_subscribers: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Unread,
    Read,
    Replied,
    Closed,
}

impl ContactStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unread" => Some(Self::Unread),
            "read" => Some(Self::Read),
            "replied" => Some(Self::Replied),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
            Self::Replied => "replied",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContactReply {
    pub id: u64,
    pub contact_message_id: u64,
    pub admin_name: String,
    pub admin_email: String,
    pub reply_message: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactReplyRequest {
    pub contact_message_id: u64,
    pub admin_name: String,
    pub admin_email: String,
    pub reply_message: String,
}

/// Contact form submission with its admin replies
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContactMessageWithReplies {
    pub id: u64,
    #[serde(default)]
    pub purpose: Option<String>,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub status: ContactStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub replies: Vec<ContactReply>,
}

/// News story as embedded in the hero selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeroStory {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Stories currently featured on the public home page
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HeroSelection {
    #[serde(default)]
    pub main_story: Option<HeroStory>,
    #[serde(default)]
    pub minor_story_1: Option<HeroStory>,
    #[serde(default)]
    pub minor_story_2: Option<HeroStory>,
}

impl HeroSelection {
    pub fn ids(&self) -> HeroSelectionRequest {
        HeroSelectionRequest {
            main_story_id: self.main_story.as_ref().map(|s| s.id),
            minor_story_1_id: self.minor_story_1.as_ref().map(|s| s.id),
            minor_story_2_id: self.minor_story_2.as_ref().map(|s| s.id),
        }
    }
}

/// Body of `PUT /api/hero-selection`; empty slots are sent as null
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeroSelectionRequest {
    pub main_story_id: Option<u64>,
    pub minor_story_1_id: Option<u64>,
    pub minor_story_2_id: Option<u64>,
}
