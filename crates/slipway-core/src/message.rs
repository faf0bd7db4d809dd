//! Chat message values handed to the Responder.
//!
//! The core never talks to the chat transport. It produces `Message`
//! values — Slack-flavoured text plus optional attachments carrying a
//! callback token and the fixed yes/no button pair — and the transport
//! renders them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const COLOR_INFO: &str = "#3AA3E3";
pub const COLOR_DANGER: &str = "#f00";

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn plain(text: impl Into<String>) -> Self {
        Message {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(text: impl Into<String>, attachment: Attachment) -> Self {
        Message {
            text: text.into(),
            attachments: vec![attachment],
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
    /// Token identifying the pending action the buttons resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionButton>,
}

impl Attachment {
    /// A yes/no confirmation prompt bound to a pending-action token.
    pub fn confirmation(title: impl Into<String>, text: Option<String>, token: Uuid) -> Self {
        Attachment {
            title: Some(title.into()),
            text,
            color: Some(COLOR_INFO.to_string()),
            fields: Vec::new(),
            callback_id: Some(token.to_string()),
            actions: confirmation_actions(),
        }
    }

    /// A red field-list attachment used for validation failures.
    pub fn error_fields(fields: Vec<AttachmentField>) -> Self {
        Attachment {
            color: Some(COLOR_DANGER.to_string()),
            fields,
            ..Attachment::default()
        }
    }

    /// An informational attachment with a title and body, no buttons.
    pub fn note(title: impl Into<String>, text: impl Into<String>, color: &str) -> Self {
        Attachment {
            title: Some(title.into()),
            text: Some(text.into()),
            color: Some(color.to_string()),
            ..Attachment::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Action buttons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButton {
    pub name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// The fixed yes/no pair every confirmation prompt carries.
pub fn confirmation_actions() -> Vec<ActionButton> {
    vec![
        ActionButton {
            name: "decision".to_string(),
            text: "Yes".to_string(),
            kind: "button".to_string(),
            value: "yes".to_string(),
        },
        ActionButton {
            name: "decision".to_string(),
            text: "No".to_string(),
            kind: "button".to_string(),
            value: "no".to_string(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Age formatting
// ---------------------------------------------------------------------------

/// Human elapsed time, in the style lock-status lines use.
pub fn format_age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - since).num_minutes();
    if minutes < 1 {
        return "less than a minute ago".to_string();
    }
    if minutes == 1 {
        return "1 minute ago".to_string();
    }
    if minutes < 60 {
        return format!("{minutes} minutes ago");
    }
    let hours = minutes / 60;
    if hours == 1 {
        return "about 1 hour ago".to_string();
    }
    if hours < 24 {
        return format!("about {hours} hours ago");
    }
    let days = hours / 24;
    if days == 1 {
        "1 day ago".to_string()
    } else {
        format!("{days} days ago")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn confirmation_carries_token_and_buttons() {
        let token = Uuid::new_v4();
        let attachment = Attachment::confirmation("Steal the lock?", None, token);
        assert_eq!(attachment.callback_id.as_deref(), Some(token.to_string().as_str()));
        assert_eq!(attachment.color.as_deref(), Some(COLOR_INFO));
        let values: Vec<_> = attachment.actions.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, ["yes", "no"]);
    }

    #[test]
    fn format_age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(30), now), "less than a minute ago");
        assert_eq!(format_age(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(format_age(now - Duration::minutes(12), now), "12 minutes ago");
        assert_eq!(format_age(now - Duration::minutes(75), now), "about 1 hour ago");
        assert_eq!(format_age(now - Duration::hours(5), now), "about 5 hours ago");
        assert_eq!(format_age(now - Duration::days(3), now), "3 days ago");
    }

    #[test]
    fn message_serializes_without_empty_attachments() {
        let json = serde_json::to_string(&Message::plain("hi")).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}
