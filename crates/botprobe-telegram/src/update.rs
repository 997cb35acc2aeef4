//! Telegram Bot API update schema, limited to what a webhook probe sends.
//!
//! Field names follow the Bot API exactly so the serialized JSON is accepted by
//! any webhook handler that parses real Telegram traffic.

use serde::{Deserialize, Serialize};

/// An incoming update as delivered to `POST /webhook/<token>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_query: Option<CallbackQuery>,
}

/// A Telegram user or bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

/// A chat; probes always target a private chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,

    pub chat: Chat,

    /// Unix timestamp in seconds.
    pub date: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
}

/// An inline keyboard button press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,

    /// The bot message carrying the pressed button.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    pub chat_instance: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}
