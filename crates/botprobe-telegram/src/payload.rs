//! Probe payload construction.
//!
//! A probe is a synthetic update impersonating a real user: either a text
//! message (optionally replying to an earlier message) or a press of an inline
//! keyboard button under a bot message. Payloads are immutable once built.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PayloadError, PayloadResult};
use crate::ids::IdGenerator;
use crate::update::{CallbackQuery, Chat, Message, Update, User};

/// The human user a probe impersonates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Private chat id; equal to the user id for private chats.
    pub chat_id: i64,

    pub username: String,

    pub first_name: String,

    #[serde(default = "default_language_code")]
    pub language_code: String,
}

fn default_language_code() -> String {
    "en".to_string()
}

impl UserIdentity {
    pub fn new(chat_id: i64, username: impl Into<String>, first_name: impl Into<String>) -> Self {
        Self {
            chat_id,
            username: username.into(),
            first_name: first_name.into(),
            language_code: default_language_code(),
        }
    }

    /// In private chats the user id and the chat id coincide.
    pub fn user_id(&self) -> i64 {
        self.chat_id
    }

    fn as_user(&self) -> User {
        User {
            id: self.user_id(),
            is_bot: false,
            first_name: self.first_name.clone(),
            username: Some(self.username.clone()),
            language_code: Some(self.language_code.clone()),
        }
    }

    fn as_chat(&self) -> Chat {
        Chat {
            id: self.chat_id,
            kind: "private".to_string(),
            first_name: Some(self.first_name.clone()),
            username: Some(self.username.clone()),
        }
    }
}

/// The bot account that authored the message carrying a pressed button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    pub username: String,

    /// Text of the bot message a callback originates from.
    #[serde(default = "default_prompt_text")]
    pub prompt_text: String,
}

fn default_prompt_text() -> String {
    "Please choose an option".to_string()
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            id: 1,
            first_name: "Bot".to_string(),
            username: "target_bot".to_string(),
            prompt_text: default_prompt_text(),
        }
    }
}

/// The message a text probe replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyReference {
    pub message_id: i64,

    #[serde(default)]
    pub text: Option<String>,
}

/// A text message probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub update_id: i64,
    pub message_id: i64,
    pub identity: UserIdentity,
    pub text: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub reply_to: Option<ReplyReference>,
}

impl TextMessage {
    pub fn chat_id(&self) -> i64 {
        self.identity.chat_id
    }

    pub fn user_id(&self) -> i64 {
        self.identity.user_id()
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    fn to_update(&self) -> Update {
        let reply_to_message = self.reply_to.as_ref().map(|reply| {
            Box::new(Message {
                message_id: reply.message_id,
                from: None,
                chat: self.identity.as_chat(),
                date: self.timestamp,
                text: reply.text.clone(),
                reply_to_message: None,
            })
        });

        Update {
            update_id: self.update_id,
            message: Some(Message {
                message_id: self.message_id,
                from: Some(self.identity.as_user()),
                chat: self.identity.as_chat(),
                date: self.timestamp,
                text: Some(self.text.clone()),
                reply_to_message,
            }),
            callback_query: None,
        }
    }
}

/// An inline button press probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub update_id: i64,
    pub callback_id: String,
    pub identity: UserIdentity,
    pub callback_data: String,
    /// Id of the bot message that carried the button.
    pub origin_message_id: i64,
    pub bot: BotIdentity,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl CallbackEvent {
    pub fn chat_id(&self) -> i64 {
        self.identity.chat_id
    }

    pub fn user_id(&self) -> i64 {
        self.identity.user_id()
    }

    fn to_update(&self) -> Update {
        let origin = Message {
            message_id: self.origin_message_id,
            from: Some(User {
                id: self.bot.id,
                is_bot: true,
                first_name: self.bot.first_name.clone(),
                username: Some(self.bot.username.clone()),
                language_code: None,
            }),
            chat: self.identity.as_chat(),
            date: self.timestamp,
            text: Some(self.bot.prompt_text.clone()),
            reply_to_message: None,
        };

        Update {
            update_id: self.update_id,
            message: None,
            callback_query: Some(CallbackQuery {
                id: self.callback_id.clone(),
                from: self.identity.as_user(),
                message: Some(origin),
                chat_instance: self.identity.chat_id.to_string(),
                data: Some(self.callback_data.clone()),
            }),
        }
    }
}

/// A probe ready to be delivered to the webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbePayload {
    TextMessage(TextMessage),
    CallbackEvent(CallbackEvent),
}

impl ProbePayload {
    pub fn update_id(&self) -> i64 {
        match self {
            ProbePayload::TextMessage(m) => m.update_id,
            ProbePayload::CallbackEvent(c) => c.update_id,
        }
    }

    /// The message id later steps can refer to.
    ///
    /// For a callback this is the bot message the button belonged to.
    pub fn message_id(&self) -> i64 {
        match self {
            ProbePayload::TextMessage(m) => m.message_id,
            ProbePayload::CallbackEvent(c) => c.origin_message_id,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            ProbePayload::TextMessage(m) => m.chat_id(),
            ProbePayload::CallbackEvent(c) => c.chat_id(),
        }
    }

    /// Human-readable summary, e.g. `text "What's my job?"`.
    pub fn describe(&self) -> String {
        match self {
            ProbePayload::TextMessage(m) => format!("text {:?}", m.text),
            ProbePayload::CallbackEvent(c) => format!("callback {:?}", c.callback_data),
        }
    }

    /// Converts the probe into its Bot API update.
    pub fn to_update(&self) -> Update {
        match self {
            ProbePayload::TextMessage(m) => m.to_update(),
            ProbePayload::CallbackEvent(c) => c.to_update(),
        }
    }

    /// Serializes the Bot API update to a JSON body.
    pub fn to_json(&self) -> PayloadResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_update())?)
    }
}

impl From<TextMessage> for ProbePayload {
    fn from(message: TextMessage) -> Self {
        ProbePayload::TextMessage(message)
    }
}

impl From<CallbackEvent> for ProbePayload {
    fn from(event: CallbackEvent) -> Self {
        ProbePayload::CallbackEvent(event)
    }
}

/// Builds probes on behalf of one user identity.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    identity: UserIdentity,
    bot: BotIdentity,
    ids: Arc<IdGenerator>,
}

impl PayloadBuilder {
    /// Creates a builder drawing ids from the process-wide generator.
    pub fn new(identity: UserIdentity) -> Self {
        Self {
            identity,
            bot: BotIdentity::default(),
            ids: IdGenerator::shared(),
        }
    }

    pub fn with_bot(mut self, bot: BotIdentity) -> Self {
        self.bot = bot;
        self
    }

    pub fn with_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Returns a builder for another user that shares this builder's id source.
    pub fn for_identity(&self, identity: UserIdentity) -> Self {
        Self {
            identity,
            bot: self.bot.clone(),
            ids: Arc::clone(&self.ids),
        }
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    /// Builds a text message probe.
    pub fn text_message(
        &self,
        text: impl Into<String>,
        reply_to: Option<ReplyReference>,
    ) -> PayloadResult<TextMessage> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PayloadError::EmptyText);
        }

        let message = TextMessage {
            update_id: self.ids.next_update_id(),
            message_id: self.ids.next_message_id(),
            identity: self.identity.clone(),
            text,
            timestamp: Utc::now().timestamp(),
            reply_to,
        };
        debug!(
            update_id = message.update_id,
            message_id = message.message_id,
            chat_id = message.chat_id(),
            "built text probe"
        );
        Ok(message)
    }

    /// Builds a button press probe.
    ///
    /// Without an `origin_message_id` the button is attributed to a fresh,
    /// never-seen bot message.
    pub fn callback(
        &self,
        callback_data: impl Into<String>,
        origin_message_id: Option<i64>,
    ) -> PayloadResult<CallbackEvent> {
        let callback_data = callback_data.into();
        if callback_data.trim().is_empty() {
            return Err(PayloadError::EmptyCallbackData);
        }

        let event = CallbackEvent {
            update_id: self.ids.next_update_id(),
            callback_id: self.ids.next_callback_id(),
            identity: self.identity.clone(),
            callback_data,
            origin_message_id: origin_message_id.unwrap_or_else(|| self.ids.next_message_id()),
            bot: self.bot.clone(),
            timestamp: Utc::now().timestamp(),
        };
        debug!(
            update_id = event.update_id,
            callback_id = %event.callback_id,
            data = %event.callback_data,
            "built callback probe"
        );
        Ok(event)
    }
}
