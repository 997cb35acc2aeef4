//! # botprobe-telegram
//!
//! Telegram side of the botprobe harness.
//!
//! This crate provides:
//! - The subset of the Telegram Bot API update schema a webhook receives
//! - Process-unique message, update and callback identifiers
//! - A payload builder producing text-message and button-click probes

mod error;
pub mod ids;
pub mod payload;
pub mod update;

pub use error::{PayloadError, PayloadResult};
pub use ids::IdGenerator;
pub use payload::{
    BotIdentity, CallbackEvent, PayloadBuilder, ProbePayload, ReplyReference, TextMessage,
    UserIdentity,
};
pub use update::{CallbackQuery, Chat, Message, Update, User};
