//! API request and response types

use crate::replies::OutboundMessage;
use serde::{Deserialize, Serialize};

/// Inbound chat message
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    /// Display name the transport knows the sender by
    #[serde(default)]
    pub sender_name: Option<String>,
}

/// Everything the bot says in answer to one message, in order
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_chats: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
