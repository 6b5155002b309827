use prekey_protocol::Message;

use crate::dispatch;
use crate::error::ServerError;
use crate::server_state::ServerState;

/// Turns one decoded, reassembled message into the bytes of the reply.
pub trait MessageHandler: Send + Sync {
    fn handle_message(
        &self,
        state: &ServerState,
        from: &str,
        message: &[u8],
    ) -> Result<Vec<u8>, ServerError>;
}

/// The prekey server protocol: parse, validate, then respond.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrekeyMessageHandler;

impl MessageHandler for PrekeyMessageHandler {
    fn handle_message(
        &self,
        state: &ServerState,
        from: &str,
        message: &[u8],
    ) -> Result<Vec<u8>, ServerError> {
        let message = Message::decode(message)?;
        let message_type = message.message_type();

        if let Err(e) = dispatch::validate(&message, from, state) {
            tracing::warn!(identity = %from, message_type, error = %e, "message rejected");
            return Err(e);
        }
        tracing::debug!(identity = %from, message_type, "message accepted");

        let reply = dispatch::respond(message, from, state)?;
        Ok(reply.encode()?)
    }
}
