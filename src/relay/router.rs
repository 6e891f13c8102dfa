use std::sync::Arc;
use tracing::{debug, error};

use crate::relay::error::{RelayError, RelayResult};
use crate::relay::hub::{deliver, Hub};
use crate::relay::types::{ConnectionId, ServerEvent};
use crate::storage::{Message, MessageId, MessageStore, NewMessage, UserId};

/// Longest accepted message body, in characters
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub delivered: usize,
    pub failed: usize,
}

/// Persists messages and fans them out to live connections
#[derive(Clone)]
pub struct MessageRouter {
    hub: Hub,
    messages: Arc<dyn MessageStore>,
}

impl MessageRouter {
    pub fn new(hub: Hub, messages: Arc<dyn MessageStore>) -> Self {
        Self { hub, messages }
    }

    /// Send a public message to every active connection, sender included
    pub async fn route_broadcast(
        &self,
        connection_id: ConnectionId,
        content: String,
    ) -> RelayResult<DeliveryReceipt> {
        let new_message = self.prepare(connection_id, content, None)?;
        let message = self.persist(new_message).await?;

        let targets = self.hub.all_targets();
        let message_id = message.id;
        let (delivered, failed) = deliver(&targets, &ServerEvent::MessageReceived(message));

        debug!(%message_id, delivered, failed, "Broadcast message routed");
        Ok(DeliveryReceipt {
            message_id,
            delivered,
            failed,
        })
    }

    /// Send a private message to every connection of the recipient and echo it
    /// to the sending connection
    pub async fn route_direct(
        &self,
        connection_id: ConnectionId,
        recipient_id: UserId,
        content: String,
    ) -> RelayResult<DeliveryReceipt> {
        let new_message = self.prepare(connection_id, content, Some(recipient_id.clone()))?;
        let message = self.persist(new_message).await?;

        let targets = self.hub.direct_targets(&connection_id, &recipient_id);
        let message_id = message.id;
        let (delivered, failed) = deliver(&targets, &ServerEvent::MessageReceived(message));

        debug!(%message_id, recipient_id = %recipient_id, delivered, failed, "Direct message routed");
        Ok(DeliveryReceipt {
            message_id,
            delivered,
            failed,
        })
    }

    fn prepare(
        &self,
        connection_id: ConnectionId,
        content: String,
        recipient_id: Option<UserId>,
    ) -> RelayResult<NewMessage> {
        let (sender, timestamp) = self
            .hub
            .stamp(&connection_id)
            .ok_or(RelayError::NotAuthenticated)?;

        validate_content(&content)?;

        Ok(NewMessage {
            content,
            sender_id: sender.user_id,
            sender_name: sender.username,
            recipient_id,
            timestamp,
        })
    }

    async fn persist(&self, message: NewMessage) -> RelayResult<Message> {
        self.messages.save_message(message).await.map_err(|e| {
            error!("Failed to save message: {}", e);
            RelayError::Persistence(e)
        })
    }
}

fn validate_content(content: &str) -> RelayResult<()> {
    if content.trim().is_empty() {
        return Err(RelayError::InvalidMessage(
            "Message content cannot be empty".to_string(),
        ));
    }

    let length = content.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(RelayError::InvalidMessage(format!(
            "Message is {} characters, limit is {}",
            length, MAX_MESSAGE_LENGTH
        )));
    }

    Ok(())
}
