//! AMQP message handlers for processing inbound commands
//!
//! Commands carry human decisions (joining the lobby, drafting, confirming
//! readiness). Each delivery is decoded, validated and dispatched to a
//! [`CommandHandler`].

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::Command;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling inbound commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Apply a decoded command
    async fn handle_command(&self, command: Command) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: MatchmakingError, message_data: &[u8]);
}

/// Consumer for the command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl CommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("command-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(CommandQueueConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming commands");
        Ok(())
    }
}

struct CommandQueueConsumer {
    handler: Arc<dyn CommandHandler>,
}

impl CommandQueueConsumer {
    fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl AsyncConsumer for CommandQueueConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();

        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        process_message(self.handler.as_ref(), &content).await;

        // Rejected decisions are answered with notices, never redelivered
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Decode one delivery and hand it to the handler
pub async fn process_message(handler: &dyn CommandHandler, content: &[u8]) {
    let start_time = std::time::Instant::now();

    let command = match MessageUtils::deserialize_command(content) {
        Ok(command) => command,
        Err(e) => {
            warn!("Discarding malformed command: {}", e);
            let error = match e.downcast::<MatchmakingError>() {
                Ok(typed) => typed,
                Err(other) => MatchmakingError::InvalidCommand {
                    reason: other.to_string(),
                },
            };
            handler.handle_error(error, content).await;
            return;
        }
    };

    let name = command.name();
    match handler.handle_command(command).await {
        Ok(()) => {
            info!(
                "Command processed - command: {}, time: {:.2}ms",
                name,
                start_time.elapsed().as_secs_f64() * 1000.0
            );
        }
        Err(e) => {
            error!(
                "Command failed - command: {}, time: {:.2}ms, error: {}",
                name,
                start_time.elapsed().as_secs_f64() * 1000.0,
                e
            );
            let error = match e.downcast::<MatchmakingError>() {
                Ok(typed) => typed,
                Err(other) => MatchmakingError::InternalError {
                    message: other.to_string(),
                },
            };
            handler.handle_error(error, content).await;
        }
    }
}

/// Mock command handler for testing
#[derive(Default)]
pub struct MockCommandHandler {
    pub received_commands: Arc<tokio::sync::Mutex<Vec<Command>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, command: Command) -> Result<()> {
        if let Command::ClearMatch { match_id } = command {
            if match_id == 0 {
                return Err(MatchmakingError::not_found("Match", match_id).into());
            }
        }
        self.received_commands.lock().await.push(command);
        Ok(())
    }

    async fn handle_error(&self, error: MatchmakingError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_command_is_dispatched() {
        let handler = MockCommandHandler::new();
        process_message(&handler, br#"{"type":"leave","player_id":3}"#).await;

        let received = handler.received_commands.lock().await;
        assert_eq!(received.as_slice(), &[Command::Leave { player_id: 3 }]);
        assert!(handler.errors.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_command_reports_error() {
        let handler = MockCommandHandler::new();
        process_message(&handler, b"not json").await;

        assert!(handler.received_commands.lock().await.is_empty());
        let errors = handler.errors.lock().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Invalid command"));
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_error_kind() {
        let handler = MockCommandHandler::new();
        process_message(&handler, br#"{"type":"clear_match","match_id":0}"#).await;

        let errors = handler.errors.lock().await;
        assert_eq!(errors.as_slice(), &["Match not found: 0".to_string()]);
    }
}
