//! AMQP notice publisher for outbound notifications

use crate::amqp::messages::{MessageEnvelope, MessageUtils, NOTICE_EXCHANGE};
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Best-effort delivery of notices to players, match channels and staff
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Hand a notice over for delivery. An error means the notice was not accepted;
    /// callers log it and carry on.
    async fn deliver(&self, notice: Notice) -> Result<()>;
}

/// Configuration for notice publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: NOTICE_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
        }
    }
}

struct PublisherInner {
    channel: Channel,
    config: PublisherConfig,
    published_messages: Mutex<HashSet<String>>, // For deduplication
}

/// AMQP-based notifier publishing to a topic exchange
#[derive(Clone)]
pub struct AmqpNotifier {
    inner: Arc<PublisherInner>,
}

impl AmqpNotifier {
    /// Create a new notifier and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let notifier = Self {
            inner: Arc::new(PublisherInner {
                channel,
                config,
                published_messages: Mutex::new(HashSet::new()),
            }),
        };

        notifier.setup_exchange().await?;

        Ok(notifier)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let exchange = &self.inner.config.exchange;
        let args = ExchangeDeclareArguments::new(exchange, "topic");
        self.inner.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare notice exchange {}: {}", exchange, e),
            }
        })?;

        info!("Successfully set up AMQP exchange '{}'", exchange);
        Ok(())
    }

    /// Get number of cached message IDs (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.inner
            .published_messages
            .lock()
            .map(|cache| cache.len())
            .unwrap_or(0)
    }

    /// Clear deduplication cache
    pub fn clear_deduplication_cache(&self) {
        if let Ok(mut published_messages) = self.inner.published_messages.lock() {
            published_messages.clear();
        }
    }
}

impl PublisherInner {
    /// Publish with retry logic
    async fn publish(&self, envelope: MessageEnvelope<Notice>) -> Result<()> {
        if self.config.enable_deduplication {
            let published_messages =
                self.published_messages
                    .lock()
                    .map_err(|_| MatchmakingError::InternalError {
                        message: "Failed to acquire published messages lock".to_string(),
                    })?;
            if published_messages.contains(&envelope.correlation_id) {
                debug!(
                    "Notice {} already published, skipping",
                    envelope.correlation_id
                );
                return Ok(());
            }
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(&envelope).await {
                Ok(_) => {
                    if self.config.enable_deduplication {
                        let mut published_messages =
                            self.published_messages.lock().map_err(|_| {
                                MatchmakingError::InternalError {
                                    message: "Failed to acquire published messages lock"
                                        .to_string(),
                                }
                            })?;
                        published_messages.insert(envelope.correlation_id.clone());
                    }

                    debug!(
                        "Published notice {:?} ({}) with key {}",
                        envelope.payload.key, envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish notice {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for notice {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<Notice>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish notice: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for AmqpNotifier {
    async fn deliver(&self, notice: Notice) -> Result<()> {
        let routing_key = MessageUtils::routing_key(&notice);
        let envelope = MessageEnvelope::new(notice, routing_key);

        // Retries run off the caller's path
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.publish(envelope).await {
                warn!("Dropping undeliverable notice: {}", e);
            }
        });
        Ok(())
    }
}

/// Mock notifier for testing
#[derive(Debug, Default)]
pub struct MockNotifier {
    delivered: Mutex<Vec<Notice>>,
    failing: std::sync::atomic::AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Get all delivered notices
    pub fn notices(&self) -> Vec<Notice> {
        self.delivered
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    /// Delivered notice keys, in order
    pub fn keys(&self) -> Vec<NoticeKey> {
        self.notices().into_iter().map(|n| n.key).collect()
    }

    pub fn count(&self, key: NoticeKey) -> usize {
        self.notices().iter().filter(|n| n.key == key).count()
    }

    /// Notices with the given key, in delivery order
    pub fn with_key(&self, key: NoticeKey) -> Vec<Notice> {
        self.notices().into_iter().filter(|n| n.key == key).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut notices) = self.delivered.lock() {
            notices.clear();
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn deliver(&self, notice: Notice) -> Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MatchmakingError::InternalError {
                message: format!("Mock delivery failure for {:?}", notice.key),
            }
            .into());
        }
        if let Ok(mut notices) = self.delivered.lock() {
            notices.push(notice);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.exchange, NOTICE_EXCHANGE);
        assert_eq!(config.max_retries, 3);
        assert!(config.enable_deduplication);
    }

    #[tokio::test]
    async fn test_mock_notifier_records_in_order() {
        let notifier = MockNotifier::new();
        notifier
            .deliver(Notice::new(NoticeKey::LobbyJoined, NoticeTarget::Lobby).arg("alpha"))
            .await
            .unwrap();
        notifier
            .deliver(Notice::new(NoticeKey::MatchInit, NoticeTarget::Match(1)))
            .await
            .unwrap();

        assert_eq!(
            notifier.keys(),
            vec![NoticeKey::LobbyJoined, NoticeKey::MatchInit]
        );
        assert_eq!(notifier.count(NoticeKey::MatchInit), 1);
        assert_eq!(notifier.with_key(NoticeKey::LobbyJoined)[0].args, vec!["alpha"]);

        notifier.clear();
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_mock_notifier_failure_mode() {
        let notifier = MockNotifier::new();
        notifier.set_failing(true);
        assert!(notifier
            .deliver(Notice::new(NoticeKey::LobbyLeft, NoticeTarget::Lobby))
            .await
            .is_err());
        assert!(notifier.notices().is_empty());
    }
}
