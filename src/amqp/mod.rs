//! AMQP integration for the draft-room service
//!
//! Inbound commands are consumed from a durable queue; outbound notices are
//! published to a topic exchange keyed by their target.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandHandler};
pub use messages::*;
pub use publisher::{AmqpNotifier, MockNotifier, Notifier, PublisherConfig};
