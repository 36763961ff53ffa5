// ============================================
// Message Sinks
// ============================================
//
// Where a run's message sequence ends up. The pipeline only produces the
// sequence; `publish_all` drains it into a sink in order.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::KafkaMessageSink;

use crate::error::{RecommendationError, Result};
use crate::messages::OutboundMessage;
use async_trait::async_trait;
use std::io::Write;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes every message as one JSON document per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send + 'static> MessageSink for JsonLinesSink<W> {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let line = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{}", line).map_err(|e| RecommendationError::Publish(e.to_string()))
    }

    async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .flush()
            .map_err(|e| RecommendationError::Publish(e.to_string()))
    }
}

/// Send every message of `messages` to `sink` in order. Returns the number
/// of messages sent.
pub async fn publish_all<I>(sink: &dyn MessageSink, messages: I) -> Result<usize>
where
    I: IntoIterator<Item = OutboundMessage>,
{
    let mut sent = 0usize;
    for message in messages {
        sink.send(&message).await?;
        sent += 1;
        debug!(message_type = message.message_type(), "Message sent");
    }
    sink.flush().await?;

    info!(messages = sent, "Published recommendation messages");
    Ok(sent)
}
