use async_trait::async_trait;

use crate::metadata::Metadata;

/// A delivered queue message.
///
/// Transports implement this for their delivery type. The listener calls
/// exactly one of [`ack`](Message::ack) or [`nack`](Message::nack) per
/// message it receives; whether a nack means redelivery, dead-lettering or
/// nothing at all is the transport's business.
#[async_trait]
pub trait Message: Send + Sync + 'static {
    /// Transport-assigned identifier, used as a log field.
    fn id(&self) -> &str;

    fn metadata(&self) -> &Metadata;

    fn payload(&self) -> &[u8];

    /// Acknowledge successful processing.
    async fn ack(&self) -> anyhow::Result<()>;

    /// Report failed processing.
    async fn nack(&self) -> anyhow::Result<()>;
}
