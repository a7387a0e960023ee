//! Notification delivery with pluggable channel support.
//!
//! Dispatch items coming off the queue are routed to a
//! [`NotificationChannel`] built by the matching [`plugin::ChannelPlugin`].
//! Built-in channels: DingTalk (signed webhook), email (SMTP), generic
//! webhook.

pub mod channels;
pub mod plugin;
pub mod render;

#[cfg(test)]
mod tests;

use anyhow::Result;
use async_trait::async_trait;
use sentra_common::types::DispatchItem;

/// A delivery channel for one dispatch item.
///
/// Instances are built per dispatch from the item's routing meta, so a
/// single plugin serves every robot/webhook/mailbox configured by rules.
/// Adapters must tolerate duplicates: the queue is at-least-once.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver the rendered report to the item's recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after channel-level retries; the
    /// queue decides whether to back off and retry the whole item.
    async fn send(&self, item: &DispatchItem) -> Result<()>;

    /// Channel type name (e.g. `"dingtalk"`, `"webhook"`).
    fn channel_type(&self) -> &str;
}
