use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use sentra_common::types::DispatchItem;
use serde::Deserialize;
use serde_json::Value;
use tracing;

/// Generic webhook: POSTs the dispatch item as JSON to a configured URL
/// and to every recipient URL.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.filter(|u| !u.is_empty()),
        }
    }

    async fn post(&self, url: &str, payload: &Value) -> Result<()> {
        let mut last_err = None;
        for attempt in 0..3u32 {
            match self.client.post(url).json(payload).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(attempt, url, status = %status, "webhook returned HTTP error, retrying");
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(attempt, url, error = %e, "webhook request failed, retrying");
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("webhook send failed")))
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, item: &DispatchItem) -> Result<()> {
        let payload = serde_json::json!({
            "group_id": item.group_id,
            "action_id": item.action_id,
            "body": item.body,
        });

        let mut targets: Vec<&str> = Vec::new();
        if let Some(url) = &self.url {
            targets.push(url);
        }
        // Recipients resolved from user refs are extra webhook urls.
        targets.extend(item.recipients.iter().map(String::as_str));

        if targets.is_empty() {
            tracing::warn!(group_id = %item.group_id, "webhook dispatch has no targets, skipping");
            return Ok(());
        }

        let mut failed = 0usize;
        for url in &targets {
            if let Err(e) = self.post(url, &payload).await {
                tracing::error!(url, error = %e, "webhook delivery failed");
                failed += 1;
            }
        }

        if failed == targets.len() {
            anyhow::bail!("all {failed} webhook target(s) failed");
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }
}

// Plugin

#[derive(Deserialize)]
struct WebhookConfig {
    url: Option<String>,
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<WebhookConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid webhook config: {e}"))?;
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid webhook config: {e}"))?;
        Ok(Box::new(WebhookChannel::new(cfg.url)))
    }
}
