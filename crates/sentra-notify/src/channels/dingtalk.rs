use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use sentra_common::types::DispatchItem;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing;

type HmacSha256 = Hmac<Sha256>;

const DINGTALK_API: &str = "https://oapi.dingtalk.com/robot/send";

pub struct DingTalkChannel {
    client: reqwest::Client,
    token: String,
    secret: Option<String>,
}

impl DingTalkChannel {
    pub fn new(token: &str, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    fn webhook_url(&self) -> String {
        let base = format!("{}?access_token={}", DINGTALK_API, self.token);
        let Some(secret) = &self.secret else {
            return base;
        };

        let timestamp = chrono::Utc::now().timestamp_millis();
        let string_to_sign = format!("{}\n{}", timestamp, secret);

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let sign = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        let sign_encoded = urlencoding::encode(&sign);

        format!("{base}&timestamp={timestamp}&sign={sign_encoded}")
    }

    async fn post_markdown(&self, title: &str, text: &str) -> Result<()> {
        let payload = serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": title,
                "text": text,
            }
        });

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self
                .client
                .post(self.webhook_url())
                .header("Content-Type", "application/json")
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.unwrap_or_else(|_| serde_json::json!({}));
                    let errcode = body.get("errcode").and_then(|v| v.as_i64());
                    if errcode == Some(0) {
                        return Ok(());
                    }
                    let errmsg = body
                        .get("errmsg")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    tracing::warn!(attempt, errmsg, "DingTalk API returned error, retrying");
                    last_err = Some(anyhow::anyhow!("DingTalk error: {errmsg}"));
                }
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(attempt, status = %status, "DingTalk webhook HTTP error, retrying");
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "DingTalk webhook request failed, retrying");
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("DingTalk send failed")))
    }
}

#[async_trait]
impl NotificationChannel for DingTalkChannel {
    async fn send(&self, item: &DispatchItem) -> Result<()> {
        let title = item
            .meta
            .get("title")
            .cloned()
            .unwrap_or_else(|| "[sentra] alert report".to_string());
        self.post_markdown(&title, &item.body).await
    }

    fn channel_type(&self) -> &str {
        "dingtalk"
    }
}

// Plugin

#[derive(Deserialize)]
struct DingTalkConfig {
    token: String,
    secret: Option<String>,
}

pub struct DingTalkPlugin;

impl ChannelPlugin for DingTalkPlugin {
    fn name(&self) -> &str {
        "dingtalk"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<DingTalkConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid dingtalk config: {e}"))?;
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg: DingTalkConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid dingtalk config: {e}"))?;
        Ok(Box::new(DingTalkChannel::new(&cfg.token, cfg.secret)))
    }
}
