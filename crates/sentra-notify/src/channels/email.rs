use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sentra_common::types::DispatchItem;
use serde::Deserialize;
use serde_json::Value;
use tracing;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?.port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, item: &DispatchItem) -> Result<()> {
        if item.recipients.is_empty() {
            tracing::warn!(group_id = %item.group_id, "email dispatch has no recipients, skipping");
            return Ok(());
        }

        let subject = item
            .meta
            .get("title")
            .cloned()
            .unwrap_or_else(|| "[sentra] alert report".to_string());

        let mut failed = 0usize;
        for to in &item.recipients {
            let message = Message::builder()
                .from(self.from.parse()?)
                .to(to.parse()?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(item.body.clone())?;

            if let Err(e) = self.transport.send(message).await {
                tracing::error!(to, error = %e, "email delivery failed");
                failed += 1;
            }
        }

        if failed == item.recipients.len() {
            anyhow::bail!("all {failed} email recipient(s) failed");
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "email"
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    smtp_port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    from: String,
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<EmailConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid email config: {e}"))?;
        Ok(())
    }

    fn create_channel(&self, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("invalid email config: {e}"))?;
        Ok(Box::new(EmailChannel::new(
            &cfg.smtp_host,
            cfg.smtp_port.unwrap_or(465),
            cfg.username.as_deref(),
            cfg.password.as_deref(),
            &cfg.from,
        )?))
    }
}
