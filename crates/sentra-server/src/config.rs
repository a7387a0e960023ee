use serde::{Deserialize, Serialize};

/// Server configuration, loaded from a JSON file.
///
/// Field order is fixed so `serialize()` round-trips byte-identically
/// through `load()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub preview_url: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_grpc_listen")]
    pub grpc_listen: String,

    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub api_token: String,

    /// Aggregation tick interval in seconds.
    #[serde(default = "default_aggregation_period")]
    pub aggregation_period: u64,
    /// Trigger evaluation tick interval in seconds.
    #[serde(default = "default_action_trigger_period")]
    pub action_trigger_period: u64,
    #[serde(default = "default_queue_job_max_retry_times")]
    pub queue_job_max_retry_times: i64,
    #[serde(default = "default_queue_worker_num")]
    pub queue_worker_num: usize,

    /// Seed predefined expression templates on boot.
    #[serde(default)]
    pub migrate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview_url: String::new(),
            listen: default_listen(),
            grpc_listen: default_grpc_listen(),
            database_url: default_database_url(),
            api_token: String::new(),
            aggregation_period: default_aggregation_period(),
            action_trigger_period: default_action_trigger_period(),
            queue_job_max_retry_times: default_queue_job_max_retry_times(),
            queue_worker_num: default_queue_worker_num(),
            migrate: false,
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:19999".to_string()
}

fn default_grpc_listen() -> String {
    "0.0.0.0:19998".to_string()
}

fn default_database_url() -> String {
    "sqlite://sentra.db?mode=rwc".to_string()
}

fn default_aggregation_period() -> u64 {
    30
}

fn default_action_trigger_period() -> u64 {
    5
}

fn default_queue_job_max_retry_times() -> i64 {
    3
}

fn default_queue_worker_num() -> usize {
    3
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;

        if config.aggregation_period == 0 || config.action_trigger_period == 0 {
            anyhow::bail!("aggregation_period and action_trigger_period must be positive");
        }
        if config.queue_worker_num == 0 {
            anyhow::bail!("queue_worker_num must be positive");
        }
        Ok(config)
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_parse_serialize_is_byte_identical() {
        let config = Config::default();
        let first = config.serialize();
        let parsed: Config = serde_json::from_str(&first).unwrap();
        let second = parsed.serialize();
        assert_eq!(first, second);
    }

    #[test]
    fn defaults_apply_for_missing_keys() {
        let config: Config = serde_json::from_str(r#"{"listen": "127.0.0.1:9000"}"#).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.aggregation_period, 30);
        assert_eq!(config.action_trigger_period, 5);
        assert_eq!(config.queue_worker_num, 3);
        assert!(!config.migrate);
    }
}
