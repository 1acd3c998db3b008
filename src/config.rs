use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::writer::WriterConfig;

/// Optional config file read from the working directory
pub const CONFIG_FILE: &str = "trust-ledger";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Currency the financial analytics are reported in
    pub currency: String,
    pub writer: WriterConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://trust-ledger.db".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            currency: "USD".to_string(),
            writer: WriterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then `trust-ledger.toml` if present, then `TRUST_LEDGER_*`
    /// environment variables (`TRUST_LEDGER_WRITER__MAX_RETRIES=8`).
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from(
            Environment::with_prefix("TRUST_LEDGER")
                .prefix_separator("_")
                .separator("__"),
        )
    }

    fn load_from(env: Environment) -> Result<Self, LedgerError> {
        let defaults = AppConfig::default();
        let config = Config::builder()
            .set_default("database_url", defaults.database_url)
            .and_then(|b| b.set_default("server_host", defaults.server_host))
            .and_then(|b| b.set_default("server_port", defaults.server_port as i64))
            .and_then(|b| b.set_default("currency", defaults.currency))
            .and_then(|b| b.set_default("writer.max_retries", defaults.writer.max_retries as i64))
            .and_then(|b| b.set_default("writer.backoff_base_ms", defaults.writer.backoff_base_ms as i64))
            .and_then(|b| b.set_default("writer.backoff_max_ms", defaults.writer.backoff_max_ms as i64))
            .and_then(|b| {
                b.set_default("writer.append_timeout_ms", defaults.writer.append_timeout_ms as i64)
            })
            .map_err(|e| LedgerError::Config(e.to_string()))?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env.try_parsing(true))
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let app: AppConfig = config
            .try_deserialize()
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(LedgerError::Config(format!(
                "currency must be a three-letter code, got {:?}",
                self.currency
            )));
        }
        if self.writer.append_timeout_ms == 0 {
            return Err(LedgerError::Config("writer.append_timeout_ms must be positive".to_string()));
        }
        if self.writer.backoff_max_ms < self.writer.backoff_base_ms {
            return Err(LedgerError::Config(
                "writer.backoff_max_ms must not be below writer.backoff_base_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
