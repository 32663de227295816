use serde::Deserialize;

use crate::commission::GenericCommissionBase;

/// Deployment posture. Production refuses to run without a webhook secret.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// Processor API credential.
    pub stripe_secret_key: Option<String>,
    /// Webhook signing secret. Absent means unsigned deliveries are accepted.
    pub stripe_webhook_secret: Option<String>,
    pub app_env: AppEnv,
    pub generic_commission_base: GenericCommissionBase,
    pub webhook_tolerance_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .set_default("server_port", 8000)?
            .set_default("database_max_connections", 8)?
            .set_default("app_env", "development")?
            .set_default("generic_commission_base", "full_amount")?
            .set_default("webhook_tolerance_secs", 300)?
            .add_source(config::Environment::default())
            .build()?;
        let mut config: Config = config.try_deserialize()?;
        config.stripe_secret_key = config.stripe_secret_key.filter(|s| !s.trim().is_empty());
        config.stripe_webhook_secret = config.stripe_webhook_secret.filter(|s| !s.trim().is_empty());
        Ok(config)
    }

    /// Rejects configurations that are unsafe for the deployment posture.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.app_env == AppEnv::Production && self.stripe_webhook_secret.is_none() {
            return Err(config::ConfigError::Message(
                "STRIPE_WEBHOOK_SECRET must be set when APP_ENV=production".into(),
            ));
        }
        Ok(())
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.stripe_webhook_secret.as_deref()
    }

    /// A development configuration pointing at `database_url`.
    pub fn local(database_url: impl Into<String>) -> Self {
        Self {
            server_port: 8000,
            database_url: database_url.into(),
            database_max_connections: 8,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            app_env: AppEnv::Development,
            generic_commission_base: GenericCommissionBase::FullAmount,
            webhook_tolerance_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_requires_webhook_secret() {
        let mut config = Config::local("postgres://localhost/ledger");
        config.app_env = AppEnv::Production;
        assert!(config.validate().is_err());

        config.stripe_webhook_secret = Some("whsec_live".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn development_allows_unsigned_deliveries() {
        let config = Config::local("postgres://localhost/ledger");
        assert!(config.validate().is_ok());
        assert!(config.webhook_secret().is_none());
    }
}
