//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use songquiz_session::application::command_handlers::EngineSettings;
use songquiz_session::domain::session::RoundRules;

use crate::error::AppError;

/// Runtime configuration for the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Address to listen on.
    pub addr: SocketAddr,
    /// Engine settings derived from the environment.
    pub engine: EngineSettings,
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `var`, which returns the value of an
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// does not parse.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = var("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse(&var, "PORT")?.unwrap_or(3000);
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;

        let mut engine = EngineSettings::default();
        if let Some(ms) = parse::<u64>(&var, "SETTLE_DELAY_MS")? {
            engine.settle_delay = Duration::from_millis(ms);
        }
        engine.rules = RoundRules {
            max_consecutive_faults: parse(&var, "MAX_CONSECUTIVE_FAULTS")?,
            ..RoundRules::default()
        };

        Ok(Self {
            database_url,
            addr,
            engine,
        })
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| AppError::Config(format!("{key} is invalid: {e}")))
        })
        .transpose()
}
