use proctor_utils::status::SweepPolicy;
use sentry::types::Dsn;
use std::{env::var, fmt, sync::Arc, time::Duration};
use tracing::{error, warn};

use crate::manager::SessionManager;

pub struct AppState<S> {
    pub manager: Arc<SessionManager<S>>,
    pub env_vars: EnvVars,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            env_vars: self.env_vars.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnvVars {
    pub environment: Environment,
    pub mongodb_uri: Option<String>,
    pub port: u16,
    pub request_body_size_limit: usize,
    pub request_timeout_in_ms: u64,
    pub sentry_dsn: Option<String>,
    /// Longest a long-poll for a signal may wait
    pub signal_wait_max: Duration,
    pub sweep: SweepPolicy,
    pub sweep_interval: Duration,
    /// Run the cleanup sweep before every list query
    pub sweep_on_read: bool,
    /// Ping period on push subscriptions
    pub ws_heartbeat_interval: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                warn!(
                    "ENVIRONMENT value '{}' is not valid. Defaulting to 'production'.",
                    other
                );
                Environment::Production
            }
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(s)
    }
}

impl Default for EnvVars {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            mongodb_uri: None,
            port: 3000,
            request_body_size_limit: 1024 * 1024,
            request_timeout_in_ms: 30_000,
            sentry_dsn: None,
            signal_wait_max: Duration::from_millis(25_000),
            sweep: SweepPolicy::default(),
            sweep_interval: Duration::from_secs(60),
            sweep_on_read: true,
            ws_heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl EnvVars {
    pub fn new() -> Self {
        let defaults = Self::default();

        let mongodb_uri = match var("MONGODB_URI") {
            Ok(uri) => {
                assert!(!uri.is_empty(), "MONGODB_URI must not be empty");
                Some(uri)
            }
            Err(_e) => {
                if cfg!(not(debug_assertions)) {
                    error!("MONGODB_URI not set");
                    panic!("MONGODB_URI required outside of a debug build");
                }
                warn!("MONGODB_URI not set. Using in-memory session store.");
                None
            }
        };

        let sentry_dsn = match var("SENTRY_DSN") {
            Ok(dsn_string) => {
                assert!(
                    valid_sentry_dsn(&dsn_string),
                    "SENTRY_DSN is not valid DSN."
                );
                Some(dsn_string)
            }
            Err(_e) => {
                if cfg!(not(debug_assertions)) {
                    panic!("SENTRY_DSN is not allowed to be unset outside of a debug build");
                }
                warn!("SENTRY_DSN not set.");
                None
            }
        };

        let environment = match var("ENVIRONMENT") {
            Ok(v) => v.into(),
            Err(_e) => {
                warn!("ENVIRONMENT not set. Defaulting to 'production'.");
                Environment::Production
            }
        };

        let port = match var("PORT") {
            Ok(port_string) => port_string.parse().expect("PORT to be parseable as u16"),
            Err(_e) => {
                warn!("PORT not set. Defaulting to {}", defaults.port);
                defaults.port
            }
        };

        let request_timeout_in_ms = match var("REQUEST_TIMEOUT_IN_MS") {
            Ok(s) => s
                .parse()
                .expect("REQUEST_TIMEOUT_IN_MS to be valid unsigned integer"),
            Err(_e) => {
                warn!(
                    "REQUEST_TIMEOUT_IN_MS not set. Defaulting to {}",
                    defaults.request_timeout_in_ms
                );
                defaults.request_timeout_in_ms
            }
        };

        let request_body_size_limit = match var("REQUEST_BODY_SIZE_LIMIT") {
            Ok(s) => s
                .parse()
                .expect("REQUEST_BODY_SIZE_LIMIT to be valid unsigned integer"),
            Err(_e) => {
                warn!(
                    "REQUEST_BODY_SIZE_LIMIT not set. Defaulting to {}",
                    defaults.request_body_size_limit
                );
                defaults.request_body_size_limit
            }
        };

        let stale_after = match var("SESSION_STALE_AFTER_IN_S") {
            Ok(v) => {
                let seconds = match v.parse() {
                    Ok(s) => s,
                    Err(e) => {
                        panic!(
                            "SESSION_STALE_AFTER_IN_S is not a valid whole number of seconds: {:?}",
                            e
                        );
                    }
                };
                Duration::from_secs(seconds)
            }
            Err(_e) => defaults.sweep.stale_after,
        };

        let sweep_interval = match var("SWEEP_INTERVAL_IN_S") {
            Ok(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                Ok(_) => {
                    warn!("SWEEP_INTERVAL_IN_S provided but not > 0; using default");
                    defaults.sweep_interval
                }
                Err(e) => {
                    warn!("Failed to parse SWEEP_INTERVAL_IN_S ('{v}'): {e}; using default");
                    defaults.sweep_interval
                }
            },
            Err(_) => defaults.sweep_interval,
        };

        let sweep_on_read = match var("SWEEP_ON_READ") {
            Ok(v) => match v.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    warn!("SWEEP_ON_READ value '{other}' is not valid. Defaulting to 'true'.");
                    true
                }
            },
            Err(_) => defaults.sweep_on_read,
        };

        let signal_wait_max = match var("SIGNAL_WAIT_MAX_MS") {
            Ok(s) => Duration::from_millis(
                s.parse()
                    .expect("SIGNAL_WAIT_MAX_MS to be valid unsigned integer"),
            ),
            Err(_) => defaults.signal_wait_max,
        };

        let ws_heartbeat_interval = match var("WS_HEARTBEAT_INTERVAL_IN_S") {
            Ok(s) => Duration::from_secs(
                s.parse()
                    .expect("WS_HEARTBEAT_INTERVAL_IN_S to be valid unsigned integer"),
            ),
            Err(_) => defaults.ws_heartbeat_interval,
        };
        assert!(
            !ws_heartbeat_interval.is_zero(),
            "WS_HEARTBEAT_INTERVAL_IN_S must be at least 1"
        );

        Self {
            environment,
            mongodb_uri,
            port,
            request_body_size_limit,
            request_timeout_in_ms,
            sentry_dsn,
            signal_wait_max,
            sweep: SweepPolicy { stale_after },
            sweep_interval,
            sweep_on_read,
            ws_heartbeat_interval,
        }
    }
}

fn valid_sentry_dsn(url: &str) -> bool {
    url.parse::<Dsn>().is_ok()
}
