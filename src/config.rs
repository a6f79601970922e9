//! Runtime configuration for the depth replica and its transports

use serde::Deserialize;
use std::env;

/// API credentials for signed endpoints
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.api_secret.is_empty()
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Trading symbol, uppercase (e.g. "SPYXUSDT")
    pub symbol: String,

    /// WebSocket endpoint for the venue's public streams
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots and the order surface
    pub rest_endpoint: String,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first.
    ///
    /// `symbol` falls back to the compiled default when neither the CLI nor
    /// the environment provides one.
    pub fn load(symbol_arg: Option<String>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let symbol = symbol_arg
            .or_else(|| env::var("SYMBOL").ok())
            .unwrap_or_else(|| "SPYXUSDT".to_string())
            .trim()
            .to_uppercase();

        Ok(Self {
            symbol,
            ws_endpoint: env::var("WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://wbs-api.mexc.com/ws".to_string()),
            rest_endpoint: env::var("REST_ENDPOINT")
                .unwrap_or_else(|_| "https://api.mexc.com/api/v3".to_string()),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        })
    }

    /// Credentials from `MEXC_API_KEY` / `MEXC_API_SECRET`.
    pub fn credentials() -> Credentials {
        Credentials {
            api_key: env::var("MEXC_API_KEY").unwrap_or_default(),
            api_secret: env::var("MEXC_API_SECRET").unwrap_or_default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "SPYXUSDT".to_string(),
            ws_endpoint: "wss://wbs-api.mexc.com/ws".to_string(),
            rest_endpoint: "https://api.mexc.com/api/v3".to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}
