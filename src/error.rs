//! Error types for the trading engine

use std::fmt;
use thiserror::Error;

/// Classification of exchange-side failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// Invalid or unauthorized API key/secret
    Auth,
    /// Account cannot cover the order
    InsufficientFunds,
    /// Request weight or order rate exceeded
    RateLimit,
    /// Transport failure (timeout, connection reset, DNS)
    Network,
    /// Any other rejection by the exchange
    Rejected,
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeErrorKind::Auth => write!(f, "AUTH"),
            ExchangeErrorKind::InsufficientFunds => write!(f, "INSUFFICIENT_FUNDS"),
            ExchangeErrorKind::RateLimit => write!(f, "RATE_LIMIT"),
            ExchangeErrorKind::Network => write!(f, "NETWORK"),
            ExchangeErrorKind::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BotError {
    #[error("{0} not configured")]
    NotConfigured(String),

    #[error("Exchange error [{kind}]: {message}")]
    Exchange {
        kind: ExchangeErrorKind,
        message: String,
    },

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Trader stopped")]
    TraderStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    pub fn exchange(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        BotError::Exchange {
            kind,
            message: message.into(),
        }
    }

    /// Exchange classification, if this error came from the exchange boundary.
    ///
    /// Transport errors from the HTTP client count as [`ExchangeErrorKind::Network`].
    pub fn exchange_kind(&self) -> Option<ExchangeErrorKind> {
        match self {
            BotError::Exchange { kind, .. } => Some(*kind),
            BotError::Http(_) => Some(ExchangeErrorKind::Network),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
