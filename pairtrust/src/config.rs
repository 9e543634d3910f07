// Session configuration: address, RSA modulus size and channel deadlines.

use std::net::SocketAddr;
use std::time::Duration;

use pairstream::ChannelConfig;
use serde::{Deserialize, Serialize};

use crate::crypto::identity::{DEFAULT_RSA_BITS, MIN_RSA_BITS};
use crate::error::{PairTrustError, Result};

/// Address both peers agree on out of band.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:2800";

/// Settings for one session. Every field has a default, so `{}` is a valid
/// JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Where the Responder listens and the Initiator connects.
    pub address: SocketAddr,
    /// RSA modulus size for this side's keypair.
    pub rsa_bits: usize,
    /// Deadline for each connect, send and receive. `None` waits forever.
    pub io_timeout_ms: Option<u64>,
    /// Deadline for accepting the peer. `None` waits forever.
    pub accept_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 2800)),
            rsa_bits: DEFAULT_RSA_BITS,
            io_timeout_ms: None,
            accept_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `PAIRLINK_ADDR`, `PAIRLINK_RSA_BITS`,
    /// `PAIRLINK_IO_TIMEOUT_MS` and `PAIRLINK_ACCEPT_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(addr) = lookup("PAIRLINK_ADDR") {
            config.address = addr
                .parse()
                .map_err(|e| PairTrustError::Config(format!("PAIRLINK_ADDR={addr:?}: {e}")))?;
        }
        if let Some(bits) = lookup("PAIRLINK_RSA_BITS") {
            config.rsa_bits = parse_number("PAIRLINK_RSA_BITS", &bits)?;
        }
        if let Some(ms) = lookup("PAIRLINK_IO_TIMEOUT_MS") {
            config.io_timeout_ms = Some(parse_number("PAIRLINK_IO_TIMEOUT_MS", &ms)?);
        }
        if let Some(ms) = lookup("PAIRLINK_ACCEPT_TIMEOUT_MS") {
            config.accept_timeout_ms = Some(parse_number("PAIRLINK_ACCEPT_TIMEOUT_MS", &ms)?);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rsa_bits < MIN_RSA_BITS {
            return Err(PairTrustError::Config(format!(
                "rsa_bits {} is below the minimum of {MIN_RSA_BITS}",
                self.rsa_bits
            )));
        }
        if self.io_timeout_ms == Some(0) || self.accept_timeout_ms == Some(0) {
            return Err(PairTrustError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// The transport-level view of this configuration.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            io_timeout: self.io_timeout_ms.map(Duration::from_millis),
            accept_timeout: self.accept_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PairTrustError::Config(format!("{name}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_well_known_address() {
        let config = SessionConfig::default();
        assert_eq!(config.address.to_string(), DEFAULT_ADDRESS);
        assert_eq!(config.rsa_bits, 2048);
        assert!(config.channel_config().io_timeout.is_none());
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(SessionConfig::from_json("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn json_overrides() {
        let config = SessionConfig::from_json(
            r#"{"address":"0.0.0.0:9000","rsa_bits":3072,"io_timeout_ms":1500}"#,
        )
        .unwrap();
        assert_eq!(config.address.port(), 9000);
        assert_eq!(config.rsa_bits, 3072);
        assert_eq!(
            config.channel_config().io_timeout,
            Some(Duration::from_millis(1500))
        );
        assert!(config.channel_config().accept_timeout.is_none());
    }

    #[test]
    fn json_rejects_weak_rsa() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"rsa_bits":512}"#),
            Err(PairTrustError::Config(_))
        ));
    }

    #[test]
    fn json_syntax_error() {
        assert!(matches!(
            SessionConfig::from_json("{"),
            Err(PairTrustError::ConfigParse(_))
        ));
    }

    #[test]
    fn env_lookup_overrides() {
        let config = SessionConfig::from_lookup(|name| match name {
            "PAIRLINK_ADDR" => Some("127.0.0.1:4100".into()),
            "PAIRLINK_ACCEPT_TIMEOUT_MS" => Some(" 250 ".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.address.port(), 4100);
        assert_eq!(config.accept_timeout_ms, Some(250));
        assert_eq!(config.rsa_bits, DEFAULT_RSA_BITS);
    }

    #[test]
    fn env_lookup_bad_number() {
        let err = SessionConfig::from_lookup(|name| {
            (name == "PAIRLINK_RSA_BITS").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, PairTrustError::Config(_)));
    }
}
