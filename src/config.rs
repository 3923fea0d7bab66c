//! Node configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Connection settings for a single node.
///
/// Build one with [`NodeConfig::builder`] or pull it from the environment
/// with [`NodeConfig::from_env`]:
///
/// ```no_run
/// use tephra::config::NodeConfig;
///
/// let config = NodeConfig::builder(123456789012345678)
///     .host("lavalink.internal")
///     .port(2333)
///     .password("youshallnotpass")
///     .region("us-east")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hostname or IP of the node.
    pub host: String,
    /// Port the node listens on.
    pub port: u16,
    /// Password sent in the `Authorization` header, if the node needs one.
    pub password: Option<String>,
    /// Use `wss`/`https` instead of plain `ws`/`http`.
    pub secure: bool,
    /// Ask the node to keep the session alive across short disconnects.
    pub resume: bool,
    /// Interval between WebSocket pings.
    pub heartbeat: Duration,
    /// Voice region this node serves, used for pool routing.
    pub region: Option<String>,
    /// Explicit node identifier; autogenerated when absent.
    pub identifier: Option<String>,
    /// Bot user id, sent in the `User-Id` handshake header.
    pub user_id: u64,
}

impl NodeConfig {
    pub fn builder(user_id: u64) -> NodeConfigBuilder {
        NodeConfigBuilder::new(user_id)
    }

    /// Loads settings from environment variables, reading a `.env` file
    /// first when one exists.
    ///
    /// | Variable            | Default     |
    /// |---------------------|-------------|
    /// | `DISCORD_USER_ID`   | required    |
    /// | `LAVALINK_HOST`     | `127.0.0.1` |
    /// | `LAVALINK_PORT`     | `2333`      |
    /// | `LAVALINK_PASSWORD` | none        |
    /// | `LAVALINK_SECURE`   | `false`     |
    /// | `LAVALINK_REGION`   | none        |
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let user_id = std::env::var("DISCORD_USER_ID")
            .map_err(|_| Error::Config("DISCORD_USER_ID is not set".into()))?
            .parse::<u64>()
            .map_err(|_| Error::Config("DISCORD_USER_ID must be a number".into()))?;

        let host =
            std::env::var("LAVALINK_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("LAVALINK_PORT")
            .unwrap_or_else(|_| "2333".to_string())
            .parse::<u16>()
            .map_err(|_| Error::Config("LAVALINK_PORT must be a port number".into()))?;
        let password = std::env::var("LAVALINK_PASSWORD").ok();
        let secure = std::env::var("LAVALINK_SECURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let region = std::env::var("LAVALINK_REGION").ok();

        let config = Self {
            host,
            port,
            password,
            secure,
            resume: true,
            heartbeat: Duration::from_secs(30),
            region,
            identifier: None,
            user_id,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port cannot be 0".into()));
        }
        if self.heartbeat.is_zero() {
            return Err(Error::Config("heartbeat interval cannot be zero".into()));
        }
        if self.user_id == 0 {
            return Err(Error::Config("user_id cannot be 0".into()));
        }
        Ok(())
    }

    /// WebSocket endpoint of the node.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// REST endpoint of the node.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug, Clone)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(user_id: u64) -> Self {
        Self {
            config: NodeConfig {
                host: "127.0.0.1".to_string(),
                port: 2333,
                password: None,
                secure: false,
                resume: true,
                heartbeat: Duration::from_secs(30),
                region: None,
                identifier: None,
                user_id,
            },
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.config.secure = secure;
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.config.resume = resume;
        self
    }

    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.config.identifier = Some(identifier.into());
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }

    /// Builds and validates in one step.
    pub fn try_build(self) -> Result<NodeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_defaults() {
        let config = NodeConfig::builder(42).build();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 2333);
        assert_eq!(config.password, None);
        assert!(!config.secure);
        assert!(config.resume);
        assert_eq!(config.heartbeat, Duration::from_secs(30));
        assert_eq!(config.user_id, 42);
    }

    #[test]
    fn test_url_schemes() {
        let plain = NodeConfig::builder(1).host("node.local").port(8080).build();
        assert_eq!(plain.ws_url(), "ws://node.local:8080");
        assert_eq!(plain.http_url(), "http://node.local:8080");

        let secure = NodeConfig::builder(1)
            .host("node.local")
            .port(443)
            .secure(true)
            .build();
        assert_eq!(secure.ws_url(), "wss://node.local:443");
        assert_eq!(secure.http_url(), "https://node.local:443");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(NodeConfig::builder(1).host("").try_build().is_err());
        assert!(NodeConfig::builder(1).port(0).try_build().is_err());
        assert!(NodeConfig::builder(0).try_build().is_err());
        assert!(NodeConfig::builder(1)
            .heartbeat(Duration::ZERO)
            .try_build()
            .is_err());
        assert!(NodeConfig::builder(1).try_build().is_ok());
    }
}
