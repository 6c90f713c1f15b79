//! Client settings.
//!
//! Each section has a builder that starts from the section's defaults and
//! validates the result in `build`. [`ClientConfigBuilder`] composes them and
//! forwards the most common settings directly.
//!
//! ```
//! use std::time::Duration;
//! use ignite_client::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .add_address("10.0.0.1:10800".parse().unwrap())
//!     .request_timeout(Duration::from_secs(5))
//!     .retry(|r| r.max_retries(3))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.retry().max_retries(), 3);
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ignite_core::protocol::{ProtocolVersion, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use ignite_core::{ByteOrder, IgniteError};
use rand::Rng;
use thiserror::Error;

/// Raised by `build` when a setting is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ConfigError> for IgniteError {
    fn from(err: ConfigError) -> Self {
        IgniteError::Configuration(err.message)
    }
}

fn require(condition: bool, message: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::new(message()))
    }
}

/// Where and how to talk to cluster nodes.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connection_timeout: Duration,
    request_timeout: Duration,
    partition_awareness: bool,
    byte_order: ByteOrder,
    protocol_version: ProtocolVersion,
    max_frame_size: usize,
    tls: TlsConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))],
            connection_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            partition_awareness: true,
            byte_order: ByteOrder::LittleEndian,
            protocol_version: ProtocolVersion::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tls: TlsConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Seed node addresses. Defaults to `127.0.0.1:10800`.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Limit on TCP connect plus handshake. Defaults to 5 seconds.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// How long a caller waits for a response. Defaults to 30 seconds.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Whether key operations go to the primary node. On by default.
    pub fn partition_awareness(&self) -> bool {
        self.partition_awareness
    }

    /// Byte order of every frame. Little-endian by default.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Version proposed in the first handshake attempt.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Frames above this size are rejected.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Transport security settings.
    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require(
            !self.connection_timeout.is_zero() && !self.request_timeout.is_zero(),
            || "timeouts must be greater than zero".to_string(),
        )?;
        require(self.protocol_version.is_supported(), || {
            format!("unsupported protocol version {}", self.protocol_version)
        })?;
        require(self.max_frame_size > 0, || {
            "max_frame_size must be greater than zero".to_string()
        })
    }
}

/// Builder for [`NetworkConfig`].
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    config: NetworkConfig,
    addresses: Vec<SocketAddr>,
    tls: TlsConfigBuilder,
}

impl NetworkConfigBuilder {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a seed address. The default address is dropped once any
    /// address is given.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Replaces the seed addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// See [`NetworkConfig::connection_timeout`].
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// See [`NetworkConfig::request_timeout`].
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// See [`NetworkConfig::partition_awareness`].
    pub fn partition_awareness(mut self, enabled: bool) -> Self {
        self.config.partition_awareness = enabled;
        self
    }

    /// See [`NetworkConfig::byte_order`].
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.config.byte_order = order;
        self
    }

    /// See [`NetworkConfig::protocol_version`].
    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// See [`NetworkConfig::max_frame_size`].
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Adjusts TLS settings.
    pub fn tls<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TlsConfigBuilder) -> TlsConfigBuilder,
    {
        self.tls = f(self.tls);
        self
    }

    /// Turns TLS on, trusting the bundled web PKI roots.
    pub fn enable_tls(self) -> Self {
        self.tls(|t| t.enabled(true))
    }

    /// Validates and returns the settings.
    ///
    /// # Errors
    ///
    /// Fails on a zero timeout or frame limit, a protocol version this
    /// client does not speak, or invalid TLS settings.
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let Self {
            mut config,
            addresses,
            tls,
        } = self;
        if !addresses.is_empty() {
            config.addresses = addresses;
        }
        config.tls = tls.build()?;
        config.validate()?;
        Ok(config)
    }
}

/// Exponential backoff used when reconnecting to a lost node.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    max_retries: u32,
    jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: 10,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before the first attempt.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Cap on any single delay.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Growth factor between attempts.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Attempts per address before giving up. Zero disables reconnecting.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Random spread applied to each delay, as a fraction of it.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Delay that follows `current`, grown, jittered and capped.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let spread = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let next = current.as_secs_f64() * self.multiplier * (1.0 + spread);
        Duration::from_secs_f64(next.max(0.0)).min(self.max_backoff)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require(self.initial_backoff <= self.max_backoff, || {
            "initial_backoff must not exceed max_backoff".to_string()
        })?;
        require(self.multiplier >= 1.0, || {
            format!("multiplier {} is below 1.0", self.multiplier)
        })?;
        require((0.0..=1.0).contains(&self.jitter), || {
            format!("jitter {} is outside 0.0..=1.0", self.jitter)
        })
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder(RetryConfig);

impl RetryConfigBuilder {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`RetryConfig::initial_backoff`].
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.0.initial_backoff = backoff;
        self
    }

    /// See [`RetryConfig::max_backoff`].
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.0.max_backoff = backoff;
        self
    }

    /// See [`RetryConfig::multiplier`].
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.0.multiplier = multiplier;
        self
    }

    /// See [`RetryConfig::max_retries`].
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.0.max_retries = attempts;
        self
    }

    /// See [`RetryConfig::jitter`].
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.0.jitter = jitter;
        self
    }

    /// Validates and returns the settings.
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

/// Transport security.
///
/// With no CA bundle the server is checked against the bundled web PKI
/// roots. The certificate name defaults to the node's IP address.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    enabled: bool,
    ca_cert_path: Option<PathBuf>,
    client_identity: Option<(PathBuf, PathBuf)>,
    server_name: Option<String>,
}

impl TlsConfig {
    /// Whether connections are wrapped in TLS.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// PEM bundle of trusted certificate authorities.
    pub fn ca_cert_path(&self) -> Option<&Path> {
        self.ca_cert_path.as_deref()
    }

    /// PEM certificate chain and private key presented to the server.
    pub fn client_identity(&self) -> Option<(&Path, &Path)> {
        self.client_identity
            .as_ref()
            .map(|(cert, key)| (cert.as_path(), key.as_path()))
    }

    /// Name the server certificate must carry.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require(
            self.enabled || (self.ca_cert_path.is_none() && self.client_identity.is_none()),
            || "certificates are configured but TLS is disabled".to_string(),
        )?;
        require(self.server_name.as_deref() != Some(""), || {
            "server_name must not be empty".to_string()
        })
    }
}

/// Builder for [`TlsConfig`].
#[derive(Debug, Clone, Default)]
pub struct TlsConfigBuilder(TlsConfig);

impl TlsConfigBuilder {
    /// Starts with TLS off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns TLS on or off.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.0.enabled = enabled;
        self
    }

    /// Trusts only the authorities in this PEM file.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.0.ca_cert_path = Some(path.into());
        self
    }

    /// Presents a client certificate for mutual TLS.
    pub fn client_identity(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.0.client_identity = Some((cert_path.into(), key_path.into()));
        self
    }

    /// Overrides the name checked against the server certificate.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.0.server_name = Some(name.into());
        self
    }

    /// Validates and returns the settings.
    ///
    /// # Errors
    ///
    /// Fails when certificates are given while TLS is off, or when the
    /// server name is empty.
    pub fn build(self) -> Result<TlsConfig, ConfigError> {
        self.0.validate()?;
        Ok(self.0)
    }
}

/// Handshake credentials.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    credentials: Option<(String, String)>,
}

impl SecurityConfig {
    /// Username and password, when authentication is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(user, password)| (user.as_str(), password.as_str()))
    }

    /// Returns true if the handshake carries credentials.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Builder for [`SecurityConfig`].
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder(SecurityConfig);

impl SecurityConfigBuilder {
    /// Starts without credentials.
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticates as `username`.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.0.credentials = Some((username.into(), password.into()));
        self
    }

    /// Validates and returns the settings.
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if let Some((user, _)) = &self.0.credentials {
            require(!user.is_empty(), || "username must not be empty".to_string())?;
        }
        Ok(self.0)
    }
}

/// Complete client settings.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    network: NetworkConfig,
    retry: RetryConfig,
    security: SecurityConfig,
}

impl ClientConfig {
    /// Starts a builder from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Addresses, timeouts, routing and TLS.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Reconnect backoff.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Credentials.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    network: NetworkConfigBuilder,
    retry: RetryConfigBuilder,
    security: SecurityConfigBuilder,
}

impl ClientConfigBuilder {
    /// Starts from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts network settings.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Adjusts reconnect backoff.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Adjusts credentials.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// See [`NetworkConfigBuilder::add_address`].
    pub fn add_address(self, address: SocketAddr) -> Self {
        self.network(|n| n.add_address(address))
    }

    /// See [`NetworkConfigBuilder::addresses`].
    pub fn addresses(self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network(|n| n.addresses(addresses))
    }

    /// See [`NetworkConfig::connection_timeout`].
    pub fn connection_timeout(self, timeout: Duration) -> Self {
        self.network(|n| n.connection_timeout(timeout))
    }

    /// See [`NetworkConfig::request_timeout`].
    pub fn request_timeout(self, timeout: Duration) -> Self {
        self.network(|n| n.request_timeout(timeout))
    }

    /// See [`NetworkConfig::partition_awareness`].
    pub fn partition_awareness(self, enabled: bool) -> Self {
        self.network(|n| n.partition_awareness(enabled))
    }

    /// See [`SecurityConfigBuilder::credentials`].
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security(|s| s.credentials(username, password))
    }

    /// Validates every section.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            network: self.network.build()?,
            retry: self.retry.build()?,
            security: self.security.build()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_point_at_local_node() {
        let config = ClientConfig::builder().build().unwrap();
        let network = config.network();
        let local: SocketAddr = "127.0.0.1:10800".parse().unwrap();
        assert_eq!(network.addresses(), [local]);
        assert!(network.partition_awareness());
        assert_eq!(network.byte_order(), ByteOrder::LittleEndian);
        assert_eq!(network.protocol_version(), ProtocolVersion::V1_7_0);
        assert!(!network.tls().enabled());
        assert!(!config.security().has_credentials());
    }

    #[test]
    fn test_given_addresses_replace_default() {
        let a: SocketAddr = "10.0.0.1:10800".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:10801".parse().unwrap();

        let config = ClientConfig::builder().add_address(a).add_address(b).build().unwrap();
        assert_eq!(config.network().addresses(), [a, b]);

        let config = ClientConfig::builder().add_address(a).addresses([b]).build().unwrap();
        assert_eq!(config.network().addresses(), [b]);
    }

    #[test]
    fn test_network_validation() {
        let zero_timeout = ClientConfig::builder().request_timeout(Duration::ZERO).build();
        assert!(zero_timeout.is_err());

        let old_version = ClientConfig::builder()
            .network(|n| n.protocol_version(ProtocolVersion::new(1, 2, 0)))
            .build();
        assert!(old_version.unwrap_err().to_string().contains("1.2.0"));

        let config = ClientConfig::builder()
            .network(|n| {
                n.protocol_version(ProtocolVersion::V1_4_0)
                    .byte_order(ByteOrder::BigEndian)
                    .partition_awareness(false)
            })
            .build()
            .unwrap();
        assert_eq!(config.network().protocol_version(), ProtocolVersion::V1_4_0);
        assert_eq!(config.network().byte_order(), ByteOrder::BigEndian);
    }

    #[test]
    fn test_retry_validation() {
        let inverted = RetryConfigBuilder::new()
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(inverted.unwrap_err().to_string().contains("initial_backoff"));
        assert!(RetryConfigBuilder::new().multiplier(0.5).build().is_err());
        assert!(RetryConfigBuilder::new().jitter(1.5).build().is_err());
    }

    #[test]
    fn test_next_backoff_grows_to_cap() {
        let retry = RetryConfigBuilder::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(350))
            .multiplier(2.0)
            .jitter(0.0)
            .build()
            .unwrap();
        let second = retry.next_backoff(retry.initial_backoff());
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(retry.next_backoff(second), Duration::from_millis(350));
    }

    #[test]
    fn test_jittered_backoff_stays_in_band() {
        let retry = RetryConfigBuilder::new().jitter(0.5).build().unwrap();
        for _ in 0..100 {
            let next = retry.next_backoff(Duration::from_millis(100));
            assert!(next >= Duration::from_millis(100) && next <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_tls_settings() {
        let tls = TlsConfigBuilder::new()
            .enabled(true)
            .ca_cert_path("/certs/ca.pem")
            .client_identity("/certs/client.pem", "/certs/client.key")
            .server_name("ignite.local")
            .build()
            .unwrap();
        assert_eq!(tls.ca_cert_path(), Some(Path::new("/certs/ca.pem")));
        assert_eq!(
            tls.client_identity(),
            Some((Path::new("/certs/client.pem"), Path::new("/certs/client.key")))
        );

        let disabled = TlsConfigBuilder::new().ca_cert_path("/certs/ca.pem").build();
        assert!(disabled.is_err());

        let network = NetworkConfigBuilder::new().enable_tls().build().unwrap();
        assert!(network.tls().enabled());
    }

    #[test]
    fn test_credentials() {
        let config = ClientConfig::builder().credentials("ignite", "secret").build().unwrap();
        assert_eq!(config.security().credentials(), Some(("ignite", "secret")));
        assert!(SecurityConfigBuilder::new().credentials("", "x").build().is_err());
    }

    #[test]
    fn test_config_error_maps_to_configuration() {
        let err: IgniteError = ConfigError::new("bad").into();
        assert!(matches!(err, IgniteError::Configuration(ref m) if m == "bad"));
    }
}
