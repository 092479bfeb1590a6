use std::path::PathBuf;

/// Configuration for the broker's network entry points.
///
/// Controls where the server listens (TCP host/port, optional unix socket
/// path) and the broker-level limits the server carries for its protocol
/// collaborators. Use [`ServerConfig::builder()`] for construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to resolve for the TCP endpoint.
    pub host: String,
    /// Port for the TCP endpoint.
    pub port: u16,
    /// Whether a TCP endpoint is created at all.
    pub inet: bool,
    /// Path for the unix-domain endpoint; `None` disables it.
    pub socket_path: Option<PathBuf>,
    /// Largest job body the protocol layer will accept, in bytes.
    pub max_job_size: usize,
}

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 11300;
pub const DEFAULT_MAX_JOB_SIZE: usize = 65_535;

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            inet: true,
            socket_path: None,
            max_job_size: DEFAULT_MAX_JOB_SIZE,
        }
    }
}

/// Builder for [`ServerConfig`].
///
/// All fields are optional and fall back to the defaults from
/// `ServerConfig::default()` if not explicitly set.
#[derive(Default)]
pub struct ServerConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    inet: Option<bool>,
    socket_path: Option<PathBuf>,
    max_job_size: Option<usize>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Disable or enable the TCP endpoint (enabled by default).
    pub fn inet(mut self, inet: bool) -> Self {
        self.inet = Some(inet);
        self
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn max_job_size(mut self, bytes: usize) -> Self {
        self.max_job_size = Some(bytes);
        self
    }

    pub fn build(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            inet: self.inet.unwrap_or(defaults.inet),
            socket_path: self.socket_path,
            max_job_size: self.max_job_size.unwrap_or(defaults.max_job_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = ServerConfig::builder().build();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.inet);
        assert!(config.socket_path.is_none());
        assert_eq!(config.max_job_size, DEFAULT_MAX_JOB_SIZE);
    }

    #[test]
    fn builder_overrides() {
        let config = ServerConfig::builder()
            .host("127.0.0.1")
            .port(11400)
            .inet(false)
            .socket_path("/run/broker.sock")
            .max_job_size(1 << 20)
            .build();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 11400);
        assert!(!config.inet);
        assert_eq!(
            config.socket_path.as_deref(),
            Some(std::path::Path::new("/run/broker.sock"))
        );
        assert_eq!(config.max_job_size, 1 << 20);
    }
}
