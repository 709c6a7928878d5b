use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A single `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint '{0}': expected <host>:<port>")]
pub struct ParseEndpointError(String);

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let input = input.trim();
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError(input.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ParseEndpointError(input.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseEndpointError(input.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Identity of a remote peer plus an optional failover endpoint.
///
/// Equality and hashing only consider the primary `(host, port)`: attaching a
/// backup address does not change which connection an address refers to.
#[derive(Debug, Clone)]
pub struct RemoteAddress {
    primary: Endpoint,
    backup: Option<Endpoint>,
}

impl RemoteAddress {
    /// Create an address with no backup.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            primary: Endpoint::new(host, port),
            backup: None,
        }
    }

    /// Attach a failover endpoint.
    pub fn with_backup(mut self, host: impl Into<String>, port: u16) -> Self {
        self.backup = Some(Endpoint::new(host, port));
        self
    }

    /// Attach an already-built failover endpoint.
    pub fn with_backup_endpoint(mut self, backup: Endpoint) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn host(&self) -> &str {
        &self.primary.host
    }

    pub fn port(&self) -> u16 {
        self.primary.port
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }

    pub fn backup(&self) -> Option<&Endpoint> {
        self.backup.as_ref()
    }

    /// Endpoint to try on the given zero-based reconnect attempt.
    ///
    /// Even attempts target the primary; odd attempts target the backup when
    /// one is configured.
    pub fn endpoint_for_attempt(&self, attempt: u32) -> &Endpoint {
        match &self.backup {
            Some(backup) if attempt % 2 == 1 => backup,
            _ => &self.primary,
        }
    }
}

impl From<Endpoint> for RemoteAddress {
    fn from(primary: Endpoint) -> Self {
        Self {
            primary,
            backup: None,
        }
    }
}

impl PartialEq for RemoteAddress {
    fn eq(&self, other: &Self) -> bool {
        self.primary == other.primary
    }
}

impl Eq for RemoteAddress {}

impl Hash for RemoteAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.primary.hash(state);
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backup {
            Some(backup) => write!(f, "{} (backup {})", self.primary, backup),
            None => write!(f, "{}", self.primary),
        }
    }
}
