//! Start URI parsing
//!
//! `start` takes a URI such as `srtla://relay.example.com:5000?streamid=x`
//! and needs only its host and port. IPv6 hosts must be bracketed.

use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;
use url::{Host, Url};

/// URI errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("URI has no scheme: {0}")]
    MissingScheme(String),

    #[error("URI has no host: {0}")]
    MissingHost(String),

    #[error("URI has no port: {0}")]
    MissingPort(String),

    #[error("Invalid port in URI: {0}")]
    InvalidPort(String),

    #[error("Malformed URI {uri}: {source}")]
    Malformed {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },
}

/// Relay endpoint named by a start URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub host: String,
    pub port: u16,
}

impl RelayTarget {
    /// Parse the host and port out of a URI
    pub fn parse(uri: &str) -> Result<Self, UriError> {
        let url = Url::parse(uri).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => UriError::MissingScheme(uri.to_string()),
            url::ParseError::EmptyHost => UriError::MissingHost(uri.to_string()),
            url::ParseError::InvalidPort => UriError::InvalidPort(uri.to_string()),
            source => UriError::Malformed {
                uri: uri.to_string(),
                source,
            },
        })?;

        // `host:port` alone parses as scheme `host` with an opaque path
        if url.cannot_be_a_base() {
            return Err(UriError::MissingScheme(uri.to_string()));
        }

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(UriError::MissingHost(uri.to_string())),
        };
        if host.is_empty() {
            return Err(UriError::MissingHost(uri.to_string()));
        }

        let port = url
            .port()
            .ok_or_else(|| UriError::MissingPort(uri.to_string()))?;
        if port == 0 {
            return Err(UriError::InvalidPort(uri.to_string()));
        }

        Ok(RelayTarget { host, port })
    }

    /// Resolve to the first socket address of the host
    pub fn resolve(&self) -> Result<SocketAddr, UriError> {
        let resolve_err = |reason: String| UriError::Resolve {
            host: self.host.clone(),
            reason,
        };

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| resolve_err(e.to_string()))?
            .next()
            .ok_or_else(|| resolve_err("no addresses".to_string()))
    }
}
