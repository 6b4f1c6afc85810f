use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::config::DEFAULT_PORT;
use crate::error::{CoapError, CoapResult};


const SCHEME: &str = "coap://";

/// A `coap://host:port/path?query` URI, with the host given as an IP address literal
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CoapUri {
    pub destination: SocketAddr,
    pub path: String,
    pub query: String,
}

impl CoapUri {
    pub fn parse(uri: &str) -> CoapResult<CoapUri> {
        let invalid = || CoapError::InvalidUri(uri.to_string());

        let rest = uri.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let destination = Self::parse_authority(authority).ok_or_else(invalid)?;
        Ok(CoapUri {
            destination,
            path: path.to_string(),
            query: query.to_string(),
        })
    }

    fn parse_authority(authority: &str) -> Option<SocketAddr> {
        if let Ok(addr) = SocketAddr::from_str(authority) {
            return Some(addr);
        }
        let host = authority.strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(authority);
        IpAddr::from_str(host).ok()
            .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
    }

    /// the URI of a resource as seen from the engine: normalized address, path, no query
    pub fn resource_uri(source: SocketAddr, path: &str) -> String {
        format!("{}{}{}", SCHEME, source, path)
    }
}

impl Display for CoapUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", SCHEME, self.destination, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}
