//! Listening address parsing.
//!
//! Addresses look like `tcp://127.0.0.1:9000`, `tcp4://:9000`,
//! `tcp6://[::1]:9000` or plain `localhost:9000`. An empty host listens on
//! every interface.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Result, ServeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Any,
    V4,
    V6,
}

/// Parse a scheme-qualified listening address into a socket address.
pub fn parse_address(addr: &str) -> Result<SocketAddr> {
    let (scheme, rest) = match addr.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("tcp".to_string(), addr),
    };

    let family = match scheme.as_str() {
        "tcp" => Family::Any,
        "tcp4" => Family::V4,
        "tcp6" => Family::V6,
        _ => return Err(ServeError::UnsupportedScheme(addr.to_string())),
    };

    // Drop any trailing `?option=...` section.
    let rest = rest.split('?').next().unwrap_or_default();

    let target = if rest.starts_with(':') {
        match family {
            Family::V6 => format!("[::]{rest}"),
            _ => format!("0.0.0.0{rest}"),
        }
    } else {
        rest.to_string()
    };

    let candidates = target
        .to_socket_addrs()
        .map_err(|_| ServeError::InvalidAddress(addr.to_string()))?;

    candidates
        .into_iter()
        .find(|sa| match family {
            Family::Any => true,
            Family::V4 => sa.is_ipv4(),
            Family::V6 => sa.is_ipv6(),
        })
        .ok_or_else(|| ServeError::InvalidAddress(addr.to_string()))
}
