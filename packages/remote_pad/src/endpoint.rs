//! Endpoint Config Resolver: host string → per-channel WebSocket endpoints.
//!
//! The host must be a dotted-quad IPv4 address. Each octet is one to three
//! decimal digits in 0–255, so `010.0.0.1` is accepted and normalized to
//! `10.0.0.1` in the produced URLs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

use crate::channel::Channel;
use crate::config::EndpointConfig;
use crate::error::EndpointError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

/// Resolved socket address for one channel. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    channel: Channel,
    scheme: Scheme,
    host: Ipv4Addr,
    port: u16,
    path: String,
}

impl Endpoint {
    pub fn new(channel: Channel, scheme: Scheme, host: Ipv4Addr, port: u16, path: &str) -> Self {
        Self {
            channel,
            scheme,
            host,
            port,
            path: path.to_string(),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

/// One endpoint per channel, all derived from the same host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    host: Ipv4Addr,
    motion: Endpoint,
    touch: Endpoint,
}

impl EndpointSet {
    pub fn host(&self) -> Ipv4Addr {
        self.host
    }

    pub fn get(&self, channel: Channel) -> &Endpoint {
        match channel {
            Channel::Motion => &self.motion,
            Channel::Touch => &self.touch,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        [&self.motion, &self.touch].into_iter()
    }
}

/// Validate a dotted-quad IPv4 host string.
pub fn parse_host(input: &str) -> Result<Ipv4Addr, EndpointError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::Empty);
    }

    let invalid = |reason| EndpointError::InvalidHost {
        input: trimmed.to_string(),
        reason,
    };

    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in trimmed.split('.') {
        if count == 4 {
            return Err(invalid("expected four octets"));
        }
        if part.is_empty() || part.len() > 3 {
            return Err(invalid("octet must be one to three digits"));
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("octet is not a decimal number"));
        }
        let value: u16 = part
            .parse()
            .map_err(|_| invalid("octet is not a decimal number"))?;
        octets[count] = u8::try_from(value).map_err(|_| invalid("octet exceeds 255"))?;
        count += 1;
    }
    if count != 4 {
        return Err(invalid("expected four octets"));
    }

    Ok(Ipv4Addr::from(octets))
}

/// Resolve a user-supplied host into the motion and touch endpoints.
pub fn resolve(input: &str, config: &EndpointConfig) -> Result<EndpointSet, EndpointError> {
    let host = parse_host(input)?;
    let touch_port = config
        .base_port
        .checked_add(config.touch_port_offset)
        .ok_or(EndpointError::PortOverflow {
            base: config.base_port,
            offset: config.touch_port_offset,
        })?;

    Ok(EndpointSet {
        host,
        motion: Endpoint::new(
            Channel::Motion,
            config.scheme,
            host,
            config.base_port,
            &config.motion_path,
        ),
        touch: Endpoint::new(
            Channel::Touch,
            config.scheme,
            host,
            touch_port,
            &config.touch_path,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lan_address() {
        let set = resolve("192.168.1.42", &EndpointConfig::default()).unwrap();
        assert_eq!(set.host(), Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(
            set.get(Channel::Motion).url(),
            "ws://192.168.1.42:8080/motion"
        );
        assert_eq!(set.get(Channel::Touch).url(), "ws://192.168.1.42:8082/touch");
    }

    #[test]
    fn rejects_malformed_hosts() {
        for bad in [
            "300.1.1.1",
            "1.2.3",
            "abc.def.gh.i",
            "1.2.3.4.5",
            "1..2.3",
            "1.2.3.4.",
            "+1.2.3.4",
            "1.2.3.0004",
            "ws://1.2.3.4",
            "1.2.3.4:8080",
        ] {
            let err = parse_host(bad).unwrap_err();
            assert!(
                matches!(err, EndpointError::InvalidHost { .. }),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn empty_host_is_its_own_error() {
        assert_eq!(parse_host("   "), Err(EndpointError::Empty));
    }

    #[test]
    fn boundaries_and_leading_zeros() {
        assert_eq!(
            parse_host("0.0.0.0").unwrap(),
            Ipv4Addr::new(0, 0, 0, 0)
        );
        assert_eq!(
            parse_host("255.255.255.255").unwrap(),
            Ipv4Addr::BROADCAST
        );
        assert_eq!(
            parse_host("010.001.00.7").unwrap(),
            Ipv4Addr::new(10, 1, 0, 7)
        );
        assert!(parse_host("256.0.0.1").is_err());
    }

    #[test]
    fn scanned_payload_whitespace_is_trimmed() {
        let set = resolve(" 10.0.0.5\n", &EndpointConfig::default()).unwrap();
        assert_eq!(set.get(Channel::Motion).url(), "ws://10.0.0.5:8080/motion");
    }

    #[test]
    fn custom_config_changes_ports_paths_and_scheme() {
        let config = EndpointConfig {
            scheme: Scheme::Wss,
            base_port: 9000,
            touch_port_offset: 5,
            motion_path: "/m".into(),
            touch_path: "/t".into(),
        };
        let set = resolve("10.1.2.3", &config).unwrap();
        let urls: Vec<String> = set.iter().map(Endpoint::url).collect();
        assert_eq!(urls, vec!["wss://10.1.2.3:9000/m", "wss://10.1.2.3:9005/t"]);
        assert_eq!(set.get(Channel::Touch).port(), 9005);
        assert_eq!(set.get(Channel::Touch).channel(), Channel::Touch);
    }

    #[test]
    fn port_overflow_is_rejected() {
        let config = EndpointConfig {
            base_port: u16::MAX,
            ..Default::default()
        };
        assert_eq!(
            resolve("10.0.0.1", &config),
            Err(EndpointError::PortOverflow {
                base: u16::MAX,
                offset: 2
            })
        );
    }
}
