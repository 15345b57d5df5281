//! Client parameter control payload
//!
//! After the DTLS handshake the server pushes the peer its tunnel
//! configuration as a single control frame: a zero prefix byte followed
//! by an ASCII text of the form
//!
//! ```text
//! m,<mtu> a,<peerip>,32 d,<dns> r,<route>,<rmask>
//! ```
//!
//! space-padded to a fixed payload size so the peer can receive it into
//! a static buffer. The assigned peer address is always a /32.

use std::net::Ipv4Addr;

use crate::{Error, Result, CONTROL_PREFIX};

/// ASCII payload bytes after the leading zero.
pub const PARAMS_PAYLOAD_LEN: usize = 1024;

/// Total frame length on the wire.
pub const PARAMS_FRAME_LEN: usize = 1 + PARAMS_PAYLOAD_LEN;

/// Immutable per-session configuration pushed to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientParams {
    /// Tunnel MTU.
    pub mtu: u16,
    /// Address assigned to the peer's TUN interface (always /32).
    pub peer_ip: Ipv4Addr,
    /// DNS server pushed to the peer.
    pub dns: Ipv4Addr,
    /// Route pushed to the peer.
    pub route: Ipv4Addr,
    /// Prefix length of the pushed route.
    pub route_prefix: u8,
}

impl ClientParams {
    /// Encode into the fixed-size control frame.
    pub fn encode(&self) -> Result<[u8; PARAMS_FRAME_LEN]> {
        let text = format!(
            "m,{} a,{},32 d,{} r,{},{}",
            self.mtu, self.peer_ip, self.dns, self.route, self.route_prefix
        );
        if text.len() > PARAMS_PAYLOAD_LEN {
            return Err(Error::Params(format!(
                "parameter text of {} bytes exceeds the {} byte payload",
                text.len(),
                PARAMS_PAYLOAD_LEN
            )));
        }

        let mut frame = [b' '; PARAMS_FRAME_LEN];
        frame[0] = CONTROL_PREFIX;
        frame[1..1 + text.len()].copy_from_slice(text.as_bytes());
        Ok(frame)
    }

    /// Parse a received parameter frame back into its fields.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let payload = match frame {
            [CONTROL_PREFIX, rest @ ..] if !rest.is_empty() => rest,
            _ => return Err(Error::Params("missing control prefix".into())),
        };
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::Params("payload is not ASCII".into()))?
            .trim_end_matches(' ');

        let mut mtu = None;
        let mut peer_ip = None;
        let mut dns = None;
        let mut route = None;

        for field in text.split(' ') {
            let (key, rest) = field
                .split_once(',')
                .ok_or_else(|| Error::Params(format!("malformed field: {:?}", field)))?;
            match key {
                "m" => mtu = Some(parse_num::<u16>(rest)?),
                "a" => {
                    let (ip, mask) = rest
                        .split_once(',')
                        .ok_or_else(|| Error::Params("address field without mask".into()))?;
                    if parse_num::<u8>(mask)? != 32 {
                        return Err(Error::Params("peer address must be a /32".into()));
                    }
                    peer_ip = Some(parse_ip(ip)?);
                }
                "d" => dns = Some(parse_ip(rest)?),
                "r" => {
                    let (ip, mask) = rest
                        .split_once(',')
                        .ok_or_else(|| Error::Params("route field without mask".into()))?;
                    route = Some((parse_ip(ip)?, parse_num::<u8>(mask)?));
                }
                other => return Err(Error::Params(format!("unknown field key: {:?}", other))),
            }
        }

        let (route, route_prefix) =
            route.ok_or_else(|| Error::Params("missing route field".into()))?;
        Ok(Self {
            mtu: mtu.ok_or_else(|| Error::Params("missing mtu field".into()))?,
            peer_ip: peer_ip.ok_or_else(|| Error::Params("missing address field".into()))?,
            dns: dns.ok_or_else(|| Error::Params("missing dns field".into()))?,
            route,
            route_prefix,
        })
    }
}

fn parse_num<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| Error::Params(format!("invalid number: {:?}", s)))
}

fn parse_ip(s: &str) -> Result<Ipv4Addr> {
    s.parse()
        .map_err(|_| Error::Params(format!("invalid address: {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ClientParams {
        ClientParams {
            mtu: 1400,
            peer_ip: Ipv4Addr::new(10, 0, 0, 2),
            dns: Ipv4Addr::new(8, 8, 8, 8),
            route: Ipv4Addr::new(0, 0, 0, 0),
            route_prefix: 0,
        }
    }

    #[test]
    fn test_encode_shape() {
        let frame = sample().encode().unwrap();
        assert_eq!(frame.len(), PARAMS_FRAME_LEN);
        assert_eq!(frame[0], 0);

        let text = std::str::from_utf8(&frame[1..]).unwrap();
        assert!(text.starts_with("m,1400 a,10.0.0.2,32 d,8.8.8.8 r,0.0.0.0,0"));
        // everything after the text is space padding
        assert!(text.trim_end_matches(' ').len() < text.len());
        assert!(text.ends_with(' '));
    }

    #[test]
    fn test_round_trip() {
        let params = sample();
        let frame = params.encode().unwrap();
        assert_eq!(ClientParams::parse(&frame).unwrap(), params);

        let params = ClientParams {
            mtu: 9000,
            peer_ip: Ipv4Addr::new(172, 31, 255, 254),
            dns: Ipv4Addr::new(1, 1, 1, 1),
            route: Ipv4Addr::new(192, 168, 0, 0),
            route_prefix: 16,
        };
        let frame = params.encode().unwrap();
        assert_eq!(ClientParams::parse(&frame).unwrap(), params);
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let mut frame = sample().encode().unwrap();
        frame[0] = 0x45;
        assert!(ClientParams::parse(&frame).is_err());
        assert!(ClientParams::parse(&[]).is_err());
        assert!(ClientParams::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ClientParams::parse(b"\x00m,abc").is_err());
        assert!(ClientParams::parse(b"\x00m,1400").is_err()); // missing fields
        assert!(ClientParams::parse(b"\x00x,1 a,10.0.0.2,32 d,8.8.8.8 r,0.0.0.0,0").is_err());
        // peer address must be /32
        assert!(ClientParams::parse(b"\x00m,1400 a,10.0.0.2,24 d,8.8.8.8 r,0.0.0.0,0").is_err());
    }
}
