//! Frame discrimination for the tunnel data channel
//!
//! Every DTLS payload whose first byte is zero is a control frame; IP
//! packets can never collide with that because the IPv4 version nibble
//! makes their first byte non-zero. The pre-DTLS connect probe uses the
//! same zero prefix on the cleartext socket.

/// First byte of every control frame.
pub const CONTROL_PREFIX: u8 = 0x00;

/// Control code sent in cleartext by a peer that wants to start DTLS.
pub const CLIENT_WANT_CONNECT: u8 = 0x01;

/// Control code for a graceful disconnect inside the DTLS channel.
pub const CLIENT_WANT_DISCONNECT: u8 = 0x02;

/// The full two-byte cleartext connect probe.
pub const CONNECT_PROBE: [u8; 2] = [CONTROL_PREFIX, CLIENT_WANT_CONNECT];

/// One-byte keepalive; either side sends it to provoke a reply.
pub const KEEPALIVE: [u8; 1] = [CONTROL_PREFIX];

/// What a received DTLS payload means to the forwarding engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Raw IP datagram destined for the TUN device.
    IpPacket(&'a [u8]),
    /// Peer requests a graceful close.
    Disconnect,
    /// One-byte keepalive; answered by traffic, not handled explicitly.
    Keepalive,
    /// Any other zero-prefixed frame; ignored.
    Control(&'a [u8]),
}

/// Classify a non-empty DTLS payload.
pub fn classify(payload: &[u8]) -> Frame<'_> {
    match payload {
        [first, ..] if *first != CONTROL_PREFIX => Frame::IpPacket(payload),
        [CONTROL_PREFIX] => Frame::Keepalive,
        [CONTROL_PREFIX, CLIENT_WANT_DISCONNECT] => Frame::Disconnect,
        _ => Frame::Control(payload),
    }
}

/// Whether a cleartext datagram is the connect probe. The probe must be
/// exactly two bytes; longer zero-prefixed datagrams are discarded.
pub fn is_connect_probe(datagram: &[u8]) -> bool {
    datagram == CONNECT_PROBE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_packet_iff_nonzero_first_byte() {
        // minimal IPv4 header starts with version nibble 4
        let packet = [0x45, 0x00, 0x00, 0x54];
        assert_eq!(classify(&packet), Frame::IpPacket(&packet));
        assert_eq!(classify(&[0xff]), Frame::IpPacket(&[0xff][..]));
    }

    #[test]
    fn test_disconnect_frame() {
        assert_eq!(classify(&[0x00, 0x02]), Frame::Disconnect);
    }

    #[test]
    fn test_keepalive_frame() {
        assert_eq!(classify(&[0x00]), Frame::Keepalive);
    }

    #[test]
    fn test_other_control_frames_are_opaque() {
        // connect-probe bytes inside the channel are not a disconnect
        assert_eq!(classify(&[0x00, 0x01]), Frame::Control(&[0x00, 0x01][..]));
        // a three-byte frame ending in 0x02 is not a disconnect either
        assert_eq!(
            classify(&[0x00, 0x02, 0x00]),
            Frame::Control(&[0x00, 0x02, 0x00][..])
        );
        assert_eq!(classify(&[0x00, 0x7f]), Frame::Control(&[0x00, 0x7f][..]));
    }

    #[test]
    fn test_connect_probe_match_is_exact() {
        assert!(is_connect_probe(&[0x00, 0x01]));
        assert!(!is_connect_probe(&[0x00, 0x01, 0x00]));
        assert!(!is_connect_probe(&[0x00]));
        assert!(!is_connect_probe(&[0x00, 0x02]));
        assert!(!is_connect_probe(&[]));
    }
}
