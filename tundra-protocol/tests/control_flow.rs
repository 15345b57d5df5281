//! Control channel flow between a concentrator and a peer
//!
//! Walks the frame-level life of one session without sockets: probe,
//! parameter push, data transfer, keepalive and disconnect, asserting
//! each side interprets the other's bytes the way the wire contract
//! demands.

use std::net::Ipv4Addr;

use tundra_protocol::{
    classify, is_connect_probe, ClientParams, Frame, CONNECT_PROBE, KEEPALIVE, PARAMS_FRAME_LEN,
};

#[test]
fn session_frame_flow() {
    // 1. the peer announces itself in cleartext
    assert!(is_connect_probe(&CONNECT_PROBE));

    // 2. the server pushes the session parameters
    let params = ClientParams {
        mtu: 1400,
        peer_ip: Ipv4Addr::new(10, 0, 0, 2),
        dns: Ipv4Addr::new(8, 8, 8, 8),
        route: Ipv4Addr::new(0, 0, 0, 0),
        route_prefix: 0,
    };
    let frame = params.encode().unwrap();
    assert_eq!(frame.len(), PARAMS_FRAME_LEN);

    // the peer sees a control frame, not an IP packet
    assert!(matches!(classify(&frame), Frame::Control(_)));
    // and can recover every field
    assert_eq!(ClientParams::parse(&frame).unwrap(), params);

    // 3. an ICMP echo flows through the tunnel; 84 bytes, first byte is
    // the IPv4 version/IHL nibble pair
    let mut echo = vec![0u8; 84];
    echo[0] = 0x45;
    match classify(&echo) {
        Frame::IpPacket(p) => assert_eq!(p.len(), 84),
        other => panic!("echo misclassified as {:?}", other),
    }

    // 4. a silent stretch: the server probes with keepalives, which the
    // peer treats as no-ops
    assert!(matches!(classify(&KEEPALIVE), Frame::Keepalive));

    // 5. the peer leaves
    assert!(matches!(classify(&[0x00, 0x02]), Frame::Disconnect));
}

#[test]
fn params_text_matches_defaults() {
    // the payload a default-configured server pushes to its first peer
    let params = ClientParams {
        mtu: 1400,
        peer_ip: Ipv4Addr::new(10, 0, 0, 2),
        dns: Ipv4Addr::new(8, 8, 8, 8),
        route: Ipv4Addr::new(0, 0, 0, 0),
        route_prefix: 0,
    };
    let frame = params.encode().unwrap();

    assert_eq!(frame[0], 0x00);
    let text = std::str::from_utf8(&frame[1..]).unwrap();
    assert_eq!(
        text.trim_end_matches(' '),
        "m,1400 a,10.0.0.2,32 d,8.8.8.8 r,0.0.0.0,0"
    );
}

#[test]
fn probe_bytes_are_not_a_disconnect() {
    // the cleartext probe and the in-channel disconnect share the zero
    // prefix; they must never be confused
    assert!(is_connect_probe(&[0x00, 0x01]));
    assert!(matches!(classify(&[0x00, 0x01]), Frame::Control(_)));
    assert!(!is_connect_probe(&[0x00, 0x02]));
}
