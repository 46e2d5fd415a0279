//! Unit tests for heart-beat header parsing and interval negotiation.

use osmium_stomp::{negotiate_heartbeats, parse_heartbeat};
use std::time::Duration;

// =============================================================================
// parse_heartbeat
// =============================================================================

#[test]
fn parse_standard_value() {
    assert_eq!(parse_heartbeat("10000,10000"), (10000, 10000));
}

#[test]
fn parse_zeroes() {
    assert_eq!(parse_heartbeat("0,0"), (0, 0));
}

#[test]
fn parse_asymmetric() {
    assert_eq!(parse_heartbeat("5000,15000"), (5000, 15000));
}

#[test]
fn parse_whitespace_padded() {
    assert_eq!(parse_heartbeat(" 10000 , 10000 "), (10000, 10000));
}

#[test]
fn parse_missing_second_value_defaults_zero() {
    assert_eq!(parse_heartbeat("10000"), (10000, 0));
}

#[test]
fn parse_empty_string() {
    assert_eq!(parse_heartbeat(""), (0, 0));
}

#[test]
fn parse_garbage_defaults_zero() {
    assert_eq!(parse_heartbeat("abc,10000"), (0, 10000));
    assert_eq!(parse_heartbeat("10000,xyz"), (10000, 0));
}

// =============================================================================
// negotiate_heartbeats
// =============================================================================

#[test]
fn both_directions_enabled_takes_max() {
    let (send, recv) = negotiate_heartbeats(10000, 10000, 5000, 20000);
    assert_eq!(send, Some(Duration::from_millis(20000)));
    assert_eq!(recv, Some(Duration::from_millis(10000)));
}

#[test]
fn client_zero_send_disables_sending() {
    let (send, recv) = negotiate_heartbeats(0, 10000, 10000, 10000);
    assert_eq!(send, None);
    assert_eq!(recv, Some(Duration::from_millis(10000)));
}

#[test]
fn server_zero_recv_disables_sending() {
    let (send, _) = negotiate_heartbeats(10000, 0, 0, 0);
    assert_eq!(send, None);
}

#[test]
fn server_zero_send_disables_receiving() {
    let (_, recv) = negotiate_heartbeats(10000, 10000, 0, 10000);
    assert_eq!(recv, None);
}

#[test]
fn all_zero_disables_everything() {
    assert_eq!(negotiate_heartbeats(0, 0, 0, 0), (None, None));
}
