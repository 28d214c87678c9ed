//! Centralized runtime constants.
//!
//! All poll cadences, thresholds, and depth caps are collected here so they
//! can be found and adjusted in a single place rather than scattered across
//! modules.

/// Process Tracker poll interval (milliseconds).
pub const PROCESS_POLL_INTERVAL_MS: u64 = 1000;

/// Connection Tracker poll interval (milliseconds).
pub const CONNECTION_POLL_INTERVAL_MS: u64 = 300;

/// Process↔Connection Manager sync interval (milliseconds).
pub const PROCON_SYNC_INTERVAL_MS: u64 = 1000;

/// Packet-processing tick interval (milliseconds): flush capture queue, enqueue,
/// flush ProcCon queue, feed the registry, invoke the packet-batch callback.
pub const PACKET_TICK_INTERVAL_MS: u64 = 100;

/// Default snapshot-emit interval (milliseconds). Consumer-configurable within
/// the 3000-5000ms band; this is the default used when not overridden.
pub const SNAPSHOT_INTERVAL_MS: u64 = 4000;

/// Non-listener UDP port mappings older than this are evicted on the next
/// connection poll (seconds).
pub const UDP_MAPPING_STALE_SECS: u64 = 30;

/// Hard upper bound for a single socket-table enumeration pass (seconds). If
/// exceeded the cycle is abandoned and the next tick runs against the
/// previous snapshot.
pub const SOCKET_ENUMERATION_TIMEOUT_SECS: u64 = 5;

/// Maximum number of ppid hops walked by `find_root_ancestor` before giving up
/// and returning the starting pid (cycle guard).
pub const ROOT_ANCESTOR_MAX_DEPTH: u32 = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_intervals_positive() {
        assert!(PROCESS_POLL_INTERVAL_MS > 0);
        assert!(CONNECTION_POLL_INTERVAL_MS > 0);
        assert!(PROCON_SYNC_INTERVAL_MS > 0);
        assert!(PACKET_TICK_INTERVAL_MS > 0);
        assert!(SNAPSHOT_INTERVAL_MS > 0);
        assert!(UDP_MAPPING_STALE_SECS > 0);
        assert!(SOCKET_ENUMERATION_TIMEOUT_SECS > 0);
        assert!(ROOT_ANCESTOR_MAX_DEPTH > 0);
    }

    #[test]
    fn test_snapshot_interval_within_spec_band() {
        assert!((3000..=5000).contains(&SNAPSHOT_INTERVAL_MS));
    }

    #[test]
    fn test_packet_tick_faster_than_sync_intervals() {
        // The packet-processing tick must run faster than the intervals that
        // feed it fresh attribution data, or packets would queue unboundedly.
        assert!(PACKET_TICK_INTERVAL_MS < PROCON_SYNC_INTERVAL_MS);
        assert!(PACKET_TICK_INTERVAL_MS < CONNECTION_POLL_INTERVAL_MS);
    }
}
