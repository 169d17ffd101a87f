//! Best-effort system clock synchronization.
//!
//! Ordered fallback chain: the systemd time service, the `ntpdate` client
//! binary, then a pure SNTP query over UDP with the clock set through the
//! supervisor. All three failing is non-fatal and reported as `Failed` —
//! never an ambiguous absence, because schedule evaluation downstream needs
//! an explicit on/off.

use crate::supervisor::Supervisor;
use std::fmt;
use std::time::Duration;
use tokio::net::UdpSocket;

const NTP_SERVER: &str = "pool.ntp.org:123";
/// Seconds between the NTP era (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Result of one clock-sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSyncOutcome {
    Synced { strategy: &'static str },
    Failed,
}

impl TimeSyncOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TimeSyncOutcome::Synced { .. })
    }
}

impl fmt::Display for TimeSyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSyncOutcome::Synced { strategy } => write!(f, "synced via {strategy}"),
            TimeSyncOutcome::Failed => write!(f, "all strategies failed"),
        }
    }
}

/// Try each strategy in order until one succeeds.
pub async fn sync_clock(supervisor: &Supervisor, timeout: Duration) -> TimeSyncOutcome {
    if timedatectl(supervisor, timeout).await {
        return TimeSyncOutcome::Synced { strategy: "timedatectl" };
    }
    if ntpdate(supervisor, timeout).await {
        return TimeSyncOutcome::Synced { strategy: "ntpdate" };
    }
    if sntp_fallback(supervisor, timeout).await {
        return TimeSyncOutcome::Synced { strategy: "sntp" };
    }
    TimeSyncOutcome::Failed
}

async fn timedatectl(supervisor: &Supervisor, timeout: Duration) -> bool {
    match supervisor
        .run_checked("timedatectl", &["set-ntp", "true"], timeout)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("timedatectl unavailable: {e}");
            false
        }
    }
}

async fn ntpdate(supervisor: &Supervisor, timeout: Duration) -> bool {
    match supervisor
        .run_checked("ntpdate", &["-u", "pool.ntp.org"], timeout)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("ntpdate unavailable: {e}");
            false
        }
    }
}

/// Library fallback: SNTP query over UDP, then set the clock via `date`.
async fn sntp_fallback(supervisor: &Supervisor, timeout: Duration) -> bool {
    let unix_secs = match tokio::time::timeout(timeout, query_sntp(NTP_SERVER)).await {
        Ok(Some(secs)) => secs,
        Ok(None) => return false,
        Err(_) => {
            tracing::debug!("sntp query timed out");
            return false;
        }
    };

    match supervisor
        .run_checked("date", &["-u", "-s", &format!("@{unix_secs}")], timeout)
        .await
    {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("setting clock failed: {e}");
            false
        }
    }
}

/// Send one 48-byte SNTP client request and read the server's transmit
/// timestamp, as Unix seconds.
async fn query_sntp(server: &str) -> Option<u64> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(server).await.ok()?;

    // LI=0, VN=3, Mode=3 (client); remaining fields zero.
    let mut request = [0u8; 48];
    request[0] = 0x1b;
    socket.send(&request).await.ok()?;

    let mut response = [0u8; 48];
    let len = socket.recv(&mut response).await.ok()?;
    parse_sntp_response(&response[..len])
}

/// Extract the transmit timestamp (offset 40) from an SNTP response and
/// convert it from the 1900 era to Unix seconds.
fn parse_sntp_response(packet: &[u8]) -> Option<u64> {
    if packet.len() < 48 {
        return None;
    }
    // Mode must be 4 (server) or 5 (broadcast).
    let mode = packet[0] & 0x07;
    if mode != 4 && mode != 5 {
        return None;
    }
    let secs = u32::from_be_bytes(packet[40..44].try_into().ok()?) as u64;
    if secs <= NTP_UNIX_OFFSET {
        return None;
    }
    Some(secs - NTP_UNIX_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_packet(ntp_secs: u32) -> [u8; 48] {
        let mut packet = [0u8; 48];
        packet[0] = 0x1c; // LI=0, VN=3, Mode=4
        packet[40..44].copy_from_slice(&ntp_secs.to_be_bytes());
        packet
    }

    #[test]
    fn parses_server_transmit_timestamp() {
        // 2024-01-01T00:00:00Z in the NTP era.
        let ntp = (1_704_067_200u64 + NTP_UNIX_OFFSET) as u32;
        assert_eq!(parse_sntp_response(&server_packet(ntp)), Some(1_704_067_200));
    }

    #[test]
    fn rejects_short_or_client_mode_packets() {
        assert_eq!(parse_sntp_response(&[0u8; 12]), None);
        let mut packet = server_packet(3_000_000_000);
        packet[0] = 0x1b; // client mode
        assert_eq!(parse_sntp_response(&packet), None);
    }

    #[test]
    fn rejects_pre_epoch_timestamps() {
        assert_eq!(parse_sntp_response(&server_packet(100)), None);
    }

    #[test]
    fn outcome_is_an_explicit_on_off() {
        assert!(TimeSyncOutcome::Synced { strategy: "ntpdate" }.succeeded());
        assert!(!TimeSyncOutcome::Failed.succeeded());
        assert_eq!(TimeSyncOutcome::Failed.to_string(), "all strategies failed");
    }
}
