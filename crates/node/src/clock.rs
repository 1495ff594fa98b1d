//! Wall-clock time from an SNTP server. Best effort: any failure yields
//! [`UNKNOWN_TIME`] and the cycle carries on.

use anyhow::{anyhow, ensure, Context, Result};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::config::TimeSection;

/// Sentinel timestamp used when the wall clock cannot be obtained.
pub const UNKNOWN_TIME: u64 = 0;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const PACKET_LEN: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client).
const CLIENT_HEADER: u8 = 0b00_100_011;

const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;

/// Byte offset of the transmit timestamp's seconds field.
const TRANSMIT_SECS: usize = 40;

pub struct TimeSource {
    server: String,
    timeout: Duration,
}

impl TimeSource {
    pub fn new(cfg: &TimeSection) -> Self {
        Self {
            server: cfg.server.clone(),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }

    /// Unix seconds from one SNTP exchange, or [`UNKNOWN_TIME`] when offline
    /// or the exchange fails.
    pub async fn current_time(&self, connected: bool) -> u64 {
        if !connected {
            warn!("no link, using unknown timestamp");
            return UNKNOWN_TIME;
        }

        match tokio::time::timeout(self.timeout, self.query()).await {
            Ok(Ok(ts)) => {
                let utc = i64::try_from(ts)
                    .ok()
                    .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
                    .and_then(|t| t.format(&Rfc3339).ok())
                    .unwrap_or_default();
                info!(ts, %utc, server = %self.server, "time synced");
                ts
            }
            Ok(Err(e)) => {
                warn!(server = %self.server, "time sync failed: {e:#}");
                UNKNOWN_TIME
            }
            Err(_) => {
                warn!(server = %self.server, timeout_ms = self.timeout.as_millis() as u64, "time sync timed out");
                UNKNOWN_TIME
            }
        }
    }

    async fn query(&self) -> Result<u64> {
        let sock = UdpSocket::bind("0.0.0.0:0").await?;
        sock.connect(&self.server)
            .await
            .with_context(|| format!("resolving {}", self.server))?;

        let mut req = [0u8; PACKET_LEN];
        req[0] = CLIENT_HEADER;
        sock.send(&req).await?;

        let mut buf = [0u8; 128];
        let n = sock.recv(&mut buf).await?;
        parse_reply(&buf[..n])
    }
}

/// Extract Unix seconds from an SNTP server reply.
pub fn parse_reply(buf: &[u8]) -> Result<u64> {
    ensure!(buf.len() >= PACKET_LEN, "short reply ({} bytes)", buf.len());

    let mode = buf[0] & 0b111;
    ensure!(
        mode == MODE_SERVER || mode == MODE_BROADCAST,
        "unexpected mode {mode}"
    );
    // Stratum 0 is a kiss-o'-death; the server is telling us to back off.
    ensure!(buf[1] != 0, "kiss-o'-death from server");

    let secs_bytes: [u8; 4] = buf[TRANSMIT_SECS..TRANSMIT_SECS + 4]
        .try_into()
        .map_err(|_| anyhow!("transmit timestamp truncated"))?;
    let ntp_secs = u64::from(u32::from_be_bytes(secs_bytes));
    ensure!(ntp_secs != 0, "zero transmit timestamp");

    // Era 1 begins in 2036; small values are past the rollover.
    Ok(if ntp_secs >= NTP_UNIX_OFFSET {
        ntp_secs - NTP_UNIX_OFFSET
    } else {
        ntp_secs + (1 << 32) - NTP_UNIX_OFFSET
    })
}

// ===========================================================================
// Tests
// ===========================================================================
