//! Network link bring-up. `ensure_connected` does not return until the link
//! is up; the node has nothing useful to do offline.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Credentials;

/// Pause between resetting the interface and re-checking the link.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Link-layer control for the station interface.
#[allow(async_fn_in_trait)]
pub trait Link {
    async fn is_connected(&mut self) -> bool;
    /// Short human-readable state for logs (e.g. "disconnected").
    async fn status(&mut self) -> String;
    async fn set_active(&mut self, active: bool) -> Result<()>;
    async fn connect(&mut self, ssid: &str, password: &str) -> Result<()>;
    /// Interface address once connected.
    async fn address(&mut self) -> Option<String>;
}

/// Block until `link` reports connected, resetting the interface and
/// re-requesting the connection every [`RETRY_DELAY`]. There is no attempt
/// cap. Returns the number of retries it took.
pub async fn ensure_connected<L: Link>(link: &mut L, creds: &Credentials) -> u32 {
    let mut retries = 0;
    while !link.is_connected().await {
        retries += 1;
        let status = link.status().await;
        info!(retries, %status, ssid = %creds.ssid, "waiting for connection...");

        if let Err(e) = link.set_active(false).await {
            warn!("link: deactivate failed: {e:#}");
        }
        tokio::time::sleep(RETRY_DELAY).await;
        if let Err(e) = link.set_active(true).await {
            warn!("link: activate failed: {e:#}");
        }
        if let Err(e) = link.connect(&creds.ssid, &creds.password).await {
            warn!("link: connect request failed: {e:#}");
        }
    }

    let address = link.address().await.unwrap_or_else(|| "unknown".into());
    info!(%address, retries, "link up");
    retries
}

// ---------------------------------------------------------------------------
// NetworkManager backend
// ---------------------------------------------------------------------------

/// Wi-Fi station managed through NetworkManager's `nmcli`.
#[cfg_attr(all(feature = "sim", not(feature = "adc")), allow(dead_code))]
pub struct NmcliLink {
    iface: String,
}

#[cfg_attr(all(feature = "sim", not(feature = "adc")), allow(dead_code))]
impl NmcliLink {
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
        }
    }
}

async fn nmcli(args: &[&str]) -> Result<String> {
    let out = tokio::process::Command::new("nmcli")
        .args(args)
        .output()
        .await
        .context("failed to run nmcli")?;
    if !out.status.success() {
        bail!(
            "nmcli {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Find `iface`'s state in terse `nmcli -t -f DEVICE,STATE device` output.
fn parse_device_state<'a>(output: &'a str, iface: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let (dev, state) = line.split_once(':')?;
        (dev == iface).then_some(state.trim())
    })
}

/// First address from `nmcli -g IP4.ADDRESS device show` output, which
/// separates multiple addresses with ` | `.
fn parse_first_address(output: &str) -> Option<String> {
    output
        .lines()
        .flat_map(|l| l.split('|'))
        .map(str::trim)
        .find(|a| !a.is_empty())
        .map(str::to_string)
}

impl Link for NmcliLink {
    async fn is_connected(&mut self) -> bool {
        self.status().await == "connected"
    }

    async fn status(&mut self) -> String {
        match nmcli(&["-t", "-f", "DEVICE,STATE", "device"]).await {
            Ok(out) => parse_device_state(&out, &self.iface)
                .unwrap_or("missing")
                .to_string(),
            Err(e) => format!("unknown ({e:#})"),
        }
    }

    async fn set_active(&mut self, active: bool) -> Result<()> {
        nmcli(&["radio", "wifi", if active { "on" } else { "off" }]).await?;
        Ok(())
    }

    async fn connect(&mut self, ssid: &str, password: &str) -> Result<()> {
        nmcli(&[
            "device", "wifi", "connect", ssid, "password", password, "ifname", self.iface.as_str(),
        ])
        .await
        .with_context(|| format!("connecting {} to '{ssid}'", self.iface))?;
        Ok(())
    }

    async fn address(&mut self) -> Option<String> {
        let out = nmcli(&["-g", "IP4.ADDRESS", "device", "show", self.iface.as_str()])
            .await
            .ok()?;
        parse_first_address(&out)
    }
}

// ---------------------------------------------------------------------------
// Simulated link
// ---------------------------------------------------------------------------

/// Link that is always up, for running without a radio.
#[cfg(all(feature = "sim", not(feature = "adc")))]
pub struct SimLink;

#[cfg(all(feature = "sim", not(feature = "adc")))]
impl Link for SimLink {
    async fn is_connected(&mut self) -> bool {
        true
    }

    async fn status(&mut self) -> String {
        "connected (sim)".into()
    }

    async fn set_active(&mut self, _active: bool) -> Result<()> {
        Ok(())
    }

    async fn connect(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    async fn address(&mut self) -> Option<String> {
        Some("127.0.0.1/8".into())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::valid_credentials;

    /// Comes up after `fail_checks` failed connectivity checks.
    pub(crate) struct FlakyLink {
        pub(crate) fail_checks: u32,
        pub(crate) checks: u32,
        pub(crate) toggles: Vec<bool>,
        pub(crate) connects: Vec<String>,
    }

    impl FlakyLink {
        pub(crate) fn new(fail_checks: u32) -> Self {
            Self {
                fail_checks,
                checks: 0,
                toggles: Vec::new(),
                connects: Vec::new(),
            }
        }
    }

    impl Link for FlakyLink {
        async fn is_connected(&mut self) -> bool {
            self.checks += 1;
            self.checks > self.fail_checks
        }

        async fn status(&mut self) -> String {
            "disconnected".into()
        }

        async fn set_active(&mut self, active: bool) -> Result<()> {
            self.toggles.push(active);
            if active {
                Ok(())
            } else {
                bail!("radio busy")
            }
        }

        async fn connect(&mut self, ssid: &str, _password: &str) -> Result<()> {
            self.connects.push(ssid.to_string());
            Ok(())
        }

        async fn address(&mut self) -> Option<String> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connected_link_returns_immediately() {
        let mut link = FlakyLink::new(0);
        let start = tokio::time::Instant::now();
        assert_eq!(ensure_connected(&mut link, &valid_credentials()).await, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(link.connects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_link_comes_up() {
        let mut link = FlakyLink::new(3);
        let start = tokio::time::Instant::now();
        let retries = ensure_connected(&mut link, &valid_credentials()).await;

        assert_eq!(retries, 3);
        assert!(start.elapsed() >= RETRY_DELAY * 3);
        assert_eq!(link.toggles, vec![false, true, false, true, false, true]);
        assert_eq!(link.connects, vec!["garden"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_has_no_attempt_cap() {
        let mut link = FlakyLink::new(500);
        assert_eq!(ensure_connected(&mut link, &valid_credentials()).await, 500);
    }

    #[test]
    fn device_state_parsed() {
        let out = "wlan0:connected\nlo:connected (externally)\np2p-dev-wlan0:disconnected\n";
        assert_eq!(parse_device_state(out, "wlan0"), Some("connected"));
        assert_eq!(parse_device_state(out, "p2p-dev-wlan0"), Some("disconnected"));
        assert_eq!(parse_device_state(out, "eth0"), None);
    }

    #[test]
    fn first_address_parsed() {
        assert_eq!(
            parse_first_address("192.168.1.23/24 | 10.0.0.5/8\n"),
            Some("192.168.1.23/24".into())
        );
        assert_eq!(parse_first_address("\n"), None);
    }
}
