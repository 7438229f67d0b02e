// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Link state and link-type hints.

use std::fs;
use std::path::PathBuf;

use crate::types::NetworkQuality;

/// Coarse link type, used to pick a speed/signal band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHint {
    Ethernet,
    Wifi,
    Cellular5g,
    Cellular4g,
    Cellular3g,
    Cellular2g,
    Unknown,
}

impl LinkHint {
    pub fn is_cellular(&self) -> bool {
        matches!(
            self,
            Self::Cellular5g | Self::Cellular4g | Self::Cellular3g | Self::Cellular2g
        )
    }

    /// Reading for a reachable link of this type.
    pub fn band(&self) -> NetworkQuality {
        match self {
            Self::Ethernet => NetworkQuality::online(100.0, 95, false),
            Self::Wifi => NetworkQuality::online(50.0, 85, false),
            Self::Cellular5g => NetworkQuality::online(80.0, 85, true),
            Self::Cellular4g => NetworkQuality::online(15.0, 65, true),
            Self::Cellular3g => NetworkQuality::weak(1.5, 40, true),
            Self::Cellular2g => NetworkQuality::weak(0.2, 20, true),
            Self::Unknown => NetworkQuality::online(10.0, 80, false),
        }
    }
}

impl std::str::FromStr for LinkHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ethernet" | "eth" => Ok(Self::Ethernet),
            "wifi" | "wlan" => Ok(Self::Wifi),
            "5g" => Ok(Self::Cellular5g),
            "4g" | "lte" => Ok(Self::Cellular4g),
            "3g" => Ok(Self::Cellular3g),
            "2g" => Ok(Self::Cellular2g),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown link type '{}'", other)),
        }
    }
}

/// Raw connectivity flag plus link-type hint.
pub trait LinkInfo: Send + Sync {
    fn connected(&self) -> bool;
    fn hint(&self) -> LinkHint;
}

/// Fixed link state.
#[derive(Debug, Clone, Copy)]
pub struct StaticLink {
    connected: bool,
    hint: LinkHint,
}

impl StaticLink {
    pub fn new(connected: bool, hint: LinkHint) -> Self {
        Self { connected, hint }
    }
}

impl LinkInfo for StaticLink {
    fn connected(&self) -> bool {
        self.connected
    }

    fn hint(&self) -> LinkHint {
        self.hint
    }
}

/// Link state from `/sys/class/net`.
///
/// Where that tree is missing (non-Linux hosts, containers without sysfs) the
/// link is assumed up with an unknown type, and the reachability probe
/// decides.
pub struct SystemLink {
    root: PathBuf,
}

impl Default for SystemLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLink {
    pub fn new() -> Self {
        Self::with_root("/sys/class/net")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Interfaces that are up, loopback excluded. `None` when sysfs is
    /// unavailable.
    fn up_interfaces(&self) -> Option<Vec<String>> {
        let entries = fs::read_dir(&self.root).ok()?;
        let mut up: Vec<String> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name != "lo")
            .filter(|name| self.is_up(name))
            .collect();
        up.sort();
        Some(up)
    }

    fn read_attr(&self, iface: &str, attr: &str) -> Option<String> {
        fs::read_to_string(self.root.join(iface).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn is_up(&self, iface: &str) -> bool {
        match self.read_attr(iface, "operstate").as_deref() {
            Some("up") => true,
            // Point-to-point and some virtual links report "unknown" but carry traffic.
            Some("unknown") => self.read_attr(iface, "carrier").as_deref() == Some("1"),
            _ => false,
        }
    }

    fn hint_for(name: &str) -> LinkHint {
        if name.starts_with("wl") {
            LinkHint::Wifi
        } else if name.starts_with("en") || name.starts_with("eth") {
            LinkHint::Ethernet
        } else if name.starts_with("ww") || name.starts_with("rmnet") {
            LinkHint::Cellular4g
        } else {
            LinkHint::Unknown
        }
    }
}

impl LinkInfo for SystemLink {
    fn connected(&self) -> bool {
        self.up_interfaces().map_or(true, |up| !up.is_empty())
    }

    /// Best link type among the interfaces that are up.
    fn hint(&self) -> LinkHint {
        let Some(up) = self.up_interfaces() else {
            return LinkHint::Unknown;
        };
        let hints: Vec<LinkHint> = up.iter().map(|name| Self::hint_for(name)).collect();
        [LinkHint::Ethernet, LinkHint::Wifi, LinkHint::Cellular4g]
            .into_iter()
            .find(|preferred| hints.contains(preferred))
            .unwrap_or(LinkHint::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_iface(root: &TempDir, name: &str, operstate: &str) {
        let dir = root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("operstate"), format!("{}\n", operstate)).unwrap();
    }

    #[test]
    fn test_missing_sysfs_assumes_connected() {
        let link = SystemLink::with_root("/definitely/not/here");
        assert!(link.connected());
        assert_eq!(link.hint(), LinkHint::Unknown);
    }

    #[test]
    fn test_only_loopback_is_disconnected() {
        let root = TempDir::new().expect("Failed to create temp dir");
        fake_iface(&root, "lo", "unknown");
        fake_iface(&root, "wlan0", "down");
        let link = SystemLink::with_root(root.path());
        assert!(!link.connected());
    }

    #[test]
    fn test_prefers_ethernet_over_wifi() {
        let root = TempDir::new().expect("Failed to create temp dir");
        fake_iface(&root, "wlp2s0", "up");
        fake_iface(&root, "enp3s0", "up");
        let link = SystemLink::with_root(root.path());
        assert!(link.connected());
        assert_eq!(link.hint(), LinkHint::Ethernet);
    }

    #[test]
    fn test_cellular_modem_is_metered() {
        let root = TempDir::new().expect("Failed to create temp dir");
        fake_iface(&root, "wwan0", "up");
        let link = SystemLink::with_root(root.path());
        assert_eq!(link.hint(), LinkHint::Cellular4g);
        assert!(link.hint().band().metered);
    }

    #[test]
    fn test_parse_hint() {
        assert_eq!("LTE".parse::<LinkHint>(), Ok(LinkHint::Cellular4g));
        assert!("carrier-pigeon".parse::<LinkHint>().is_err());
    }
}
