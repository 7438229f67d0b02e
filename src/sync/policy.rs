// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network policy decisions for the orchestrator.

use crate::config::Config;
use crate::types::{NetworkQuality, NetworkStatus};

use super::types::Reason;

/// Below this signal an active download is paused even on an `online` link.
pub const AUTO_PAUSE_SIGNAL_FLOOR: u8 = 30;

/// Above this signal a paused session may resume.
pub const AUTO_RESUME_SIGNAL: u8 = 60;

pub fn wifi_only_violated(quality: &NetworkQuality, config: &Config) -> bool {
    config.wifi_only && quality.metered
}

/// Why a session may not start on this link, if anything.
pub fn start_blocker(quality: &NetworkQuality, config: &Config) -> Option<Reason> {
    if quality.status == NetworkStatus::Offline {
        Some(Reason::Offline)
    } else if wifi_only_violated(quality, config) {
        Some(Reason::WifiOnlyViolated)
    } else {
        None
    }
}

/// An active download should pause on this reading.
pub fn auto_pause_due(quality: &NetworkQuality, config: &Config) -> bool {
    config.auto_pause
        && (matches!(quality.status, NetworkStatus::Offline | NetworkStatus::Weak)
            || quality.signal < AUTO_PAUSE_SIGNAL_FLOOR
            || wifi_only_violated(quality, config))
}

/// A paused session should resume on this reading.
pub fn auto_resume_due(quality: &NetworkQuality, config: &Config) -> bool {
    config.auto_resume
        && quality.status == NetworkStatus::Online
        && quality.signal > AUTO_RESUME_SIGNAL
        && !wifi_only_violated(quality, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_reading_pauses() {
        let config = Config::default();
        assert!(auto_pause_due(&NetworkQuality::weak(1.0, 10, false), &config));
        assert!(auto_pause_due(&NetworkQuality::offline(), &config));
    }

    #[test]
    fn test_low_signal_online_pauses() {
        let config = Config::default();
        assert!(auto_pause_due(&NetworkQuality::online(5.0, 25, false), &config));
        assert!(!auto_pause_due(&NetworkQuality::online(5.0, 30, false), &config));
    }

    #[test]
    fn test_metered_pauses_only_when_wifi_only() {
        let mut config = Config::default();
        let cellular = NetworkQuality::online(20.0, 85, true);
        assert!(!auto_pause_due(&cellular, &config));
        config.wifi_only = true;
        assert!(auto_pause_due(&cellular, &config));
        assert!(!auto_resume_due(&cellular, &config));
    }

    #[test]
    fn test_auto_flags_gate_decisions() {
        let mut config = Config::default();
        config.auto_pause = false;
        config.auto_resume = false;
        assert!(!auto_pause_due(&NetworkQuality::offline(), &config));
        assert!(!auto_resume_due(&NetworkQuality::online(100.0, 85, false), &config));
    }

    #[test]
    fn test_resume_needs_strong_online() {
        let config = Config::default();
        assert!(auto_resume_due(&NetworkQuality::online(50.0, 85, false), &config));
        assert!(!auto_resume_due(&NetworkQuality::online(50.0, 60, false), &config));
        assert!(!auto_resume_due(&NetworkQuality::weak(1.0, 50, false), &config));
    }

    #[test]
    fn test_start_blockers() {
        let mut config = Config::default();
        assert_eq!(start_blocker(&NetworkQuality::offline(), &config), Some(Reason::Offline));
        assert_eq!(start_blocker(&NetworkQuality::online(10.0, 90, true), &config), None);
        config.wifi_only = true;
        assert_eq!(
            start_blocker(&NetworkQuality::online(10.0, 90, true), &config),
            Some(Reason::WifiOnlyViolated)
        );
    }
}
