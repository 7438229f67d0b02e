// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Adaptive transfer model.
//!
//! Bandwidth is a policy estimate, not a measurement: it scales linearly
//! with signal strength between a floor and a ceiling, then by the
//! sensitivity multiplier. The per-item delay is `size / bandwidth`, never
//! shorter than `min_delay`.

use std::time::Duration;

use crate::types::Sensitivity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedModel {
    /// KB/s at signal 0
    pub floor_kbps: f64,
    /// KB/s at signal 100
    pub ceiling_kbps: f64,
    /// Lower bound on a step, so a tiny item never busy-loops
    pub min_delay: Duration,
}

impl Default for SpeedModel {
    fn default() -> Self {
        Self {
            floor_kbps: 32.0,
            ceiling_kbps: 4096.0,
            min_delay: Duration::from_millis(10),
        }
    }
}

impl SpeedModel {
    pub fn base_kbps(&self, signal: u8) -> f64 {
        let signal = f64::from(signal.min(100));
        self.floor_kbps + (self.ceiling_kbps - self.floor_kbps) * signal / 100.0
    }

    pub fn effective_kbps(&self, signal: u8, sensitivity: Sensitivity) -> f64 {
        self.base_kbps(signal) * sensitivity.multiplier()
    }

    pub fn transfer_delay(&self, size_kb: u64, signal: u8, sensitivity: Sensitivity) -> Duration {
        let kbps = self.effective_kbps(signal, sensitivity);
        if kbps <= 0.0 {
            return self.min_delay;
        }
        Duration::try_from_secs_f64(size_kb as f64 / kbps)
            .unwrap_or(Duration::MAX)
            .max(self.min_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_is_linear_in_signal() {
        let model = SpeedModel::default();
        assert_eq!(model.base_kbps(0), model.floor_kbps);
        assert_eq!(model.base_kbps(100), model.ceiling_kbps);
        let mid = model.base_kbps(50);
        assert!((mid - (model.floor_kbps + model.ceiling_kbps) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sensitivity_multiplier() {
        let model = SpeedModel::default();
        let balanced = model.effective_kbps(80, Sensitivity::Balanced);
        assert_eq!(model.effective_kbps(80, Sensitivity::Low), balanced * 0.5);
        assert_eq!(model.effective_kbps(80, Sensitivity::High), balanced * 1.5);
    }

    #[test]
    fn test_weaker_signal_means_longer_delay() {
        let model = SpeedModel::default();
        let strong = model.transfer_delay(500, 90, Sensitivity::Balanced);
        let weak = model.transfer_delay(500, 20, Sensitivity::Balanced);
        assert!(weak > strong);
    }

    #[test]
    fn test_delay_has_floor() {
        let model = SpeedModel::default();
        assert_eq!(model.transfer_delay(0, 100, Sensitivity::High), model.min_delay);
    }

    #[test]
    fn test_delay_matches_size_over_bandwidth() {
        let model = SpeedModel {
            floor_kbps: 100.0,
            ceiling_kbps: 100.0,
            min_delay: Duration::from_millis(1),
        };
        assert_eq!(model.transfer_delay(50, 42, Sensitivity::Balanced), Duration::from_millis(500));
    }
}
