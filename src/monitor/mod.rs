// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Network quality monitor
//!
//! Turns a raw connectivity flag, a reachability probe and a link-type hint
//! into a normalized [`NetworkQuality`] reading, and publishes readings on an
//! interval for the orchestrator to react to.
//!
//! Probe failures are data, not errors: a failed or timed-out reachability
//! check while nominally connected yields a degraded `weak` reading with the
//! signal capped at [`UNREACHABLE_SIGNAL_CAP`]. Nothing in this module returns
//! an error to its caller.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use offsync::monitor::{subscribe, HttpReachability, QualityMonitor, SystemLink};
//!
//! # async fn example() {
//! let monitor = QualityMonitor::new(
//!     Arc::new(SystemLink::new()),
//!     Arc::new(HttpReachability::new("https://example.com/")),
//! );
//! let subscription = subscribe(Arc::new(monitor), Duration::from_secs(5)).await;
//! println!("link: {}", subscription.latest());
//! subscription.cancel();
//! # }
//! ```

mod link;

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::NetworkQuality;
use crate::utils::{resilient_read, resilient_write};

pub use link::{LinkHint, LinkInfo, StaticLink, SystemLink};

/// Upper bound for the reachability round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Signal ceiling for a connected link whose probe failed.
pub const UNREACHABLE_SIGNAL_CAP: u8 = 15;

/// Anything that can produce a network reading. Must never fail.
#[async_trait]
pub trait QualityProbe: Send + Sync {
    async fn sample(&self) -> NetworkQuality;
}

/// Best-effort round trip to a known-reachable endpoint.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Map the three raw inputs to a reading.
pub fn classify(connected: bool, reachable: bool, hint: LinkHint) -> NetworkQuality {
    if !connected {
        return NetworkQuality::offline();
    }
    let band = hint.band();
    if !reachable {
        return NetworkQuality::weak(
            band.speed_mbps.min(0.5),
            band.signal.min(UNREACHABLE_SIGNAL_CAP),
            band.metered,
        );
    }
    band
}

/// HEAD request against a fixed URL with a bounded wait.
pub struct HttpReachability {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpReachability {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, PROBE_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.client.head(&self.url).send()).await {
            // Any HTTP answer proves the round trip works.
            Ok(Ok(resp)) => {
                tracing::debug!(url = %self.url, status = resp.status().as_u16(), "reachability probe answered");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(url = %self.url, error = %e, "reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %self.url, timeout = ?self.timeout, "reachability probe timed out");
                false
            }
        }
    }
}

/// Fixed answer, for offline demos and tests.
pub struct AssumeReachable(pub bool);

#[async_trait]
impl Reachability for AssumeReachable {
    async fn reachable(&self) -> bool {
        self.0
    }
}

/// The standard probe: link state plus reachability.
pub struct QualityMonitor {
    link: Arc<dyn LinkInfo>,
    reach: Arc<dyn Reachability>,
}

impl QualityMonitor {
    pub fn new(link: Arc<dyn LinkInfo>, reach: Arc<dyn Reachability>) -> Self {
        Self { link, reach }
    }
}

#[async_trait]
impl QualityProbe for QualityMonitor {
    async fn sample(&self) -> NetworkQuality {
        let connected = self.link.connected();
        // No point probing without a link.
        let reachable = connected && self.reach.reachable().await;
        let quality = classify(connected, reachable, self.link.hint());
        tracing::debug!(%quality, connected, reachable, "network sampled");
        quality
    }
}

/// Probe whose reading is set by hand.
pub struct ManualProbe {
    quality: RwLock<NetworkQuality>,
}

impl ManualProbe {
    pub fn new(quality: NetworkQuality) -> Self {
        Self {
            quality: RwLock::new(quality),
        }
    }

    pub fn set(&self, quality: NetworkQuality) {
        *resilient_write(&self.quality) = quality;
    }
}

#[async_trait]
impl QualityProbe for ManualProbe {
    async fn sample(&self) -> NetworkQuality {
        *resilient_read(&self.quality)
    }
}

/// A running polling loop. Dropping it or calling [`cancel`](Self::cancel)
/// stops the loop.
pub struct MonitorSubscription {
    rx: watch::Receiver<NetworkQuality>,
    task: JoinHandle<()>,
}

impl MonitorSubscription {
    /// A receiver that is notified on every sample.
    pub fn receiver(&self) -> watch::Receiver<NetworkQuality> {
        self.rx.clone()
    }

    pub fn latest(&self) -> NetworkQuality {
        *self.rx.borrow()
    }

    pub fn cancel(self) {
        // Drop aborts the task.
    }
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Take a first sample, then keep sampling every `interval`.
pub async fn subscribe(probe: Arc<dyn QualityProbe>, interval: Duration) -> MonitorSubscription {
    let initial = probe.sample().await;
    let (tx, rx) = watch::channel(initial);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => break,
            }
            let quality = probe.sample().await;
            tx.send_replace(quality);
        }
        tracing::debug!("quality monitor stopped");
    });

    MonitorSubscription { rx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NetworkStatus, WEAK_SIGNAL_THRESHOLD};

    #[test]
    fn test_disconnected_is_offline() {
        let q = classify(false, true, LinkHint::Ethernet);
        assert_eq!(q, NetworkQuality::offline());
    }

    #[test]
    fn test_unreachable_degrades_to_weak() {
        let q = classify(true, false, LinkHint::Ethernet);
        assert_eq!(q.status, NetworkStatus::Weak);
        assert!(q.signal <= UNREACHABLE_SIGNAL_CAP);
    }

    #[test]
    fn test_broadband_is_online_strong() {
        for hint in [LinkHint::Ethernet, LinkHint::Wifi] {
            let q = classify(true, true, hint);
            assert_eq!(q.status, NetworkStatus::Online);
            assert!(q.signal >= 80);
            assert!(!q.metered);
        }
    }

    #[test]
    fn test_legacy_cellular_is_weak_and_metered() {
        for hint in [LinkHint::Cellular2g, LinkHint::Cellular3g] {
            let q = classify(true, true, hint);
            assert_eq!(q.status, NetworkStatus::Weak);
            assert!((20..=45).contains(&q.signal));
            assert!(q.signal < WEAK_SIGNAL_THRESHOLD);
            assert!(q.metered);
        }
    }

    #[tokio::test]
    async fn test_monitor_skips_probe_when_disconnected() {
        let monitor = QualityMonitor::new(
            Arc::new(StaticLink::new(false, LinkHint::Wifi)),
            Arc::new(AssumeReachable(true)),
        );
        assert!(monitor.sample().await.is_offline());
    }

    #[tokio::test]
    async fn test_unroutable_probe_is_not_an_error() {
        let reach = HttpReachability::with_timeout("http://127.0.0.1:9/", Duration::from_millis(200));
        let monitor = QualityMonitor::new(Arc::new(StaticLink::new(true, LinkHint::Wifi)), Arc::new(reach));
        let q = monitor.sample().await;
        assert_eq!(q.status, NetworkStatus::Weak);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_publishes_new_samples() {
        let probe = Arc::new(ManualProbe::new(NetworkQuality::online_default()));
        let subscription = subscribe(probe.clone(), Duration::from_secs(5)).await;
        let mut rx = subscription.receiver();
        assert_eq!(subscription.latest().status, NetworkStatus::Online);

        probe.set(NetworkQuality::weak(1.0, 10, false));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, NetworkStatus::Weak);

        subscription.cancel();
        assert!(rx.changed().await.is_err(), "sender must be gone after cancel");
    }
}
