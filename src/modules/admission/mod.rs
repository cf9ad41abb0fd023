//! Admission control for outbound request pressure.
//!
//! Every request passes three gates before it may touch the wire: a
//! concurrency semaphore sized from the speed mode and live proxy count, a
//! token bucket enforcing sustained request rate, and an adaptive pacing
//! delay scaled by this layer's own escalation dial (0..=5). The permit is
//! RAII; dropping it releases the concurrency slot even when the holder is
//! cancelled mid-flight.

use rand::Rng;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{DelayCategory, SpeedMode, ADMISSION_ESCALATION_STEP, MAX_CONCURRENCY};
use crate::modules::classify::ErrorKind;
use crate::modules::identity::gaussian;

/// Upper bound of the admission escalation dial.
pub const MAX_ADMISSION_LEVEL: u8 = 5;

/// Error-free window after which the dial eases one level per success.
const LEVEL_DECAY_WINDOW: Duration = Duration::from_secs(30);

/// Cap on a single token-bucket wait so a mis-set rate cannot hang callers.
const MAX_TOKEN_WAIT: Duration = Duration::from_secs(10);

/// Lazy-refill token bucket. All methods take an explicit `now`.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(refill_per_sec: f64, capacity: u32, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        // saturating: last_refill sits in the future right after a pause.
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO {
            self.tokens =
                (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return None;
        }
        // A pause leaves last_refill in the future; count that deferral in.
        let deferred = self.last_refill.saturating_duration_since(now);
        let wait = if self.refill_per_sec > 0.0 {
            deferred + Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        } else {
            MAX_TOKEN_WAIT
        };
        Some(wait.min(MAX_TOKEN_WAIT))
    }

    fn set_rate(&mut self, refill_per_sec: f64, capacity: u32, now: Instant) {
        self.refill(now);
        self.refill_per_sec = refill_per_sec;
        self.capacity = capacity as f64;
        self.tokens = self.tokens.min(self.capacity);
    }

    /// Drain the bucket and push the next refill past `dur`.
    fn pause(&mut self, now: Instant, dur: Duration) {
        self.tokens = 0.0;
        self.last_refill = now + dur;
    }
}

#[derive(Debug)]
struct Gate {
    semaphore: Arc<Semaphore>,
    effective_concurrency: u32,
    proxy_count: usize,
    level: u8,
    last_error: Option<Instant>,
    acquired: u64,
    throttle_waits: u64,
}

/// Point-in-time view of the admission layer.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub mode: String,
    pub enabled: bool,
    pub effective_concurrency: u32,
    pub available_permits: usize,
    pub proxy_count: usize,
    pub escalation: u8,
    pub acquired: u64,
    pub throttle_waits: u64,
}

/// Held for the duration of one request. Dropping it releases the
/// concurrency slot; an inert permit is returned when admission is disabled.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Front gate for all outbound traffic.
pub struct AdmissionController {
    mode: SpeedMode,
    enabled: bool,
    gate: Mutex<Gate>,
    bucket: Mutex<TokenBucket>,
}

impl AdmissionController {
    pub fn new(mode: SpeedMode) -> Self {
        let now = Instant::now();
        let bucket = TokenBucket::new(mode.refill_per_minute / 60.0, mode.burst_size, now);
        let concurrency = mode.base_concurrency.min(MAX_CONCURRENCY);
        Self {
            mode,
            enabled: true,
            gate: Mutex::new(Gate {
                semaphore: Arc::new(Semaphore::new(concurrency as usize)),
                effective_concurrency: concurrency,
                proxy_count: 0,
                level: 0,
                last_error: None,
                acquired: 0,
                throttle_waits: 0,
            }),
            bucket: Mutex::new(bucket),
        }
    }

    /// Disabled controller: `acquire` returns an inert permit immediately.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Wait until the request may proceed, then hold the returned permit
    /// until the response (or failure) is final.
    ///
    /// No internal lock is held across an await; a caller cancelled while
    /// waiting leaks nothing.
    pub async fn acquire(&self, category: DelayCategory) -> AdmissionPermit {
        if !self.enabled {
            return AdmissionPermit { _permit: None };
        }

        let semaphore = {
            let gate = self.gate.lock().expect("admission gate poisoned");
            gate.semaphore.clone()
        };
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("admission semaphore closed");

        self.wait_for_token().await;

        let delay = {
            let gate = self.gate.lock().expect("admission gate poisoned");
            let range = match category {
                DelayCategory::Default => self.mode.delay_range,
                other => other.base_range(),
            };
            sample_pacing_delay(&mut rand::thread_rng(), range, gate.level)
        };
        if !delay.is_zero() {
            log::debug!(
                "admission pacing {:.2}s (category={}, level={})",
                delay.as_secs_f64(),
                category,
                self.escalation(),
            );
            tokio::time::sleep(delay).await;
        }

        {
            let mut gate = self.gate.lock().expect("admission gate poisoned");
            gate.acquired += 1;
        }
        AdmissionPermit {
            _permit: Some(permit),
        }
    }

    async fn wait_for_token(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().expect("admission bucket poisoned");
                bucket.try_take(Instant::now())
            };
            let Some(wait) = wait else {
                return;
            };
            {
                let mut gate = self.gate.lock().expect("admission gate poisoned");
                gate.throttle_waits += 1;
            }
            log::debug!("admission throttled {:.2}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            // Re-check under the lock: another task may have taken the token
            // minted while we slept.
        }
    }

    /// Raise the dial for a classified error. Challenges hit hardest.
    pub fn on_error(&self, kind: ErrorKind) {
        let step = match kind {
            ErrorKind::Challenge => 3,
            ErrorKind::RateLimit => 2,
            _ => 1,
        };
        let mut gate = self.gate.lock().expect("admission gate poisoned");
        let before = gate.level;
        gate.level = (gate.level + step).min(MAX_ADMISSION_LEVEL);
        gate.last_error = Some(Instant::now());
        if gate.level != before {
            log::warn!(
                "admission escalation {} -> {} ({})",
                before,
                gate.level,
                kind,
            );
        }
    }

    /// Ease the dial one level per success once the error-free window has
    /// passed.
    pub fn on_success(&self) {
        self.on_success_at(Instant::now());
    }

    fn on_success_at(&self, now: Instant) {
        let mut gate = self.gate.lock().expect("admission gate poisoned");
        if gate.level > 0
            && let Some(last_error) = gate.last_error
            && now.saturating_duration_since(last_error) >= LEVEL_DECAY_WINDOW
        {
            gate.level -= 1;
            // Restart the window so the dial eases one level per quiet period.
            gate.last_error = Some(now);
            log::info!("admission escalation eased to {}", gate.level);
        }
    }

    /// Resize the gate to the live proxy count: concurrency ceiling and
    /// refill rate both scale with available routes. Outstanding permits
    /// drain against the old semaphore.
    pub fn update_proxy_count(&self, count: usize) {
        let now = Instant::now();
        {
            let mut gate = self.gate.lock().expect("admission gate poisoned");
            if gate.proxy_count == count {
                return;
            }
            gate.proxy_count = count;

            let extra = (count as f64 * self.mode.per_proxy_multiplier).floor() as u32;
            let ceiling = (self.mode.base_concurrency + extra).min(MAX_CONCURRENCY);
            if ceiling != gate.effective_concurrency {
                log::info!(
                    "admission concurrency {} -> {} ({} proxies)",
                    gate.effective_concurrency,
                    ceiling,
                    count,
                );
                gate.effective_concurrency = ceiling;
                gate.semaphore = Arc::new(Semaphore::new(ceiling as usize));
            }
        }

        let scale = count.max(1) as f64;
        let mut bucket = self.bucket.lock().expect("admission bucket poisoned");
        bucket.set_rate(
            self.mode.refill_per_minute / 60.0 * scale,
            self.mode.burst_size,
            now,
        );
    }

    /// Hard stop: drain the bucket and keep it empty for `dur`.
    pub fn pause(&self, dur: Duration) {
        log::warn!("admission paused for {:.0}s", dur.as_secs_f64());
        let mut bucket = self.bucket.lock().expect("admission bucket poisoned");
        bucket.pause(Instant::now(), dur);
    }

    pub fn escalation(&self) -> u8 {
        self.gate.lock().expect("admission gate poisoned").level
    }

    pub fn stats(&self) -> AdmissionStats {
        let gate = self.gate.lock().expect("admission gate poisoned");
        AdmissionStats {
            mode: self.mode.name.clone(),
            enabled: self.enabled,
            effective_concurrency: gate.effective_concurrency,
            available_permits: gate.semaphore.available_permits(),
            proxy_count: gate.proxy_count,
            escalation: gate.level,
            acquired: gate.acquired,
            throttle_waits: gate.throttle_waits,
        }
    }
}

/// Gaussian pacing delay around the range midpoint, widened by the dial.
pub(crate) fn sample_pacing_delay<R: Rng + ?Sized>(
    rng: &mut R,
    range: (f64, f64),
    level: u8,
) -> Duration {
    let multiplier = 1.0 + ADMISSION_ESCALATION_STEP * level as f64;
    let min = range.0 * multiplier;
    let max = range.1 * multiplier;
    let mean = (min + max) / 2.0;
    let std = (max - min) / 4.0;
    let mut secs = gaussian(rng, mean, std).clamp(min, max * 1.5);
    // Rare longer think-pause, mirrors a human stepping away.
    if rng.gen_bool(0.01) {
        secs += rng.gen_range(1.0..3.0);
    }
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn instant_mode() -> SpeedMode {
        SpeedMode {
            name: "instant".into(),
            base_concurrency: 2,
            delay_range: (0.0, 0.0),
            refill_per_minute: 60_000.0,
            burst_size: 100,
            per_proxy_multiplier: 1.0,
        }
    }

    #[test]
    fn bucket_refills_lazily_and_caps_at_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 5, start);
        for _ in 0..5 {
            assert!(bucket.try_take(start).is_none());
        }
        // Empty bucket at 2 tokens/s: the next token is 0.5s out, no less.
        let wait = bucket.try_take(start).unwrap();
        assert!(wait >= Duration::from_millis(499));
        assert!(wait <= Duration::from_millis(501));

        // 10s at 2/s would mint 20 tokens; capacity clamps to 5.
        let later = start + Duration::from_secs(10);
        for _ in 0..5 {
            assert!(bucket.try_take(later).is_none());
        }
        assert!(bucket.try_take(later).is_some());
    }

    #[test]
    fn bucket_wait_is_capped() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(0.001, 1, start);
        assert!(bucket.try_take(start).is_none());
        assert_eq!(bucket.try_take(start), Some(MAX_TOKEN_WAIT));
    }

    #[test]
    fn pause_drains_and_defers_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 10, start);
        bucket.pause(start, Duration::from_secs(60));
        // Mid-pause the bucket stays empty.
        assert!(bucket.try_take(start + Duration::from_secs(30)).is_some());
        // One second past the pause, tokens flow again.
        assert!(bucket
            .try_take(start + Duration::from_secs(61))
            .is_none());
    }

    #[test]
    fn pacing_delay_scales_with_level_and_stays_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        for level in 0..=MAX_ADMISSION_LEVEL {
            let multiplier = 1.0 + ADMISSION_ESCALATION_STEP * level as f64;
            for _ in 0..200 {
                let delay = sample_pacing_delay(&mut rng, (1.0, 3.0), level).as_secs_f64();
                assert!(delay >= 1.0 * multiplier - 1e-9);
                // Clamp ceiling plus the rare 1..3s think-pause.
                assert!(delay <= 3.0 * multiplier * 1.5 + 3.0);
            }
        }
    }

    #[test]
    fn escalation_steps_and_caps() {
        let ctrl = AdmissionController::new(instant_mode());
        ctrl.on_error(ErrorKind::Challenge);
        assert_eq!(ctrl.escalation(), 3);
        ctrl.on_error(ErrorKind::RateLimit);
        assert_eq!(ctrl.escalation(), 5);
        ctrl.on_error(ErrorKind::Network);
        assert_eq!(ctrl.escalation(), MAX_ADMISSION_LEVEL);
    }

    #[test]
    fn escalation_eases_after_quiet_window() {
        let ctrl = AdmissionController::new(instant_mode());
        ctrl.on_error(ErrorKind::RateLimit);
        assert_eq!(ctrl.escalation(), 2);

        // Success inside the window changes nothing.
        ctrl.on_success();
        assert_eq!(ctrl.escalation(), 2);

        let later = Instant::now() + LEVEL_DECAY_WINDOW + Duration::from_secs(1);
        ctrl.on_success_at(later);
        assert_eq!(ctrl.escalation(), 1);
        // A second success in the same quiet window does not double-ease.
        ctrl.on_success_at(later);
        assert_eq!(ctrl.escalation(), 1);
    }

    #[test]
    fn proxy_count_scales_concurrency_up_to_the_cap() {
        let mut mode = instant_mode();
        mode.base_concurrency = 3;
        mode.per_proxy_multiplier = 0.5;
        let ctrl = AdmissionController::new(mode);
        assert_eq!(ctrl.stats().effective_concurrency, 3);

        ctrl.update_proxy_count(10);
        assert_eq!(ctrl.stats().effective_concurrency, 8);

        ctrl.update_proxy_count(1000);
        assert_eq!(ctrl.stats().effective_concurrency, MAX_CONCURRENCY);
    }

    #[tokio::test(start_paused = true)]
    async fn permits_bound_concurrency_and_release_on_drop() {
        let ctrl = AdmissionController::new(instant_mode());

        let first = ctrl.acquire(DelayCategory::Default).await;
        let _second = ctrl.acquire(DelayCategory::Default).await;
        assert_eq!(ctrl.stats().available_permits, 0);

        // Third caller must block; a dropped waiter leaks nothing.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), ctrl.acquire(DelayCategory::Default))
                .await;
        assert!(blocked.is_err());

        drop(first);
        let _third = ctrl.acquire(DelayCategory::Default).await;
        assert_eq!(ctrl.stats().available_permits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_cancelled_mid_throttle_releases_its_slot() {
        let mut mode = instant_mode();
        mode.refill_per_minute = 6.0; // one token per 10s
        mode.burst_size = 1;
        let ctrl = AdmissionController::new(mode);

        // Drain the only token.
        let first = ctrl.acquire(DelayCategory::Default).await;
        drop(first);
        assert_eq!(ctrl.stats().available_permits, 2);

        // The next caller takes a semaphore slot, then parks in the token
        // wait; cancelling it there must give the slot back.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), ctrl.acquire(DelayCategory::Default))
                .await;
        assert!(cancelled.is_err());
        assert!(ctrl.stats().throttle_waits >= 1);
        assert_eq!(ctrl.stats().available_permits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_waits_are_counted() {
        let mut mode = instant_mode();
        mode.refill_per_minute = 600.0; // one token per 100ms
        mode.burst_size = 1;
        let ctrl = AdmissionController::new(mode);

        let _a = ctrl.acquire(DelayCategory::Default).await;
        let _b = ctrl.acquire(DelayCategory::Default).await;
        assert!(ctrl.stats().throttle_waits >= 1);
    }

    #[tokio::test]
    async fn disabled_controller_admits_immediately() {
        let mut mode = instant_mode();
        mode.base_concurrency = 1;
        let ctrl = AdmissionController::new(mode).with_enabled(false);

        // Far more holders than the semaphore would ever allow.
        let mut permits = Vec::new();
        for _ in 0..10 {
            permits.push(ctrl.acquire(DelayCategory::AfterRateLimit).await);
        }
        assert!(!ctrl.stats().enabled);
        assert_eq!(ctrl.stats().acquired, 0);
    }
}
