//! End-to-end exercise of the admission -> rotation -> identity pipeline,
//! with the transport mocked out.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stealthgate::{
    AdmissionController, ChallengeError, ChallengeResolver, DelayCategory, ErrorClassifier,
    ErrorKind, IdentityManager, ProxyPool, RequestContext, RotationCoordinator, RotationError,
    SpeedMode,
};

struct RoundRobinPool {
    proxies: Vec<String>,
    cursor: AtomicU32,
    failures: Mutex<Vec<String>>,
}

impl RoundRobinPool {
    fn new(proxies: &[&str]) -> Self {
        Self {
            proxies: proxies.iter().map(|p| p.to_string()).collect(),
            cursor: AtomicU32::new(0),
            failures: Mutex::new(Vec::new()),
        }
    }
}

impl ProxyPool for RoundRobinPool {
    fn get_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) as usize;
        Some(self.proxies[i % self.proxies.len()].clone())
    }

    fn report_success(&self, _proxy: &str, _elapsed: Duration) {}

    fn report_failure(&self, proxy: &str) {
        self.failures.lock().unwrap().push(proxy.to_string());
    }

    fn active_count(&self) -> usize {
        self.proxies.len()
    }
}

struct CountingResolver {
    calls: AtomicU32,
    succeed: bool,
}

#[async_trait]
impl ChallengeResolver for CountingResolver {
    async fn resolve(&self, _ctx: &RequestContext, detail: &str) -> Result<(), ChallengeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.succeed {
            Ok(())
        } else {
            Err(ChallengeError(detail.to_string()))
        }
    }
}

fn instant_mode() -> SpeedMode {
    SpeedMode {
        name: "instant".into(),
        base_concurrency: 4,
        delay_range: (0.0, 0.0),
        refill_per_minute: 60_000.0,
        burst_size: 100,
        per_proxy_multiplier: 1.0,
    }
}

#[tokio::test(start_paused = true)]
async fn rate_limited_attempt_rotates_pauses_and_recovers() {
    let pool = Arc::new(RoundRobinPool::new(&["http://10.0.0.1:3128", "http://10.0.0.2:3128"]));
    let identities = Arc::new(IdentityManager::new());
    let rotation = RotationCoordinator::new(identities.clone(), pool.clone());
    let admission = AdmissionController::new(instant_mode());
    let classifier = ErrorClassifier::new();

    admission.update_proxy_count(pool.active_count());
    assert_eq!(admission.stats().effective_concurrency, 6);

    // Attempt 1: the target throttles us.
    let permit = admission.acquire(DelayCategory::Default).await;
    let proxy = pool.get_proxy();
    let mut ctx = rotation.on_request_start("GET", "/api/v1/feed", 1, 4, proxy.as_deref());
    let first_browser = ctx.browser.clone();

    let kind = classifier.classify(Some(429), "please wait a few minutes");
    assert_eq!(kind, ErrorKind::RateLimit);
    let action = rotation
        .on_request_error(
            &mut ctx,
            kind,
            "please wait a few minutes",
            Some(429),
            Some(Duration::from_secs(40)),
        )
        .await
        .unwrap();
    admission.on_error(kind);
    drop(permit);

    assert!(action.rotate_proxy && action.rotate_identity && action.rotate_session);
    assert_eq!(action.pause, Some(Duration::from_secs(40)));
    assert_eq!(pool.failures.lock().unwrap().len(), 1);
    assert_eq!(identities.escalation(), 1);
    assert_eq!(admission.escalation(), 2);
    if let Some(pause) = action.pause {
        admission.pause(pause);
    }

    // Attempt 2 with the next proxy succeeds; escalation stays until the
    // quiet window has passed, but counters move.
    let _permit = admission.acquire(DelayCategory::Default).await;
    let proxy = pool.get_proxy();
    let mut ctx = rotation.on_request_start("GET", "/api/v1/feed", 2, 4, proxy.as_deref());
    rotation.on_request_success(&mut ctx, 200, Duration::from_millis(150));
    admission.on_success();

    let stats = rotation.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.errors, 1);
    assert!(stats.rotations >= 1);
    assert_eq!(stats.escalation, "CAUTIOUS");
    assert!(rotation.summary_line().contains("success=50.0%"));

    // The paused bucket throttled the second attempt for the full pause.
    assert!(admission.stats().throttle_waits >= 1);
    let _ = first_browser;
}

#[tokio::test]
async fn resolved_challenge_keeps_the_proxy_and_continues() {
    let pool = Arc::new(RoundRobinPool::new(&["http://10.0.0.1:3128"]));
    let identities = Arc::new(IdentityManager::new());
    let resolver = Arc::new(CountingResolver {
        calls: AtomicU32::new(0),
        succeed: true,
    });
    let rotation = RotationCoordinator::new(identities.clone(), pool.clone())
        .with_resolver(resolver.clone());

    let proxy = pool.get_proxy();
    let mut ctx = rotation.on_request_start("POST", "/api/v1/login", 1, 4, proxy.as_deref());
    let action = rotation
        .on_request_error(&mut ctx, ErrorKind::Challenge, "checkpoint_required", Some(400), None)
        .await
        .unwrap();

    assert_eq!(resolver.calls.load(Ordering::Relaxed), 1);
    assert!(!action.rotate_proxy);
    assert!(action.rotate_identity && action.rotate_session);
    // Challenge never burns the route.
    assert!(pool.failures.lock().unwrap().is_empty());
    assert_eq!(identities.escalation(), 2);
}

#[tokio::test]
async fn unresolved_challenge_propagates_after_local_rotation() {
    let pool = Arc::new(RoundRobinPool::new(&[]));
    let identities = Arc::new(IdentityManager::new());
    let resolver = Arc::new(CountingResolver {
        calls: AtomicU32::new(0),
        succeed: false,
    });
    let rotation =
        RotationCoordinator::new(identities.clone(), pool).with_resolver(resolver.clone());

    let mut ctx = rotation.on_request_start("GET", "/api/v1/users/1", 1, 4, None);
    let err = rotation
        .on_request_error(&mut ctx, ErrorKind::Challenge, "captcha wall", Some(400), None)
        .await
        .unwrap_err();

    assert!(matches!(err, RotationError::Challenge(_)));
    assert_eq!(resolver.calls.load(Ordering::Relaxed), 1);
    assert_eq!(identities.escalation(), 2);
    assert_eq!(rotation.stats().errors, 1);
}

#[tokio::test]
async fn disabled_admission_never_gates() {
    let admission = AdmissionController::new(SpeedMode::safe()).with_enabled(false);
    for _ in 0..20 {
        let _permit = admission.acquire(DelayCategory::AfterRateLimit).await;
    }
    assert!(!admission.stats().enabled);
}
