//! stealthgate — resilience and evasion core for high-volume HTTP clients.
//!
//! The crate owns three cooperating layers and the error taxonomy that binds
//! them together:
//!
//! - [`IdentityManager`]: a pool of coherent synthetic client fingerprints
//!   (user-agent, client hints, viewport, device ids) with success/failure
//!   scoring, recency avoidance, and a 0..=3 escalation dial that stretches
//!   pacing delays and shortens identity lifetimes under pressure.
//! - [`RotationCoordinator`]: applies the error -> action decision matrix
//!   after every failed attempt, scores (proxy, identity) combos, and benches
//!   pairings that only ever fail.
//! - [`AdmissionController`]: concurrency semaphore, token bucket, and
//!   adaptive pacing in front of the wire, with its own 0..=5 dial.
//!
//! Transport, retry policy, and proxy acquisition stay outside; the crate
//! talks to them through the [`ProxyPool`] and [`ChallengeResolver`] traits.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stealthgate::{
//!     AdmissionController, DelayCategory, ErrorClassifier, IdentityManager,
//!     ProxyPool, RotationCoordinator, SpeedMode,
//! };
//!
//! struct StaticPool;
//!
//! impl ProxyPool for StaticPool {
//!     fn get_proxy(&self) -> Option<String> {
//!         Some("http://185.23.44.10:8080".into())
//!     }
//!     fn report_success(&self, _proxy: &str, _elapsed: Duration) {}
//!     fn report_failure(&self, _proxy: &str) {}
//!     fn active_count(&self) -> usize {
//!         1
//!     }
//! }
//!
//! # async fn run() -> Result<(), stealthgate::RotationError> {
//! let identities = Arc::new(IdentityManager::new());
//! let pool: Arc<dyn ProxyPool> = Arc::new(StaticPool);
//! let rotation = RotationCoordinator::new(identities.clone(), pool.clone());
//! let admission = AdmissionController::new(SpeedMode::safe());
//! let classifier = ErrorClassifier::new();
//!
//! admission.update_proxy_count(pool.active_count());
//!
//! let _permit = admission.acquire(DelayCategory::Default).await;
//! let proxy = pool.get_proxy();
//! let mut ctx = rotation.on_request_start("GET", "/api/v1/feed", 1, 4, proxy.as_deref());
//!
//! // ... perform the request, then on failure:
//! let kind = classifier.classify(Some(429), "please wait a few minutes");
//! let action = rotation
//!     .on_request_error(&mut ctx, kind, "please wait a few minutes", Some(429), None)
//!     .await?;
//! admission.on_error(kind);
//! if let Some(pause) = action.pause {
//!     admission.pause(pause);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod modules;

pub use config::{DelayCategory, SpeedMode, UnknownSpeedMode, MAX_CONCURRENCY};
pub use modules::admission::{AdmissionController, AdmissionPermit, AdmissionStats};
pub use modules::classify::{ClassifierError, ClassifierRule, ErrorClassifier, ErrorKind};
pub use modules::identity::{
    ClientProfile, Identity, IdentityManager, IdentitySnapshot, RotationSummary, CLIENT_PROFILES,
};
pub use modules::rotation::{
    ActionTaken, ChallengeError, ChallengeResolver, ProxyPool, RequestContext,
    RotationCoordinator, RotationError, RotationStats,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
