//! Live identity pool, scoring, and escalation-scaled pacing.
//!
//! An [`Identity`] is one coherent synthetic client fingerprint minted from a
//! static [`ClientProfile`]. The [`IdentityManager`] keeps exactly one current
//! identity, retires it by usage, age, or on demand, scores profiles by
//! outcome, benches repeat offenders, and owns the process-wide escalation
//! dial (0..=3) that scales every adaptive delay.

pub mod profiles;

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{DelayCategory, BLACKLIST_FAIL_THRESHOLD, BLACKLIST_TTL, IDENTITY_ESCALATION_STEP};
use crate::modules::classify::ErrorKind;

pub use profiles::{ClientProfile, CLIENT_PROFILES};

const MACHINE_ID_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const RECENT_PROFILE_WINDOW: usize = 3;

/// Escalation level names, index = level.
pub fn level_name(level: u8) -> &'static str {
    match level {
        0 => "NORMAL",
        1 => "CAUTIOUS",
        2 => "STEALTH",
        _ => "PARANOID",
    }
}

/// One live, internally consistent client fingerprint.
///
/// Immutable once minted; cloned out to callers so no reference ever escapes
/// the manager's lock.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_agent: &'static str,
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_mobile: &'static str,
    pub platform: &'static str,
    pub browser: &'static str,
    pub browser_version: &'static str,
    pub accept_language: &'static str,
    pub viewport: (u32, u32),
    /// Named transport impersonation capability for the dispatch layer.
    pub impersonation: &'static str,
    pub device_id: String,
    pub machine_id: String,
    pub window_id: String,
}

impl Identity {
    /// Human-readable browser label, e.g. `Chrome 142`.
    pub fn browser_label(&self) -> String {
        let mut label = String::with_capacity(self.browser.len() + self.browser_version.len() + 1);
        let mut chars = self.browser.chars();
        if let Some(first) = chars.next() {
            label.extend(first.to_uppercase());
            label.push_str(chars.as_str());
        }
        label.push(' ');
        label.push_str(self.browser_version);
        label
    }

    /// Materialise the coherent header set for this identity.
    ///
    /// The dispatch layer merges these into the outgoing request; at
    /// escalation level 2+ the full client-hint surface is presented as well.
    pub fn headers(&self, escalation: u8) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, "user-agent", self.user_agent);
        insert(&mut headers, "accept", "*/*");
        insert(&mut headers, "accept-language", self.accept_language);
        insert(&mut headers, "sec-fetch-dest", "empty");
        insert(&mut headers, "sec-fetch-mode", "cors");
        insert(&mut headers, "sec-fetch-site", "same-origin");

        if !self.sec_ch_ua.is_empty() {
            insert(&mut headers, "sec-ch-ua", self.sec_ch_ua);
            insert(&mut headers, "sec-ch-ua-mobile", self.sec_ch_ua_mobile);
            let platform = format!("\"{}\"", self.platform);
            insert(&mut headers, "sec-ch-ua-platform", &platform);
            if escalation >= 2 {
                insert(&mut headers, "sec-ch-ua-full-version-list", self.sec_ch_ua);
                insert(&mut headers, "viewport-width", &self.viewport.0.to_string());
            }
        }

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    let value =
        HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"));
    headers.insert(name, value);
}

/// Per-profile success/fail tally driving weighted selection.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProfileScore {
    pub successes: u32,
    pub failures: u32,
}

impl ProfileScore {
    /// Selection weight: untried profiles get full weight, proven losers are
    /// floored at 0.1 so they keep a small comeback chance.
    pub fn weight(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            (f64::from(self.successes) / f64::from(total)).max(0.1)
        }
    }

    fn record(&mut self, success: bool) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }
}

/// Before/after record of one forced identity rotation, for observability.
#[derive(Debug, Clone)]
pub struct RotationSummary {
    pub reason: ErrorKind,
    pub old_browser: Option<String>,
    pub new_browser: String,
    pub new_platform: &'static str,
    pub new_impersonation: &'static str,
    pub escalation_before: &'static str,
    pub escalation_after: &'static str,
    pub blacklisted_profiles: usize,
}

/// Observability snapshot of the identity state.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySnapshot {
    pub browser: Option<String>,
    pub platform: Option<String>,
    pub impersonation: Option<String>,
    pub uses: u32,
    pub max_uses: u32,
    pub age_secs: u64,
    pub escalation_level: u8,
    pub escalation: &'static str,
    pub consecutive_errors: u32,
    pub blacklisted_profiles: usize,
    pub profile_scores: HashMap<usize, ProfileScore>,
}

#[derive(Debug)]
struct IdentityState {
    current: Option<Identity>,
    current_profile: usize,
    uses: u32,
    max_uses: u32,
    created_at: Instant,
    max_age: Duration,
    last_request: Option<Instant>,
    success_count: u64,
    error_count: u64,
    consecutive_errors: u32,
    escalation: u8,
    recent_profiles: Vec<usize>,
    scores: HashMap<usize, ProfileScore>,
    blacklist: HashMap<usize, Instant>,
}

impl IdentityState {
    fn new() -> Self {
        Self {
            current: None,
            current_profile: 0,
            uses: 0,
            max_uses: 1,
            created_at: Instant::now(),
            max_age: Duration::ZERO,
            last_request: None,
            success_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            escalation: 0,
            recent_profiles: Vec::new(),
            scores: HashMap::new(),
            blacklist: HashMap::new(),
        }
    }
}

/// Owns the identity pool, profile scores, and the escalation dial.
///
/// All mutable state sits behind a single lock; the read-or-rotate sequence in
/// [`IdentityManager::current`] is one critical section so two callers can
/// never independently decide to rotate and clobber each other. No method here
/// ever fails: the manager always produces a usable identity.
#[derive(Debug)]
pub struct IdentityManager {
    profiles: Vec<ClientProfile>,
    blacklist_ttl: Duration,
    state: Mutex<IdentityState>,
}

impl IdentityManager {
    pub fn new() -> Self {
        Self::with_profiles(CLIENT_PROFILES.to_vec())
    }

    /// Manager over a custom profile set. The set must be non-empty; an empty
    /// set falls back to the built-in manifest.
    pub fn with_profiles(profiles: Vec<ClientProfile>) -> Self {
        let profiles = if profiles.is_empty() {
            CLIENT_PROFILES.to_vec()
        } else {
            profiles
        };
        Self {
            profiles,
            blacklist_ttl: BLACKLIST_TTL,
            state: Mutex::new(IdentityState::new()),
        }
    }

    pub fn with_blacklist_ttl(mut self, ttl: Duration) -> Self {
        self.blacklist_ttl = ttl;
        self
    }

    /// Current identity, minting a fresh one if none exists, the usage or age
    /// limit is exceeded, or `force_new` is set. Atomic read-or-rotate.
    pub fn current(&self, force_new: bool) -> Identity {
        let mut state = self.state.lock().expect("identity state poisoned");
        let now = Instant::now();
        let due = force_new
            || state.current.is_none()
            || state.uses >= state.max_uses
            || now.duration_since(state.created_at) > state.max_age;

        if !due && let Some(identity) = state.current.clone() {
            state.uses += 1;
            return identity;
        }

        let identity = self.mint(&mut state, now);
        state.uses = 1;
        identity
    }

    /// Force rotation without recording an error.
    pub fn rotate_now(&self) {
        let mut state = self.state.lock().expect("identity state poisoned");
        let now = Instant::now();
        self.mint(&mut state, now);
        state.uses = 0;
    }

    /// Record a failed request: score the active profile, bench it if it only
    /// ever fails, raise the escalation dial, and mint a replacement identity.
    pub fn on_error(&self, kind: ErrorKind) -> RotationSummary {
        let mut state = self.state.lock().expect("identity state poisoned");
        let now = Instant::now();
        let before = self.record_failure(&mut state, kind, now);

        let old_browser = state.current.as_ref().map(Identity::browser_label);
        let identity = self.mint(&mut state, now);
        state.uses = 0;

        let summary = RotationSummary {
            reason: kind,
            old_browser,
            new_browser: identity.browser_label(),
            new_platform: identity.platform,
            new_impersonation: identity.impersonation,
            escalation_before: level_name(before),
            escalation_after: level_name(state.escalation),
            blacklisted_profiles: state.blacklist.len(),
        };
        log::debug!(
            "identity rotated: {} -> {} ({}) | reason={} | escalation {}->{}",
            summary.old_browser.as_deref().unwrap_or("none"),
            summary.new_browser,
            summary.new_platform,
            summary.reason,
            summary.escalation_before,
            summary.escalation_after,
        );
        summary
    }

    /// Record a failed request without retiring the current identity.
    ///
    /// Same scoring and dial bookkeeping as [`IdentityManager::on_error`],
    /// for failures that do not implicate the fingerprint itself (transport
    /// errors): the pressure signal still lands, the identity survives.
    pub fn escalate(&self, kind: ErrorKind) {
        let mut state = self.state.lock().expect("identity state poisoned");
        let now = Instant::now();
        let before = self.record_failure(&mut state, kind, now);
        if state.escalation != before {
            log::debug!(
                "escalation {} -> {} ({}) without rotation",
                level_name(before),
                level_name(state.escalation),
                kind,
            );
        }
    }

    /// Shared failure bookkeeping: counters, profile scoring and benching,
    /// dial bump. Returns the pre-bump level. Lock held by the caller.
    fn record_failure(&self, state: &mut IdentityState, kind: ErrorKind, now: Instant) -> u8 {
        state.error_count += 1;
        state.consecutive_errors += 1;

        if state.current.is_some() {
            let idx = state.current_profile;
            let score = state.scores.entry(idx).or_default();
            score.record(false);
            let score = *score;
            if score.failures >= BLACKLIST_FAIL_THRESHOLD && score.successes == 0 {
                state.blacklist.insert(idx, now + self.blacklist_ttl);
                log::info!(
                    "profile {} benched for {:.0}s after {} straight failures",
                    idx,
                    self.blacklist_ttl.as_secs_f64(),
                    score.failures
                );
            }
        }

        let before = state.escalation;
        let step = match kind {
            ErrorKind::Challenge => 2,
            _ => 1,
        };
        state.escalation = (state.escalation + step).min(3);
        before
    }

    /// Record a successful request. Every 50th success relaxes the escalation
    /// dial by one level.
    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("identity state poisoned");
        state.consecutive_errors = 0;
        state.success_count += 1;

        if state.current.is_some() {
            let idx = state.current_profile;
            state.scores.entry(idx).or_default().record(true);
        }

        if state.success_count % 50 == 0 && state.escalation > 0 {
            state.escalation -= 1;
        }
    }

    /// Human-like delay for the given category, scaled by escalation.
    ///
    /// Computes under lock and returns the duration; the caller sleeps, so the
    /// lock is never held across a suspension point.
    pub fn delay(&self, category: DelayCategory) -> Duration {
        let mut state = self.state.lock().expect("identity state poisoned");
        let now = Instant::now();
        let since_last = state.last_request.map(|t| now.duration_since(t));
        let delay = sample_delay(
            &mut rand::thread_rng(),
            category,
            state.escalation,
            since_last,
        );
        state.last_request = Some(now);
        log::debug!(
            "delay {:.2}s | category={} | escalation={}",
            delay.as_secs_f64(),
            category,
            state.escalation
        );
        delay
    }

    pub fn escalation(&self) -> u8 {
        self.state.lock().expect("identity state poisoned").escalation
    }

    pub fn escalation_name(&self) -> &'static str {
        level_name(self.escalation())
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        let state = self.state.lock().expect("identity state poisoned");
        IdentitySnapshot {
            browser: state.current.as_ref().map(Identity::browser_label),
            platform: state.current.as_ref().map(|i| i.platform.to_string()),
            impersonation: state.current.as_ref().map(|i| i.impersonation.to_string()),
            uses: state.uses,
            max_uses: state.max_uses,
            age_secs: state.created_at.elapsed().as_secs(),
            escalation_level: state.escalation,
            escalation: level_name(state.escalation),
            consecutive_errors: state.consecutive_errors,
            blacklisted_profiles: state.blacklist.len(),
            profile_scores: state.scores.clone(),
        }
    }

    /// Mint a fresh identity and install it as current. Expects the state lock
    /// to be held by the caller.
    fn mint(&self, state: &mut IdentityState, now: Instant) -> Identity {
        let mut rng = rand::thread_rng();

        state.blacklist.retain(|idx, until| {
            let keep = *until > now;
            if !keep {
                log::info!("profile {} eligible again", idx);
            }
            keep
        });

        let idx = select_profile(
            &mut rng,
            self.profiles.len(),
            &state.scores,
            &state.blacklist,
            &state.recent_profiles,
            now,
        );
        state.recent_profiles.push(idx);
        if state.recent_profiles.len() > 10 {
            let keep = state.recent_profiles.split_off(state.recent_profiles.len() - 5);
            state.recent_profiles = keep;
        }

        let profile = &self.profiles[idx];
        let viewport = profiles::VIEWPORTS.choose(&mut rng).copied().unwrap_or((1920, 1080));
        let identity = Identity {
            user_agent: profile.user_agent,
            sec_ch_ua: profile.sec_ch_ua,
            sec_ch_ua_mobile: if profile.mobile { "?1" } else { "?0" },
            platform: profile.platform,
            browser: profile.browser,
            browser_version: profile.version,
            accept_language: profiles::ACCEPT_LANGUAGES
                .choose(&mut rng)
                .copied()
                .unwrap_or("en-US,en;q=0.9"),
            viewport,
            impersonation: profile.impersonation,
            device_id: format!("{:08X}{:08X}", rng.r#gen::<u32>(), rng.r#gen::<u32>()),
            machine_id: (0..28)
                .map(|_| {
                    let i = rng.gen_range(0..MACHINE_ID_CHARS.len());
                    MACHINE_ID_CHARS[i] as char
                })
                .collect(),
            window_id: rng.gen_range(1..=999_999u32).to_string(),
        };

        state.current_profile = idx;
        state.created_at = now;
        state.max_age = Duration::from_secs_f64(rng.gen_range(180.0..600.0));
        state.max_uses = match state.escalation {
            0 => rng.gen_range(20..=80),
            1 => rng.gen_range(10..=30),
            _ => rng.gen_range(5..=15),
        };
        state.current = Some(identity.clone());
        identity
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Weighted profile draw with exclusion rules, independent of any lock.
///
/// Excludes blacklisted profiles and, when the pool is larger than three, the
/// three most recently used. Falls back to the unfiltered pool when nothing
/// survives the filters.
pub(crate) fn select_profile<R: Rng + ?Sized>(
    rng: &mut R,
    pool: usize,
    scores: &HashMap<usize, ProfileScore>,
    blacklist: &HashMap<usize, Instant>,
    recent: &[usize],
    now: Instant,
) -> usize {
    let recent_window: &[usize] = if pool > RECENT_PROFILE_WINDOW {
        &recent[recent.len().saturating_sub(RECENT_PROFILE_WINDOW)..]
    } else {
        &[]
    };

    let mut candidates: Vec<usize> = (0..pool)
        .filter(|idx| !matches!(blacklist.get(idx), Some(until) if *until > now))
        .filter(|idx| !recent_window.contains(idx))
        .collect();
    if candidates.is_empty() {
        candidates = (0..pool).collect();
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|idx| scores.get(idx).map_or(1.0, |s| s.weight()))
        .collect();
    weighted_choice(rng, &candidates, &weights)
}

fn weighted_choice<R: Rng + ?Sized>(rng: &mut R, candidates: &[usize], weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= f64::EPSILON {
        return candidates[0];
    }
    let mut target = rng.gen_range(0.0..total);
    for (&candidate, &weight) in candidates.iter().zip(weights) {
        if target <= weight {
            return candidate;
        }
        target -= weight;
    }
    candidates[candidates.len() - 1]
}

/// Escalation-scaled Gaussian delay sample.
///
/// Pure: all randomness comes from `rng`, the "already waited long enough"
/// short-circuit comes from `since_last`, so tests can pin both.
pub(crate) fn sample_delay<R: Rng + ?Sized>(
    rng: &mut R,
    category: DelayCategory,
    escalation: u8,
    since_last: Option<Duration>,
) -> Duration {
    let (base_min, base_max) = category.base_range();
    let scale = 1.0 + IDENTITY_ESCALATION_STEP * f64::from(escalation);
    let min = base_min * scale;
    let max = base_max * scale;

    let mean = (min + max) / 2.0;
    let std = (max - min) / 4.0;
    let mut delay = gaussian(rng, mean, std).clamp(min, max * 1.5);

    // A caller that already idled past the sampled delay only needs a token
    // pause to avoid metronome-perfect spacing.
    if category == DelayCategory::Default
        && matches!(since_last, Some(elapsed) if elapsed.as_secs_f64() >= delay)
    {
        delay = rng.gen_range(0.05..0.2);
    }

    if rng.gen_bool(0.03) {
        delay += rng.gen_range(2.0..5.0);
    }

    Duration::from_secs_f64(delay)
}

/// Box-Muller Gaussian sample.
pub(crate) fn gaussian<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + std * z
}
