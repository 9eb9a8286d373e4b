//! App lifecycle coordinator.
//!
//! Watches foreground/background transitions, keeps the interstitial and
//! app-open units warm, and decides whether returning to the app should
//! present an app-open ad. Every gate exists so ads never stack: a short
//! trip to a system dialog, a freshly shown interstitial, or a user still in
//! onboarding all suppress the app-open ad.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::AdNetworkAdapter;
use crate::clock::{elapsed_between, Clock};
use crate::config::AdsConfig;
use crate::errors::StorageResult;
use crate::preferences::Preferences;
use crate::unit::{AdUnit, AdUnits, RewardCallback};

/// Application state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// In the foreground and receiving input.
    Active,
    /// Transitioning or partially covered (iOS control center, calls).
    Inactive,
    /// Not visible.
    Background,
}

/// Why a foreground transition did not present an app-open ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An app-open ad is already being presented.
    AlreadyPresenting,
    /// Another ad unit is on screen.
    AdOnScreen,
    /// Another foreground transition fired moments ago.
    Debounced,
    /// An app-open ad was shown moments ago.
    RecentlyShown,
    /// Another ad was shown within the cooldown.
    Cooldown,
    /// The app was not in the background long enough.
    BriefBackground,
    /// The user has not finished onboarding.
    OnboardingIncomplete,
}

/// What the coordinator did with an app state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundDecision {
    /// Not a background → active transition; nothing to decide.
    NoTransition,
    /// A gate suppressed the app-open ad.
    Skipped(SkipReason),
    /// The app-open ad was presented.
    Presented,
    /// All gates passed but no ad could be presented.
    Unavailable,
}

#[derive(Debug)]
struct LifecycleState {
    app_state: AppState,
    backgrounded_at: Option<DateTime<Utc>>,
    last_foreground_at: Option<DateTime<Utc>>,
    last_app_open_shown_at: Option<DateTime<Utc>>,
}

/// Drives ad units from app lifecycle events and user triggers.
pub struct AppLifecycleCoordinator<A: AdNetworkAdapter> {
    units: AdUnits<A>,
    preferences: Preferences,
    clock: Arc<dyn Clock>,
    config: AdsConfig,
    state: Mutex<LifecycleState>,
    presenting_app_open: Arc<AtomicBool>,
}

impl<A: AdNetworkAdapter> AppLifecycleCoordinator<A> {
    /// Creates a coordinator for an app that starts in the foreground.
    pub fn new(
        units: AdUnits<A>,
        preferences: Preferences,
        clock: Arc<dyn Clock>,
        config: AdsConfig,
    ) -> Self {
        Self {
            units,
            preferences,
            clock,
            config,
            state: Mutex::new(LifecycleState {
                app_state: AppState::Active,
                backgrounded_at: None,
                last_foreground_at: None,
                last_app_open_shown_at: None,
            }),
            presenting_app_open: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The managed ad units.
    pub const fn units(&self) -> &AdUnits<A> {
        &self.units
    }

    /// Whether an app-open presentation (or its grace window) is in progress.
    pub fn is_presenting_app_open(&self) -> bool {
        self.presenting_app_open.load(Ordering::SeqCst)
    }

    /// Handles a platform app state change.
    pub async fn handle_app_state_change(&self, next: AppState) -> ForegroundDecision {
        let now = self.clock.now();
        let Some(away) = self.record_transition(next, now) else {
            return ForegroundDecision::NoTransition;
        };
        debug!(?away, "app returned to the foreground");

        warm_up(&self.units.interstitial, Some(away));

        let reason = if self.claim_presenting() {
            let reason = self.foreground_gate(now, away).await;
            if reason.is_some() {
                self.presenting_app_open.store(false, Ordering::SeqCst);
            }
            reason
        } else {
            Some(SkipReason::AlreadyPresenting)
        };
        if let Some(reason) = reason {
            debug!(?reason, "app-open ad skipped");
            warm_up(&self.units.app_open, Some(away));
            return ForegroundDecision::Skipped(reason);
        }

        self.present_app_open(away).await
    }

    /// Updates the tracked app state; returns the background interval when
    /// this is a background/inactive → active transition.
    fn record_transition(&self, next: AppState, now: DateTime<Utc>) -> Option<Duration> {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.app_state, next);
        match (previous, next) {
            (_, AppState::Background) if previous != AppState::Background => {
                state.backgrounded_at = Some(now);
                None
            }
            (AppState::Background | AppState::Inactive, AppState::Active) => Some(
                state
                    .backgrounded_at
                    .take()
                    .map_or(Duration::ZERO, |at| elapsed_between(at, now)),
            ),
            _ => None,
        }
    }

    /// Takes the presenting flag; only one foreground handler may hold it.
    fn claim_presenting(&self) -> bool {
        self.presenting_app_open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Runs with the presenting flag held.
    async fn foreground_gate(&self, now: DateTime<Utc>, away: Duration) -> Option<SkipReason> {
        let policy = self.config.foreground;

        if self.units.is_any_showing() {
            return Some(SkipReason::AdOnScreen);
        }

        {
            let mut state = self.state.lock();
            let previous = state.last_foreground_at.replace(now);
            if let (Some(debounce), Some(previous)) = (policy.transition_debounce, previous) {
                if elapsed_between(previous, now) < debounce.as_duration() {
                    return Some(SkipReason::Debounced);
                }
            }
            if state.last_app_open_shown_at.is_some_and(|shown| {
                elapsed_between(shown, now) < policy.recent_show_guard.as_duration()
            }) {
                return Some(SkipReason::RecentlyShown);
            }
        }

        if self
            .last_ad_shown()
            .await
            .is_some_and(|shown| elapsed_between(shown, now) < policy.other_ad_cooldown.as_duration())
        {
            return Some(SkipReason::Cooldown);
        }

        if away < policy.min_background.as_duration() {
            return Some(SkipReason::BriefBackground);
        }

        if !self.preferences.onboarding_completed().await {
            return Some(SkipReason::OnboardingIncomplete);
        }

        None
    }

    async fn present_app_open(&self, away: Duration) -> ForegroundDecision {
        let shown = match self.units.app_open.ensure_loaded(Some(away)).await {
            Ok(()) => self.units.app_open.show(None).await,
            Err(error) => {
                debug!(%error, "app-open ad not ready");
                false
            }
        };

        if shown {
            let now = self.clock.now();
            self.state.lock().last_app_open_shown_at = Some(now);
            self.record_ad_shown(now).await;
            info!("app-open ad presented");
        }
        self.release_presenting_after_grace();

        if shown {
            ForegroundDecision::Presented
        } else {
            ForegroundDecision::Unavailable
        }
    }

    fn release_presenting_after_grace(&self) {
        let presenting = Arc::clone(&self.presenting_app_open);
        let grace = self.config.foreground.presenting_grace.as_duration();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            presenting.store(false, Ordering::SeqCst);
        });
    }

    /// User-initiated interstitial trigger, limited to one ad per interval.
    ///
    /// Returns whether an interstitial was presented.
    pub async fn on_global_press(&self) -> bool {
        let now = self.clock.now();
        let interval = self.config.interstitial.min_interval.as_duration();
        if self
            .last_ad_shown()
            .await
            .is_some_and(|shown| elapsed_between(shown, now) < interval)
        {
            debug!(?interval, "interstitial skipped, interval not elapsed");
            return false;
        }

        let shown = self.units.interstitial.show(None).await;
        if shown {
            self.record_ad_shown(self.clock.now()).await;
        }
        shown
    }

    /// Presents the rewarded ad; resolves to whether the reward was earned.
    ///
    /// The shown time is recorded as soon as the ad is on screen so the
    /// app-open cooldown covers the whole presentation.
    pub async fn show_rewarded(&self, on_reward: Option<RewardCallback>) -> bool {
        let Some(presenting) = self.units.rewarded.present(on_reward).await else {
            return false;
        };
        self.record_ad_shown(self.clock.now()).await;
        presenting.closed().await
    }

    /// Shows a rewarded ad and unlocks `deck_id` when the reward is earned.
    ///
    /// Returns whether the deck was unlocked.
    pub async fn unlock_deck_with_reward(&self, deck_id: &str) -> StorageResult<bool> {
        let earned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&earned);
        let on_reward: RewardCallback = Box::new(move |_| flag.store(true, Ordering::SeqCst));

        self.show_rewarded(Some(on_reward)).await;
        if !earned.load(Ordering::SeqCst) {
            return Ok(false);
        }

        self.preferences.unlock_deck(deck_id).await?;
        info!(deck_id, "deck unlocked by rewarded ad");
        Ok(true)
    }

    /// Persists that onboarding finished, enabling app-open ads.
    pub async fn complete_onboarding(&self) -> StorageResult<()> {
        self.preferences.complete_onboarding().await
    }

    /// Records that an ad was shown at `at` (feeds the cooldown gates).
    pub async fn record_ad_shown(&self, at: DateTime<Utc>) {
        if let Err(error) = self.preferences.set_last_ad_shown(at).await {
            warn!(%error, "could not persist last ad shown time");
        }
    }

    async fn last_ad_shown(&self) -> Option<DateTime<Utc>> {
        match self.preferences.last_ad_shown().await {
            Ok(shown) => shown,
            Err(error) => {
                warn!(%error, "could not read last ad shown time");
                None
            }
        }
    }

    /// Tears down every ad unit (app shutdown).
    pub fn cleanup(&self) {
        self.units.cleanup();
    }
}

fn warm_up<A: AdNetworkAdapter>(unit: &AdUnit<A>, background: Option<Duration>) {
    let unit = unit.clone();
    tokio::spawn(async move {
        if let Err(error) = unit.ensure_loaded(background).await {
            debug!(format = %unit.format(), %error, "warm-up load failed");
        }
    });
}
