//! Ad unit lifecycle manager.
//!
//! One [`AdUnit`] owns one placement's state machine:
//!
//! ```text
//! Idle ──ensure_loaded──▶ Loading ──LOADED──▶ Loaded ──show──▶ Showing
//!  ▲                         │                                   │
//!  └────────ERROR / timeout──┘                 CLOSED (+ reload)─┘
//! ```
//!
//! Loads are single-flight: each load runs as its own task and every
//! `ensure_loaded` awaits that task's shared result, so the ad network sees
//! at most one outstanding request per unit and a load settles even when
//! every caller stopped waiting. `show` is "try now": it refuses
//! while the unit is loading or already on screen instead of queueing.
//!
//! The state lock is never held across an `.await` or while calling into the
//! adapter; adapter listeners re-enter the manager through it.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn, Instrument};

use crate::adapter::{
    AdEvent, AdEventKind, AdEventListener, AdHandle, AdNetworkAdapter, RequestOptions,
    Subscription,
};
use crate::clock::{elapsed_between, Clock};
use crate::config::{AdsConfig, RewardFallback, UnitPolicy};
use crate::errors::{AdError, AdResult};
use crate::preferences::Preferences;
use crate::types::{AdFormat, AdUnitId, AdUnitIds, Reward};

/// Lifecycle phase of an ad unit. Exactly one holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No usable ad: never loaded, closed, failed or cleaned up.
    Idle,
    /// A load request is outstanding.
    Loading,
    /// An ad is loaded and may be shown.
    Loaded,
    /// The ad is on screen.
    Showing,
}

/// Invoked with the reward payload when a rewarded ad grants its reward.
pub type RewardCallback = Box<dyn FnOnce(Reward) + Send>;

/// Static configuration of one ad unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdUnitConfig {
    /// Ad format, selecting the SDK ad type and reward handling.
    pub format: AdFormat,
    /// Placement id requested from the network.
    pub unit_id: AdUnitId,
    /// Load timeout and staleness thresholds.
    pub policy: UnitPolicy,
    /// Missing-SDK fallback; only consulted for reward-granting formats.
    pub reward_fallback: RewardFallback,
}

impl AdUnitConfig {
    fn for_format(format: AdFormat, unit_id: AdUnitId) -> Self {
        Self {
            format,
            unit_id,
            policy: UnitPolicy::default(),
            reward_fallback: RewardFallback::default(),
        }
    }

    /// An app-open unit with default policy.
    pub fn app_open(unit_id: AdUnitId) -> Self {
        Self::for_format(AdFormat::AppOpen, unit_id)
    }

    /// An interstitial unit with default policy.
    pub fn interstitial(unit_id: AdUnitId) -> Self {
        Self::for_format(AdFormat::Interstitial, unit_id)
    }

    /// A rewarded unit with default policy.
    pub fn rewarded(unit_id: AdUnitId) -> Self {
        Self::for_format(AdFormat::Rewarded, unit_id)
    }

    /// Replaces the load/staleness policy.
    #[must_use]
    pub fn with_policy(mut self, policy: UnitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the missing-SDK fallback.
    #[must_use]
    pub fn with_reward_fallback(mut self, fallback: RewardFallback) -> Self {
        self.reward_fallback = fallback;
        self
    }
}

/// An ad that reached the screen.
///
/// Returned by [`AdUnit::present`] once presentation started; await
/// [`Presenting::closed`] for the dismissal.
#[derive(Debug)]
pub struct Presenting {
    outcome: PresentingOutcome,
}

#[derive(Debug)]
enum PresentingOutcome {
    OnScreen(oneshot::Receiver<bool>),
    FallbackGranted,
}

impl Presenting {
    /// Waits until the ad is dismissed; resolves to whether a reward was
    /// earned during this presentation.
    pub async fn closed(self) -> bool {
        match self.outcome {
            PresentingOutcome::OnScreen(finished) => finished.await.unwrap_or(false),
            PresentingOutcome::FallbackGranted => true,
        }
    }
}

/// Outcome published by the LOADED/ERROR listeners to the waiting load.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadStatus {
    Pending,
    Loaded,
    Failed(AdError),
}

impl LoadStatus {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn outcome(&self) -> AdResult<()> {
        match self {
            Self::Loaded => Ok(()),
            Self::Failed(error) => Err(error.clone()),
            Self::Pending => Err(AdError::Disposed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPlan {
    /// Build a new ad object (none yet, stale, or reload failed).
    Fresh,
    /// Call `load()` again on the existing ad object.
    Reload,
}

type SharedLoad = Shared<BoxFuture<'static, AdResult<()>>>;

struct PendingLoad {
    id: u64,
    future: SharedLoad,
}

struct Presentation {
    on_reward: Option<RewardCallback>,
    earned: bool,
    finished: Option<oneshot::Sender<bool>>,
}

impl Presentation {
    fn finish(mut self) {
        if let Some(finished) = self.finished.take() {
            // The show call may have stopped listening; nothing to report then.
            let _ = finished.send(self.earned);
        }
    }
}

/// Pieces of a torn-down ad object. Dropped outside the state lock because
/// unsubscribing calls into the adapter.
struct Detached<H> {
    _listeners: Vec<Subscription>,
    _handle: Option<Arc<H>>,
    _presentation: Option<Presentation>,
}

struct UnitState<H> {
    phase: Phase,
    handle: Option<Arc<H>>,
    loaded_at: Option<DateTime<Utc>>,
    generation: u64,
    next_load_id: u64,
    pending_load: Option<PendingLoad>,
    listeners: Vec<Subscription>,
    presentation: Option<Presentation>,
    unavailable: Option<AdError>,
}

impl<H> UnitState<H> {
    const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            handle: None,
            loaded_at: None,
            generation: 0,
            next_load_id: 0,
            pending_load: None,
            listeners: Vec::new(),
            presentation: None,
            unavailable: None,
        }
    }

    fn is_loading(&self) -> bool {
        self.phase == Phase::Loading || self.pending_load.is_some()
    }

    fn is_stale(
        &self,
        now: DateTime<Utc>,
        background: Option<Duration>,
        policy: &UnitPolicy,
    ) -> bool {
        let aged_out = self
            .loaded_at
            .is_some_and(|at| elapsed_between(at, now) > policy.max_age.as_duration());
        let long_background =
            background.is_some_and(|away| away > policy.background_staleness.as_duration());
        aged_out || long_background
    }

    fn plan(
        &self,
        now: DateTime<Utc>,
        background: Option<Duration>,
        policy: &UnitPolicy,
    ) -> Option<LoadPlan> {
        match self.phase {
            Phase::Showing => None,
            _ if self.handle.is_none() || self.is_stale(now, background, policy) => {
                Some(LoadPlan::Fresh)
            }
            Phase::Loaded => None,
            Phase::Idle | Phase::Loading => Some(LoadPlan::Reload),
        }
    }

    fn teardown(&mut self) -> Detached<H> {
        self.generation += 1;
        self.phase = Phase::Idle;
        self.loaded_at = None;
        Detached {
            _listeners: mem::take(&mut self.listeners),
            _handle: self.handle.take(),
            _presentation: self.presentation.take(),
        }
    }
}

struct UnitInner<A: AdNetworkAdapter> {
    config: AdUnitConfig,
    adapter: Arc<A>,
    preferences: Preferences,
    clock: Arc<dyn Clock>,
    state: Mutex<UnitState<A::Handle>>,
    status: watch::Sender<LoadStatus>,
}

impl<A: AdNetworkAdapter> UnitInner<A> {
    async fn ensure_loaded(self: &Arc<Self>, background: Option<Duration>) -> AdResult<()> {
        let load = {
            let mut state = self.state.lock();
            if let Some(error) = &state.unavailable {
                return Err(error.clone());
            }
            if let Some(pending) = &state.pending_load {
                debug!(format = %self.config.format, "joining in-flight load");
                pending.future.clone()
            } else {
                let now = self.clock.now();
                let Some(plan) = state.plan(now, background, &self.config.policy) else {
                    return Ok(());
                };
                let id = state.next_load_id;
                state.next_load_id += 1;
                let task = tokio::spawn(Arc::clone(self).run_load(id, plan).in_current_span());
                let future = async move { task.await.unwrap_or_else(|_| Err(AdError::Disposed)) }
                    .boxed()
                    .shared();
                state.pending_load = Some(PendingLoad {
                    id,
                    future: future.clone(),
                });
                future
            }
        };
        load.await
    }

    async fn run_load(self: Arc<Self>, id: u64, plan: LoadPlan) -> AdResult<()> {
        let outcome = match plan {
            LoadPlan::Reload => match self.reload().await {
                Err(AdError::Adapter(reason)) => {
                    debug!(
                        format = %self.config.format,
                        %reason,
                        "reload failed, rebuilding ad object"
                    );
                    self.load_fresh().await
                }
                other => other,
            },
            LoadPlan::Fresh => self.load_fresh().await,
        };

        {
            let mut state = self.state.lock();
            if state.pending_load.as_ref().is_some_and(|pending| pending.id == id) {
                state.pending_load = None;
            }
        }
        outcome
    }

    async fn reload(self: &Arc<Self>) -> AdResult<()> {
        let prepared = {
            let mut state = self.state.lock();
            match state.handle.clone() {
                Some(handle) => {
                    state.phase = Phase::Loading;
                    self.status.send_replace(LoadStatus::Pending);
                    Some((handle, state.generation, self.status.subscribe()))
                }
                None => None,
            }
        };
        let Some((handle, generation, status)) = prepared else {
            return self.load_fresh().await;
        };

        debug!(format = %self.config.format, generation, "reloading existing ad object");
        handle.load();
        self.await_outcome(generation, status).await
    }

    async fn load_fresh(self: &Arc<Self>) -> AdResult<()> {
        let (generation, detached) = {
            let mut state = self.state.lock();
            let detached = state.teardown();
            (state.generation, detached)
        };
        drop(detached);

        let consent = self.preferences.tracking_consent().await;
        let options = RequestOptions {
            non_personalized_only: !consent.allows_personalization(),
        };
        let handle = match self.adapter.create_for_request(
            self.config.format,
            &self.config.unit_id,
            options,
        ) {
            Ok(handle) => Arc::new(handle),
            Err(error) => {
                warn!(format = %self.config.format, %error, "could not create ad object");
                if !error.is_retryable() {
                    let mut state = self.state.lock();
                    if state.generation == generation {
                        state.unavailable = Some(error.clone());
                    }
                }
                return Err(error);
            }
        };
        let listeners = self.attach_listeners(&handle, generation);

        let status = {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.handle = Some(Arc::clone(&handle));
                state.listeners = listeners;
                state.phase = Phase::Loading;
                self.status.send_replace(LoadStatus::Pending);
                Some(self.status.subscribe())
            } else {
                None
            }
        };
        let Some(status) = status else {
            debug!(format = %self.config.format, "unit disposed while building ad object");
            return Err(AdError::Disposed);
        };

        debug!(
            format = %self.config.format,
            unit_id = %self.config.unit_id,
            generation,
            non_personalized = options.non_personalized_only,
            "loading new ad object"
        );
        handle.load();
        self.await_outcome(generation, status).await
    }

    async fn await_outcome(
        &self,
        generation: u64,
        mut status: watch::Receiver<LoadStatus>,
    ) -> AdResult<()> {
        let timeout = self.config.policy.load_timeout.as_duration();
        let settled = tokio::time::timeout(timeout, async {
            status
                .wait_for(LoadStatus::is_settled)
                .await
                .map(|status| status.outcome())
        })
        .await;

        match settled {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AdError::Disposed),
            Err(_) => {
                {
                    let mut state = self.state.lock();
                    if state.generation == generation && state.phase == Phase::Loading {
                        state.phase = Phase::Idle;
                    }
                }
                warn!(format = %self.config.format, ?timeout, "ad load timed out");
                Err(AdError::LoadTimeout {
                    format: self.config.format,
                    timeout,
                })
            }
        }
    }

    fn attach_listeners(self: &Arc<Self>, handle: &A::Handle, generation: u64) -> Vec<Subscription> {
        let mut kinds = vec![AdEventKind::Loaded, AdEventKind::Error, AdEventKind::Closed];
        if self.config.format.grants_reward() {
            kinds.push(AdEventKind::EarnedReward);
        }

        kinds
            .into_iter()
            .map(|kind| {
                let unit = Arc::downgrade(self);
                let listener: AdEventListener = Arc::new(move |event| {
                    if let Some(unit) = unit.upgrade() {
                        unit.handle_event(generation, event);
                    }
                });
                handle.add_event_listener(kind, listener)
            })
            .collect()
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: AdEvent) {
        match event {
            AdEvent::Loaded => self.on_loaded(generation),
            AdEvent::Error(message) => self.on_error(generation, message),
            AdEvent::Closed => self.on_closed(generation),
            AdEvent::EarnedReward(reward) => self.on_reward(generation, reward),
        }
    }

    fn on_loaded(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.phase == Phase::Showing {
                return;
            }
            state.phase = Phase::Loaded;
            state.loaded_at = Some(self.clock.now());
            self.status.send_replace(LoadStatus::Loaded);
        }
        debug!(format = %self.config.format, generation, "ad loaded");
    }

    fn on_error(&self, generation: u64, message: String) {
        let presentation = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.phase = Phase::Idle;
            state.loaded_at = None;
            self.status
                .send_replace(LoadStatus::Failed(AdError::Adapter(message.clone())));
            state.presentation.take()
        };
        warn!(format = %self.config.format, generation, %message, "ad network reported an error");
        if let Some(presentation) = presentation {
            presentation.finish();
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        let presentation = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.phase = Phase::Idle;
            state.loaded_at = None;
            state.presentation.take()
        };
        info!(format = %self.config.format, generation, "ad closed");
        if let Some(presentation) = presentation {
            presentation.finish();
        }
        self.schedule_reload();
    }

    fn on_reward(&self, generation: u64, reward: Reward) {
        let callback = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.presentation.as_mut().and_then(|presentation| {
                presentation.earned = true;
                presentation.on_reward.take()
            })
        };
        info!(
            format = %self.config.format,
            reward_type = %reward.kind,
            amount = reward.amount,
            "reward earned"
        );
        if let Some(callback) = callback {
            callback(reward);
        }
    }

    fn schedule_reload(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(format = %self.config.format, "no async runtime, skipping background reload");
            return;
        };
        let unit = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(error) = unit.ensure_loaded(None).await {
                debug!(format = %unit.config.format, %error, "background reload failed");
            }
        });
    }
}

/// Shared handle to one ad unit's lifecycle manager.
///
/// Cloning is cheap; every clone drives the same state machine, so the
/// app-foreground handler, buttons and screens can each keep one.
pub struct AdUnit<A: AdNetworkAdapter> {
    inner: Arc<UnitInner<A>>,
}

impl<A: AdNetworkAdapter> Clone for AdUnit<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: AdNetworkAdapter> fmt::Debug for AdUnit<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdUnit")
            .field("format", &self.inner.config.format)
            .field("unit_id", &self.inner.config.unit_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl<A: AdNetworkAdapter> AdUnit<A> {
    /// Creates an idle unit. Nothing is requested until the first
    /// `ensure_loaded` or `show`.
    pub fn new(
        config: AdUnitConfig,
        adapter: Arc<A>,
        preferences: Preferences,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(LoadStatus::Pending);
        Self {
            inner: Arc::new(UnitInner {
                config,
                adapter,
                preferences,
                clock,
                state: Mutex::new(UnitState::new()),
                status,
            }),
        }
    }

    /// The unit's configuration.
    pub fn config(&self) -> &AdUnitConfig {
        &self.inner.config
    }

    /// The unit's ad format.
    pub fn format(&self) -> AdFormat {
        self.inner.config.format
    }

    /// Placement id requested from the network.
    pub fn unit_id(&self) -> &AdUnitId {
        &self.inner.config.unit_id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// When the current ad finished loading, if it is loaded.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().loaded_at
    }

    /// True iff an ad is loaded and nothing is loading or on screen.
    pub fn is_ready(&self) -> bool {
        let state = self.inner.state.lock();
        state.phase == Phase::Loaded && !state.is_loading()
    }

    /// Makes sure a fresh ad is loaded.
    ///
    /// `background` is how long the app was in the background before this
    /// call, if it just returned to the foreground. Concurrent callers share
    /// one load; stale ads are replaced; a failed ad object is reloaded and
    /// rebuilt if that fails too. The load runs on its own Tokio task, so it
    /// settles even if every caller stops waiting.
    ///
    /// # Errors
    ///
    /// `LoadTimeout` when nothing settles within the policy deadline, or the
    /// adapter's error. Either way the unit is simply not ready. Once the
    /// adapter reports `ModuleUnavailable` that error is returned without
    /// asking the adapter again until [`cleanup`](Self::cleanup).
    pub async fn ensure_loaded(&self, background: Option<Duration>) -> AdResult<()> {
        self.inner.ensure_loaded(background).await
    }

    /// Presents the ad if possible, loading it first when needed.
    ///
    /// Returns `false` without touching the adapter when the unit is already
    /// loading or on screen. For reward-granting units the call resolves when
    /// the ad closes, to whether the reward was earned; `on_reward` runs at
    /// most once and always before that. Other units resolve `true` as soon as
    /// presentation starts. Failures are logged, never returned.
    pub async fn show(&self, on_reward: Option<RewardCallback>) -> bool {
        let Some(presenting) = self.present(on_reward).await else {
            return false;
        };
        if !self.format().grants_reward() {
            return true;
        }
        presenting.closed().await
    }

    /// Like [`show`](Self::show), but resolves as soon as the ad is on
    /// screen. `None` means nothing was presented.
    pub async fn present(&self, on_reward: Option<RewardCallback>) -> Option<Presenting> {
        let format = self.format();
        {
            let state = self.inner.state.lock();
            if state.phase == Phase::Showing || state.is_loading() {
                debug!(format = %format, phase = ?state.phase, "show ignored, unit busy");
                return None;
            }
        }

        match self.inner.ensure_loaded(None).await {
            Ok(()) => {}
            Err(AdError::ModuleUnavailable(reason))
                if format.grants_reward() && self.inner.config.reward_fallback.enabled =>
            {
                self.grant_fallback_reward(&reason, on_reward).await;
                return Some(Presenting {
                    outcome: PresentingOutcome::FallbackGranted,
                });
            }
            Err(error) => {
                debug!(format = %format, %error, "ad not ready, skipping show");
                return None;
            }
        }

        let (handle, generation, finished) = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Loaded {
                return None;
            }
            let handle = state.handle.clone()?;
            let (finished_tx, finished_rx) = oneshot::channel();
            state.phase = Phase::Showing;
            state.presentation = Some(Presentation {
                on_reward,
                earned: false,
                finished: Some(finished_tx),
            });
            (handle, state.generation, finished_rx)
        };

        info!(format = %format, unit_id = %self.inner.config.unit_id, "presenting ad");
        if let Err(error) = handle.show().await {
            {
                let mut state = self.inner.state.lock();
                if state.generation == generation && state.phase == Phase::Showing {
                    state.phase = Phase::Idle;
                    state.loaded_at = None;
                    state.presentation = None;
                }
            }
            warn!(format = %format, %error, "ad failed to present");
            return None;
        }

        Some(Presenting {
            outcome: PresentingOutcome::OnScreen(finished),
        })
    }

    async fn grant_fallback_reward(&self, reason: &str, on_reward: Option<RewardCallback>) {
        warn!(
            format = %self.format(),
            %reason,
            "ad module unavailable, granting fallback reward"
        );
        tokio::time::sleep(self.inner.config.reward_fallback.delay.as_duration()).await;
        if let Some(callback) = on_reward {
            callback(Reward::new("fallback", 1));
        }
    }

    /// Detaches listeners, drops the ad object and returns to `Idle`.
    ///
    /// Safe to call repeatedly and when nothing was ever loaded. A load in
    /// flight resolves with `AdError::Disposed`.
    pub fn cleanup(&self) {
        let detached = {
            let mut state = self.inner.state.lock();
            state.pending_load = None;
            state.unavailable = None;
            let detached = state.teardown();
            self.inner
                .status
                .send_replace(LoadStatus::Failed(AdError::Disposed));
            detached
        };
        drop(detached);
        debug!(format = %self.format(), "ad unit cleaned up");
    }
}

/// The app's three ad units, sharing one ad network.
pub struct AdUnits<A: AdNetworkAdapter> {
    /// App-open placement
    pub app_open: AdUnit<A>,
    /// Interstitial placement
    pub interstitial: AdUnit<A>,
    /// Rewarded placement
    pub rewarded: AdUnit<A>,
}

impl<A: AdNetworkAdapter> Clone for AdUnits<A> {
    fn clone(&self) -> Self {
        Self {
            app_open: self.app_open.clone(),
            interstitial: self.interstitial.clone(),
            rewarded: self.rewarded.clone(),
        }
    }
}

impl<A: AdNetworkAdapter> AdUnits<A> {
    /// Builds the three units from placement ids and configuration.
    pub fn new(
        adapter: Arc<A>,
        ids: &AdUnitIds,
        config: &AdsConfig,
        preferences: &Preferences,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        let build = |unit_config: AdUnitConfig| {
            AdUnit::new(
                unit_config.with_policy(config.unit),
                Arc::clone(&adapter),
                preferences.clone(),
                Arc::clone(clock),
            )
        };
        Self {
            app_open: build(AdUnitConfig::app_open(ids.app_open.clone())),
            interstitial: build(AdUnitConfig::interstitial(ids.interstitial.clone())),
            rewarded: build(
                AdUnitConfig::rewarded(ids.rewarded.clone())
                    .with_reward_fallback(config.reward_fallback),
            ),
        }
    }

    /// Whether any of the units has an ad on screen.
    pub fn is_any_showing(&self) -> bool {
        [&self.app_open, &self.interstitial, &self.rewarded]
            .iter()
            .any(|unit| unit.phase() == Phase::Showing)
    }

    /// Tears down every unit.
    pub fn cleanup(&self) {
        self.app_open.cleanup();
        self.interstitial.cleanup();
        self.rewarded.cleanup();
    }
}
