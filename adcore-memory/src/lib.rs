//! In-memory collaborators for `AdCore`
//!
//! This crate provides scripted and in-memory implementations of the
//! external collaborators `adcore` depends on: an ad network whose load and
//! show outcomes are scripted and whose calls are recorded, a key-value store,
//! and a manually driven clock. Useful for testing and for development
//! builds where the real SDK is not linked.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adcore::{
    AdError, AdEvent, AdEventKind, AdEventListener, AdFormat, AdHandle, AdNetworkAdapter,
    AdResult, AdUnitId, Clock, KeyValueStore, RequestOptions, Reward, StorageError,
    StorageResult, Subscription,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// What a scripted ad does when `load()` is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBehavior {
    /// Emit `Loaded` immediately.
    Succeed,
    /// Emit `Loaded` after the delay (runs on the current tokio runtime).
    SucceedAfter(Duration),
    /// Emit `Error` immediately.
    Fail(String),
    /// Emit nothing; the test drives events with `emit`.
    Manual,
}

/// What a scripted ad does when `show()` is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowBehavior {
    /// Presentation starts; the listed events are emitted in order first.
    Present {
        /// Events emitted during presentation
        events: Vec<AdEvent>,
    },
    /// Presentation fails with an adapter error.
    Reject(String),
}

impl ShowBehavior {
    /// Presents and is dismissed right away.
    pub fn present_and_close() -> Self {
        Self::Present {
            events: vec![AdEvent::Closed],
        }
    }

    /// Presents, grants `reward`, then is dismissed.
    pub fn present_with_reward(reward: Reward) -> Self {
        Self::Present {
            events: vec![AdEvent::EarnedReward(reward), AdEvent::Closed],
        }
    }

    /// Presents and stays on screen until the test emits `Closed`.
    pub const fn stay_open() -> Self {
        Self::Present { events: Vec::new() }
    }
}

#[derive(Debug, Clone)]
struct Script {
    load: LoadBehavior,
    show: ShowBehavior,
    unavailable: Option<String>,
}

/// One recorded `create_for_request` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdRequest {
    /// Id of the ad object built for this request
    pub ad_id: Uuid,
    /// Requested ad format
    pub format: AdFormat,
    /// Requested placement
    pub unit_id: AdUnitId,
    /// Request options (personalization)
    pub options: RequestOptions,
}

struct AdState {
    id: Uuid,
    format: AdFormat,
    script: Arc<RwLock<Script>>,
    listeners: Mutex<Vec<(u64, AdEventKind, AdEventListener)>>,
    next_listener: AtomicU64,
    loads: AtomicUsize,
    shows: AtomicUsize,
}

/// A scripted ad object. Clones observe the same object.
#[derive(Clone)]
pub struct ScriptedAd {
    state: Arc<AdState>,
}

impl ScriptedAd {
    /// Unique id of this ad object.
    pub fn id(&self) -> Uuid {
        self.state.id
    }

    /// Format this object was created for.
    pub fn format(&self) -> AdFormat {
        self.state.format
    }

    /// Number of `load()` calls.
    pub fn load_count(&self) -> usize {
        self.state.loads.load(Ordering::SeqCst)
    }

    /// Number of `show()` calls.
    pub fn show_count(&self) -> usize {
        self.state.shows.load(Ordering::SeqCst)
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().len()
    }

    /// Delivers `event` to the listeners of its channel.
    ///
    /// Listeners run after the internal lock is released, so they may call
    /// back into this ad.
    pub fn emit(&self, event: AdEvent) {
        let kind = event.kind();
        let listeners: Vec<AdEventListener> = self
            .state
            .listeners
            .lock()
            .iter()
            .filter(|(_, listening, _)| *listening == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        tracing::debug!(ad = %self.state.id, ?event, listeners = listeners.len(), "emitting scripted event");
        for listener in listeners {
            listener(event.clone());
        }
    }
}

#[async_trait]
impl AdHandle for ScriptedAd {
    fn load(&self) {
        self.state.loads.fetch_add(1, Ordering::SeqCst);
        let behavior = self.state.script.read().load.clone();
        match behavior {
            LoadBehavior::Succeed => self.emit(AdEvent::Loaded),
            LoadBehavior::SucceedAfter(delay) => {
                let ad = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    ad.emit(AdEvent::Loaded);
                });
            }
            LoadBehavior::Fail(message) => self.emit(AdEvent::Error(message)),
            LoadBehavior::Manual => {}
        }
    }

    async fn show(&self) -> AdResult<()> {
        self.state.shows.fetch_add(1, Ordering::SeqCst);
        let behavior = self.state.script.read().show.clone();
        match behavior {
            ShowBehavior::Present { events } => {
                for event in events {
                    self.emit(event);
                }
                Ok(())
            }
            ShowBehavior::Reject(message) => Err(AdError::Adapter(message)),
        }
    }

    fn add_event_listener(&self, kind: AdEventKind, listener: AdEventListener) -> Subscription {
        let key = self.state.next_listener.fetch_add(1, Ordering::SeqCst);
        self.state.listeners.lock().push((key, kind, listener));
        let ad = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(ad) = ad.upgrade() {
                ad.listeners.lock().retain(|(existing, _, _)| *existing != key);
            }
        })
    }
}

/// Ad network double: scripted outcomes, recorded calls.
#[derive(Clone)]
pub struct ScriptedAdNetwork {
    script: Arc<RwLock<Script>>,
    requests: Arc<RwLock<Vec<AdRequest>>>,
    ads: Arc<RwLock<Vec<ScriptedAd>>>,
    refused: Arc<AtomicUsize>,
}

impl ScriptedAdNetwork {
    /// A network whose ads load and present (then close) immediately.
    pub fn new() -> Self {
        Self {
            script: Arc::new(RwLock::new(Script {
                load: LoadBehavior::Succeed,
                show: ShowBehavior::present_and_close(),
                unavailable: None,
            })),
            requests: Arc::new(RwLock::new(Vec::new())),
            ads: Arc::new(RwLock::new(Vec::new())),
            refused: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A network whose SDK module is missing.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let network = Self::new();
        network.script.write().unavailable = Some(reason.into());
        network
    }

    /// Sets the load behaviour for subsequent `load()` calls.
    #[must_use]
    pub fn with_load_behavior(self, behavior: LoadBehavior) -> Self {
        self.set_load_behavior(behavior);
        self
    }

    /// Sets the show behaviour for subsequent `show()` calls.
    #[must_use]
    pub fn with_show_behavior(self, behavior: ShowBehavior) -> Self {
        self.set_show_behavior(behavior);
        self
    }

    /// Changes the load behaviour.
    pub fn set_load_behavior(&self, behavior: LoadBehavior) {
        self.script.write().load = behavior;
    }

    /// Changes the show behaviour.
    pub fn set_show_behavior(&self, behavior: ShowBehavior) {
        self.script.write().show = behavior;
    }

    /// Every request made so far, oldest first.
    pub fn requests(&self) -> Vec<AdRequest> {
        self.requests.read().clone()
    }

    /// Requests turned away because the module is missing.
    pub fn refused_requests(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    /// Requests made for `format`.
    pub fn requests_for(&self, format: AdFormat) -> Vec<AdRequest> {
        self.requests
            .read()
            .iter()
            .filter(|request| request.format == format)
            .cloned()
            .collect()
    }

    /// Ad objects created for `format`, oldest first.
    pub fn ads_for(&self, format: AdFormat) -> Vec<ScriptedAd> {
        self.ads
            .read()
            .iter()
            .filter(|ad| ad.format() == format)
            .cloned()
            .collect()
    }

    /// The most recently created ad object for `format`.
    pub fn latest(&self, format: AdFormat) -> Option<ScriptedAd> {
        self.ads
            .read()
            .iter()
            .rev()
            .find(|ad| ad.format() == format)
            .cloned()
    }

    /// Total `load()` calls across all ad objects of `format`.
    pub fn loads_for(&self, format: AdFormat) -> usize {
        self.ads_for(format).iter().map(ScriptedAd::load_count).sum()
    }

    /// Total `show()` calls across all ad objects of `format`.
    pub fn shows_for(&self, format: AdFormat) -> usize {
        self.ads_for(format).iter().map(ScriptedAd::show_count).sum()
    }

    /// Emits `event` on the latest ad object of `format`; returns whether one
    /// existed.
    pub fn emit(&self, format: AdFormat, event: AdEvent) -> bool {
        match self.latest(format) {
            Some(ad) => {
                ad.emit(event);
                true
            }
            None => false,
        }
    }
}

impl Default for ScriptedAdNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl AdNetworkAdapter for ScriptedAdNetwork {
    type Handle = ScriptedAd;

    fn create_for_request(
        &self,
        format: AdFormat,
        unit_id: &AdUnitId,
        options: RequestOptions,
    ) -> AdResult<Self::Handle> {
        if let Some(reason) = self.script.read().unavailable.clone() {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return Err(AdError::ModuleUnavailable(reason));
        }

        let ad = ScriptedAd {
            state: Arc::new(AdState {
                id: Uuid::now_v7(),
                format,
                script: Arc::clone(&self.script),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                loads: AtomicUsize::new(0),
                shows: AtomicUsize::new(0),
            }),
        };
        self.requests.write().push(AdRequest {
            ad_id: ad.id(),
            format,
            unit_id: unit_id.clone(),
            options,
        });
        self.ads.write().push(ad.clone());
        Ok(ad)
    }
}

/// Thread-safe in-memory key-value store for testing
#[derive(Clone, Default)]
pub struct InMemoryKeyValueStore {
    values: Arc<RwLock<HashMap<String, String>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl InMemoryKeyValueStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates `key`.
    #[must_use]
    pub fn with_value(self, key: &str, value: impl Into<String>) -> Self {
        self.values.write().insert(key.to_string(), value.into());
        self
    }

    /// Reads `key` without going through the async trait.
    pub fn value(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Makes every subsequent operation fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Clears an injected failure.
    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    fn check(&self) -> StorageResult<()> {
        match self.failure.read().as_ref() {
            Some(message) => Err(StorageError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.check()?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
        )
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_id() -> AdUnitId {
        AdUnitId::try_new("ca-app-pub-0000/interstitial").expect("valid unit id")
    }

    fn recording_listener(seen: &Arc<Mutex<Vec<AdEvent>>>) -> AdEventListener {
        let seen = Arc::clone(seen);
        Arc::new(move |event| seen.lock().push(event))
    }

    #[test]
    fn requests_are_recorded_per_format() {
        // Given: A network
        let network = ScriptedAdNetwork::new();

        // When: Two formats are requested
        let first = network
            .create_for_request(AdFormat::Interstitial, &unit_id(), RequestOptions::default())
            .expect("network available");
        network
            .create_for_request(
                AdFormat::Rewarded,
                &unit_id(),
                RequestOptions {
                    non_personalized_only: true,
                },
            )
            .expect("network available");

        // Then: Each request is recorded with its options
        assert_eq!(network.requests().len(), 2);
        let interstitials = network.requests_for(AdFormat::Interstitial);
        assert_eq!(interstitials.len(), 1);
        assert_eq!(interstitials[0].ad_id, first.id());
        assert!(network.requests_for(AdFormat::Rewarded)[0].options.non_personalized_only);
        assert_eq!(network.latest(AdFormat::Interstitial).map(|ad| ad.id()), Some(first.id()));
    }

    #[test]
    fn unavailable_network_refuses_requests() {
        let network = ScriptedAdNetwork::unavailable("module not linked");

        let result =
            network.create_for_request(AdFormat::Rewarded, &unit_id(), RequestOptions::default());

        assert!(matches!(result, Err(AdError::ModuleUnavailable(reason)) if reason == "module not linked"));
        assert!(network.requests().is_empty());
        assert_eq!(network.refused_requests(), 1);
    }

    #[test]
    fn load_follows_the_script() {
        // Given: An ad with listeners on both load channels
        let network = ScriptedAdNetwork::new().with_load_behavior(LoadBehavior::Fail("no fill".into()));
        let ad = network
            .create_for_request(AdFormat::Interstitial, &unit_id(), RequestOptions::default())
            .expect("network available");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _loaded = ad.add_event_listener(AdEventKind::Loaded, recording_listener(&seen));
        let _errors = ad.add_event_listener(AdEventKind::Error, recording_listener(&seen));

        // When: The ad is loaded once failing and once succeeding
        ad.load();
        network.set_load_behavior(LoadBehavior::Succeed);
        ad.load();

        // Then: Each listener saw only its own channel
        assert_eq!(
            *seen.lock(),
            vec![AdEvent::Error("no fill".into()), AdEvent::Loaded]
        );
        assert_eq!(ad.load_count(), 2);
    }

    #[test]
    fn dropping_a_subscription_detaches_the_listener() {
        let network = ScriptedAdNetwork::new();
        let ad = network
            .create_for_request(AdFormat::AppOpen, &unit_id(), RequestOptions::default())
            .expect("network available");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = ad.add_event_listener(AdEventKind::Closed, recording_listener(&seen));
        assert_eq!(ad.listener_count(), 1);

        drop(subscription);
        ad.emit(AdEvent::Closed);

        assert_eq!(ad.listener_count(), 0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn show_emits_presentation_events_in_order() {
        // Given: A rewarded ad scripted to grant a reward then close
        let reward = Reward::new("coins", 5);
        let network =
            ScriptedAdNetwork::new().with_show_behavior(ShowBehavior::present_with_reward(reward.clone()));
        let ad = network
            .create_for_request(AdFormat::Rewarded, &unit_id(), RequestOptions::default())
            .expect("network available");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _reward = ad.add_event_listener(AdEventKind::EarnedReward, recording_listener(&seen));
        let _closed = ad.add_event_listener(AdEventKind::Closed, recording_listener(&seen));

        // When: The ad is shown
        let result = tokio_test::block_on(ad.show());

        // Then: The reward arrives before the close
        assert_eq!(result, Ok(()));
        assert_eq!(*seen.lock(), vec![AdEvent::EarnedReward(reward), AdEvent::Closed]);
        assert_eq!(network.shows_for(AdFormat::Rewarded), 1);
    }

    #[test]
    fn rejected_show_reports_an_adapter_error() {
        let network = ScriptedAdNetwork::new().with_show_behavior(ShowBehavior::Reject("no activity".into()));
        let ad = network
            .create_for_request(AdFormat::Interstitial, &unit_id(), RequestOptions::default())
            .expect("network available");

        let result = tokio_test::block_on(ad.show());

        assert_eq!(result, Err(AdError::Adapter("no activity".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_load_emits_after_the_delay() {
        let network = ScriptedAdNetwork::new()
            .with_load_behavior(LoadBehavior::SucceedAfter(Duration::from_millis(250)));
        let ad = network
            .create_for_request(AdFormat::Interstitial, &unit_id(), RequestOptions::default())
            .expect("network available");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _loaded = ad.add_event_listener(AdEventKind::Loaded, recording_listener(&seen));

        ad.load();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*seen.lock(), vec![AdEvent::Loaded]);
    }

    #[test]
    fn store_round_trips_and_injects_failures() {
        tokio_test::block_on(async {
            let store = InMemoryKeyValueStore::new().with_value("a", "1");
            assert_eq!(store.get("a").await, Ok(Some("1".to_string())));

            store.fail_with("disk full");
            assert_eq!(
                store.set("b", "2".to_string()).await,
                Err(StorageError::Backend("disk full".into()))
            );

            store.recover();
            store.set("b", "2".to_string()).await.expect("store recovered");
            assert_eq!(store.value("b").as_deref(), Some("2"));
        });
    }

    #[test]
    fn manual_clock_only_moves_when_told() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
