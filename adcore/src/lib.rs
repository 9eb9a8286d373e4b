//! `AdCore` - ad unit lifecycle management for app-open, interstitial and
//! rewarded ads.
//!
//! One generic [`AdUnit`] owns a placement's load/show state machine with
//! single-flight loading, staleness expiry and a show gate; three thin
//! configurations instantiate it per format. The [`AppLifecycleCoordinator`]
//! reacts to foreground/background transitions and user triggers under
//! cooldown rules. The ad network SDK and the key-value store are external
//! collaborators behind the [`AdNetworkAdapter`] and [`KeyValueStore`]
//! traits.
//!
//! ```rust,ignore
//! use adcore::{AdUnits, AdUnitIds, AdsConfig, AppLifecycleCoordinator, AppState, Platform};
//!
//! let units = AdUnits::new(network, &AdUnitIds::google_test_ids(Platform::Android),
//!     &AdsConfig::default(), &preferences, &clock);
//! let coordinator = AppLifecycleCoordinator::new(units, preferences, clock, AdsConfig::default());
//!
//! coordinator.handle_app_state_change(AppState::Background).await;
//! let decision = coordinator.handle_app_state_change(AppState::Active).await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod logging;
pub mod preferences;
pub mod types;
pub mod unit;

pub use adapter::{
    AdEvent, AdEventKind, AdEventListener, AdHandle, AdNetworkAdapter, RequestOptions,
    Subscription,
};
pub use clock::{Clock, SystemClock};
pub use config::{AdsConfig, ForegroundPolicy, InterstitialPolicy, RewardFallback, UnitPolicy};
pub use coordinator::{AppLifecycleCoordinator, AppState, ForegroundDecision, SkipReason};
pub use errors::{AdError, AdResult, ConfigError, StorageError, StorageResult};
pub use preferences::{KeyValueStore, Preferences, TrackingConsent};
pub use types::{AdFormat, AdUnitId, AdUnitIds, Platform, Reward};
pub use unit::{AdUnit, AdUnitConfig, AdUnits, Phase, Presenting, RewardCallback};
