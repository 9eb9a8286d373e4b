//! Persisted flags the ad layer reads and writes.
//!
//! The backend is a string key-value store owned by the app; this module
//! gives the handful of keys the ad layer touches typed accessors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::errors::{StorageError, StorageResult};

/// Storage key for the tracking-consent choice.
pub const TRACKING_CONSENT_KEY: &str = "trackingConsent";
/// Storage key for the last time any ad was shown (epoch millis).
pub const LAST_AD_SHOWN_KEY: &str = "lastAdShownTime";
/// Storage key for the JSON array of unlocked deck ids.
pub const UNLOCKED_DECKS_KEY: &str = "unlockedDecks";
/// Storage key for the onboarding flag.
pub const ONBOARDING_COMPLETED_KEY: &str = "onboardingCompleted";

/// String key-value persistence.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Reads a value; `None` when the key was never written.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes a value.
    async fn set(&self, key: &str, value: String) -> StorageResult<()>;
}

/// The user's tracking-consent choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingConsent {
    /// Personalized ads allowed.
    Granted,
    /// Personalized ads refused.
    Denied,
    /// The user has not been asked yet.
    Unknown,
}

impl TrackingConsent {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("granted") => Self::Granted,
            Some("denied") => Self::Denied,
            _ => Self::Unknown,
        }
    }

    /// Only an explicit grant allows personalized requests.
    pub const fn allows_personalization(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Typed view over the app's key-value store.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    /// Wraps a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The stored consent; unreadable storage counts as `Unknown`.
    pub async fn tracking_consent(&self) -> TrackingConsent {
        match self.store.get(TRACKING_CONSENT_KEY).await {
            Ok(raw) => TrackingConsent::parse(raw.as_deref()),
            Err(error) => {
                tracing::warn!(%error, "could not read tracking consent, assuming none");
                TrackingConsent::Unknown
            }
        }
    }

    /// Records the user's consent choice.
    pub async fn set_tracking_consent(&self, granted: bool) -> StorageResult<()> {
        let value = if granted { "granted" } else { "denied" };
        self.store.set(TRACKING_CONSENT_KEY, value.to_string()).await
    }

    /// When any ad was last shown.
    pub async fn last_ad_shown(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(LAST_AD_SHOWN_KEY).await? else {
            return Ok(None);
        };
        let millis: i64 = raw.trim().parse().map_err(|error: std::num::ParseIntError| {
            StorageError::Malformed {
                key: LAST_AD_SHOWN_KEY.to_string(),
                detail: error.to_string(),
            }
        })?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or_else(|| StorageError::Malformed {
                key: LAST_AD_SHOWN_KEY.to_string(),
                detail: format!("{millis} is out of range"),
            })
    }

    /// Records that an ad was shown at `at`.
    pub async fn set_last_ad_shown(&self, at: DateTime<Utc>) -> StorageResult<()> {
        self.store
            .set(LAST_AD_SHOWN_KEY, at.timestamp_millis().to_string())
            .await
    }

    /// Whether onboarding finished; unreadable storage counts as not finished.
    pub async fn onboarding_completed(&self) -> bool {
        match self.store.get(ONBOARDING_COMPLETED_KEY).await {
            Ok(raw) => raw.as_deref() == Some("true"),
            Err(error) => {
                tracing::warn!(%error, "could not read onboarding flag");
                false
            }
        }
    }

    /// Marks onboarding as finished.
    pub async fn complete_onboarding(&self) -> StorageResult<()> {
        self.store
            .set(ONBOARDING_COMPLETED_KEY, "true".to_string())
            .await
    }

    /// Deck ids unlocked so far, in unlock order.
    pub async fn unlocked_decks(&self) -> StorageResult<Vec<String>> {
        let Some(raw) = self.store.get(UNLOCKED_DECKS_KEY).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|error| StorageError::Malformed {
            key: UNLOCKED_DECKS_KEY.to_string(),
            detail: error.to_string(),
        })
    }

    /// Adds `deck_id` to the unlocked set; unlocking twice is a no-op.
    pub async fn unlock_deck(&self, deck_id: &str) -> StorageResult<()> {
        let mut decks = self.unlocked_decks().await?;
        if decks.iter().any(|deck| deck == deck_id) {
            return Ok(());
        }
        decks.push(deck_id.to_string());
        let raw = serde_json::to_string(&decks).map_err(|error| StorageError::Malformed {
            key: UNLOCKED_DECKS_KEY.to_string(),
            detail: error.to_string(),
        })?;
        self.store.set(UNLOCKED_DECKS_KEY, raw).await
    }
}
