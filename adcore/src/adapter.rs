//! Boundary to the ad network SDK.
//!
//! The SDK is consumed as a black box: it builds a loadable ad object per
//! request, `load()` is fire-and-forget, `show()` resolves once presentation
//! has started, and everything else arrives as events on listeners attached
//! to the ad object.
//!
//! Implementations must not invoke listeners while holding locks that
//! `load()`, `show()` or unsubscribing also take; the lifecycle manager calls
//! back into the adapter from its listeners' side effects.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AdResult;
use crate::types::{AdFormat, AdUnitId, Reward};

/// Options attached to an ad request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Request only non-personalized ads (no tracking consent).
    pub non_personalized_only: bool,
}

/// Events an ad object emits over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    /// The ad finished loading and can be shown.
    Loaded,
    /// Loading or presentation failed.
    Error(String),
    /// The user dismissed the ad.
    Closed,
    /// The user earned the reward (rewarded ads only).
    EarnedReward(Reward),
}

impl AdEvent {
    /// The listener channel this event is delivered on.
    pub const fn kind(&self) -> AdEventKind {
        match self {
            Self::Loaded => AdEventKind::Loaded,
            Self::Error(_) => AdEventKind::Error,
            Self::Closed => AdEventKind::Closed,
            Self::EarnedReward(_) => AdEventKind::EarnedReward,
        }
    }
}

/// Listener channels on an ad object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdEventKind {
    /// `AdEvent::Loaded`
    Loaded,
    /// `AdEvent::Error`
    Error,
    /// `AdEvent::Closed`
    Closed,
    /// `AdEvent::EarnedReward`
    EarnedReward,
}

/// Callback invoked for each event on a channel.
pub type AdEventListener = Arc<dyn Fn(AdEvent) + Send + Sync>;

/// Detaches a listener when dropped or explicitly unsubscribed.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wraps the adapter's unsubscribe action.
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Detaches the listener now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.unsubscribe.is_some())
            .finish()
    }
}

/// One loadable ad object.
#[async_trait]
pub trait AdHandle: Send + Sync + 'static {
    /// Starts loading. Completion is reported as `Loaded` or `Error`.
    fn load(&self);

    /// Presents the ad. Resolves once presentation started; rejects when the
    /// ad cannot be presented.
    async fn show(&self) -> AdResult<()>;

    /// Attaches `listener` to the `kind` channel.
    fn add_event_listener(&self, kind: AdEventKind, listener: AdEventListener) -> Subscription;
}

/// The ad network SDK.
pub trait AdNetworkAdapter: Send + Sync + 'static {
    /// Ad object type produced by this network.
    type Handle: AdHandle;

    /// Builds a new ad object for the placement.
    ///
    /// Fails with `AdError::ModuleUnavailable` when the SDK is not usable in
    /// this process.
    fn create_for_request(
        &self,
        format: AdFormat,
        unit_id: &AdUnitId,
        options: RequestOptions,
    ) -> AdResult<Self::Handle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dropping_a_subscription_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&detached);

        let subscription = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(format!("{subscription:?}"), "Subscription { attached: true }");
        subscription.unsubscribe();

        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_map_to_their_channel() {
        assert_eq!(AdEvent::Loaded.kind(), AdEventKind::Loaded);
        assert_eq!(AdEvent::Error("x".into()).kind(), AdEventKind::Error);
        assert_eq!(
            AdEvent::EarnedReward(Reward::new("coins", 1)).kind(),
            AdEventKind::EarnedReward
        );
    }
}
