//! Core types for AdCore.
//!
//! Ad formats, unit identifiers and reward payloads. Identifiers use smart
//! constructors so an `AdUnitId` is valid for its whole lifetime.

use std::fmt;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// The three ad placements the app monetises with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdFormat {
    /// Full-screen ad shown when the app returns to the foreground.
    AppOpen,
    /// Full-screen ad shown between interactions.
    Interstitial,
    /// Opt-in ad that grants a reward when watched to completion.
    Rewarded,
}

impl AdFormat {
    /// Whether units of this format emit `EarnedReward` events.
    pub const fn grants_reward(self) -> bool {
        matches!(self, Self::Rewarded)
    }

    /// Stable lowercase name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppOpen => "app-open",
            Self::Interstitial => "interstitial",
            Self::Rewarded => "rewarded",
        }
    }
}

impl fmt::Display for AdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ad network placement identifier.
///
/// Guaranteed non-empty after trimming.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AdUnitId(String);

/// Target platform, used to pick the matching placement ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Apple iOS
    Ios,
    /// Google Android
    Android,
}

/// Placement ids for the three units of one app build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdUnitIds {
    /// App-open placement
    pub app_open: AdUnitId,
    /// Interstitial placement
    pub interstitial: AdUnitId,
    /// Rewarded placement
    pub rewarded: AdUnitId,
}

impl AdUnitIds {
    /// Builds the id set from raw strings, rejecting empty ids.
    pub fn try_new(
        app_open: impl Into<String>,
        interstitial: impl Into<String>,
        rewarded: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let parse = |raw: String| {
            AdUnitId::try_new(raw).map_err(|error| ConfigError::UnitId(error.to_string()))
        };
        Ok(Self {
            app_open: parse(app_open.into())?,
            interstitial: parse(interstitial.into())?,
            rewarded: parse(rewarded.into())?,
        })
    }

    /// The ad network's public test placements for development builds.
    pub fn google_test_ids(platform: Platform) -> Self {
        let (app_open, interstitial, rewarded) = match platform {
            Platform::Ios => (
                "ca-app-pub-3940256099942544/5575463023",
                "ca-app-pub-3940256099942544/4411468910",
                "ca-app-pub-3940256099942544/1712485313",
            ),
            Platform::Android => (
                "ca-app-pub-3940256099942544/9257395921",
                "ca-app-pub-3940256099942544/1033173712",
                "ca-app-pub-3940256099942544/5224354917",
            ),
        };
        Self::try_new(app_open, interstitial, rewarded)
            .expect("test placement ids are non-empty literals")
    }

    /// The id configured for `format`.
    pub const fn for_format(&self, format: AdFormat) -> &AdUnitId {
        match format {
            AdFormat::AppOpen => &self.app_open,
            AdFormat::Interstitial => &self.interstitial,
            AdFormat::Rewarded => &self.rewarded,
        }
    }
}

/// Reward payload delivered by a rewarded ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// Reward type as configured in the ad network console
    #[serde(rename = "type")]
    pub kind: String,
    /// Reward amount
    pub amount: u32,
}

impl Reward {
    /// Creates a reward payload.
    pub fn new(kind: impl Into<String>, amount: u32) -> Self {
        Self {
            kind: kind.into(),
            amount,
        }
    }
}
