//! Validated configuration for ad units and the app lifecycle coordinator.
//!
//! Every threshold is a `nutype` newtype with explicit bounds, so a
//! configuration that deserializes is a configuration that makes sense.
//! The defaults are the product-tuned values the app ships with.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// How long `ensure_loaded` waits for LOADED/ERROR, in milliseconds.
///
/// Validated to be between 1 second and 1 minute.
#[nutype(
    validate(greater_or_equal = 1_000, less_or_equal = 60_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct LoadTimeoutMs(u64);

impl LoadTimeoutMs {
    /// Convert to Duration for use with tokio::time::timeout.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Age after which a loaded ad is stale, in seconds.
///
/// Validated to be between 1 minute and 24 hours.
#[nutype(
    validate(greater_or_equal = 60, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxAdAgeSecs(u64);

impl MaxAdAgeSecs {
    /// Convert to Duration for staleness checks.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into())
    }
}

/// Background interval after which a loaded ad is stale, in seconds.
///
/// Validated to be between 1 minute and 24 hours.
#[nutype(
    validate(greater_or_equal = 60, less_or_equal = 86_400),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackgroundStalenessSecs(u64);

impl BackgroundStalenessSecs {
    /// Convert to Duration for staleness checks.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into())
    }
}

/// A short gating window in milliseconds (cooldowns, debounce, grace).
///
/// Validated to be at most 10 minutes; zero disables the window.
#[nutype(
    validate(less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct WindowMs(u64);

impl WindowMs {
    /// Convert to Duration for comparisons against elapsed time.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Minimum spacing between user-triggered interstitials, in seconds.
///
/// Validated to be between 1 second and 1 hour.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3_600),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct InterstitialIntervalSecs(u64);

impl InterstitialIntervalSecs {
    /// Convert to Duration for interval checks.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into())
    }
}

fn window(ms: u64) -> WindowMs {
    WindowMs::try_new(ms).expect("default window is within bounds")
}

/// Load and staleness rules shared by every ad unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitPolicy {
    /// Deadline for a load to reach `Loaded`.
    pub load_timeout: LoadTimeoutMs,
    /// Loaded ads older than this are discarded before use.
    pub max_age: MaxAdAgeSecs,
    /// Loaded ads are discarded after a background interval longer than this.
    pub background_staleness: BackgroundStalenessSecs,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self {
            load_timeout: LoadTimeoutMs::try_new(10_000).expect("10s is a valid load timeout"),
            max_age: MaxAdAgeSecs::try_new(4 * 60 * 60).expect("4h is a valid max age"),
            background_staleness: BackgroundStalenessSecs::try_new(30 * 60)
                .expect("30min is a valid background staleness"),
        }
    }
}

/// Development fallback for a rewarded unit whose SDK module is missing.
///
/// When enabled, `show` synthesizes a reward after `delay` instead of
/// failing. Off by default; production builds should leave it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardFallback {
    /// Whether the fallback is active.
    pub enabled: bool,
    /// Pause before the synthetic reward is granted.
    pub delay: WindowMs,
}

impl RewardFallback {
    /// An enabled fallback with the default delay.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

impl Default for RewardFallback {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: window(1_000),
        }
    }
}

/// Gates applied when the app returns to the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForegroundPolicy {
    /// Foreground transitions closer together than this are ignored.
    /// `None` disables the debounce (platforms without rapid-fire events).
    pub transition_debounce: Option<WindowMs>,
    /// No app-open ad if one was shown this recently.
    pub recent_show_guard: WindowMs,
    /// No app-open ad if any ad was shown this recently.
    pub other_ad_cooldown: WindowMs,
    /// Minimum time in background before an app-open ad is considered.
    pub min_background: WindowMs,
    /// How long the "presenting app-open" flag stays set after a show.
    pub presenting_grace: WindowMs,
}

impl Default for ForegroundPolicy {
    fn default() -> Self {
        Self {
            transition_debounce: Some(window(500)),
            recent_show_guard: window(2_000),
            other_ad_cooldown: window(10_000),
            min_background: window(3_000),
            presenting_grace: window(2_000),
        }
    }
}

/// Spacing for user-triggered interstitials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterstitialPolicy {
    /// At most one interstitial per this interval.
    pub min_interval: InterstitialIntervalSecs,
}

impl Default for InterstitialPolicy {
    fn default() -> Self {
        Self {
            min_interval: InterstitialIntervalSecs::try_new(60)
                .expect("60s is a valid interstitial interval"),
        }
    }
}

/// Complete ad configuration.
///
/// # Examples
///
/// ```rust,ignore
/// use adcore::config::AdsConfig;
///
/// let config = AdsConfig::from_json_str(r#"{ "unit": { "load_timeout": 5000 } }"#)?;
/// assert_eq!(config.unit.load_timeout.as_duration().as_secs(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsConfig {
    /// Load and staleness rules for every unit.
    pub unit: UnitPolicy,
    /// Foreground app-open gates.
    pub foreground: ForegroundPolicy,
    /// User-triggered interstitial spacing.
    pub interstitial: InterstitialPolicy,
    /// Rewarded-unit fallback for a missing SDK module.
    pub reward_fallback: RewardFallback,
}

impl AdsConfig {
    /// Parses a JSON document; missing sections and fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_constants() {
        let config = AdsConfig::default();

        assert_eq!(config.unit.load_timeout.as_duration(), Duration::from_secs(10));
        assert_eq!(config.unit.max_age.as_duration(), Duration::from_secs(4 * 3_600));
        assert_eq!(
            config.unit.background_staleness.as_duration(),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            config.foreground.transition_debounce.map(WindowMs::as_duration),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            config.foreground.min_background.as_duration(),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.foreground.other_ad_cooldown.as_duration(),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.interstitial.min_interval.as_duration(),
            Duration::from_secs(60)
        );
        assert!(!config.reward_fallback.enabled);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = AdsConfig::from_json_str(r#"{ "unit": { "load_timeout": 5000 } }"#)
            .expect("valid config");

        assert_eq!(config.unit.load_timeout.as_duration(), Duration::from_secs(5));
        assert_eq!(config.unit.max_age, UnitPolicy::default().max_age);
        assert_eq!(config.foreground, ForegroundPolicy::default());
    }

    #[test]
    fn out_of_bounds_timeout_is_rejected() {
        let result = AdsConfig::from_json_str(r#"{ "unit": { "load_timeout": 10 } }"#);

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn debounce_can_be_disabled() {
        let config =
            AdsConfig::from_json_str(r#"{ "foreground": { "transition_debounce": null } }"#)
                .expect("valid config");

        assert_eq!(config.foreground.transition_debounce, None);
    }

    #[test]
    fn window_rejects_values_over_ten_minutes() {
        assert!(WindowMs::try_new(600_001).is_err());
        assert!(WindowMs::try_new(0).is_ok());
    }
}
