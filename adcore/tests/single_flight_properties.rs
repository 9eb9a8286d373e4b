//! Property tests for load deduplication and staleness.

use std::sync::Arc;
use std::time::Duration;

use adcore::{AdFormat, AdUnit, AdUnitConfig, AdUnitId, Preferences};
use adcore_memory::{InMemoryKeyValueStore, LoadBehavior, ManualClock, ScriptedAdNetwork};
use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime builds")
}

fn interstitial(network: &ScriptedAdNetwork, clock: &ManualClock) -> AdUnit<ScriptedAdNetwork> {
    AdUnit::new(
        AdUnitConfig::interstitial(
            AdUnitId::try_new("ca-app-pub-0000000000000000/interstitial").expect("valid unit id"),
        ),
        Arc::new(network.clone()),
        Preferences::new(Arc::new(InMemoryKeyValueStore::new())),
        Arc::new(clock.clone()),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn concurrent_callers_never_issue_more_than_one_load(
        callers in 1usize..24,
        fill_delay_ms in 1u64..5_000,
    ) {
        let network = ScriptedAdNetwork::new()
            .with_load_behavior(LoadBehavior::SucceedAfter(Duration::from_millis(fill_delay_ms)));
        let clock = ManualClock::default();
        let unit = interstitial(&network, &clock);

        let results = paused_runtime().block_on(async {
            futures::future::join_all((0..callers).map(|_| unit.ensure_loaded(None))).await
        });

        prop_assert!(results.iter().all(Result::is_ok));
        prop_assert_eq!(network.requests_for(AdFormat::Interstitial).len(), 1);
        prop_assert_eq!(network.loads_for(AdFormat::Interstitial), 1);
        prop_assert!(unit.is_ready());
    }

    #[test]
    fn ad_is_rebuilt_only_after_it_ages_out(age_secs in 0u64..(8 * 60 * 60)) {
        let network = ScriptedAdNetwork::new();
        let clock = ManualClock::default();
        let unit = interstitial(&network, &clock);

        paused_runtime().block_on(async {
            unit.ensure_loaded(None).await.expect("first load succeeds");
            clock.advance(Duration::from_secs(age_secs));
            unit.ensure_loaded(None).await.expect("second call succeeds");
        });

        let expected_requests = if age_secs > 4 * 60 * 60 { 2 } else { 1 };
        prop_assert_eq!(
            network.requests_for(AdFormat::Interstitial).len(),
            expected_requests
        );
    }

    #[test]
    fn background_longer_than_half_an_hour_forces_a_fresh_ad(away_secs in 0u64..(2 * 60 * 60)) {
        let network = ScriptedAdNetwork::new();
        let clock = ManualClock::default();
        let unit = interstitial(&network, &clock);

        paused_runtime().block_on(async {
            unit.ensure_loaded(None).await.expect("first load succeeds");
            unit.ensure_loaded(Some(Duration::from_secs(away_secs)))
                .await
                .expect("foreground call succeeds");
        });

        let expected_requests = if away_secs > 30 * 60 { 2 } else { 1 };
        prop_assert_eq!(
            network.requests_for(AdFormat::Interstitial).len(),
            expected_requests
        );
    }
}
