//! Quota enforcement under contention: the reservation counter never
//! exceeds the limit, and rejected reservations leave it untouched.

use async_trait::async_trait;
use proptest::prelude::*;
use scandeck_core::analytics::{AnalyticsAggregator, MemoryOutcomeStore};
use scandeck_core::cache::CacheProvider;
use scandeck_core::config::{
    AnalyticsConfig, CacheConfig, GovernorConfig, HealthConfig, MemoryCacheConfig, QueueConfig,
    RetryConfig,
};
use scandeck_core::error::{CoreError, Result};
use scandeck_core::governor::UsageGovernor;
use scandeck_core::pipeline::{ScanPipeline, ScanResponse};
use scandeck_core::queue::{MemoryQueueStore, OfflineQueue};
use scandeck_core::resilience::{HealthMonitor, RetryExecutor};
use scandeck_core::services::{
    Classification, Classifier, MemoryCollectionStore, MemorySubscriptionStore, ScanRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct SteadyClassifier;

#[async_trait]
impl Classifier for SteadyClassifier {
    async fn identify(&self, _request: &ScanRequest) -> Result<Classification> {
        Ok(Classification {
            card_id: "card-001".into(),
            card_name: "Ancient Dragon".into(),
            confidence: 0.91,
            model_version: "cardnet-v3".into(),
        })
    }
}

fn pipeline() -> Arc<ScanPipeline> {
    let monitor = Arc::new(HealthMonitor::new(HealthConfig::default()));
    let cache = Arc::new(CacheProvider::memory_only(
        &CacheConfig::default(),
        monitor.clone(),
    ));
    let governor = Arc::new(UsageGovernor::new(
        cache,
        Arc::new(MemorySubscriptionStore::new()),
        GovernorConfig {
            fallback_safety_margin: 0.0,
            ..GovernorConfig::default()
        },
    ));
    Arc::new(ScanPipeline::new(
        governor,
        Arc::new(SteadyClassifier),
        Arc::new(MemoryCollectionStore::new()),
        OfflineQueue::new(Arc::new(MemoryQueueStore::new()), QueueConfig::default()),
        RetryExecutor::new(monitor),
        Arc::new(AnalyticsAggregator::new(
            Arc::new(MemoryOutcomeStore::new()),
            AnalyticsConfig::default(),
        )),
        RetryConfig::default(),
    ))
}

fn request(user: &str, key: &str) -> ScanRequest {
    ScanRequest {
        user_id: user.into(),
        image_ref: format!("s3://scans/{key}.jpg"),
        idempotency_key: key.into(),
    }
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

/// With one scan of budget left, two simultaneous submissions admit
/// exactly one; the other is rejected with the quota error and does not
/// consume anything.
#[tokio::test]
async fn limit_edge_double_submit_admits_exactly_one() {
    let pipeline = pipeline();

    // Free tier: 10 scans per day. Burn 9.
    for i in 0..9 {
        let response = pipeline
            .submit_scan(request("u1", &format!("k{i}")), deadline())
            .await
            .unwrap();
        assert!(matches!(response, ScanResponse::Identified { .. }));
    }

    let a = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.submit_scan(request("u1", "edge-a"), deadline()).await }
    });
    let b = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.submit_scan(request("u1", "edge-b"), deadline()).await }
    });

    let results = [a.await.unwrap(), b.await.unwrap()];
    let admitted = results
        .iter()
        .filter(|r| matches!(r, Ok(ScanResponse::Identified { .. })))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::QuotaExceeded { .. })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(rejected, 1);

    // The counter is exactly at the limit: one more is also rejected.
    let err = pipeline
        .submit_scan(request("u1", "after-edge"), deadline())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// For any limit and any interleaving of reservation amounts across
    /// concurrent tasks, the admitted total never exceeds the limit and
    /// every rejection leaves the counter unchanged.
    #[test]
    fn admitted_total_never_exceeds_limit(
        limit in 1i64..50,
        amounts in proptest::collection::vec(1i64..5, 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            use scandeck_core::cache::{CacheService, MemoryCacheService};

            let cache = Arc::new(MemoryCacheService::from_config(
                &MemoryCacheConfig::default(),
                Duration::from_secs(60),
            ));

            let mut tasks = tokio::task::JoinSet::new();
            for amount in amounts {
                let cache = cache.clone();
                tasks.spawn(async move {
                    let outcome = cache
                        .incr_with_limit("usage:u1:scans:today", amount, limit, Duration::from_secs(60))
                        .await
                        .unwrap();
                    if outcome.applied { amount } else { 0 }
                });
            }

            let mut admitted_total = 0;
            while let Some(result) = tasks.join_next().await {
                admitted_total += result.unwrap();
            }

            let final_value = cache
                .incr_with_limit("usage:u1:scans:today", 0, limit, Duration::from_secs(60))
                .await
                .unwrap()
                .value;

            assert!(admitted_total <= limit, "admitted {admitted_total} > limit {limit}");
            assert_eq!(final_value, admitted_total, "rejections mutated the counter");
        });
    }
}
