use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::advance;

use pricing::{PriceError, PriceKey, PricePoint, PriceStore};
use registry::{Attach, SourceRegistry};

fn btc_usd() -> PriceKey {
    PriceKey::current("BTC", "USD")
}

fn point(price: f64) -> PricePoint {
    PricePoint {
        timestamp: Utc::now(),
        price,
        market_cap: None,
    }
}

fn pending_rx(attach: Attach) -> oneshot::Receiver<Result<(), PriceError>> {
    match attach {
        Attach::Pending(rx) => rx,
        Attach::Streaming => panic!("expected a pending attach"),
    }
}

/// Let spawned eviction tasks run to completion on the paused runtime.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn first_subscribers_wait_and_batch_once() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let key = btc_usd();

    let a = registry.subscribe(&key).await;
    let b = registry.subscribe(&key).await;
    assert!(matches!(a, Attach::Pending(_)));
    assert!(matches!(b, Attach::Pending(_)));

    // Both consumers coalesce into a single fill entry.
    assert_eq!(registry.begin_fill().await, vec![key.clone()]);

    // The optimistic fetched flag keeps the key out of the next batch.
    assert!(registry.begin_fill().await.is_empty());
}

#[tokio::test]
async fn fill_success_releases_every_waiter() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let key = btc_usd();

    let rx1 = pending_rx(registry.subscribe(&key).await);
    let rx2 = pending_rx(registry.subscribe(&key).await);

    let batch = registry.begin_fill().await;
    store.set(&key, point(28_877.5)).await;
    registry
        .on_fill_success(&batch, &HashSet::from([key.clone()]))
        .await;

    assert_eq!(rx1.await.unwrap(), Ok(()));
    assert_eq!(rx2.await.unwrap(), Ok(()));

    // Later subscribers attach straight to the store.
    assert!(matches!(registry.subscribe(&key).await, Attach::Streaming));
}

#[tokio::test]
async fn missing_price_is_terminal_for_waiters_only() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let key = btc_usd();

    let rx = pending_rx(registry.subscribe(&key).await);

    let batch = registry.begin_fill().await;
    registry.on_fill_success(&batch, &HashSet::new()).await;

    assert_eq!(rx.await.unwrap(), Err(PriceError::MissingPrice(key.clone())));

    // Not a transport failure: the key is not rolled back for retry.
    assert!(registry.begin_fill().await.is_empty());
}

#[tokio::test]
async fn transport_failures_cap_after_two() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let key = btc_usd();
    let error = PriceError::Transport("connection refused".into());

    let rx = pending_rx(registry.subscribe(&key).await);

    // Tick 1 fails: waiter gets the error, key rolls back for retry.
    let batch = registry.begin_fill().await;
    assert_eq!(batch, vec![key.clone()]);
    registry.on_fill_failure(&batch, &error).await;
    assert_eq!(rx.await.unwrap(), Err(error.clone()));

    // Tick 2 retries and fails again.
    let batch = registry.begin_fill().await;
    assert_eq!(batch, vec![key.clone()]);
    registry.on_fill_failure(&batch, &error).await;

    // Tick 3: the key is excluded until an explicit reset.
    assert!(registry.begin_fill().await.is_empty());

    registry.reset_errors(&key).await;
    assert_eq!(registry.begin_fill().await, vec![key.clone()]);
}

#[tokio::test]
async fn refresh_candidates_are_current_keys_only() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let now_key = btc_usd();
    let then_key = PriceKey::historical("BTC", "USD", Utc::now());

    let _a = registry.subscribe(&now_key).await;
    let _b = registry.subscribe(&then_key).await;

    // Mark everything fetched; refresh still covers the current key.
    let batch = registry.begin_fill().await;
    assert_eq!(batch.len(), 2);

    assert_eq!(registry.refresh_candidates().await, vec![now_key]);
}

#[tokio::test(start_paused = true)]
async fn grace_period_absorbs_resubscription_churn() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::from_secs(5));
    let key = btc_usd();

    let _rx = pending_rx(registry.subscribe(&key).await);
    let batch = registry.begin_fill().await;
    store.set(&key, point(100.0)).await;
    registry
        .on_fill_success(&batch, &HashSet::from([key.clone()]))
        .await;

    // Last consumer leaves; the countdown starts.
    registry.release(&key).await;
    advance(Duration::from_millis(4_900)).await;
    settle().await;
    assert!(registry.active_keys().await.contains(&key));
    assert!(store.contains(&key).await);

    // A consumer returning just before expiry revives the key without a
    // fresh fetch.
    assert!(matches!(registry.subscribe(&key).await, Attach::Streaming));
    advance(Duration::from_millis(200)).await;
    settle().await;
    assert!(registry.active_keys().await.contains(&key));
    assert!(registry.begin_fill().await.is_empty());

    // This time nobody comes back.
    registry.release(&key).await;
    advance(Duration::from_secs(5)).await;
    settle().await;
    assert!(!registry.active_keys().await.contains(&key));
    assert!(!store.contains(&key).await);

    // A new subscription starts over with a fresh fetch.
    let _rx = pending_rx(registry.subscribe(&key).await);
    assert_eq!(registry.begin_fill().await, vec![key]);
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_release_and_subscribe_stay_consistent() {
    // Source and store entry must appear and disappear together: a
    // subscriber racing the eviction either attaches to a live cached
    // value or starts a fresh fetch, never a mix of the two.
    for _ in 0..50 {
        let store = PriceStore::new();
        let registry = SourceRegistry::new(store.clone(), Duration::ZERO);
        let key = btc_usd();

        let _rx = pending_rx(registry.subscribe(&key).await);
        let batch = registry.begin_fill().await;
        store.set(&key, point(100.0)).await;
        registry
            .on_fill_success(&batch, &HashSet::from([key.clone()]))
            .await;

        let releaser = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move { registry.release(&key).await })
        };

        match registry.subscribe(&key).await {
            Attach::Streaming => {
                assert!(store.get(&key).await.is_some());
            }
            Attach::Pending(_) => {
                assert_eq!(registry.begin_fill().await, vec![key.clone()]);
            }
        }

        releaser.await.unwrap();
    }
}

#[tokio::test]
async fn zero_grace_period_evicts_immediately() {
    let store = PriceStore::new();
    let registry = SourceRegistry::new(store.clone(), Duration::ZERO);
    let key = btc_usd();

    let _rx = pending_rx(registry.subscribe(&key).await);
    let batch = registry.begin_fill().await;
    store.set(&key, point(1.0)).await;
    registry
        .on_fill_success(&batch, &HashSet::from([key.clone()]))
        .await;

    registry.release(&key).await;
    assert!(registry.active_keys().await.is_empty());
    assert!(!store.contains(&key).await);
}
