//! Resource pool concurrency integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opsgate::{OpsError, PoolKey, PoolRegistry, ResourcePool, Scope};

/// Handle whose identity is the order in which it was built
#[derive(Debug)]
struct Session {
    serial: usize,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_acquire_constructs_once() {
    let pool: Arc<ResourcePool<Session>> = Arc::new(ResourcePool::new("sessions"));
    let built = Arc::new(AtomicUsize::new(0));
    let key = PoolKey::new(["prod", "us-east-1"]);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..32 {
        let pool = Arc::clone(&pool);
        let built = Arc::clone(&built);
        let key = key.clone();
        tasks.spawn(async move {
            pool.acquire(&key, &Scope::new(), move |_, _| async move {
                // Widen the race window so callers pile up on the write lock
                tokio::time::sleep(Duration::from_millis(20)).await;
                let serial = built.fetch_add(1, Ordering::SeqCst);
                Ok::<_, OpsError>(Session { serial })
            })
            .await
        });
    }

    let handles: Vec<Arc<Session>> = tasks
        .join_all()
        .await
        .into_iter()
        .map(|acquired| acquired.expect("acquire should succeed"))
        .collect();

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(handles.len(), 32);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(handles[0].serial, 0);

    let stats = pool.stats().await;
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.constructions, 1);
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_handles() {
    let pool: Arc<ResourcePool<Session>> = Arc::new(ResourcePool::new("sessions"));
    let registry = PoolRegistry::new().with_pool(pool.clone());
    let scope = Scope::new();
    let built = &AtomicUsize::new(0);

    let a = pool
        .acquire(&PoolKey::new(["prod", "us-east-1"]), &scope, move |_, _| async move {
            Ok::<_, OpsError>(Session {
                serial: built.fetch_add(1, Ordering::SeqCst),
            })
        })
        .await
        .unwrap();
    let b = pool
        .acquire(&PoolKey::new(["prod", "eu-west-1"]), &scope, move |_, _| async move {
            Ok::<_, OpsError>(Session {
                serial: built.fetch_add(1, Ordering::SeqCst),
            })
        })
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(a.serial, b.serial);
    assert_eq!(registry.stats().await.get("sessions"), Some(&2));
}

#[tokio::test]
async fn test_failed_construction_is_retried() {
    let pool: ResourcePool<Session> = ResourcePool::new("sessions");
    let scope = Scope::new();
    let key = PoolKey::new(["ops", "ap-south-1"]);
    let attempts = &AtomicUsize::new(0);

    let first = pool
        .acquire(&key, &scope, move |_, _| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(OpsError::Remote("token expired".into()))
        })
        .await;
    assert!(matches!(first, Err(OpsError::Construction { .. })));

    let second = pool
        .acquire(&key, &scope, move |_, _| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(Session { serial: 1 })
        })
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(second.serial, 1);
    assert_eq!(pool.len().await, 1);
}

#[tokio::test]
async fn test_scope_deadline_stops_slow_construction() {
    let pool: ResourcePool<Session> = ResourcePool::new("sessions");
    let scope = Scope::new().with_timeout(Duration::from_millis(30));

    let err = pool
        .acquire(&PoolKey::new(["slow", "region"]), &scope, |_, _| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Session { serial: 0 })
        })
        .await
        .unwrap_err();

    assert!(err.is_deadline());
    assert!(pool.is_empty().await);
}

#[tokio::test]
async fn test_teardown_sequential_is_idempotent() {
    let pool: Arc<ResourcePool<Session>> = Arc::new(ResourcePool::new("sessions"));
    let registry = PoolRegistry::new().with_pool(pool.clone());

    // Zero entries: teardown is a no-op
    assert_eq!(registry.teardown().await, 0);

    for region in ["us-east-1", "us-west-2", "eu-central-1"] {
        pool.acquire(&PoolKey::new(["prod", region]), &Scope::new(), |_, _| async {
            Ok::<_, OpsError>(Session { serial: 0 })
        })
        .await
        .unwrap();
    }

    assert_eq!(registry.teardown().await, 3);
    for _ in 0..5 {
        assert_eq!(registry.teardown().await, 0);
        assert_eq!(registry.stats().await.get("sessions"), Some(&0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_teardown_concurrent_with_acquire() {
    let pool: Arc<ResourcePool<Session>> = Arc::new(ResourcePool::new("sessions"));
    let mut tasks = tokio::task::JoinSet::new();

    for n in 0..16 {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move {
            if n % 2 == 0 {
                pool.teardown().await;
            } else {
                let key = PoolKey::new(["prod".to_string(), format!("region-{}", n)]);
                let handle = pool
                    .acquire(&key, &Scope::new(), move |_, _| async move {
                        Ok::<_, OpsError>(Session { serial: n })
                    })
                    .await
                    .unwrap();
                // Handles stay usable whatever teardown does
                assert_eq!(handle.serial, n);
            }
        });
    }

    let finished = tokio::time::timeout(Duration::from_secs(5), tasks.join_all()).await;
    assert!(finished.is_ok(), "acquire/teardown deadlocked");

    pool.teardown().await;
    assert_eq!(pool.stats().await.entries, 0);
}
