//! End-to-end scenarios: cached single values, cached failures, peeking,
//! and key misuse.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nebula_recall::{CacheError, ObservableCache, Shape};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn counted(calls: &Arc<AtomicUsize>) -> Arc<AtomicUsize> {
    Arc::clone(calls)
}

// ---------------------------------------------------------------------------
// Single value, two observers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_value_is_shared_and_peekable() {
    let cache = ObservableCache::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let factory = |calls: Arc<AtomicUsize>| {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, String>("42".to_string())
            }
        }
    };

    let first = cache.attach_single("s1", factory(counted(&calls))).unwrap();
    let second = cache.attach_single("s1", factory(counted(&calls))).unwrap();
    assert!(cache.peek_single::<String>("s1").unwrap().is_empty());

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap(), "42");
    assert_eq!(second.unwrap(), "42");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let mut seen = None;
    cache
        .peek_single::<String>("s1")
        .unwrap()
        .if_present(|replay| seen = replay.result().ok().cloned());
    assert_eq!(seen.as_deref(), Some("42"));

    assert!(cache.evict("s1"));
    assert!(cache.peek_single::<String>("s1").unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Cached failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_failure_is_replayed_to_later_observers() {
    let cache = ObservableCache::new().unwrap();

    let first = cache
        .attach_completion("c1", || async { Err::<(), _>("boom") })
        .unwrap()
        .await
        .unwrap_err();
    assert_eq!(first.to_string(), "boom");

    let invoked = Arc::new(AtomicUsize::new(0));
    let never = counted(&invoked);
    let second = cache
        .attach_completion("c1", move || {
            never.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .unwrap()
        .await
        .unwrap_err();

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert!(Arc::ptr_eq(&first, &second));

    let replay = cache.peek_completion("c1").unwrap().into_option().unwrap();
    assert!(Arc::ptr_eq(replay.result().unwrap_err(), &first));
    assert!(Arc::ptr_eq(&replay.subscribe().await.unwrap_err(), &first));
}

#[tokio::test]
async fn stream_failure_ends_the_sequence() {
    let cache = ObservableCache::new().unwrap();
    let items = || futures::stream::iter([Ok(1u8), Ok(2), Err("disk full"), Ok(3)]);

    let observer = cache.attach_stream("log", items).unwrap();
    let seen: Vec<_> = futures::StreamExt::collect(observer).await;
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[2].as_ref().unwrap_err().to_string(), "disk full");

    let replay = cache.peek_stream::<u8>("log").unwrap().into_option().unwrap();
    assert_eq!(replay.items(), &[1, 2]);
    assert_eq!(replay.error().map(ToString::to_string).as_deref(), Some("disk full"));
}

// ---------------------------------------------------------------------------
// Peek
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_peek_is_idempotent_and_never_executes() {
    let cache = ObservableCache::new().unwrap();
    assert!(cache.peek_single::<u32>("answer").unwrap().is_empty());
    assert!(!cache.contains_key("answer"));

    cache
        .attach_single("answer", || async { Ok::<_, String>(42u32) })
        .unwrap()
        .await
        .unwrap();

    let peeks: Vec<_> = (0..3)
        .map(|_| {
            cache
                .peek_single::<u32>("answer")
                .unwrap()
                .map(|replay| *replay.result().unwrap())
                .into_option()
        })
        .collect();
    assert_eq!(peeks, vec![Some(42), Some(42), Some(42)]);

    let stats = cache.stats();
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.peek_hits, 3);
    assert_eq!(stats.peek_misses, 1);
}

// ---------------------------------------------------------------------------
// Misuse
// ---------------------------------------------------------------------------

#[rstest]
#[case::as_stream(Shape::Stream)]
#[case::as_completion(Shape::Completion)]
#[tokio::test]
async fn shape_mismatch_is_reported(#[case] requested: Shape) {
    let cache = ObservableCache::new().unwrap();
    cache
        .attach_single("s1", || async { Ok::<_, String>(()) })
        .unwrap()
        .await
        .unwrap();

    let err = match requested {
        Shape::Stream => cache.peek_stream::<()>("s1").map(|_| ()).unwrap_err(),
        _ => cache.peek_completion("s1").map(|_| ()).unwrap_err(),
    };
    assert_eq!(
        err,
        CacheError::ShapeMismatch {
            key: "s1".into(),
            stored: Shape::Single,
            requested,
        }
    );
    assert!(err.is_programming_error());
    assert_eq!(cache.shape_of("s1"), Some(Shape::Single));
}

#[tokio::test]
async fn type_mismatch_is_reported_on_attach() {
    let cache = ObservableCache::new().unwrap();
    cache
        .attach_single("s1", || async { Ok::<_, String>("42".to_string()) })
        .unwrap()
        .await
        .unwrap();

    let err = cache
        .attach_single("s1", || async { Ok::<_, String>(42u64) })
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err, CacheError::TypeMismatch { requested: "u64", .. }));
    assert_eq!(err.code(), "RECALL:KEY:TYPE");
}
