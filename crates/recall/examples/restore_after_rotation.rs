//! A screen loads data through the cache, gets torn down mid-load and is
//! rebuilt. The rebuilt screen restores instantly from the settled entry
//! instead of loading again.
//!
//! Run with: `RUST_LOG=nebula_recall=trace cargo run --example restore_after_rotation`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use nebula_recall::prelude::*;
use tracing_subscriber::EnvFilter;

const FEED: &str = "feed";
const PROFILE: &str = "profile";

struct Screen {
    cache: ObservableCache,
    loads: Arc<AtomicUsize>,
}

impl Screen {
    fn new(cache: ObservableCache, loads: Arc<AtomicUsize>) -> Self {
        Self { cache, loads }
    }

    /// Show whatever already settled, without starting anything.
    fn restore(&self) -> CacheResult<bool> {
        let mut restored = false;
        self.cache
            .peek_single::<String>(PROFILE)?
            .if_present(|profile| {
                if let Ok(name) = profile.result() {
                    println!("restored profile: {name}");
                    restored = true;
                }
            });
        self.cache.peek_stream::<u32>(FEED)?.if_present(|feed| {
            println!("restored feed: {:?}", feed.items());
        });
        Ok(restored)
    }

    /// Load through the cache. Attaching to an in-flight or settled key
    /// never runs the loader again.
    async fn load(&self) -> Result<(), Box<dyn std::error::Error>> {
        let loads = Arc::clone(&self.loads);
        let profile = self.cache.attach_single(PROFILE, move || {
            loads.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, std::io::Error>("ada".to_string())
            }
        })?;

        let mut feed = self.cache.attach_stream(FEED, || {
            futures::stream::iter(1..=3u32).then(|page| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, std::io::Error>(page)
            })
        })?;

        println!("profile: {}", profile.await?);
        while let Some(page) = feed.next().await {
            println!("feed page: {}", page?);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cache = ObservableCache::builder()
        .config(CacheConfig::for_ui())
        .build()?;
    let loads = Arc::new(AtomicUsize::new(0));

    // First screen starts loading and is destroyed before anything arrives.
    let first = Screen::new(cache.clone(), Arc::clone(&loads));
    assert!(!first.restore()?);
    let loading = first.load();
    drop(tokio::time::timeout(Duration::from_millis(10), loading).await);
    drop(first);
    println!("screen destroyed; profile pending: {}", cache.is_pending(PROFILE));

    // The rebuilt screen joins the running load.
    let second = Screen::new(cache.clone(), Arc::clone(&loads));
    second.load().await?;
    drop(second);

    // A third screen restores without attaching at all.
    let third = Screen::new(cache.clone(), Arc::clone(&loads));
    assert!(third.restore()?);

    println!("loader ran {} time(s)", loads.load(Ordering::SeqCst));
    println!("stats: {:?}", cache.stats());
    Ok(())
}
