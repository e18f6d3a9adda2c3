//! Tests for [`GenerationCache`] — TTL'd, LRU-bounded image cache.

use std::time::Duration;

use heimdall::cache::{CacheConfig, Fingerprint, GenerationCache};
use heimdall::policy;
use heimdall::upstream::{ImageBlob, ImageFormat};

fn png_blob(filler: u8) -> ImageBlob {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&[filler; 16]);
    ImageBlob::new(ImageFormat::Png, bytes)
}

fn fingerprint(prompt: &str) -> Fingerprint {
    Fingerprint::of(&policy::validate(prompt).unwrap())
}

#[tokio::test]
async fn miss_then_hit() {
    let cache = GenerationCache::new(&CacheConfig::default());
    let fp = fingerprint("a red fox");

    assert!(cache.lookup(&fp).await.is_none());

    cache.store(fp.clone(), png_blob(1)).await;
    let hit = cache.lookup(&fp).await.unwrap();
    assert_eq!(hit.bytes(), png_blob(1).bytes());
}

#[tokio::test]
async fn distinct_prompts_do_not_collide() {
    let cache = GenerationCache::new(&CacheConfig::default());
    cache.store(fingerprint("a red fox"), png_blob(1)).await;
    assert!(cache.lookup(&fingerprint("a blue fox")).await.is_none());
}

#[tokio::test]
async fn store_overwrites_existing_entry() {
    let cache = GenerationCache::new(&CacheConfig::default());
    let fp = fingerprint("a red fox");

    cache.store(fp.clone(), png_blob(1)).await;
    cache.store(fp.clone(), png_blob(2)).await;

    let hit = cache.lookup(&fp).await.unwrap();
    assert_eq!(hit.bytes(), png_blob(2).bytes());
}

#[tokio::test]
async fn entries_expire_after_ttl() {
    let cache = GenerationCache::new(&CacheConfig::new().ttl(Duration::from_millis(80)));
    let fp = fingerprint("a red fox");

    cache.store(fp.clone(), png_blob(1)).await;
    assert!(cache.lookup(&fp).await.is_some());

    tokio::time::sleep(Duration::from_millis(160)).await;
    assert!(cache.lookup(&fp).await.is_none(), "entry should have expired");
}

#[tokio::test]
async fn expired_entry_can_be_repopulated() {
    let cache = GenerationCache::new(&CacheConfig::new().ttl(Duration::from_millis(50)));
    let fp = fingerprint("a red fox");

    cache.store(fp.clone(), png_blob(1)).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(cache.lookup(&fp).await.is_none());

    cache.store(fp.clone(), png_blob(2)).await;
    assert_eq!(cache.lookup(&fp).await.unwrap().bytes(), png_blob(2).bytes());
}

#[tokio::test]
async fn capacity_is_bounded() {
    let cache = GenerationCache::new(&CacheConfig::new().max_entries(4));
    for i in 0..32u8 {
        cache.store(fingerprint(&format!("prompt {i}")), png_blob(i)).await;
    }
    assert!(cache.len().await <= 4, "cache exceeded its capacity bound");
}
