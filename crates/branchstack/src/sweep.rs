//! Versioned-bucket emptying
//!
//! The provider refuses to delete a bucket that still holds anything, and on
//! a versioned bucket "anything" includes every historical version and
//! delete marker. The sweeper walks the key listing one page at a time and
//! issues a single batch delete per page, so an interrupted sweep has still
//! removed everything it listed.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::aws::error::classify_anyhow_error;
use crate::provider::{ObjectStore, ObjectVersion};

/// Empties buckets through an [`ObjectStore`].
pub struct BucketSweeper<O: ObjectStore> {
    store: O,
}

impl<O: ObjectStore> BucketSweeper<O> {
    pub fn new(store: O) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &O {
        &self.store
    }

    /// Remove every version of every key under `prefix` (the whole bucket
    /// when `None`). Returns how many versions were deleted. A bucket that
    /// does not exist counts as already empty.
    pub async fn empty(&self, bucket: &str, prefix: Option<&str>) -> Result<usize> {
        info!(bucket = %bucket, "Emptying bucket");

        let mut deleted = 0usize;
        let mut token: Option<String> = None;

        loop {
            let page = match self.store.list_keys(bucket, prefix, token.take()).await {
                Ok(page) => page,
                Err(e) if bucket_is_gone(&e) => {
                    debug!(bucket = %bucket, "Bucket does not exist, nothing to empty");
                    return Ok(deleted);
                }
                Err(e) => return Err(e),
            };

            let mut batch: Vec<ObjectVersion> = Vec::new();
            for key in &page.items {
                match self.store.list_versions(bucket, key).await {
                    Ok(versions) => batch.extend(versions),
                    Err(e) if bucket_is_gone(&e) => {
                        debug!(bucket = %bucket, "Bucket vanished mid-sweep");
                        return Ok(deleted);
                    }
                    Err(e) => return Err(e),
                }
            }

            if !batch.is_empty() {
                debug!(bucket = %bucket, versions = batch.len(), "Deleting one page of versions");
                self.store
                    .delete_versions(bucket, &batch)
                    .await
                    .with_context(|| format!("Failed to empty bucket {bucket}"))?;
                deleted += batch.len();
            }

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(bucket = %bucket, deleted, "Bucket emptied");
        Ok(deleted)
    }
}

fn bucket_is_gone(error: &anyhow::Error) -> bool {
    classify_anyhow_error(error).is_not_found()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeObjectStore;

    #[tokio::test]
    async fn one_batch_per_listing_page() {
        let store = FakeObjectStore::new();
        store.add_bucket("assets", &[("index.html", 2), ("logo.png", 2), ("logs", 2)]);

        let sweeper = BucketSweeper::new(store);
        let deleted = sweeper.empty("assets", None).await.unwrap();
        assert_eq!(deleted, 6);

        let state = sweeper.store.state();
        assert_eq!(state.deleted_batches.len(), 1, "one page, one batch");
        assert_eq!(state.deleted_batches[0].1.len(), 6);
        assert!(state.buckets["assets"].is_empty());
    }

    #[tokio::test]
    async fn truncated_listings_are_followed() {
        let store = FakeObjectStore::new();
        store.add_bucket("assets", &[("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)]);
        store.state().page_size = 2;

        let sweeper = BucketSweeper::new(store);
        let deleted = sweeper.empty("assets", None).await.unwrap();
        assert_eq!(deleted, 5);

        let state = sweeper.store.state();
        assert_eq!(state.deleted_batches.len(), 3, "5 keys at 2 per page");
        assert!(state.buckets["assets"].is_empty());
    }

    #[tokio::test]
    async fn prefix_restricts_the_sweep() {
        let store = FakeObjectStore::new();
        store.add_bucket("assets", &[("build/app.js", 2), ("uploads/u1", 3)]);

        let sweeper = BucketSweeper::new(store);
        let deleted = sweeper.empty("assets", Some("build/")).await.unwrap();
        assert_eq!(deleted, 2);

        let state = sweeper.store.state();
        assert!(state.buckets["assets"].contains_key("uploads/u1"));
        assert!(!state.buckets["assets"].contains_key("build/app.js"));
    }

    #[tokio::test]
    async fn missing_bucket_is_already_empty() {
        let sweeper = BucketSweeper::new(FakeObjectStore::new());
        let deleted = sweeper.empty("never-created", None).await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn empty_bucket_deletes_nothing() {
        let store = FakeObjectStore::new();
        store.add_bucket("assets", &[]);

        let sweeper = BucketSweeper::new(store);
        assert_eq!(sweeper.empty("assets", None).await.unwrap(), 0);
        assert!(sweeper.store.state().deleted_batches.is_empty());
    }
}
