//! S3 object-store operations
//!
//! Two concerns live here: `S3Client`, the production [`ObjectStore`] used
//! for emptying stack-owned buckets before deletion, and `S3TemplateStore`,
//! which parks oversized template bodies in a staging bucket and hands back
//! the URL to submit instead.

use anyhow::{bail, Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, DeleteMarkerEntry, ObjectIdentifier};
use aws_sdk_s3::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aws::context::AwsContext;
use crate::paginate::Page;
use crate::provider::{ObjectStore, ObjectVersion, TemplateStore};

/// S3 client for bucket emptying
pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Create a new S3 client
    pub async fn new(region: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx))
    }

    /// Create an S3 client from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.s3_client(),
        }
    }

    /// One page of keys under `prefix` (all keys when `None`).
    pub async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<Page<String>> {
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if let Some(prefix) = prefix {
            request = request.prefix(prefix);
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.context("Failed to list objects")?;

        let items = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        Ok(if response.is_truncated() == Some(true) {
            match response.next_continuation_token() {
                Some(next) => Page::partial(items, next),
                None => Page::last(items),
            }
        } else {
            Page::last(items)
        })
    }

    /// Every version and delete marker of one key, across listing pages.
    ///
    /// The versions API has no exact-key mode, only a prefix, so results are
    /// filtered back down to the requested key ("logs" must not sweep up
    /// "logs-archive").
    pub async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .prefix(key)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
                .context("Failed to list object versions")?;

            versions.extend(matching_versions(
                key,
                response.versions(),
                response.delete_markers(),
            ));

            if response.is_truncated() == Some(true) {
                key_marker = response.next_key_marker().map(str::to_string);
                version_id_marker = response.next_version_id_marker().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(versions)
    }

    /// Remove up to one batch of versions in a single call.
    pub async fn delete_versions(&self, bucket: &str, versions: &[ObjectVersion]) -> Result<()> {
        if versions.is_empty() {
            return Ok(());
        }
        debug!(bucket = %bucket, count = versions.len(), "Deleting object versions");

        let objects = versions
            .iter()
            .map(|version| {
                ObjectIdentifier::builder()
                    .key(&version.key)
                    .set_version_id(version.version_id.clone())
                    .build()
                    .context("Invalid object identifier")
            })
            .collect::<Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .context("Invalid delete batch")?;

        let response = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .context("Failed to delete object versions")?;

        let errors = response.errors();
        if let Some(first) = errors.first() {
            bail!(
                "{} of {} versions failed to delete, first: {} ({})",
                errors.len(),
                versions.len(),
                first.key().unwrap_or("<unknown key>"),
                first.message().unwrap_or("no message"),
            );
        }

        Ok(())
    }
}

impl ObjectStore for S3Client {
    async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        token: Option<String>,
    ) -> Result<Page<String>> {
        S3Client::list_keys(self, bucket, prefix, token).await
    }

    async fn list_versions(&self, bucket: &str, key: &str) -> Result<Vec<ObjectVersion>> {
        S3Client::list_versions(self, bucket, key).await
    }

    async fn delete_versions(&self, bucket: &str, versions: &[ObjectVersion]) -> Result<()> {
        S3Client::delete_versions(self, bucket, versions).await
    }
}

fn matching_versions(
    key: &str,
    versions: &[aws_sdk_s3::types::ObjectVersion],
    markers: &[DeleteMarkerEntry],
) -> Vec<ObjectVersion> {
    let from_version = versions.iter().filter_map(|v| {
        (v.key() == Some(key)).then(|| ObjectVersion {
            key: key.to_string(),
            version_id: v.version_id().map(str::to_string),
        })
    });
    let from_marker = markers.iter().filter_map(|m| {
        (m.key() == Some(key)).then(|| ObjectVersion {
            key: key.to_string(),
            version_id: m.version_id().map(str::to_string),
        })
    });
    from_version.chain(from_marker).collect()
}

/// Staging location for template bodies over the inline limit.
pub struct S3TemplateStore {
    client: Client,
    region: String,
    bucket: String,
    key_prefix: String,
}

impl S3TemplateStore {
    /// Create a template store over `bucket`, keyed under `key_prefix/`.
    pub async fn new(region: &str, bucket: &str, key_prefix: &str) -> Result<Self> {
        let ctx = AwsContext::new(region).await;
        Ok(Self::from_context(&ctx, bucket, key_prefix))
    }

    /// Create a template store from a pre-loaded AWS context
    pub fn from_context(ctx: &AwsContext, bucket: &str, key_prefix: &str) -> Self {
        Self {
            client: ctx.s3_client(),
            region: ctx.region().to_string(),
            bucket: bucket.to_string(),
            key_prefix: normalize_prefix(key_prefix),
        }
    }

    fn object_key(&self) -> String {
        let id = Uuid::new_v4();
        if self.key_prefix.is_empty() {
            format!("{id}.template.json")
        } else {
            format!("{}/{id}.template.json", self.key_prefix)
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://{}.s3.{}.amazonaws.com/{key}", self.bucket, self.region)
    }

    /// Upload a template body and return the URL to submit in its place.
    pub async fn store_template(&self, body: &str) -> Result<String> {
        let key = self.object_key();
        info!(bucket = %self.bucket, key = %key, size = body.len(), "Uploading template");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body.as_bytes().to_vec()))
            .content_type("application/json")
            .send()
            .await
            .context("Failed to upload template")?;

        Ok(self.object_url(&key))
    }
}

impl TemplateStore for S3TemplateStore {
    async fn store_template(&self, body: &str) -> Result<String> {
        S3TemplateStore::store_template(self, body).await
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}
