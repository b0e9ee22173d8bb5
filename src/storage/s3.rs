// dbbackup/src/storage/s3.rs
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use log::{debug, info};
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;

use super::{RemoteObject, StorageManager, content_type_for};
use crate::config::S3Config;
use crate::errors::{BackupError, Result};

const MAX_ATTEMPTS: u32 = 3;

/// S3-compatible object storage (MinIO, AWS S3, DigitalOcean Spaces).
///
/// `PutObject` is atomic, so an interrupted upload never leaves a partial object behind.
pub struct S3Storage {
    config: S3Config,
    client: OnceCell<s3::Client>,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Self {
        S3Storage {
            config,
            client: OnceCell::new(),
        }
    }

    /// Full object key for a backup name, below the configured prefix.
    fn object_key(&self, name: &str) -> String {
        object_key(self.config.folder_prefix.as_deref(), name)
    }

    async fn client(&self) -> Result<&s3::Client> {
        self.client.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<s3::Client> {
        info!(
            "Connecting to S3 endpoint {} (bucket {})",
            self.config.endpoint_url, self.config.bucket_name
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&self.config.endpoint_url)
            .region(Region::new(self.config.region.clone()))
            .credentials_provider(Credentials::new(
                &self.config.access_key_id,
                self.config.secret_access_key.expose(),
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .retry_config(aws_config::retry::RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
            .load()
            .await;

        // MinIO and most S3 lookalikes only understand path-style addressing
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        let client = s3::Client::from_conf(s3_config);

        self.ensure_bucket(&client).await?;
        info!("✓ Connected to S3 bucket {}", self.config.bucket_name);
        Ok(client)
    }

    async fn ensure_bucket(&self, client: &s3::Client) -> Result<()> {
        let bucket = &self.config.bucket_name;
        match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                info!("Bucket {} does not exist, creating it", bucket);
                let mut request = client.create_bucket().bucket(bucket);
                // us-east-1 is the implicit default and must not be sent as a constraint
                if self.config.region != "us-east-1" {
                    request = request.create_bucket_configuration(
                        s3::types::CreateBucketConfiguration::builder()
                            .location_constraint(s3::types::BucketLocationConstraint::from(
                                self.config.region.as_str(),
                            ))
                            .build(),
                    );
                }
                request.send().await.map_err(|e| {
                    BackupError::connection(
                        self.name(),
                        format!("failed to create bucket {}: {}", bucket, DisplayErrorContext(&e)),
                    )
                })?;
                info!("✓ Created bucket {}", bucket);
                Ok(())
            }
            Err(e) => Err(BackupError::connection(
                self.name(),
                format!("cannot access bucket {}: {}", bucket, DisplayErrorContext(&e)),
            )),
        }
    }
}

#[async_trait]
impl StorageManager for S3Storage {
    fn name(&self) -> String {
        format!("s3://{}", self.config.bucket_name)
    }

    async fn connect(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let client = self.client().await?;
        let key = self.object_key(remote);
        info!(
            "Uploading {} to {} with key {}",
            local.display(),
            self.name(),
            key
        );

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| BackupError::upload(local, remote, format!("cannot read local file: {}", e)))?;

        let output = client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .content_type(content_type_for(remote))
            .body(body)
            .send()
            .await
            .map_err(|e| BackupError::upload(local, remote, DisplayErrorContext(&e)))?;

        info!(
            "✓ Uploaded {} (etag {})",
            key,
            output.e_tag().unwrap_or("-")
        );
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let client = self.client().await?;
        let key = self.object_key(remote);
        info!("Downloading {}/{} to {}", self.name(), key, local.display());

        let object = client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    BackupError::download(remote, "object does not exist")
                } else {
                    BackupError::download(remote, DisplayErrorContext(&e))
                }
            })?;

        let mut file = tokio::fs::File::create(local).await.map_err(|e| {
            BackupError::download(remote, format!("cannot create {}: {}", local.display(), e))
        })?;
        let mut body = object.body.into_async_read();
        let bytes = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| BackupError::download(remote, format!("transfer interrupted: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| BackupError::download(remote, e))?;

        info!("✓ Downloaded {} bytes from {}", bytes, key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let client = self.client().await?;
        let prefix = self.config.folder_prefix.as_ref().map(|p| format!("{}/", p));

        let mut pages = client
            .list_objects_v2()
            .bucket(&self.config.bucket_name)
            .set_prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| BackupError::List(format!("{}: {}", self.name(), DisplayErrorContext(&e))))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let Some(name) = relative_name(self.config.folder_prefix.as_deref(), key) else {
                    continue;
                };
                objects.push(RemoteObject {
                    name,
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                    modified_at: object
                        .last_modified()
                        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())),
                });
            }
        }

        debug!("Listed {} objects in {}", objects.len(), self.name());
        Ok(objects)
    }

    async fn delete(&self, remote: &str) -> Result<()> {
        // DeleteObject succeeds for missing keys, so absence is checked explicitly
        if !self.exists(remote).await? {
            return Err(BackupError::delete(remote, "object does not exist"));
        }

        let client = self.client().await?;
        let key = self.object_key(remote);
        client
            .delete_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
            .map_err(|e| BackupError::delete(remote, DisplayErrorContext(&e)))?;

        info!("✓ Deleted {} from {}", key, self.name());
        Ok(())
    }

    async fn exists(&self, remote: &str) -> Result<bool> {
        let client = self.client().await?;
        let key = self.object_key(remote);

        match client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(BackupError::connection(
                self.name(),
                format!("cannot check {}: {}", key, DisplayErrorContext(&e)),
            )),
        }
    }
}

fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix, name),
        None => name.to_string(),
    }
}

/// Strips the prefix from a listed key. Directory markers and keys outside the prefix yield `None`.
fn relative_name(prefix: Option<&str>, key: &str) -> Option<String> {
    let name = match prefix {
        Some(prefix) => key.strip_prefix(prefix)?.strip_prefix('/')?,
        None => key,
    };
    if name.is_empty() || name.ends_with('/') {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn storage(prefix: Option<&str>) -> S3Storage {
        S3Storage::new(S3Config {
            endpoint_url: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "minio".to_string(),
            secret_access_key: Secret::new("minio123"),
            bucket_name: "backups".to_string(),
            folder_prefix: prefix.map(str::to_string),
        })
    }

    #[test]
    fn test_object_key_with_and_without_prefix() {
        assert_eq!(
            storage(None).object_key("backup_20240101_020000.sql"),
            "backup_20240101_020000.sql"
        );
        assert_eq!(
            storage(Some("nightly")).object_key("backup_20240101_020000.sql"),
            "nightly/backup_20240101_020000.sql"
        );
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(
            relative_name(Some("nightly"), "nightly/backup_20240101_020000.sql").as_deref(),
            Some("backup_20240101_020000.sql")
        );
        assert_eq!(relative_name(Some("nightly"), "nightly/"), None);
        assert_eq!(relative_name(Some("nightly"), "nightlyx/file.sql"), None);
        assert_eq!(relative_name(None, "logs/"), None);
        assert_eq!(relative_name(None, "a.sql").as_deref(), Some("a.sql"));
    }

    #[test]
    fn test_not_connected_until_connect() {
        let s = storage(None);
        assert!(!s.is_connected());
        assert_eq!(s.name(), "s3://backups");
    }
}
