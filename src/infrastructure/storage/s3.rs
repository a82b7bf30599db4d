use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{ObjectStore, StorageError, StorageResult};
use crate::common::upload::content_type_for;
use crate::config::settings::AppConfig;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    acl: Option<ObjectCannedAcl>,
}

impl StorageService {
    pub fn new(config: &AppConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "static",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            // S3-compatible stores such as MinIO need path-style addressing.
            builder = builder
                .endpoint_url(endpoint.as_str().trim_end_matches('/'))
                .force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        match &config.endpoint_url {
            Some(endpoint) => info!("✅ S3 client ready ({}, {})", config.region, endpoint),
            None => info!("✅ S3 client ready ({})", config.region),
        }

        Self {
            client,
            acl: config.object_acl.as_deref().map(ObjectCannedAcl::from),
        }
    }

    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                download_error(bucket, key, e.as_service_error(), || {
                    DisplayErrorContext(&e).to_string()
                })
            })?;

        let mut body = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| StorageError::DownloadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        file.flush().await?;

        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn fetch(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<PathBuf> {
        info!("⬇️ Downloading s3://{}/{} to {}", bucket, key, dest.display());

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match self.download_to(bucket, key, dest).await {
            Ok(bytes) => {
                info!("⬇️ Downloaded {} bytes", bytes);
                Ok(dest.to_path_buf())
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(dest).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", dest.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    async fn store(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<()> {
        let content_type = content_type_for(path);
        debug!("Uploading {} -> s3://{}/{} ({})", path.display(), bucket, key, content_type);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::UploadFailed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .set_acl(self.acl.clone())
            .send()
            .await
            .map_err(|e| {
                upload_error(bucket, key, e.as_service_error(), || {
                    DisplayErrorContext(&e).to_string()
                })
            })?;

        Ok(())
    }
}

const ACCESS_DENIED: &str = "AccessDenied";

/// `reason` is only rendered when the error is not one of the known codes.
fn download_error(
    bucket: &str,
    key: &str,
    service: Option<&GetObjectError>,
    reason: impl FnOnce() -> String,
) -> StorageError {
    match service {
        Some(err) if err.is_no_such_key() => StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        Some(err) if err.code() == Some(ACCESS_DENIED) => StorageError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => StorageError::DownloadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason(),
        },
    }
}

fn upload_error(
    bucket: &str,
    key: &str,
    service: Option<&PutObjectError>,
    reason: impl FnOnce() -> String,
) -> StorageError {
    match service {
        Some(err) if err.code() == Some(ACCESS_DENIED) => StorageError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        _ => StorageError::UploadFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason(),
        },
    }
}
