//! Artifact store: chart uploads with presigned GET URLs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::S3Config;

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const PRESIGN_EXPIRES: Duration = Duration::from_secs(72 * 3600);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store: {0}")]
    Store(#[from] object_store::Error),

    #[error("storage config: {0}")]
    Config(String),

    #[error("upload failed after {attempts} attempts: {last}")]
    Exhausted { attempts: usize, last: String },
}

/// Upload surface the executor depends on. The bucket is bound at store
/// construction.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// PUT with retry, answering a presigned GET URL valid for 72 h.
    async fn upload_bytes(
        &self,
        key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<String, StorageError>;
}

/// S3 (or S3-compatible) artifact store.
pub struct S3Store {
    store: Arc<AmazonS3>,
}

impl S3Store {
    pub fn new(cfg: &S3Config) -> Result<Self, StorageError> {
        if cfg.bucket.is_empty() {
            return Err(StorageError::Config("bucket is required".to_string()));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&cfg.bucket)
            .with_region(&cfg.region)
            .with_access_key_id(&cfg.access_key_id)
            .with_secret_access_key(&cfg.secret_access_key);
        if !cfg.endpoint.is_empty() {
            builder = builder
                .with_endpoint(&cfg.endpoint)
                .with_allow_http(cfg.endpoint.starts_with("http://"));
            info!(endpoint = %cfg.endpoint, "using custom s3 endpoint");
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
        })
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn upload_bytes(
        &self,
        key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<String, StorageError> {
        let path = ObjectPath::from(key);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY * attempt as u32).await;
                warn!(key, attempt, "retrying artifact upload");
            }

            match self
                .store
                .put_opts(&path, PutPayload::from(payload.clone()), opts.clone())
                .await
            {
                Ok(_) => {
                    let url = self
                        .store
                        .signed_url(Method::GET, &path, PRESIGN_EXPIRES)
                        .await?;
                    info!(key, "artifact uploaded");
                    return Ok(url.to_string());
                }
                Err(err) => last_err = err.to_string(),
            }
        }

        Err(StorageError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last: last_err,
        })
    }
}
