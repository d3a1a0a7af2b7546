//! S3-backed object store.

use super::{ObjectContent, ObjectStore, StoredObject, storage_key};
use crate::config::AwsConfig;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client as S3Client,
    config::{Builder as S3ConfigBuilder, Credentials},
    error::DisplayErrorContext,
    primitives::ByteStream,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

/// Photo content in one S3 bucket.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    endpoint_url: Option<String>,
}

impl S3ObjectStore {
    /// Build a client from static credentials. With an endpoint override the
    /// client uses path-style addressing (MinIO/LocalStack).
    pub async fn new(cfg: &AwsConfig) -> Self {
        let credentials = Credentials::new(
            cfg.access_key_id.expose(),
            cfg.secret_access_key.expose(),
            None,
            None,
            "photo-store-config",
        );
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(endpoint_url) = &cfg.endpoint_url {
            builder = builder.endpoint_url(endpoint_url).force_path_style(true);
        }

        info!(
            bucket = %cfg.bucket,
            region = %cfg.region,
            endpoint = ?cfg.endpoint_url,
            "S3 object store initialized"
        );

        Self {
            client: S3Client::from_conf(builder.build()),
            bucket: cfg.bucket.clone(),
            endpoint_url: cfg.endpoint_url.clone(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        owner_id: Uuid,
        content: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> AppResult<StoredObject> {
        let key = storage_key(owner_id, Utc::now(), file_name);
        let content_md5 = STANDARD.encode(md5::compute(&content).0);
        let size = content.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(content))
            .content_type(content_type)
            .content_md5(content_md5)
            .send()
            .await
            .map_err(|err| {
                AppError::internal(format!(
                    "failed to upload photo: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        info!(%owner_id, key = %key, size, "photo uploaded to s3");
        Ok(StoredObject {
            public_url: self.public_url(&key),
            key,
        })
    }

    async fn get(&self, key: &str) -> AppResult<ObjectContent> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(AppError::not_found(format!("object `{key}` not found")));
            }
            Err(err) => {
                return Err(AppError::internal(format!(
                    "failed to get photo from s3: {}",
                    DisplayErrorContext(&err)
                )));
            }
        };

        let content_type = output
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| AppError::internal(format!("failed to read s3 object body: {err}")))?
            .into_bytes();

        debug!(key, size = data.len(), "photo fetched from s3");
        Ok(ObjectContent { data, content_type })
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                AppError::internal(format!(
                    "failed to delete photo from s3: {}",
                    DisplayErrorContext(&err)
                ))
            })?;

        info!(key, "photo deleted from s3");
        Ok(())
    }
}
