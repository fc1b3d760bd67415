use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;

use crate::error::StoreError;
use crate::fs::backend::{Inventory, ObjectStore, Payload, RemoteObject, S3Provider, TransferHeaders};

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub provider: S3Provider,
    /// Static credentials; the default AWS credential chain is used when unset.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            provider: S3Provider::Aws,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// S3 and S3-compatible bucket backed by the AWS SDK
pub struct S3Store {
    client: S3Client,
    bucket: String,
    provider: S3Provider,
}

impl S3Store {
    /// Build a client for `settings`.
    ///
    /// Static credentials are used when both keys are configured, otherwise
    /// the standard chain applies:
    /// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
    /// 2. Shared credentials file (~/.aws/credentials)
    /// 3. EC2 Instance Profile / ECS Task Role / EKS Pod Identity
    ///
    /// No request is made here; bad credentials surface on the first listing.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "bucket-publish-config",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = settings.provider.endpoint(&settings.region) {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.provider.force_path_style() {
            builder = builder.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            provider: settings.provider.clone(),
        }
    }
}

fn sdk_error<E: std::error::Error>(err: &E) -> StoreError {
    StoreError::classify(format!("{}", DisplayErrorContext(err)))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_all(&self) -> Result<Inventory, StoreError> {
        let mut inventory = Inventory::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| sdk_error(&e))?;

            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                inventory.insert(
                    key.to_string(),
                    RemoteObject {
                        key: key.to_string(),
                        fingerprint: object.e_tag().unwrap_or_default().to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    },
                );
            }

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation = Some(token.to_string()),
                _ => break,
            }
        }

        tracing::debug!(
            store = %self.describe(),
            objects = inventory.len(),
            "listed bucket"
        );
        Ok(inventory)
    }

    async fn put(
        &self,
        key: &str,
        payload: &Payload,
        headers: &TransferHeaders,
    ) -> Result<(), StoreError> {
        let body = match payload {
            Payload::Bytes(data) => ByteStream::from(data.as_ref().clone()),
            Payload::File { path, .. } => ByteStream::from_path(path)
                .await
                .map_err(|e| StoreError::Io {
                    path: path.clone(),
                    source: std::io::Error::other(e),
                })?,
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .acl(ObjectCannedAcl::from(headers.access_policy.canned_acl()));

        if let Some(content_type) = &headers.content_type {
            request = request.content_type(content_type);
        }
        if let Some(encoding) = headers.content_encoding {
            request = request.content_encoding(encoding.as_str());
        }

        request.send().await.map_err(|e| sdk_error(&e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(&e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        match self.provider {
            S3Provider::Aws => format!("s3://{}", self.bucket),
            _ => format!("s3://{} ({})", self.bucket, self.provider.display_name()),
        }
    }
}
