//! S3-backed object store.
//!
//! Region and credentials come from the standard AWS provider chain
//! (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, profiles, instance metadata). A custom
//! endpoint plus path-style addressing covers MinIO and LocalStack.

use crate::{
    config::S3Settings,
    services::object_store::{LocatorBase, ObjectBody, ObjectStore, StorageError, StorageResult},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client as S3Client, config::Builder as S3ConfigBuilder, error::DisplayErrorContext,
    primitives::ByteStream,
};
use axum::http::Uri;
use bytes::Bytes;
use tracing::{debug, info, instrument};

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    locators: LocatorBase,
}

impl S3ObjectStore {
    /// Build a client from the AWS environment and the given settings.
    pub async fn connect(settings: &S3Settings) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let region = aws_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(endpoint_url) = settings.endpoint_url.as_deref() {
            builder = builder.endpoint_url(endpoint_url);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = S3Client::from_conf(builder.build());

        let base = locator_base(
            &settings.bucket,
            &region,
            settings.endpoint_url.as_deref(),
            settings.force_path_style,
        )?;
        let locators = LocatorBase::new(&base)
            .with_context(|| format!("building locator base `{}`", base))?;

        info!(
            bucket = %settings.bucket,
            region = %region,
            locator_base = %locators.as_str(),
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
            locators,
        })
    }
}

/// URL prefix of every locator for `bucket`.
///
/// Without a custom endpoint this is the public AWS address; with one, the
/// bucket goes into the path (path-style) or in front of the host.
fn locator_base(
    bucket: &str,
    region: &str,
    endpoint_url: Option<&str>,
    path_style: bool,
) -> Result<String> {
    match (endpoint_url, path_style) {
        (None, false) => Ok(format!("https://{}.s3.{}.amazonaws.com", bucket, region)),
        (None, true) => Ok(format!("https://s3.{}.amazonaws.com/{}", region, bucket)),
        (Some(endpoint), true) => Ok(format!("{}/{}", endpoint.trim_end_matches('/'), bucket)),
        (Some(endpoint), false) => {
            let uri = endpoint
                .parse::<Uri>()
                .with_context(|| format!("parsing S3 endpoint `{}`", endpoint))?;
            let authority = uri
                .authority()
                .with_context(|| format!("S3 endpoint `{}` has no host", endpoint))?;
            let scheme = uri.scheme_str().unwrap_or("https");
            Ok(format!("{}://{}.{}", scheme, bucket, authority))
        }
    }
}

fn remote_error<E>(err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Remote(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes))]
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<String> {
        let size_bytes = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(remote_error)?;

        debug!(bucket = %self.bucket, key = %key, size_bytes, "object uploaded");
        Ok(self.locators.locate(key))
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StorageError::NotFound(key.to_string())
                } else {
                    remote_error(err)
                }
            })?;

        let content_type = output.content_type().map(str::to_owned);
        Ok(ObjectBody {
            content_type,
            reader: Box::pin(output.body.into_async_read()),
        })
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(remote_error)?;

        info!(bucket = %self.bucket, key = %key, "object deleted");
        Ok(())
    }

    fn key_from_locator(&self, locator: &str) -> StorageResult<String> {
        self.locators.key_of(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_virtual_hosted_base() {
        assert_eq!(
            locator_base("photos", "eu-west-1", None, false).unwrap(),
            "https://photos.s3.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn aws_path_style_base() {
        assert_eq!(
            locator_base("photos", "eu-west-1", None, true).unwrap(),
            "https://s3.eu-west-1.amazonaws.com/photos"
        );
    }

    #[test]
    fn custom_endpoint_bases() {
        assert_eq!(
            locator_base("photos", "us-east-1", Some("http://localhost:9000/"), true).unwrap(),
            "http://localhost:9000/photos"
        );
        assert_eq!(
            locator_base("photos", "us-east-1", Some("http://minio.local:9000"), false).unwrap(),
            "http://photos.minio.local:9000"
        );
    }

    #[test]
    fn path_style_locators_resolve_back_to_keys() {
        let base = locator_base("photos", "us-east-1", Some("http://localhost:9000"), true).unwrap();
        let locators = LocatorBase::new(&base).unwrap();
        let locator = locators.locate("Raw-images/1-cat.png");
        assert_eq!(locators.key_of(&locator).unwrap(), "Raw-images/1-cat.png");
    }
}
