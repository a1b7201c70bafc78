//! [`ObjectStoreClient`] backed by `aws-sdk-s3`.
//!
//! Works against AWS S3 and S3-compatible services such as MinIO. The client
//! is built once at startup from [`S3Config`] and shared by every request.

use crate::{
    config::S3Config,
    models::bucket::{LifecycleRule, RuleStatus},
    services::{
        object_client::{ObjectResponse, ObjectStoreClient, PutObjectRequest, USER_METADATA_PREFIX},
        storage_service::{StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig, timeout::TimeoutConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::get_object::GetObjectOutput,
    primitives::{ByteStream, DateTimeFormat},
    types::{
        BucketLifecycleConfiguration, BucketLocationConstraint, CreateBucketConfiguration,
        ExpirationStatus, LifecycleExpiration, LifecycleRule as S3LifecycleRule,
        LifecycleRuleFilter,
    },
};
use axum::http::HeaderName;
use base64::{Engine as _, engine::general_purpose};
use std::{collections::HashMap, time::Duration};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest wait for response bytes. The SDK has no matching idle timeout for
/// sending the request body, so uploads are bounded only by the connection.
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Region that must not be sent as a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct S3ObjectClient {
    client: Client,
    region: String,
}

impl S3ObjectClient {
    pub fn new(cfg: &S3Config) -> Self {
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "file-store-config",
        );
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build();
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(cfg.endpoint.clone())
            // Path-style addressing keeps MinIO and friends happy.
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts)
            .build();
        Self::with_client(Client::from_conf(config), cfg.region.clone())
    }

    /// Wrap an already configured SDK client.
    pub fn with_client(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for S3ObjectClient {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err)
                if err.as_service_error().is_some_and(|e| e.is_not_found())
                    || http_status(&err) == Some(404) =>
            {
                Ok(false)
            }
            Err(err) => Err(remote_error("head bucket", err)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err.as_service_error().is_some_and(|e| {
                    e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                }) =>
            {
                Err(StorageError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(err) => Err(remote_error("create bucket", err)),
        }
    }

    async fn put_lifecycle_rule(&self, bucket: &str, rule: &LifecycleRule) -> StorageResult<()> {
        let status = match rule.status {
            RuleStatus::Enabled => ExpirationStatus::Enabled,
            RuleStatus::Disabled => ExpirationStatus::Disabled,
        };
        let s3_rule = S3LifecycleRule::builder()
            .id(&rule.id)
            .status(status)
            .filter(LifecycleRuleFilter::builder().prefix("").build())
            .expiration(
                LifecycleExpiration::builder()
                    .days(i32::try_from(rule.days).unwrap_or(i32::MAX))
                    .build(),
            )
            .build()
            .map_err(|err| StorageError::Remote(format!("lifecycle rule: {err}")))?;
        let configuration = BucketLifecycleConfiguration::builder()
            .rules(s3_rule)
            .build()
            .map_err(|err| StorageError::Remote(format!("lifecycle configuration: {err}")))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|err| remote_error("put bucket lifecycle", err))?;
        Ok(())
    }

    async fn put_object(&self, request: PutObjectRequest) -> StorageResult<()> {
        let PutObjectRequest {
            bucket,
            key,
            headers,
            user_metadata,
            body,
        } = request;

        let content_md5 = general_purpose::STANDARD.encode(md5::compute(&body).0);
        let mut builder = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(body.len() as i64)
            .content_md5(content_md5);
        if !user_metadata.is_empty() {
            builder = builder.set_metadata(Some(user_metadata));
        }

        let mut extra = Vec::new();
        for (name, value) in headers {
            if !is_header_name(&name) || !is_header_safe(&value) {
                return Err(StorageError::MalformedHeader { name, value });
            }
            match name.to_ascii_lowercase().as_str() {
                "content-type" => builder = builder.content_type(value),
                "cache-control" => builder = builder.cache_control(value),
                "content-disposition" => builder = builder.content_disposition(value),
                "content-encoding" => builder = builder.content_encoding(value),
                "content-language" => builder = builder.content_language(value),
                _ => extra.push((name, value)),
            }
        }

        builder
            .body(ByteStream::from(body))
            .customize()
            .mutate_request(move |req| {
                for (name, value) in &extra {
                    req.headers_mut().insert(name.clone(), value.clone());
                }
            })
            .send()
            .await
            .map_err(|err| remote_error("put object", err))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectResponse> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.code() == Some("NoSuchBucket")) => {
                return Err(StorageError::BucketNotFound(bucket.to_string()));
            }
            Err(err)
                if err.as_service_error().is_some_and(|e| e.is_no_such_key())
                    || http_status(&err) == Some(404) =>
            {
                return Err(StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(remote_error("get object", err)),
        };

        let headers = response_headers(&output);
        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Remote(format!("reading object body: {err}")))?
            .into_bytes();
        Ok(ObjectResponse { headers, body })
    }
}

/// Rebuild the header view of a GetObject response. User metadata comes back
/// under its `x-amz-meta-` name, mirroring what went over the wire.
fn response_headers(output: &GetObjectOutput) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let typed = [
        ("content-length", output.content_length().map(|len| len.to_string())),
        ("content-type", output.content_type().map(str::to_string)),
        ("etag", output.e_tag().map(str::to_string)),
        ("cache-control", output.cache_control().map(str::to_string)),
        ("content-disposition", output.content_disposition().map(str::to_string)),
        ("content-encoding", output.content_encoding().map(str::to_string)),
        ("content-language", output.content_language().map(str::to_string)),
        (
            "last-modified",
            output
                .last_modified()
                .and_then(|date| date.fmt(DateTimeFormat::HttpDate).ok()),
        ),
    ];
    for (name, value) in typed {
        if let Some(value) = value {
            headers.insert(name.to_string(), value);
        }
    }
    for (key, value) in output.metadata().into_iter().flatten() {
        headers.insert(
            format!("{}{}", USER_METADATA_PREFIX, key.to_ascii_lowercase()),
            value.clone(),
        );
    }
    headers
}

fn http_status<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn remote_error<E>(action: &str, err: SdkError<E>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Remote(format!("{action}: {}", DisplayErrorContext(&err)))
}

/// An HTTP token, so the request builder accepts it as a header name.
fn is_header_name(name: &str) -> bool {
    HeaderName::from_bytes(name.as_bytes()).is_ok()
}

/// Visible ASCII plus tab, as accepted in HTTP header values.
fn is_header_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b == b'\t' || (0x20..0x7f).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::{
        error::ErrorMetadata,
        operation::{
            create_bucket::{CreateBucketError, CreateBucketOutput},
            get_object::GetObjectError,
            head_bucket::{HeadBucketError, HeadBucketOutput},
        },
        types::error::{BucketAlreadyExists, BucketAlreadyOwnedByYou, NoSuchKey, NotFound},
    };
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use bytes::Bytes;

    fn unreachable_client() -> S3ObjectClient {
        S3ObjectClient::new(&S3Config {
            endpoint: "http://127.0.0.1:1".into(),
            region: DEFAULT_REGION.into(),
            access_key: "key".into(),
            secret_key: "secret".into(),
        })
    }

    #[test]
    fn test_response_headers_prefix_user_metadata() {
        let output = GetObjectOutput::builder()
            .content_length(4)
            .content_type("text/plain")
            .e_tag("\"abc\"")
            .metadata("file-name", "notes.txt")
            .build();
        let headers = response_headers(&output);
        assert_eq!(headers.get("content-length").unwrap(), "4");
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(headers.get("etag").unwrap(), "\"abc\"");
        assert_eq!(headers.get("x-amz-meta-file-name").unwrap(), "notes.txt");
        assert!(!headers.contains_key("last-modified"));
    }

    #[test]
    fn test_header_safety() {
        assert!(is_header_safe("text/plain; charset=utf-8"));
        assert!(!is_header_safe(""));
        assert!(!is_header_safe("line\r\nbreak"));
        assert!(!is_header_safe("caf\u{e9}"));
        assert!(is_header_name("x-custom"));
        assert!(!is_header_name("x custom"));
        assert!(!is_header_name("x:custom"));
        assert!(!is_header_name("x(custom)"));
        assert!(!is_header_name(""));
    }

    #[tokio::test]
    async fn test_put_object_rejects_bad_header_name() {
        let client = unreachable_client();
        let err = client
            .put_object(PutObjectRequest {
                bucket: "docs".into(),
                key: "a.txt".into(),
                headers: HashMap::from([("x custom".to_string(), "v".to_string())]),
                user_metadata: HashMap::new(),
                body: Bytes::from_static(b"a"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MalformedHeader { name, .. } if name == "x custom"));
    }

    #[tokio::test]
    async fn test_head_bucket_mapping() {
        let missing = mock!(Client::head_bucket)
            .match_requests(|req| req.bucket() == Some("missing"))
            .then_error(|| HeadBucketError::NotFound(NotFound::builder().build()));
        let present = mock!(Client::head_bucket)
            .match_requests(|req| req.bucket() == Some("present"))
            .then_output(|| HeadBucketOutput::builder().build());
        let client = S3ObjectClient::with_client(
            mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&missing, &present]),
            DEFAULT_REGION,
        );

        assert!(!client.bucket_exists("missing").await.unwrap());
        assert!(client.bucket_exists("present").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_bucket_mapping() {
        let owned = mock!(Client::create_bucket)
            .match_requests(|req| req.bucket() == Some("owned"))
            .then_error(|| {
                CreateBucketError::BucketAlreadyOwnedByYou(BucketAlreadyOwnedByYou::builder().build())
            });
        let taken = mock!(Client::create_bucket)
            .match_requests(|req| req.bucket() == Some("taken"))
            .then_error(|| CreateBucketError::BucketAlreadyExists(BucketAlreadyExists::builder().build()));
        let broken = mock!(Client::create_bucket)
            .match_requests(|req| req.bucket() == Some("broken"))
            .then_error(|| {
                CreateBucketError::generic(
                    ErrorMetadata::builder()
                        .code("InternalError")
                        .message("boom")
                        .build(),
                )
            });
        let fresh = mock!(Client::create_bucket)
            .match_requests(|req| req.bucket() == Some("fresh"))
            .then_output(|| CreateBucketOutput::builder().build());
        let client = S3ObjectClient::with_client(
            mock_client!(
                aws_sdk_s3,
                RuleMode::MatchAny,
                [&owned, &taken, &broken, &fresh]
            ),
            DEFAULT_REGION,
        );

        assert!(matches!(
            client.create_bucket("owned").await,
            Err(StorageError::BucketAlreadyExists(_))
        ));
        assert!(matches!(
            client.create_bucket("taken").await,
            Err(StorageError::BucketAlreadyExists(_))
        ));
        assert!(matches!(
            client.create_bucket("broken").await,
            Err(StorageError::Remote(_))
        ));
        client.create_bucket("fresh").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_object_mapping() {
        let no_key = mock!(Client::get_object)
            .match_requests(|req| req.bucket() == Some("docs"))
            .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let no_bucket = mock!(Client::get_object)
            .match_requests(|req| req.bucket() == Some("nowhere"))
            .then_error(|| {
                GetObjectError::generic(ErrorMetadata::builder().code("NoSuchBucket").build())
            });
        let client = S3ObjectClient::with_client(
            mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&no_key, &no_bucket]),
            DEFAULT_REGION,
        );

        let err = client.get_object("docs", "a.txt").await.unwrap_err();
        assert!(
            matches!(err, StorageError::ObjectNotFound { bucket, key } if bucket == "docs" && key == "a.txt")
        );
        let err = client.get_object("nowhere", "a.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::BucketNotFound(bucket) if bucket == "nowhere"));
    }
}
