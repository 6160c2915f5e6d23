//! Google Cloud Storage backend over the JSON API.
//!
//! Uploads are buffered and sent as a single media upload on close. Reads
//! fetch the whole object; probe files are small.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::BufferedReader;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ListQuery, ObjectAttrs, ObjectReader, ObjectStore, ObjectWriter};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Connection settings for [`GcsStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// OAuth2 bearer token. Requests are sent unauthenticated when absent,
    /// which only works against emulators.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            access_token: None,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    bucket: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
}

impl GcsObject {
    fn into_attrs(self) -> ObjectAttrs {
        ObjectAttrs {
            size: self.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            updated: self.updated.unwrap_or_else(Utc::now),
            bucket: self.bucket,
            name: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// GCS JSON API client.
#[derive(Debug, Clone)]
pub struct GcsStore {
    client: Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl GcsStore {
    pub fn new(config: GcsConfig) -> StorageResult<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            StorageError::InvalidArgument(format!("invalid endpoint {}: {e}", config.endpoint))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::InvalidArgument(format!(
                "endpoint {} cannot be a base URL",
                config.endpoint
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StorageError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            access_token: config.access_token,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        bucket: &str,
        object: Option<&str>,
    ) -> StorageResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, bucket, object))
    }

    async fn upload(&self, bucket: &str, object: &str, data: Vec<u8>) -> StorageResult<ObjectAttrs> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        let builder = self
            .request(Method::POST, url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data);
        // Object-level 404s cannot happen on upload; any 404 is the bucket.
        let response = self
            .send(builder, bucket, None)
            .await
            .map_err(|e| match e {
                StorageError::ObjectNotExist { bucket, .. } => StorageError::BucketNotExist(bucket),
                other => other,
            })?;
        let meta: GcsObject = response.json().await.map_err(transport_error)?;
        Ok(meta.into_attrs())
    }
}

fn transport_error(err: reqwest::Error) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout(err.to_string())
    } else {
        StorageError::Http(err.to_string())
    }
}

/// Map a non-success response to a storage error. GCS reports both missing
/// buckets and missing objects as 404; the message tells them apart.
fn status_error(status: StatusCode, body: &str, bucket: &str, object: Option<&str>) -> StorageError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|env| env.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        StatusCode::NOT_FOUND => match object {
            Some(object) if !message.to_ascii_lowercase().contains("bucket") => {
                StorageError::object_not_exist(bucket, object)
            }
            _ => StorageError::BucketNotExist(bucket.to_string()),
        },
        StatusCode::BAD_REQUEST => StorageError::InvalidArgument(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => StorageError::Timeout(message),
        _ => StorageError::Http(format!("{status}: {message}")),
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn backend_name(&self) -> &'static str {
        "gcs"
    }

    async fn create_bucket(&self, bucket: &str, project: Option<&str>) -> StorageResult<()> {
        let project = project.ok_or_else(|| {
            StorageError::InvalidArgument("creating a GCS bucket requires a project".to_string())
        })?;
        let mut url = self.url(&["storage", "v1", "b"]);
        url.query_pairs_mut().append_pair("project", project);
        let builder = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "name": bucket }));

        let response = builder.send().await.map_err(transport_error)?;
        match response.status() {
            s if s.is_success() => {
                debug!(bucket, project, "Created GCS bucket");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(bucket, "GCS bucket already exists");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, &body, bucket, None))
            }
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let url = self.url(&["storage", "v1", "b", bucket]);
        match self.send(self.request(Method::GET, url), bucket, None).await {
            Ok(_) => Ok(true),
            Err(StorageError::BucketNotExist(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn new_writer(&self, bucket: &str, object: &str) -> Box<dyn ObjectWriter> {
        Box::new(GcsWriter {
            store: self.clone(),
            bucket: bucket.to_string(),
            name: object.to_string(),
            buf: Vec::new(),
            closed: false,
        })
    }

    async fn new_reader(
        &self,
        bucket: &str,
        object: &str,
    ) -> StorageResult<Box<dyn ObjectReader>> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .send(self.request(Method::GET, url), bucket, Some(object))
            .await?;
        let data = response.bytes().await.map_err(transport_error)?;
        Ok(Box::new(BufferedReader::new(data.to_vec())))
    }

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()> {
        let url = self.url(&["storage", "v1", "b", bucket, "o", object]);
        self.send(self.request(Method::DELETE, url), bucket, Some(object))
            .await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, query: &ListQuery) -> StorageResult<Vec<ObjectAttrs>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&["storage", "v1", "b", bucket, "o"]);
            {
                let mut pairs = url.query_pairs_mut();
                if !query.prefix.is_empty() {
                    pairs.append_pair("prefix", &query.prefix);
                }
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }
            let response = self
                .send(self.request(Method::GET, url), bucket, None)
                .await?;
            let page: ListResponse = response.json().await.map_err(transport_error)?;
            out.extend(page.items.into_iter().map(GcsObject::into_attrs));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

struct GcsWriter {
    store: GcsStore,
    bucket: String,
    name: String,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl ObjectWriter for GcsWriter {
    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "write after close on {}",
                self.name
            )));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> StorageResult<ObjectAttrs> {
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "writer for {} already closed",
                self.name
            )));
        }
        self.closed = true;
        let data = std::mem::take(&mut self.buf);
        let result = self.store.upload(&self.bucket, &self.name, data).await;
        if let Err(e) = &result {
            warn!(bucket = %self.bucket, object = %self.name, error = %e, "GCS upload failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: &str) -> GcsStore {
        GcsStore::new(GcsConfig {
            endpoint: endpoint.to_string(),
            ..GcsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_building_encodes_segments() {
        let s = store("http://localhost:4443");
        let url = s.url(&["storage", "v1", "b", "bkt", "o", "dir/obj name"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/storage/v1/b/bkt/o/dir%2Fobj%20name"
        );

        let s = store("http://localhost:4443/prefix/");
        let url = s.url(&["storage", "v1", "b"]);
        assert_eq!(url.as_str(), "http://localhost:4443/prefix/storage/v1/b");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(GcsStore::new(GcsConfig {
            endpoint: "not a url".to_string(),
            ..GcsConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_not_found_mapping() {
        let bucket_body = r#"{"error":{"code":404,"message":"The specified bucket does not exist."}}"#;
        let object_body = r#"{"error":{"code":404,"message":"No such object: b/o"}}"#;

        assert!(status_error(StatusCode::NOT_FOUND, bucket_body, "b", Some("o")).is_bucket_not_exist());
        assert!(status_error(StatusCode::NOT_FOUND, object_body, "b", Some("o")).is_object_not_exist());
        assert!(status_error(StatusCode::NOT_FOUND, object_body, "b", None).is_bucket_not_exist());
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "oops", "b", None),
            StorageError::Http(_)
        ));
    }

    #[test]
    fn test_list_response_parsing() {
        let body = r#"{
            "kind": "storage#objects",
            "nextPageToken": "abc",
            "items": [
                {"name": "Hermes_01_x", "bucket": "b", "size": "42",
                 "updated": "2024-01-02T03:04:05.000Z"}
            ]
        }"#;
        let page: ListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        let attrs: Vec<_> = page.items.into_iter().map(GcsObject::into_attrs).collect();
        assert_eq!(attrs[0].size, 42);
        assert_eq!(attrs[0].name, "Hermes_01_x");
    }
}
