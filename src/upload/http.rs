//! HTTP client for the media service API
//!
//! Entry creation is a single multirequest: `media.add`, `uploadToken.add`
//! and `media.addContent` referencing the first two results. The transfer is
//! a multipart upload to the token; the body is streamed in fixed-size
//! chunks so progress follows what the transport has consumed.

use super::service::MediaService;
use super::types::{CreatedEntry, EntryRequest, ProgressFn, UploadError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{multipart, Body, Client};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Size of each streamed body chunk
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// JSON response format selector
const FORMAT_JSON: u8 = 1;

const EXCEPTION_TYPE: &str = "KalturaAPIException";

/// Media service reached over HTTP
pub struct HttpMediaService {
    client: Client,
    service_url: Url,
    ks: String,
    partner_id: u64,
}

impl HttpMediaService {
    pub fn new(
        service_url: &str,
        ks: &str,
        partner_id: u64,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let mut service_url = Url::parse(service_url)
            .map_err(|e| UploadError::Service(format!("invalid service url: {}", e)))?;
        if !service_url.path().ends_with('/') {
            let path = format!("{}/", service_url.path());
            service_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("express-recorder/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Service(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            service_url,
            ks: ks.to_string(),
            partner_id,
        })
    }

    fn endpoint(&self, service: &str, action: Option<&str>) -> Result<Url, UploadError> {
        let path = match action {
            Some(action) => format!(
                "api_v3/service/{}/action/{}",
                urlencoding::encode(service),
                urlencoding::encode(action)
            ),
            None => format!("api_v3/service/{}", urlencoding::encode(service)),
        };
        self.service_url
            .join(&path)
            .map_err(|e| UploadError::Service(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn post_json(&self, url: Url, body: &Value) -> Result<Value, reqwest::Error> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

/// Body of the batched create/token/bind request
pub fn multirequest_body(ks: &str, partner_id: u64, request: &EntryRequest) -> Value {
    let mut entry = json!({
        "objectType": "KalturaMediaEntry",
        "name": request.name,
        "mediaType": request.media_type.code(),
        "tags": request.tags,
    });
    if let Some(profile) = request.conversion_profile_id {
        entry["conversionProfileId"] = json!(profile);
    }
    if let Some(parent) = &request.parent_entry_id {
        entry["parentEntryId"] = json!(parent);
    }

    json!({
        "format": FORMAT_JSON,
        "ks": ks,
        "partnerId": partner_id,
        "1": { "service": "media", "action": "add", "entry": entry },
        "2": {
            "service": "uploadToken",
            "action": "add",
            "uploadToken": { "objectType": "KalturaUploadToken" },
        },
        "3": {
            "service": "media",
            "action": "addContent",
            "entryId": "{1:result:id}",
            "resource": {
                "objectType": "KalturaUploadedFileTokenResource",
                "token": "{2:result:id}",
            },
        },
    })
}

/// Message of an API exception result, if `value` is one
fn api_exception(value: &Value) -> Option<String> {
    if value.get("objectType").and_then(Value::as_str) != Some(EXCEPTION_TYPE) {
        return None;
    }
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown service error");
    Some(match value.get("code").and_then(Value::as_str) {
        Some(code) => format!("{} ({})", message, code),
        None => message.to_string(),
    })
}

fn result_id(value: Option<&Value>) -> Option<String> {
    value
        .and_then(|v| v.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Interpret the multirequest response. Any failing step fails the batch.
pub fn parse_multirequest(response: &Value) -> Result<CreatedEntry, UploadError> {
    if let Some(message) = api_exception(response) {
        return Err(UploadError::EntryCreation {
            message,
            entry_id: None,
        });
    }
    let results = response.as_array().ok_or_else(|| UploadError::EntryCreation {
        message: "unexpected multirequest response".to_string(),
        entry_id: None,
    })?;

    let entry = results.first();
    let token = results.get(1);
    let bind = results.get(2);

    if let Some(message) = entry.and_then(api_exception) {
        return Err(UploadError::EntryCreation {
            message,
            entry_id: None,
        });
    }
    let entry_id = result_id(entry).ok_or_else(|| UploadError::EntryCreation {
        message: "missing entry id".to_string(),
        entry_id: None,
    })?;

    if let Some(message) = token.and_then(api_exception) {
        return Err(UploadError::EntryCreation {
            message,
            entry_id: Some(entry_id),
        });
    }
    let token_id = result_id(token).ok_or_else(|| UploadError::EntryCreation {
        message: "missing upload token id".to_string(),
        entry_id: Some(entry_id.clone()),
    })?;

    match bind {
        Some(bind) => {
            if let Some(message) = api_exception(bind) {
                return Err(UploadError::TokenBind {
                    message,
                    entry_id: Some(entry_id),
                });
            }
        }
        None => {
            return Err(UploadError::TokenBind {
                message: "missing bind result".to_string(),
                entry_id: Some(entry_id),
            })
        }
    }

    Ok(CreatedEntry { entry_id, token_id })
}

/// File extension for an upload of `mime_type`
pub fn file_extension(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "video/mp4" | "audio/mp4" => "mp4",
        "audio/ogg" => "ogg",
        _ => "webm",
    }
}

fn split_chunks(data: &Bytes) -> Vec<Bytes> {
    (0..data.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(data.len())))
        .collect()
}

/// Wrap `data` in a body stream that reports progress as it is consumed
fn progress_body(data: Bytes, progress: ProgressFn) -> Body {
    let total = data.len() as u64;
    let chunks = split_chunks(&data);

    let mut loaded = 0u64;
    let stream = futures::stream::iter(chunks).map(move |chunk| {
        loaded += chunk.len() as u64;
        progress(loaded, total);
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

#[async_trait]
impl MediaService for HttpMediaService {
    async fn create_entry(&self, request: &EntryRequest) -> Result<CreatedEntry, UploadError> {
        let url = self.endpoint("multirequest", None)?;
        let body = multirequest_body(&self.ks, self.partner_id, request);
        tracing::debug!("Creating entry '{}' via {}", request.name, url);

        let response = self
            .post_json(url, &body)
            .await
            .map_err(|e| UploadError::EntryCreation {
                message: e.to_string(),
                entry_id: None,
            })?;
        parse_multirequest(&response)
    }

    async fn upload(
        &self,
        token_id: &str,
        data: Bytes,
        mime_type: &str,
        progress: ProgressFn,
    ) -> Result<(), UploadError> {
        let url = self.endpoint("uploadToken", Some("upload"))?;
        let length = data.len() as u64;
        let file_name = format!("recording.{}", file_extension(mime_type));

        let mut part = multipart::Part::stream_with_length(progress_body(data, progress), length)
            .file_name(file_name);
        if !mime_type.is_empty() {
            part = part
                .mime_str(mime_type)
                .map_err(|e| UploadError::Transfer(format!("invalid mime type: {}", e)))?;
        }

        let form = multipart::Form::new()
            .text("format", FORMAT_JSON.to_string())
            .text("ks", self.ks.clone())
            .text("uploadTokenId", token_id.to_string())
            .text("resume", "false")
            .text("finalChunk", "true")
            .text("resumeAt", "-1")
            .part("fileData", part);

        tracing::debug!("Uploading {} bytes to token {}", length, token_id);
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| UploadError::Transfer(e.to_string()))?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| UploadError::Transfer(e.to_string()))?;
        match api_exception(&value) {
            Some(message) => Err(UploadError::Transfer(message)),
            None => Ok(()),
        }
    }

    async fn delete_entry(&self, entry_id: &str) -> Result<(), UploadError> {
        let url = self.endpoint("media", Some("delete"))?;
        let body = json!({
            "format": FORMAT_JSON,
            "ks": self.ks,
            "partnerId": self.partner_id,
            "entryId": entry_id,
        });

        let value = self
            .post_json(url, &body)
            .await
            .map_err(|e| UploadError::Service(e.to_string()))?;
        match api_exception(&value) {
            Some(message) => Err(UploadError::Service(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::MediaType;

    fn request(parent: Option<&str>) -> EntryRequest {
        EntryRequest {
            name: "Standup".into(),
            media_type: MediaType::Video,
            tags: "expressrecorder".into(),
            conversion_profile_id: Some(42),
            parent_entry_id: parent.map(str::to_string),
        }
    }

    fn exception(message: &str) -> Value {
        json!({ "objectType": EXCEPTION_TYPE, "code": "SERVICE_FORBIDDEN", "message": message })
    }

    #[test]
    fn test_multirequest_references_previous_results() {
        let body = multirequest_body("secret", 123, &request(Some("0_parent")));

        assert_eq!(body["format"], 1);
        assert_eq!(body["1"]["entry"]["mediaType"], 1);
        assert_eq!(body["1"]["entry"]["parentEntryId"], "0_parent");
        assert_eq!(body["1"]["entry"]["conversionProfileId"], 42);
        assert_eq!(body["3"]["entryId"], "{1:result:id}");
        assert_eq!(body["3"]["resource"]["token"], "{2:result:id}");
    }

    #[test]
    fn test_primary_entry_has_no_parent() {
        let body = multirequest_body("secret", 123, &request(None));
        assert!(body["1"]["entry"].get("parentEntryId").is_none());
    }

    #[test]
    fn test_parse_successful_batch() {
        let response = json!([
            { "objectType": "KalturaMediaEntry", "id": "0_abc" },
            { "objectType": "KalturaUploadToken", "id": "tok_1" },
            { "objectType": "KalturaMediaEntry", "id": "0_abc" },
        ]);
        assert_eq!(
            parse_multirequest(&response).unwrap(),
            CreatedEntry {
                entry_id: "0_abc".into(),
                token_id: "tok_1".into(),
            }
        );
    }

    #[test]
    fn test_failing_bind_keeps_entry_for_cleanup() {
        let response = json!([
            { "objectType": "KalturaMediaEntry", "id": "0_abc" },
            { "objectType": "KalturaUploadToken", "id": "tok_1" },
            exception("token already bound"),
        ]);
        let err = parse_multirequest(&response).unwrap_err();
        assert!(matches!(&err, UploadError::TokenBind { .. }));
        assert_eq!(err.partial_entry_id(), Some("0_abc"));
    }

    #[test]
    fn test_failing_entry_step() {
        let response = json!([
            exception("invalid ks"),
            exception("invalid ks"),
            exception("invalid ks")
        ]);
        let err = parse_multirequest(&response).unwrap_err();
        assert!(matches!(err, UploadError::EntryCreation { entry_id: None, .. }));
    }

    #[test]
    fn test_top_level_exception() {
        let err = parse_multirequest(&exception("session expired")).unwrap_err();
        assert!(err.to_string().contains("session expired"));
    }

    #[test]
    fn test_extension_from_mime() {
        assert_eq!(file_extension("video/webm;codecs=vp9,opus"), "webm");
        assert_eq!(file_extension("video/mp4"), "mp4");
        assert_eq!(file_extension("audio/ogg;codecs=opus"), "ogg");
        assert_eq!(file_extension("audio/webm;codecs=opus"), "webm");
        assert_eq!(file_extension(""), "webm");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let service =
            HttpMediaService::new("https://media.example.com/base", "ks", 1, Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            service.endpoint("uploadToken", Some("upload")).unwrap().as_str(),
            "https://media.example.com/base/api_v3/service/uploadToken/action/upload"
        );
    }

    #[test]
    fn test_body_is_split_into_fixed_chunks() {
        let data = Bytes::from(vec![0u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let chunks = split_chunks(&data);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), UPLOAD_CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 10);
        assert!(split_chunks(&Bytes::new()).is_empty());
    }
}
