//! Minimal EasyDB API client: session lifecycle, paged search, document fetch.
//!
//! Only the calls the harvester needs are modelled. Every request goes
//! through [`with_retry`], and every non-success status becomes a
//! [`TransferError::Status`] so the retry wrapper can tell throttling and
//! server errors (retried) from client errors (not retried).

use crate::config::{Credentials, HarvestConfig, RetryPolicy};
use crate::error::{IngestError, ItemError, TransferError};
use crate::module::Module;
use crate::retry::with_retry;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the session token.
const TOKEN_HEADER: &str = "X-Easydb-Token";

/// Export format of the per-item XML document.
const DOCUMENT_FORMAT: &str = "xml_easydb";

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub last_modified: Option<String>,
}

/// One page of the remote listing.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub items: Vec<RemoteItem>,
    /// Objects in the response, including entries dropped for lacking an id.
    pub returned: usize,
    /// Total hits reported by the server.
    pub count: usize,
}

pub struct EasydbClient {
    http: Client,
    base: String,
    retry: RetryPolicy,
    token: Option<String>,
}

impl EasydbClient {
    pub fn new(config: &HarvestConfig) -> Result<Self, IngestError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IngestError::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: config.server_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
            token: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base, path)
    }

    fn token(&self) -> Result<&str, IngestError> {
        self.token
            .as_deref()
            .ok_or_else(|| IngestError::Internal("no session; call start_session first".into()))
    }

    /// Open an anonymous session and keep its token.
    pub async fn start_session(&mut self) -> Result<(), IngestError> {
        let url = self.url("session");
        let http = &self.http;
        let u = url.as_str();

        let body: Value = with_retry(&self.retry, u, move || async move {
            let resp = http.get(u).send().await.map_err(|e| TransferError::from_reqwest(&e))?;
            check_status(resp)?
                .json::<Value>()
                .await
                .map_err(|e| TransferError::Body(e.to_string()))
        })
        .await
        .map_err(|source| IngestError::Remote {
            url: url.clone(),
            source,
        })?;

        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::UnexpectedResponse {
                url: url.clone(),
                detail: "session response has no token".into(),
            })?;
        debug!("Session started");
        self.token = Some(token.to_string());
        Ok(())
    }

    /// Bind the session to a user. A client-error answer is fatal.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<(), IngestError> {
        let url = self.url("session/authenticate");
        let token = self.token()?;
        let http = &self.http;
        let u = url.as_str();

        let resp = with_retry(&self.retry, u, move || async move {
            let resp = http
                .post(u)
                .query(&[
                    ("token", token),
                    ("login", credentials.login.as_str()),
                    ("password", credentials.password.as_str()),
                ])
                .send()
                .await
                .map_err(|e| TransferError::from_reqwest(&e))?;
            transient_only(resp)
        })
        .await
        .map_err(|source| IngestError::Remote {
            url: url.clone(),
            source,
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = error_detail(resp).await;
            return Err(IngestError::AuthenticationFailed {
                login: credentials.login.clone(),
                status,
                detail,
            });
        }
        info!("Authenticated as {}", credentials.login);
        Ok(())
    }

    /// End the session. Single attempt; callers treat failure as a warning.
    pub async fn deauthenticate(&self) -> Result<(), IngestError> {
        let url = self.url("session/deauthenticate");
        let token = self.token()?;
        let resp = self
            .http
            .post(&url)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| IngestError::Remote {
                url: url.clone(),
                source: TransferError::from_reqwest(&e),
            })?;
        check_status(resp).map_err(|source| IngestError::Remote { url, source })?;
        Ok(())
    }

    /// Fetch one page of the module's listing, sorted by system object id.
    pub async fn list_page(
        &self,
        module: &Module,
        sample: bool,
        offset: usize,
        limit: usize,
    ) -> Result<ListPage, IngestError> {
        let url = self.url("search");
        let token = self.token()?;
        let payload = json!({
            "type": "object",
            "objecttypes": [module.objecttype],
            "format": "short",
            "search": module.search_filters(sample),
            "offset": offset,
            "limit": limit,
            "sort": [{ "field": "_system_object_id", "order": "ASC" }],
        });
        let http = &self.http;
        let u = url.as_str();
        let p = &payload;

        let body: Value = with_retry(&self.retry, u, move || async move {
            let resp = http
                .post(u)
                .header(TOKEN_HEADER, token)
                .json(p)
                .send()
                .await
                .map_err(|e| TransferError::from_reqwest(&e))?;
            check_status(resp)?
                .json::<Value>()
                .await
                .map_err(|e| TransferError::Body(e.to_string()))
        })
        .await
        .map_err(|source| IngestError::Remote {
            url: url.clone(),
            source,
        })?;

        parse_list_page(&body, module.objecttype).ok_or_else(|| IngestError::UnexpectedResponse {
            url,
            detail: "search response has no 'objects' array".into(),
        })
    }

    /// URL of the XML document of one item.
    pub fn document_url(&self, objecttype: &str, id: &str) -> String {
        self.url(&format!("objects/id/{objecttype}/{id}/format/{DOCUMENT_FORMAT}"))
    }

    /// Download the XML document of one item.
    ///
    /// Failures are per item: the harvest records them and moves on.
    pub async fn fetch_document(&self, objecttype: &str, id: &str) -> Result<Vec<u8>, ItemError> {
        let url = self.document_url(objecttype, id);
        let Some(token) = self.token.as_deref() else {
            return Err(ItemError::Transfer {
                url,
                detail: "no session".into(),
            });
        };
        let http = &self.http;
        let u = url.as_str();

        with_retry(&self.retry, u, move || async move {
            let resp = http
                .get(u)
                .header(TOKEN_HEADER, token)
                .send()
                .await
                .map_err(|e| TransferError::from_reqwest(&e))?;
            let bytes = check_status(resp)?
                .bytes()
                .await
                .map_err(|e| TransferError::Body(e.to_string()))?;
            Ok(bytes.to_vec())
        })
        .await
        .map_err(|e| ItemError::from_transfer(&url, e, self.retry.attempts()))
    }
}

/// Turn any non-success status into [`TransferError::Status`].
pub(crate) fn check_status(resp: Response) -> Result<Response, TransferError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(TransferError::Status {
        status: status.as_u16(),
        retry_after: retry_after(&resp),
    })
}

/// Like [`check_status`], but pass client errors through for the caller to inspect.
fn transient_only(resp: Response) -> Result<Response, TransferError> {
    let status = resp.status();
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(TransferError::Status {
            status: status.as_u16(),
            retry_after: retry_after(&resp),
        });
    }
    Ok(resp)
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
pub(crate) fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_detail(resp: Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    // EasyDB errors are JSON with a `code` field.
    serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text)
}

fn parse_list_page(body: &Value, objecttype: &str) -> Option<ListPage> {
    let objects = body.get("objects")?.as_array()?;
    let items = objects
        .iter()
        .filter_map(|obj| {
            let inner = obj.get(objecttype);
            let id = inner
                .and_then(|o| o.get("_id"))
                .or_else(|| obj.get("_system_object_id"))
                .and_then(value_to_id);
            let Some(id) = id else {
                warn!("Listing entry without id skipped");
                return None;
            };
            let last_modified = obj
                .get("_last_modified")
                .or_else(|| inner.and_then(|o| o.get("_last_modified")))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(RemoteItem { id, last_modified })
        })
        .collect::<Vec<_>>();
    let count = body
        .get("count")
        .and_then(Value::as_u64)
        .map(|c| c as usize)
        .unwrap_or(objects.len());
    Some(ListPage {
        items,
        returned: objects.len(),
        count,
    })
}

fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}
