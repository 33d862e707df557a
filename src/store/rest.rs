use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use super::auth::Session;
use super::{Query, Store, Table};
use crate::errors::StoreError;

/// PostgREST table client (`{url}/rest/v1/{table}`).
///
/// Requests carry the project's anon key as `apikey` and the signed-in
/// user's access token as the bearer, falling back to the anon key.
#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: watch::Receiver<Option<Session>>,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    code: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        anon_key: &str,
        session: watch::Receiver<Option<Session>>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session,
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn headers(&self, write: bool) -> Result<HeaderMap, StoreError> {
        let bearer = self
            .session
            .borrow()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&self.anon_key)?);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            header_value(&format!("Bearer {}", bearer))?,
        );
        if write {
            headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        }
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        table: Table,
        params: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let write = method != Method::GET;
        tracing::debug!(%method, %table, ?params, "postgrest request");
        let mut request = self
            .client
            .request(method, self.table_url(table))
            .headers(self.headers(write)?)
            .query(&params);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let value: Value = resp.json().await?;
        Ok(match value {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StoreError> {
    HeaderValue::from_str(value)
        .map_err(|e| StoreError::Unavailable(format!("invalid header value: {}", e)))
}

fn rejection(status: StatusCode, body: &str) -> StoreError {
    let (code, message) = match serde_json::from_str::<PostgrestError>(body) {
        Ok(err) => {
            let mut message = err.message.unwrap_or_else(|| status.to_string());
            if let Some(details) = err.details.filter(|d| !d.is_empty()) {
                message = format!("{} ({})", message, details);
            }
            if let Some(hint) = err.hint.filter(|h| !h.is_empty()) {
                message = format!("{}; hint: {}", message, hint);
            }
            (err.code, message)
        }
        Err(_) if body.is_empty() => (None, status.to_string()),
        Err(_) => (None, body.to_string()),
    };
    StoreError::Rejected {
        status: status.as_u16(),
        code,
        message,
    }
}

#[async_trait]
impl Store for RestStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.send(Method::GET, table, query.to_params(), None).await
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let params = vec![("select".to_string(), "*".to_string())];
        self.send(Method::POST, table, params, Some(Value::Array(rows)))
            .await
    }

    async fn update(
        &self,
        table: Table,
        patch: Value,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError> {
        let mut params = query.filter_params();
        params.push(("select".to_string(), "*".to_string()));
        self.send(Method::PATCH, table, params, Some(patch)).await
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        let mut params = query.filter_params();
        params.push(("select".to_string(), "*".to_string()));
        self.send(Method::DELETE, table, params, None).await
    }
}
