use std::sync::RwLock;

use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, warn};

use super::error::ApiError;
use super::token::TokenManager;

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";

/// A request the gateway can dispatch and, if the first attempt is rejected
/// with 401, rebuild byte-for-byte for the single retry. Bodies are owned
/// (including file bytes) precisely so that replay is always possible —
/// streaming multipart would make the retry unreproducible.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<Part>),
}

#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone)]
pub enum PartValue {
    Text(String),
    File {
        filename: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }
}

/// Wraps every outbound call: pre-flight token check, bearer header, CSRF
/// echo, and exactly one replay after a reactive refresh when the server
/// rejects a token the pre-flight check considered fresh. Every other
/// status passes through untouched for the caller to classify.
pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
    csrf: RwLock<Option<String>>,
}

impl Gateway {
    pub fn new(http: reqwest::Client, base_url: String, tokens: TokenManager) -> Self {
        Self {
            http,
            base_url,
            tokens,
            csrf: RwLock::new(None),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let access = self.tokens.ensure_fresh_access().await?;
        let resp = self.dispatch(request, access.as_deref()).await?;
        self.remember_csrf(&resp);

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        // 401 on an unauthenticated call carries no credential to renew.
        let Some(previous) = access else {
            return Ok(resp);
        };

        match self.tokens.handle_unauthorized(&previous).await {
            Ok(Some(fresh)) => {
                debug!(path = %request.path, "replaying request after reactive refresh");
                let retry = self.dispatch(request, Some(&fresh)).await?;
                self.remember_csrf(&retry);
                Ok(retry)
            }
            // Terminal: session state is already cleared; hand the original
            // rejection back rather than retrying further.
            Ok(None) | Err(ApiError::AuthExpired) => {
                warn!(path = %request.path, "request rejected and session not recoverable");
                Ok(resp)
            }
            Err(other) => Err(other),
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = access
            && !token.is_empty()
        {
            builder = builder.bearer_auth(token);
        }
        // Multipart keeps the boundary content type reqwest generates.
        if !matches!(request.body, RequestBody::Multipart(_)) {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if request.method != Method::GET
            && let Some(csrf) = self.csrf_token()
        {
            builder = builder.header(CSRF_HEADER, csrf);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(value.to_string()),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        builder.send().await.map_err(ApiError::Connectivity)
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf.read().ok()?.clone()
    }

    /// Capture the `csrftoken` cookie so non-auth state mutation can echo it
    /// back in the CSRF header, the way the browser client reads it from
    /// `document.cookie`.
    fn remember_csrf(&self, resp: &Response) {
        let prefix = format!("{CSRF_COOKIE}=");
        for value in resp.headers().get_all(SET_COOKIE) {
            let Ok(cookie) = value.to_str() else { continue };
            let Some(rest) = cookie.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let token = rest.split(';').next().unwrap_or(rest).to_string();
            if token.is_empty() {
                continue;
            }
            if let Ok(mut csrf) = self.csrf.write() {
                *csrf = Some(token);
            }
        }
    }
}

fn build_form(parts: &[Part]) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match &part.value {
            PartValue::Text(value) => form.text(part.name.clone(), value.clone()),
            PartValue::File {
                filename,
                mime,
                bytes,
            } => {
                let file = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(mime)
                    .map_err(|_| ApiError::InvalidRequest(format!("bad mime type {mime}")))?;
                form.part(part.name.clone(), file)
            }
        };
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_accumulates_query() {
        let request = ApiRequest::get("comments/")
            .query("page", 2)
            .query("sort_by", "created");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.query.len(), 2);
        assert_eq!(request.query[0], ("page".to_string(), "2".to_string()));
    }

    #[test]
    fn multipart_requests_are_cloneable_for_replay() {
        let request = ApiRequest::post("comments/").multipart(vec![
            Part {
                name: "text".to_string(),
                value: PartValue::Text("hello".to_string()),
            },
            Part {
                name: "files".to_string(),
                value: PartValue::File {
                    filename: "cat.png".to_string(),
                    mime: "image/png".to_string(),
                    bytes: vec![1, 2, 3],
                },
            },
        ]);
        let replay = request.clone();
        match (&request.body, &replay.body) {
            (RequestBody::Multipart(a), RequestBody::Multipart(b)) => {
                assert_eq!(a.len(), b.len());
            }
            _ => panic!("expected multipart bodies"),
        }
    }
}
