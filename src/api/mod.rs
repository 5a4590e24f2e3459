use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::internal::error::{self, ApiError};
use crate::internal::gateway::{ApiRequest, Gateway, Part, PartValue};
use crate::internal::models::{Captcha, CommentPayload, Credential, FeedPayload, SortKey, User};
use crate::internal::session::SessionStore;
use crate::internal::token::TokenManager;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const MAX_DOCUMENT_BYTES: usize = 100 * 1024;

/// A comment being composed, authenticated or guest. Attachments carry
/// their bytes so the request stays replayable end to end.
#[derive(Debug, Clone, Default)]
pub struct CommentDraft {
    pub text: String,
    pub parent: Option<String>,
    pub guest: Option<GuestIdentity>,
    pub attachments: Vec<DraftAttachment>,
}

#[derive(Debug, Clone)]
pub struct GuestIdentity {
    pub name: String,
    pub email: String,
    pub captcha_key: String,
    pub captcha_value: String,
}

#[derive(Debug, Clone)]
pub struct DraftAttachment {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DraftAttachment {
    /// Mirror of the server's upload rules, checked before the bytes travel:
    /// images are jpeg/png/gif up to 10 MB, documents are .txt up to 100 KB.
    fn validate(&self) -> Result<(), ApiError> {
        match self.mime.as_str() {
            "image/jpeg" | "image/png" | "image/gif" => {
                if self.bytes.len() > MAX_IMAGE_BYTES {
                    return Err(ApiError::InvalidRequest(format!(
                        "{} exceeds the 10 MB image limit",
                        self.filename
                    )));
                }
            }
            "text/plain" => {
                if !self.filename.to_lowercase().ends_with(".txt") {
                    return Err(ApiError::InvalidRequest(format!(
                        "{} must be a .txt file",
                        self.filename
                    )));
                }
                if self.bytes.len() > MAX_DOCUMENT_BYTES {
                    return Err(ApiError::InvalidRequest(format!(
                        "{} exceeds the 100 KB text limit",
                        self.filename
                    )));
                }
            }
            other => {
                return Err(ApiError::InvalidRequest(format!(
                    "unsupported attachment type {other}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub captcha_key: String,
    pub captcha_value: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

/// Typed surface over the comment/reply API. Every call goes through the
/// authenticated gateway, which owns token freshness, the single 401
/// replay, and CSRF echoing.
pub struct ApiService {
    gateway: Gateway,
    session: SessionStore,
}

impl ApiService {
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> Self {
        Self::with_timeout(base_url, session, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        session: SessionStore,
        timeout: Duration,
    ) -> Self {
        let base_url = normalize_base_url(base_url.into());
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let tokens = TokenManager::new(http.clone(), base_url.clone(), session.clone());
        Self {
            gateway: Gateway::new(http, base_url, tokens),
            session,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// `GET /comments/?page=&sort_by=&order=`
    pub async fn fetch_page(&self, page: u32, sort: SortKey) -> Result<FeedPayload, ApiError> {
        let request = ApiRequest::get("comments/")
            .query("page", page)
            .query("sort_by", sort.field)
            .query("order", sort.order);
        self.get_json(request).await
    }

    /// `GET /comments/{id}/`
    pub async fn fetch_comment(&self, id: &str) -> Result<CommentPayload, ApiError> {
        self.get_json(ApiRequest::get(format!("comments/{id}/"))).await
    }

    /// `GET /comments/{id}/replies/` — one flat level, in server order.
    pub async fn fetch_replies(&self, id: &str) -> Result<Vec<CommentPayload>, ApiError> {
        self.get_json(ApiRequest::get(format!("comments/{id}/replies/")))
            .await
    }

    /// `POST /comments/` or `POST /comments/{parent}/replies/`. JSON when
    /// there are no attachments, multipart (field `files`) otherwise.
    pub async fn create_comment(&self, draft: &CommentDraft) -> Result<CommentPayload, ApiError> {
        for attachment in &draft.attachments {
            attachment.validate()?;
        }
        let path = match &draft.parent {
            Some(parent) => format!("comments/{parent}/replies/"),
            None => "comments/".to_string(),
        };

        let request = if draft.attachments.is_empty() {
            ApiRequest::post(path).json(draft_json(draft))
        } else {
            ApiRequest::post(path).multipart(draft_parts(draft))
        };
        self.get_json(request).await
    }

    /// `POST /comments/{id}/like/`
    pub async fn like(&self, id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(format!("comments/{id}/like/")).await
    }

    /// `POST /comments/{id}/unlike/`
    pub async fn unlike(&self, id: &str) -> Result<(), ApiError> {
        self.post_expect_ok(format!("comments/{id}/unlike/")).await
    }

    /// `POST /auth/login/` — on success the returned credential pair and
    /// identity are swapped into the session store as one unit.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let request = ApiRequest::post("auth/login/").json(serde_json::json!({
            "email": email,
            "password": password,
        }));
        let auth: AuthResponse = self.auth_json(request).await?;
        self.store_auth(auth)
    }

    /// `POST /auth/register/`
    pub async fn register(&self, form: &RegisterForm) -> Result<User, ApiError> {
        let request = ApiRequest::post("auth/register/").json(serde_json::json!({
            "username": form.username,
            "email": form.email,
            "password": form.password,
            "first_name": form.first_name,
            "last_name": form.last_name,
            "captcha_key": form.captcha_key,
            "captcha_value": form.captcha_value,
        }));
        let auth: AuthResponse = self.auth_json(request).await?;
        self.store_auth(auth)
    }

    /// `GET /captcha/` — a fresh challenge for guest posting/registration.
    pub async fn fetch_captcha(&self) -> Result<Captcha, ApiError> {
        self.get_json(ApiRequest::get("captcha/")).await
    }

    pub fn logout(&self) {
        info!("logging out, clearing session");
        self.session.clear();
    }

    fn store_auth(&self, auth: AuthResponse) -> Result<User, ApiError> {
        let user = auth.user.unwrap_or_default();
        if let (Some(access), Some(refresh)) = (auth.access, auth.refresh) {
            self.session
                .sign_in(Credential { access, refresh }, user.clone());
        }
        Ok(user)
    }

    async fn get_json<T>(&self, request: ApiRequest) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let resp = self.gateway.send(&request).await?;
        let resp = error::check(resp).await?;
        resp.json::<T>().await.map_err(ApiError::Decode)
    }

    /// Credential forms: a rejection here is bad input on the form, not a
    /// lost session, so 400/401/403 all surface as field errors.
    async fn auth_json<T>(&self, request: ApiRequest) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let resp = self.gateway.send(&request).await?;
        if matches!(resp.status().as_u16(), 400 | 401 | 403) {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Validation(error::parse_field_errors(&body)));
        }
        let resp = error::check(resp).await?;
        resp.json::<T>().await.map_err(ApiError::Decode)
    }

    async fn post_expect_ok(&self, path: String) -> Result<(), ApiError> {
        let resp = self.gateway.send(&ApiRequest::post(path)).await?;
        error::check(resp).await?;
        Ok(())
    }
}

fn normalize_base_url(mut base_url: String) -> String {
    if !base_url.ends_with('/') {
        base_url.push('/');
    }
    base_url
}

fn draft_json(draft: &CommentDraft) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("text".to_string(), draft.text.clone().into());
    if let Some(parent) = &draft.parent {
        body.insert("parent".to_string(), parent.clone().into());
    }
    if let Some(guest) = &draft.guest {
        body.insert("guest_name".to_string(), guest.name.clone().into());
        body.insert("guest_email".to_string(), guest.email.clone().into());
        body.insert("captcha_key".to_string(), guest.captcha_key.clone().into());
        body.insert(
            "captcha_value".to_string(),
            guest.captcha_value.clone().into(),
        );
    }
    serde_json::Value::Object(body)
}

fn draft_parts(draft: &CommentDraft) -> Vec<Part> {
    let mut parts = vec![Part {
        name: "text".to_string(),
        value: PartValue::Text(draft.text.clone()),
    }];
    if let Some(parent) = &draft.parent {
        parts.push(Part {
            name: "parent".to_string(),
            value: PartValue::Text(parent.clone()),
        });
    }
    if let Some(guest) = &draft.guest {
        for (name, value) in [
            ("guest_name", &guest.name),
            ("guest_email", &guest.email),
            ("captcha_key", &guest.captcha_key),
            ("captcha_value", &guest.captcha_value),
        ] {
            parts.push(Part {
                name: name.to_string(),
                value: PartValue::Text(value.clone()),
            });
        }
    }
    for attachment in &draft.attachments {
        parts.push(Part {
            name: "files".to_string(),
            value: PartValue::File {
                filename: attachment.filename.clone(),
                mime: attachment.mime.clone(),
                bytes: attachment.bytes.clone(),
            },
        });
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize) -> DraftAttachment {
        DraftAttachment {
            filename: "photo.png".to_string(),
            mime: "image/png".to_string(),
            bytes: vec![0; len],
        }
    }

    #[test]
    fn attachment_rules_match_the_server() {
        assert!(image(1024).validate().is_ok());
        assert!(image(MAX_IMAGE_BYTES + 1).validate().is_err());

        let doc = DraftAttachment {
            filename: "notes.txt".to_string(),
            mime: "text/plain".to_string(),
            bytes: vec![0; 512],
        };
        assert!(doc.validate().is_ok());

        let wrong_ext = DraftAttachment {
            filename: "notes.md".to_string(),
            mime: "text/plain".to_string(),
            bytes: vec![0; 512],
        };
        assert!(wrong_ext.validate().is_err());

        let exe = DraftAttachment {
            filename: "tool.exe".to_string(),
            mime: "application/octet-stream".to_string(),
            bytes: vec![0; 16],
        };
        assert!(exe.validate().is_err());
    }

    #[test]
    fn guest_draft_serializes_captcha_fields() {
        let draft = CommentDraft {
            text: "hello".to_string(),
            parent: None,
            guest: Some(GuestIdentity {
                name: "guest".to_string(),
                email: "g@example.com".to_string(),
                captcha_key: "k1".to_string(),
                captcha_value: "abcd".to_string(),
            }),
            attachments: Vec::new(),
        };
        let body = draft_json(&draft);
        assert_eq!(body["text"], "hello");
        assert_eq!(body["guest_name"], "guest");
        assert_eq!(body["captcha_key"], "k1");
        assert!(body.get("parent").is_none());
    }

    #[test]
    fn reply_draft_targets_the_parent_route() {
        let draft = CommentDraft {
            text: "re".to_string(),
            parent: Some("p-9".to_string()),
            guest: None,
            attachments: vec![image(8)],
        };
        let parts = draft_parts(&draft);
        assert!(parts.iter().any(|part| part.name == "parent"));
        assert!(parts.iter().any(|part| part.name == "files"));
    }

    #[test]
    fn base_url_always_ends_with_a_slash() {
        assert_eq!(
            normalize_base_url("http://x/api".to_string()),
            "http://x/api/"
        );
        assert_eq!(
            normalize_base_url("http://x/api/".to_string()),
            "http://x/api/"
        );
    }
}
