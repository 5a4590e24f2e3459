use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::error::ApiError;
use super::models::Credential;
use super::session::SessionStore;

/// Remaining lifetime below which an access token is refreshed before use.
pub const REFRESH_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Read the `exp` claim out of a JWT without verifying the signature; the
/// server is the authority, this is only a client-side freshness hint.
/// Returns `None` for anything that is not a decodable three-part token.
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    claims.exp
}

/// An unparseable expiry counts as expired (the token is treated as absent
/// for freshness purposes and refreshed on sight).
fn needs_refresh(access: &str, now: i64) -> bool {
    match token_expiry(access) {
        Some(exp) => exp - now < REFRESH_LEEWAY_SECS,
        None => true,
    }
}

fn now_secs() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// Decides whether the current access token is usable and renews it against
/// the refresh endpoint when it is not. At most one refresh is ever in
/// flight: concurrent callers that find a stale token queue on the gate and
/// re-check freshness once they hold it, so N stale callers produce exactly
/// one network refresh.
pub struct TokenManager {
    http: reqwest::Client,
    base_url: String,
    store: SessionStore,
    refresh_gate: Mutex<()>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, base_url: String, store: SessionStore) -> Self {
        Self {
            http,
            base_url,
            store,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Safe to call before every outbound request.
    ///
    /// `Ok(None)` means no credential exists and the caller proceeds
    /// unauthenticated. A stale token without a refresh token is returned
    /// as-is; the server gets to rule on it. A failed refresh clears the
    /// store and surfaces `AuthExpired`.
    pub async fn ensure_fresh_access(&self) -> Result<Option<String>, ApiError> {
        let Some(credential) = self.store.credential() else {
            return Ok(None);
        };
        if !needs_refresh(&credential.access, now_secs()) {
            return Ok(Some(credential.access));
        }
        if credential.refresh.is_empty() {
            return Ok(Some(credential.access));
        }

        let _gate = self.refresh_gate.lock().await;
        // Someone else may have finished a refresh while we queued.
        if let Some(access) = self.store.access_token()
            && !needs_refresh(&access, now_secs())
        {
            debug!("access token already refreshed by a concurrent caller");
            return Ok(Some(access));
        }
        self.refresh_locked().await.map(Some)
    }

    /// Reactive path: a request was rejected with 401 despite a pre-flight
    /// check passing (server clock skew or revocation). One refresh attempt;
    /// `Ok(None)` when there is no session left to refresh, `AuthExpired`
    /// when the refresh itself is rejected.
    pub async fn handle_unauthorized(&self, previous: &str) -> Result<Option<String>, ApiError> {
        let _gate = self.refresh_gate.lock().await;
        match self.store.access_token() {
            None => return Ok(None),
            // A concurrent caller already rotated the token; use theirs
            // instead of burning a second refresh.
            Some(current) if current != previous => return Ok(Some(current)),
            Some(_) => {}
        }
        self.refresh_locked().await.map(Some)
    }

    /// Must be called with the gate held. A rejection response clears the
    /// whole store rather than retrying: silent infinite retry against an
    /// invalid refresh token would mask a logged-out state.
    async fn refresh_locked(&self) -> Result<String, ApiError> {
        let refresh = match self.store.refresh_token() {
            Some(refresh) if !refresh.is_empty() => refresh,
            _ => {
                self.store.clear();
                return Err(ApiError::AuthExpired);
            }
        };

        let url = format!("{}auth/refresh/", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "refresh": refresh }))
            .send()
            .await
            .map_err(ApiError::Connectivity)?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "token refresh rejected, terminating session");
            self.store.clear();
            return Err(ApiError::AuthExpired);
        }

        let body: RefreshResponse = resp.json().await.map_err(ApiError::Decode)?;
        // One atomic swap covers rotation of either half of the pair.
        let rotated = Credential {
            access: body.access.clone(),
            refresh: body.refresh.unwrap_or(refresh),
        };
        self.store.set_credential(rotated);
        debug!("access token refreshed");
        Ok(body.access)
    }
}

#[cfg(test)]
pub(crate) fn make_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_exp_claim() {
        let token = make_token(1_700_000_000);
        assert_eq!(token_expiry(&token), Some(1_700_000_000));
    }

    #[test]
    fn garbage_tokens_have_no_expiry() {
        assert_eq!(token_expiry("not-a-jwt"), None);
        assert_eq!(token_expiry("a.%%%.c"), None);
        // Valid base64 but not JSON.
        let bogus = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert_eq!(token_expiry(&bogus), None);
    }

    #[test]
    fn tolerates_padded_payload_segments() {
        use base64::engine::general_purpose::URL_SAFE;
        let payload = URL_SAFE.encode(r#"{"exp":42}"#);
        let token = format!("h.{payload}.s");
        assert_eq!(token_expiry(&token), Some(42));
    }

    #[test]
    fn leeway_boundary() {
        let now = 1_000_000;
        // Plenty of lifetime left: fresh.
        assert!(!needs_refresh(&make_token(now + 120), now));
        // Exactly at the leeway boundary: still fresh.
        assert!(!needs_refresh(&make_token(now + REFRESH_LEEWAY_SECS), now));
        // Inside the leeway window: stale.
        assert!(needs_refresh(&make_token(now + REFRESH_LEEWAY_SECS - 1), now));
        // Already expired: stale.
        assert!(needs_refresh(&make_token(now - 10), now));
        // Undecodable: treated as expired.
        assert!(needs_refresh("garbage", now));
    }
}
