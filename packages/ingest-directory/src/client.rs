//! Adaptive directory HTTP client: OAuth2 client-credentials token cache,
//! adaptive page-size/pacing backoff on 429/503/504, batched manager
//! resolution.

use crate::error::{DirectoryError, Result};
use ingest_model::User;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const MIN_PAGE_SIZE: u32 = 25;
const BATCH_LIMIT: usize = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 8;
const MAX_CONSEC_SERVICE_ERRORS: u32 = 6;

/// Tracks throttling pressure and adapts page size / inter-request pacing
/// accordingly, the same way repeated 429/503/504s drive a client to back
/// off and shrink its page size rather than hammer the service.
struct AdaptiveLimiter {
    consec_service_errors: u32,
    page_sleep: Duration,
    page_size: u32,
}

impl AdaptiveLimiter {
    fn new(initial_page_size: u32) -> Self {
        Self {
            consec_service_errors: 0,
            page_sleep: Duration::from_millis(350),
            page_size: initial_page_size,
        }
    }

    fn note_success(&mut self) {
        self.consec_service_errors = self.consec_service_errors.saturating_sub(1);
    }

    /// Returns the nap duration to sleep before the next attempt, if the
    /// error streak crossed the heavy-throttling threshold.
    fn note_service_error(&mut self) -> Option<Duration> {
        self.consec_service_errors += 1;
        if matches!(self.consec_service_errors, 3 | 4) {
            self.page_sleep = (self.page_sleep + Duration::from_millis(250))
                .min(Duration::from_secs(2));
        }
        if self.consec_service_errors >= MAX_CONSEC_SERVICE_ERRORS {
            let nap = Duration::from_secs(30 + 10 * (self.consec_service_errors - MAX_CONSEC_SERVICE_ERRORS) as u64);
            self.page_size = (self.page_size / 2).max(MIN_PAGE_SIZE);
            self.page_sleep = (self.page_sleep + Duration::from_millis(500)).min(Duration::from_secs(3));
            self.consec_service_errors = 0;
            Some(nap)
        } else {
            None
        }
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

pub struct AdaptiveDirectoryClient {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    api_root: String,
    token: Mutex<Option<CachedToken>>,
    limiter: Mutex<AdaptiveLimiter>,
}

impl AdaptiveDirectoryClient {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        api_root: impl Into<String>,
    ) -> Self {
        Self::with_page_size(token_url, client_id, client_secret, scope, api_root, 100)
    }

    /// Same as [`Self::new`] but with an explicit initial page size (§6
    /// `PAGE_SIZE`), instead of the default of 100.
    pub fn with_page_size(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        api_root: impl Into<String>,
        initial_page_size: u32,
    ) -> Self {
        Self {
            http: Client::builder().timeout(REQUEST_TIMEOUT).build().expect("client builds"),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            api_root: api_root.into(),
            token: Mutex::new(None),
            limiter: Mutex::new(AdaptiveLimiter::new(initial_page_size)),
        }
    }

    async fn access_token(&self) -> Result<String> {
        {
            let guard = self.token.lock().expect("token mutex poisoned");
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(DirectoryError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        let access_token = token.access_token.clone();

        *self.token.lock().expect("token mutex poisoned") = Some(CachedToken {
            access_token: token.access_token,
            expires_at,
        });

        Ok(access_token)
    }

    /// A cheap, best-effort health check before paging begins.
    pub async fn probe(&self) -> Result<()> {
        let url = format!("{}/organization?$select=id,displayName&$top=1", self.api_root);
        match self.get_with_backoff(&url).await {
            Ok(_) => {
                info!("directory probe ok");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "directory probe had issues, continuing anyway");
                Ok(())
            }
        }
    }

    async fn get_with_backoff(&self, url: &str) -> Result<Value> {
        let mut delay = Duration::from_secs(1);
        let token = self.access_token().await?;

        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self
                .http
                .get(url)
                .bearer_auth(&token)
                .send()
                .await?;

            let status = resp.status();
            if status.is_success() {
                self.limiter.lock().expect("limiter mutex poisoned").note_success();
                return Ok(resp.json().await?);
            }

            if is_retryable(status) {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(Duration::from_secs_f64);

                let nap = {
                    let mut limiter = self.limiter.lock().expect("limiter mutex poisoned");
                    limiter.note_service_error()
                };

                let wait = retry_after.unwrap_or_else(|| jittered(delay));
                warn!(
                    %status,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    wait_ms = wait.as_millis() as u64,
                    "directory service throttled request"
                );
                tokio::time::sleep(wait).await;
                if let Some(nap) = nap {
                    warn!(nap_secs = nap.as_secs(), "heavy throttling detected, napping");
                    tokio::time::sleep(nap).await;
                }
                delay = (delay * 2).min(Duration::from_secs(30));
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::UnexpectedShape(format!(
                "{status} from {url}: {body}"
            )));
        }

        Err(DirectoryError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            url: url.to_string(),
        })
    }

    async fn post_with_backoff(&self, url: &str, body: &Value) -> Result<Value> {
        let mut delay = Duration::from_secs(1);
        let token = self.access_token().await?;

        for attempt in 1..=MAX_ATTEMPTS {
            let resp = self
                .http
                .post(url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await?;

            let status = resp.status();
            if status.is_success() {
                self.limiter.lock().expect("limiter mutex poisoned").note_success();
                return Ok(resp.json().await?);
            }

            if is_retryable(status) {
                self.limiter.lock().expect("limiter mutex poisoned").note_service_error();
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(Duration::from_secs(30));
                attempt_log(attempt, status);
                continue;
            }

            let body_text = resp.text().await.unwrap_or_default();
            return Err(DirectoryError::UnexpectedShape(format!(
                "{status} from {url}: {body_text}"
            )));
        }

        Err(DirectoryError::RetriesExhausted {
            attempts: MAX_ATTEMPTS,
            url: url.to_string(),
        })
    }

    /// Page through the full user list using the adaptive page size,
    /// following `@odata.nextLink`-style pagination. `filter`, when
    /// given, is appended verbatim as `$filter=<value>` (§6).
    pub async fn page_users(&self, filter: Option<&str>) -> Result<Vec<User>> {
        let mut users = Vec::new();
        let page_size = self.limiter.lock().expect("limiter mutex poisoned").page_size;
        let mut url = Some(format!(
            "{}/users?$select=id,displayName,userPrincipalName,mailNickname,mail,jobTitle,department&$top={page_size}{}",
            self.api_root,
            filter.map(|f| format!("&$filter={f}")).unwrap_or_default()
        ));

        while let Some(current) = url {
            let data = self.get_with_backoff(&current).await?;
            let values = data
                .get("value")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            for raw in values {
                users.push(parse_user(&raw)?);
            }

            url = data
                .get("@odata.nextLink")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            info!(total = users.len(), "paged directory users");
            if url.is_some() {
                let sleep_for = self.limiter.lock().expect("limiter mutex poisoned").page_sleep;
                tokio::time::sleep(sleep_for).await;
            }
        }

        Ok(users)
    }

    /// Resolve managers for a set of user ids in batches of at most
    /// [`BATCH_LIMIT`], requeuing any item that comes back throttled.
    pub async fn resolve_managers(
        &self,
        user_ids: &[String],
    ) -> Result<std::collections::HashMap<String, Option<String>>> {
        let mut manager_map = std::collections::HashMap::new();
        let mut queue: VecDeque<(String, u32)> = user_ids
            .iter()
            .map(|id| (id.clone(), MAX_ATTEMPTS))
            .collect();

        while !queue.is_empty() {
            let mut chunk = Vec::with_capacity(BATCH_LIMIT);
            while !queue.is_empty() && chunk.len() < BATCH_LIMIT {
                chunk.push(queue.pop_front().unwrap());
            }

            let requests: Vec<Value> = chunk
                .iter()
                .enumerate()
                .map(|(idx, (uid, _))| {
                    json!({
                        "id": (idx + 1).to_string(),
                        "method": "GET",
                        "url": format!("/users/{uid}/manager?$select=id,displayName"),
                    })
                })
                .collect();

            let body = json!({ "requests": requests });
            let resp = self
                .post_with_backoff(&format!("{}/$batch", self.api_root), &body)
                .await?;

            let responses = resp
                .get("responses")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            for item in responses {
                let rid: usize = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                if rid == 0 || rid > chunk.len() {
                    continue;
                }
                let (uid, attempts_left) = &chunk[rid - 1];
                let status = item.get("status").and_then(|v| v.as_u64()).unwrap_or(0) as u16;

                match status {
                    200 => {
                        let manager_id = item
                            .get("body")
                            .and_then(|b| b.get("id"))
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                        manager_map.insert(uid.clone(), manager_id);
                    }
                    404 | 204 => {
                        manager_map.insert(uid.clone(), None);
                    }
                    429 | 503 | 504 => {
                        self.limiter.lock().expect("limiter mutex poisoned").note_service_error();
                        if *attempts_left > 1 {
                            let retry_after_header = item.get("headers").and_then(|h| h.get("retry-after"));
                            let retry_after = retry_after_header
                                .and_then(|v| v.as_str().and_then(|s| s.parse::<f64>().ok()).or_else(|| v.as_f64()))
                                .map(Duration::from_secs_f64);
                            let wait = retry_after
                                .unwrap_or_else(|| Duration::from_secs_f64(1.0 + rand::random::<f64>() * 2.0));
                            tokio::time::sleep(wait).await;
                            queue.push_back((uid.clone(), attempts_left - 1));
                        } else {
                            warn!(user_id = %uid, status, "manager resolution exhausted retries");
                            manager_map.insert(uid.clone(), None);
                        }
                    }
                    _ => {
                        warn!(user_id = %uid, status, "manager resolution failed");
                        manager_map.insert(uid.clone(), None);
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        info!(
            resolved = manager_map.len(),
            requested = user_ids.len(),
            "resolved managers"
        );
        Ok(manager_map)
    }
}

/// `delay + uniform(0, 0.5·delay)` (§4.7), used whenever a retryable
/// response carries no `Retry-After` header.
fn jittered(delay: Duration) -> Duration {
    let extra = rand::random::<f64>() * 0.5 * delay.as_secs_f64();
    delay + Duration::from_secs_f64(extra)
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn attempt_log(attempt: u32, status: StatusCode) {
    warn!(attempt, %status, "directory batch request throttled");
}

fn parse_user(raw: &Value) -> Result<User> {
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DirectoryError::UnexpectedShape("user row missing id".into()))?
        .to_string();

    let display_name = raw
        .get("displayName")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let user_principal_name = raw
        .get("userPrincipalName")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mail_nickname = raw
        .get("mailNickname")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(User {
        id,
        display_name,
        user_principal_name,
        mail_nickname,
        mail: raw.get("mail").and_then(|v| v.as_str()).map(String::from),
        job_title: raw.get("jobTitle").and_then(|v| v.as_str()).map(String::from),
        department: raw.get("department").and_then(|v| v.as_str()).map(String::from),
        manager_id: None,
        reports: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_backs_off_after_threshold() {
        let mut limiter = AdaptiveLimiter::new(100);
        let mut napped = false;
        for _ in 0..MAX_CONSEC_SERVICE_ERRORS {
            if limiter.note_service_error().is_some() {
                napped = true;
            }
        }
        assert!(napped);
        assert_eq!(limiter.page_size, 50);
        assert_eq!(limiter.consec_service_errors, 0);
    }

    #[test]
    fn limiter_floor_is_min_page_size() {
        let mut limiter = AdaptiveLimiter::new(30);
        for _ in 0..MAX_CONSEC_SERVICE_ERRORS {
            limiter.note_service_error();
        }
        assert_eq!(limiter.page_size, MIN_PAGE_SIZE);
    }

    #[test]
    fn limiter_success_decays_error_streak() {
        let mut limiter = AdaptiveLimiter::new(100);
        limiter.note_service_error();
        limiter.note_service_error();
        limiter.note_success();
        assert_eq!(limiter.consec_service_errors, 1);
    }

    #[test]
    fn parse_user_fills_optional_fields() {
        let raw = json!({
            "id": "u1",
            "displayName": "Ada Lovelace",
            "userPrincipalName": "ada@example.com",
            "mailNickname": "ada",
        });
        let user = parse_user(&raw).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.mail, None);
    }

    #[test]
    fn parse_user_requires_id() {
        let raw = json!({ "displayName": "No Id" });
        assert!(parse_user(&raw).is_err());
    }
}
