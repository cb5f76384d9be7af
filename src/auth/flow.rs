use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::app::{PocketSyncError, Result};
use crate::domain::{Credential, RequestToken};
use crate::remote::AuthApi;

/// Where a request token is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    TokenIssued,
    AwaitingUserConsent,
    Exchanged,
    Abandoned,
}

struct Flow {
    state: AuthState,
    issued_at: Instant,
}

#[derive(Default)]
struct Flows {
    by_code: HashMap<String, Flow>,
    /// Most recent token handed to the user for consent.
    awaiting: Option<RequestToken>,
}

/// Drives request-token issuance, the consent redirect, and the exchange.
///
/// Persisting the resulting credential is the caller's job.
pub struct AuthFlow {
    api: Arc<dyn AuthApi>,
    authorize_base: Url,
    redirect_uri: String,
    token_ttl: Duration,
    flows: Mutex<Flows>,
}

impl AuthFlow {
    pub fn new(
        api: Arc<dyn AuthApi>,
        authorize_base: &str,
        redirect_uri: &str,
        token_ttl: Duration,
    ) -> Result<Self> {
        Ok(Self {
            api,
            authorize_base: Url::parse(authorize_base)?,
            redirect_uri: redirect_uri.to_string(),
            token_ttl,
            flows: Mutex::new(Flows::default()),
        })
    }

    pub async fn begin_auth(&self) -> Result<RequestToken> {
        let code = self
            .api
            .request_token(&self.redirect_uri)
            .await
            .map_err(|e| PocketSyncError::AuthInit(e.to_string()))?;

        if code.is_empty() {
            return Err(PocketSyncError::AuthInit("empty request token".into()));
        }

        let token = RequestToken {
            code,
            redirect_uri: self.redirect_uri.clone(),
        };
        self.lock()?.by_code.insert(
            token.code.clone(),
            Flow {
                state: AuthState::TokenIssued,
                issued_at: Instant::now(),
            },
        );
        tracing::debug!("Issued request token");
        Ok(token)
    }

    /// Consent page the user must open. The flow waits here for the redirect.
    pub fn authorize_url(&self, token: &RequestToken) -> Result<Url> {
        let url = build_authorize_url(&self.authorize_base, token)?;

        let mut flows = self.lock()?;
        if let Some(flow) = flows.by_code.get_mut(&token.code) {
            if flow.state == AuthState::TokenIssued {
                flow.state = AuthState::AwaitingUserConsent;
                flows.awaiting = Some(token.clone());
            }
        }
        Ok(url)
    }

    /// Exchange a request token for a credential. Each token is consumed by
    /// the first attempt, successful or not.
    pub async fn complete_auth(&self, token: &RequestToken) -> Result<Credential> {
        {
            let mut flows = self.lock()?;
            let flow = flows.by_code.get_mut(&token.code).ok_or_else(|| {
                PocketSyncError::AuthExchange("request token was not issued by this flow".into())
            })?;

            match flow.state {
                AuthState::Exchanged => {
                    return Err(PocketSyncError::AuthExchange(
                        "request token has already been used".into(),
                    ))
                }
                AuthState::Abandoned => {
                    return Err(PocketSyncError::AuthExchange(
                        "authorization was abandoned; start a new login".into(),
                    ))
                }
                _ => {}
            }

            if flow.issued_at.elapsed() >= self.token_ttl {
                flow.state = AuthState::Abandoned;
                clear_awaiting(&mut flows, token);
                return Err(PocketSyncError::AuthExchange(
                    "request token expired before it was exchanged".into(),
                ));
            }

            flow.state = AuthState::Exchanged;
            clear_awaiting(&mut flows, token);
        }

        match self.api.access_token(&token.code).await {
            Ok(credential) => {
                tracing::info!("Authorized as {}", credential.username);
                Ok(credential)
            }
            Err(e) => {
                if let Ok(mut flows) = self.lock() {
                    if let Some(flow) = flows.by_code.get_mut(&token.code) {
                        flow.state = AuthState::Abandoned;
                    }
                }
                tracing::warn!("Access token exchange failed: {}", e);
                Err(PocketSyncError::AuthExchange(e.to_string()))
            }
        }
    }

    /// Resume the flow when the host reports the consent redirect.
    pub async fn handle_redirect(&self) -> Result<Credential> {
        let token = self.lock()?.awaiting.clone().ok_or_else(|| {
            PocketSyncError::AuthExchange("no authorization is awaiting consent".into())
        })?;
        self.complete_auth(&token).await
    }

    /// Give up on a token, e.g. when the user closes the consent page.
    pub fn abandon(&self, token: &RequestToken) -> Result<()> {
        let mut flows = self.lock()?;
        if let Some(flow) = flows.by_code.get_mut(&token.code) {
            if flow.state != AuthState::Exchanged {
                flow.state = AuthState::Abandoned;
            }
        }
        clear_awaiting(&mut flows, token);
        Ok(())
    }

    pub fn state(&self, token: &RequestToken) -> AuthState {
        self.lock()
            .ok()
            .and_then(|flows| flows.by_code.get(&token.code).map(|f| f.state))
            .unwrap_or(AuthState::Idle)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Flows>> {
        self.flows
            .lock()
            .map_err(|e| PocketSyncError::Other(format!("auth flow lock poisoned: {}", e)))
    }
}

fn clear_awaiting(flows: &mut Flows, token: &RequestToken) {
    if flows.awaiting.as_ref() == Some(token) {
        flows.awaiting = None;
    }
}

fn build_authorize_url(base: &Url, token: &RequestToken) -> Result<Url> {
    let mut url = base.join("/auth/authorize")?;
    url.query_pairs_mut()
        .append_pair("request_token", &token.code)
        .append_pair("redirect_uri", &token.redirect_uri);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ApiError, ApiResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeAuthApi {
        issued: AtomicUsize,
        exchanges: AtomicUsize,
        deny: bool,
        fail_issue: bool,
    }

    #[async_trait]
    impl AuthApi for FakeAuthApi {
        async fn request_token(&self, _redirect_uri: &str) -> ApiResult<String> {
            if self.fail_issue {
                return Err(ApiError::Network("HTTP 503 Service Unavailable".into()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("code-{}", n))
        }

        async fn access_token(&self, code: &str) -> ApiResult<Credential> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                return Err(ApiError::Network("HTTP 403 Forbidden: User rejected code".into()));
            }
            Ok(Credential::new(format!("token-for-{}", code), "alice"))
        }
    }

    fn flow_with(api: Arc<FakeAuthApi>, ttl: Duration) -> AuthFlow {
        AuthFlow::new(api, "https://getpocket.com", "app://done", ttl).unwrap()
    }

    #[tokio::test]
    async fn test_full_flow_walks_states() {
        let api = Arc::new(FakeAuthApi::default());
        let flow = flow_with(api.clone(), Duration::from_secs(600));

        let token = flow.begin_auth().await.unwrap();
        assert_eq!(flow.state(&token), AuthState::TokenIssued);

        flow.authorize_url(&token).unwrap();
        assert_eq!(flow.state(&token), AuthState::AwaitingUserConsent);

        let credential = flow.complete_auth(&token).await.unwrap();
        assert_eq!(credential.username, "alice");
        assert_eq!(flow.state(&token), AuthState::Exchanged);
    }

    #[tokio::test]
    async fn test_authorize_url_is_deterministic() {
        let flow = flow_with(Arc::new(FakeAuthApi::default()), Duration::from_secs(600));
        let token = RequestToken {
            code: "a b&c".into(),
            redirect_uri: "app://done?x=1".into(),
        };

        let first = flow.authorize_url(&token).unwrap();
        let second = flow.authorize_url(&token).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.as_str(),
            "https://getpocket.com/auth/authorize?request_token=a+b%26c&redirect_uri=app%3A%2F%2Fdone%3Fx%3D1"
        );
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let api = Arc::new(FakeAuthApi::default());
        let flow = flow_with(api.clone(), Duration::from_secs(600));
        let token = flow.begin_auth().await.unwrap();

        assert!(flow.complete_auth(&token).await.is_ok());
        let second = flow.complete_auth(&token).await;
        assert!(matches!(second, Err(PocketSyncError::AuthExchange(_))));
        assert_eq!(api.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_consent_abandons_token() {
        let api = Arc::new(FakeAuthApi {
            deny: true,
            ..Default::default()
        });
        let flow = flow_with(api.clone(), Duration::from_secs(600));
        let token = flow.begin_auth().await.unwrap();

        let result = flow.complete_auth(&token).await;
        assert!(matches!(result, Err(PocketSyncError::AuthExchange(_))));
        assert_eq!(flow.state(&token), AuthState::Abandoned);

        // Retrying needs a fresh token; the consumed one is never sent again.
        assert!(flow.complete_auth(&token).await.is_err());
        assert_eq!(api.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_not_exchanged() {
        let api = Arc::new(FakeAuthApi::default());
        let flow = flow_with(api.clone(), Duration::ZERO);
        let token = flow.begin_auth().await.unwrap();

        let result = flow.complete_auth(&token).await;
        assert!(matches!(result, Err(PocketSyncError::AuthExchange(_))));
        assert_eq!(flow.state(&token), AuthState::Abandoned);
        assert_eq!(api.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_issue_failure_is_auth_init_error() {
        let api = Arc::new(FakeAuthApi {
            fail_issue: true,
            ..Default::default()
        });
        let flow = flow_with(api, Duration::from_secs(600));
        assert!(matches!(
            flow.begin_auth().await,
            Err(PocketSyncError::AuthInit(_))
        ));
    }

    #[tokio::test]
    async fn test_redirect_resumes_awaiting_token() {
        let api = Arc::new(FakeAuthApi::default());
        let flow = flow_with(api, Duration::from_secs(600));

        assert!(flow.handle_redirect().await.is_err());

        let token = flow.begin_auth().await.unwrap();
        flow.authorize_url(&token).unwrap();
        let credential = flow.handle_redirect().await.unwrap();
        assert_eq!(credential.access_token, "token-for-code-1");

        // The redirect cannot be replayed.
        assert!(flow.handle_redirect().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let flow = flow_with(Arc::new(FakeAuthApi::default()), Duration::from_secs(600));
        let stranger = RequestToken {
            code: "forged".into(),
            redirect_uri: "app://done".into(),
        };
        assert_eq!(flow.state(&stranger), AuthState::Idle);
        assert!(flow.complete_auth(&stranger).await.is_err());
    }
}
