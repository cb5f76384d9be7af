use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::app::{PocketSyncError, Result};
use crate::config::PocketConfig;
use crate::domain::{Credential, Item, MutationOp};
use crate::remote::wire::{
    AddBody, AddResponse, AuthorizeBody, AuthorizeResponse, GetBody, GetResponse,
    RequestTokenBody, RequestTokenResponse, SendAction, SendBody, SendResponse,
};
use crate::remote::{ApiError, ApiResult, AuthApi, Cursor, ItemPage, RemoteApi};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// reqwest-based client for the Pocket v3 API.
pub struct PocketClient {
    client: Client,
    base: Url,
    consumer_key: String,
    page_size: u32,
}

impl PocketClient {
    pub fn new(config: &PocketConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("pocket-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PocketSyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: Url::parse(&config.api_base)?,
            consumer_key: config.consumer_key.clone(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> ApiResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|e| ApiError::Network(format!("invalid endpoint {}: {}", path, e)))?;
        let payload =
            serde_json::to_vec(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header("X-Accept", "application/json")
            .body(payload)
            .send()
            .await?;

        let response = check_status(response)?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::MalformedResponse(e.to_string()))
    }
}

fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && limit_exhausted(headers))
    {
        return Err(ApiError::RateLimited {
            retry_after_secs: header_secs(headers, RETRY_AFTER.as_str())
                .or_else(|| header_secs(headers, "x-limit-user-reset")),
        });
    }

    let detail = headers
        .get("x-error")
        .and_then(|v| v.to_str().ok())
        .map(|s| format!(": {}", s))
        .unwrap_or_default();
    Err(ApiError::Network(format!("HTTP {}{}", status, detail)))
}

fn limit_exhausted(headers: &HeaderMap) -> bool {
    ["x-limit-user-remaining", "x-limit-key-remaining"]
        .iter()
        .any(|name| header_secs(headers, name) == Some(0))
}

fn header_secs(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

#[async_trait]
impl RemoteApi for PocketClient {
    async fn fetch_items(
        &self,
        credential: &Credential,
        cursor: Option<Cursor>,
    ) -> ApiResult<ItemPage> {
        let offset = cursor.unwrap_or(0);
        let body = GetBody {
            consumer_key: &self.consumer_key,
            access_token: &credential.access_token,
            state: "all",
            detail_type: "simple",
            sort: "oldest",
            count: self.page_size,
            offset,
        };

        let response: GetResponse = self.post("/v3/get", &body).await?;
        let returned = response.list.len() as u32;
        let items = response.list.into_items()?;
        tracing::debug!("Fetched {} items at offset {}", returned, offset);

        let next_cursor = if returned >= self.page_size {
            Some(offset + returned)
        } else {
            None
        };

        Ok(ItemPage { items, next_cursor })
    }

    async fn mutate(
        &self,
        credential: &Credential,
        item_id: &str,
        op: MutationOp,
    ) -> ApiResult<()> {
        let body = SendBody {
            consumer_key: &self.consumer_key,
            access_token: &credential.access_token,
            actions: vec![SendAction {
                action: op.action(),
                item_id,
                time: chrono::Utc::now().timestamp(),
            }],
        };

        let response: SendResponse = self.post("/v3/send", &body).await?;
        if !response.confirmed() {
            return Err(ApiError::MalformedResponse(format!(
                "{} of item {} was not confirmed",
                op, item_id
            )));
        }
        Ok(())
    }

    async fn add(&self, credential: &Credential, url: &str) -> ApiResult<Item> {
        let body = AddBody {
            consumer_key: &self.consumer_key,
            access_token: &credential.access_token,
            url,
        };

        let response: AddResponse = self.post("/v3/add", &body).await?;
        Ok(response.item.into_item(url))
    }
}

#[async_trait]
impl AuthApi for PocketClient {
    async fn request_token(&self, redirect_uri: &str) -> ApiResult<String> {
        let body = RequestTokenBody {
            consumer_key: &self.consumer_key,
            redirect_uri,
        };
        let response: RequestTokenResponse = self.post("/v3/oauth/request", &body).await?;
        Ok(response.code)
    }

    async fn access_token(&self, code: &str) -> ApiResult<Credential> {
        let body = AuthorizeBody {
            consumer_key: &self.consumer_key,
            code,
        };
        let response: AuthorizeResponse = self.post("/v3/oauth/authorize", &body).await?;
        Ok(Credential::new(response.access_token, response.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, page_size: u32) -> PocketClient {
        let config = PocketConfig {
            consumer_key: "ck".into(),
            api_base: server.uri(),
            ..PocketConfig::default()
        };
        PocketClient::new(&config).unwrap().with_page_size(page_size)
    }

    fn credential() -> Credential {
        Credential::new("token", "alice")
    }

    #[tokio::test]
    async fn test_fetch_items_full_page_has_next_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .and(header("X-Accept", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "consumer_key": "ck",
                "access_token": "token",
                "count": 2,
                "offset": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 1,
                "list": {
                    "1": {"item_id": "1", "given_url": "https://a.example", "status": "0", "time_added": "10"},
                    "2": {"item_id": "2", "given_url": "https://b.example", "status": "1", "time_added": "20"}
                }
            })))
            .mount(&server)
            .await;

        let page = client_for(&server, 2)
            .fetch_items(&credential(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor, Some(2));
    }

    #[tokio::test]
    async fn test_fetch_items_short_page_ends_listing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": 2, "list": []})),
            )
            .mount(&server)
            .await;

        let page = client_for(&server, 2)
            .fetch_items(&credential(), Some(4))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinguishable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server, 10)
            .fetch_items(&credential(), None)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[tokio::test]
    async fn test_rate_limit_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/send"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X-Limit-User-Remaining", "0")
                    .insert_header("X-Limit-User-Reset", "120"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 10)
            .mutate(&credential(), "1", MutationOp::Archive)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after_secs: Some(120)
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/send"))
            .respond_with(ResponseTemplate::new(503).insert_header("X-Error", "Maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server, 10)
            .mutate(&credential(), "1", MutationOp::Favorite)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(ref msg) if msg.contains("Maintenance")));
    }

    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/get"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server, 10)
            .fetch_items(&credential(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_mutate_sends_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/send"))
            .and(body_partial_json(serde_json::json!({
                "actions": [{"action": "archive", "item_id": "42"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 1,
                "action_results": [true]
            })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server, 10)
            .mutate(&credential(), "42", MutationOp::Archive)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_returns_remote_item() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 1,
                "item": {"item_id": "99", "normalized_url": "https://c.example/", "title": "C"}
            })))
            .mount(&server)
            .await;

        let item = client_for(&server, 10)
            .add(&credential(), "https://c.example")
            .await
            .unwrap();
        assert_eq!(item.id, "99");
        assert_eq!(item.url, "https://c.example/");
        assert_eq!(item.title, "C");
    }

    #[tokio::test]
    async fn test_token_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/oauth/request"))
            .and(body_partial_json(serde_json::json!({"redirect_uri": "app://done"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": "abc", "state": null})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/oauth/authorize"))
            .and(body_partial_json(serde_json::json!({"code": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "username": "alice"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let code = client.request_token("app://done").await.unwrap();
        assert_eq!(code, "abc");
        let credential = client.access_token(&code).await.unwrap();
        assert_eq!(credential, Credential::new("tok", "alice"));
    }
}
