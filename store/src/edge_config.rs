use crate::{Result, StoreError, StoreOp};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ItemsBody<'a> {
    items: &'a [StoreOp],
}

/// Client for the external edge-config store.
///
/// Reads hit `GET {base}/v1/edge-config/{id}/item/{key}` (404 means the key
/// is unset). Mutations go through a single
/// `PATCH {base}/v1/edge-config/{id}/items` request so a batch is
/// all-or-nothing from this process's viewpoint.
pub struct EdgeConfigStore {
    client: reqwest::Client,
    base_url: String,
    config_id: String,
    token: String,
}

impl EdgeConfigStore {
    pub fn new(api_url: &str, config_id: &str, token: &str) -> Self {
        EdgeConfigStore {
            client: reqwest::Client::new(),
            base_url: api_url.trim_end_matches('/').to_string(),
            config_id: config_id.to_string(),
            token: token.to_string(),
        }
    }

    fn item_url(&self, key: &str) -> String {
        format!(
            "{}/v1/edge-config/{}/item/{}",
            self.base_url, self.config_id, key
        )
    }

    fn items_url(&self) -> String {
        format!("{}/v1/edge-config/{}/items", self.base_url, self.config_id)
    }
}

#[async_trait]
impl crate::StateStore for EdgeConfigStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.item_url(key))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {
                let value = response
                    .json::<Value>()
                    .await
                    .map_err(|e| StoreError::Decode {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                // The store models an unset key as JSON null as well as 404.
                Ok((!value.is_null()).then_some(value))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s => Err(StoreError::Read(format!(
                "unexpected status {s} reading key {key}"
            ))),
        }
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let response = self
            .client
            .patch(self.items_url())
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(&ItemsBody { items: &ops })
            .send()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::WriteStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StateStore, keys};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_store(server: &MockServer) -> EdgeConfigStore {
        EdgeConfigStore::new(&server.uri(), "ecfg_123", "secret-token")
    }

    #[tokio::test]
    async fn test_read_hit_miss_and_null() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/edge-config/ecfg_123/item/sandbox_active_url"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("https://sbx-1.example")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/edge-config/ecfg_123/item/sandbox_previous_url"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/edge-config/ecfg_123/item/sandbox.activeUrl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(null)))
            .mount(&server)
            .await;

        let store = test_store(&server);
        assert_eq!(
            store.read(keys::ACTIVE_URL).await.unwrap(),
            Some(json!("https://sbx-1.example"))
        );
        assert_eq!(store.read(keys::PREVIOUS_URL).await.unwrap(), None);
        assert_eq!(store.read(keys::LEGACY_ACTIVE_URL).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_first_uses_legacy_fallback() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/edge-config/ecfg_123/item/sandbox_active_url"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/edge-config/ecfg_123/item/sandbox.activeUrl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("https://old.example")))
            .mount(&server)
            .await;

        let store = test_store(&server);
        let value = store
            .read_first(&[keys::ACTIVE_URL, keys::LEGACY_ACTIVE_URL])
            .await
            .unwrap();
        assert_eq!(value, Some(json!("https://old.example")));
    }

    #[tokio::test]
    async fn test_apply_sends_single_patch_batch() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/v1/edge-config/ecfg_123/items"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!({
                "items": [
                    {"operation": "upsert", "key": "sandbox_active_url", "value": "https://sbx-2.example"},
                    {"operation": "delete", "key": "sandbox_previous_url"},
                ]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = test_store(&server);
        store
            .apply(vec![
                StoreOp::upsert(keys::ACTIVE_URL, json!("https://sbx-2.example")),
                StoreOp::delete(keys::PREVIOUS_URL),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_apply_surfaces_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/v1/edge-config/ecfg_123/items"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let store = test_store(&server);
        let err = store
            .apply(vec![StoreOp::upsert(keys::ACTIVE_URL, json!("x"))])
            .await
            .unwrap_err();

        match err {
            StoreError::WriteStatus { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
