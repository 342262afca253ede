use serde_json::{json, Value};
use tracing::debug;

use super::error::FeedError;
use super::session::FeedSession;
use super::types::{self, Cursor, Page};
use super::walker::PageSource;

pub const DEFAULT_ENDPOINT: &str = "https://civitai.com/api/trpc/orchestrator.queryGeneratedImages";

/// tRPC procedure name, reported in synthesized server errors.
const PROCEDURE_PATH: &str = "orchestrator.queryGeneratedImages";

/// Page fetcher for the generation feed.
pub struct FeedClient {
    session: Box<dyn FeedSession>,
    endpoint: String,
}

impl FeedClient {
    pub fn new(session: Box<dyn FeedSession>, endpoint: impl Into<String>) -> Self {
        Self {
            session,
            endpoint: endpoint.into(),
        }
    }

    /// Build the request URL; the cursor is echoed back verbatim inside
    /// the tRPC `input` parameter and omitted for the newest page.
    pub(crate) fn page_url(&self, cursor: Option<&Cursor>) -> String {
        let mut input = json!({"authed": true});
        if let Some(cursor) = cursor {
            input["cursor"] = cursor.as_value().clone();
        }
        let params = json!({ "json": input });
        format!(
            "{}?input={}",
            self.endpoint,
            urlencoding::encode(&params.to_string())
        )
    }
}

#[async_trait::async_trait]
impl PageSource for FeedClient {
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError> {
        let url = self.page_url(cursor);
        debug!(cursor = ?cursor.map(|c| c.to_string()), "GET {}", self.endpoint);
        let response = self.session.get(&url).await?;

        // The feed answers overload with HTML error pages; treat any
        // non-JSON body as the server error it stands for.
        let body: Value = match serde_json::from_str(&response.body) {
            Ok(v) => v,
            Err(e) => {
                debug!(status = response.status, "Non-JSON feed response: {}", e);
                return Err(types::server_error(PROCEDURE_PATH));
            }
        };
        types::parse_page(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::session::RawResponse;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedSession {
        responses: Mutex<VecDeque<RawResponse>>,
        urls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl FeedSession for ScriptedSession {
        async fn get(&self, url: &str) -> Result<RawResponse, FeedError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted response left"))
        }
    }

    fn client_with(bodies: &[(u16, &str)]) -> (FeedClient, Arc<Mutex<Vec<String>>>) {
        let urls = Arc::new(Mutex::new(Vec::new()));
        let session = ScriptedSession {
            responses: Mutex::new(
                bodies
                    .iter()
                    .map(|(status, body)| RawResponse {
                        status: *status,
                        body: body.to_string(),
                    })
                    .collect(),
            ),
            urls: urls.clone(),
        };
        (
            FeedClient::new(Box::new(session), "https://example.test/feed"),
            urls,
        )
    }

    fn decoded_input(url: &str) -> Value {
        let encoded = url.split_once("?input=").unwrap().1;
        serde_json::from_str(&urlencoding::decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_page_url_without_cursor() {
        let (client, _) = client_with(&[]);
        let url = client.page_url(None);
        assert!(url.starts_with("https://example.test/feed?input="));
        assert_eq!(decoded_input(&url), json!({"json": {"authed": true}}));
    }

    #[test]
    fn test_page_url_echoes_cursor() {
        let (client, _) = client_with(&[]);
        let cursor = Cursor::from_value(json!("2024-05-01T00:00:00.000Z|abc")).unwrap();
        let url = client.page_url(Some(&cursor));
        assert_eq!(
            decoded_input(&url),
            json!({"json": {"authed": true, "cursor": "2024-05-01T00:00:00.000Z|abc"}})
        );
    }

    #[tokio::test]
    async fn test_fetch_page_decodes_items() {
        let (client, urls) = client_with(&[(
            200,
            r#"{"result":{"data":{"json":{"items":[{"id":"g1","createdAt":"2024-05-01T10:00:00.000Z","steps":[{"images":[{"url":"https://img/1.jpeg","seed":7}]}]}],"nextCursor":"N"}}}}"#,
        )]);
        let page = client.fetch_page(None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].images()[0].seed, 7);
        assert_eq!(page.next_cursor.unwrap().to_string(), "N");
        assert_eq!(urls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_json_body_is_server_error() {
        let (client, _) = client_with(&[(502, "<html>Bad Gateway</html>")]);
        let err = client.fetch_page(None).await.unwrap_err();
        assert!(matches!(
            err,
            FeedError::TransientServer { http_status: 500, .. }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unauthorized_body() {
        let (client, _) = client_with(&[(
            401,
            r#"{"error":{"json":{"message":"UNAUTHORIZED","code":-32001,"data":{"code":"UNAUTHORIZED","httpStatus":401,"path":"orchestrator.queryGeneratedImages"}}}}"#,
        )]);
        let err = client.fetch_page(None).await.unwrap_err();
        assert!(err.is_auth());
    }
}
