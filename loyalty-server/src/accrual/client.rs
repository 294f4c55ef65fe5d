//! HTTP client for the external accrual system

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use shared::models::{AccrualResponse, AccrualResult};
use std::time::Duration;

use super::{AccrualError, WorkerError};

/// Source of accrual answers for single orders
#[async_trait]
pub trait AccrualApi: Send + Sync {
    async fn order_status(&self, number: &str) -> Result<AccrualResult, AccrualError>;
}

/// `GET {base}/api/orders/{number}` over reqwest
///
/// Keeps a cookie jar across calls for session affinity.
#[derive(Debug, Clone)]
pub struct AccrualClient {
    client: Client,
    base_url: Url,
}

impl AccrualClient {
    /// Build a client for an absolute `http(s)` base URL
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, WorkerError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| WorkerError::Config(format!("invalid accrual address {base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(WorkerError::Config(format!(
                "accrual address must be an absolute http(s) URL, got {base_url}"
            )));
        }
        if timeout.is_zero() {
            return Err(WorkerError::Config(
                "accrual request timeout must be positive".to_string(),
            ));
        }

        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn order_url(&self, number: &str) -> Result<Url, AccrualError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AccrualError::Transient("accrual address cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "orders", number]);
        Ok(url)
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl AccrualApi for AccrualClient {
    async fn order_status(&self, number: &str) -> Result<AccrualResult, AccrualError> {
        let url = self.order_url(number)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AccrualError::Transient(format!("request failed: {e}")))?;

        match response.status() {
            StatusCode::OK => {
                let body: AccrualResponse = response
                    .json()
                    .await
                    .map_err(|e| AccrualError::Transient(format!("malformed body: {e}")))?;
                if body.order != number {
                    return Err(AccrualError::Transient(format!(
                        "asked for order {number}, got {}",
                        body.order
                    )));
                }
                let result = AccrualResult::from(body);
                if result.accrual < Decimal::ZERO {
                    return Err(AccrualError::Transient(format!(
                        "order {number} reported negative accrual {}",
                        result.accrual
                    )));
                }
                Ok(result)
            }
            StatusCode::NO_CONTENT => Err(AccrualError::NoData),
            StatusCode::TOO_MANY_REQUESTS => Err(AccrualError::RateLimited {
                retry_after: retry_after(response.headers()),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AccrualError::Transient(format!(
                    "unexpected status {status}: {body}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, HeaderValue},
        response::{IntoResponse, Response},
        routing::get,
    };
    use rust_decimal::Decimal;
    use shared::models::OrderStatus;
    use std::sync::{Arc, Mutex};

    async fn accrual_stub(Path(number): Path<String>) -> Response {
        match number.as_str() {
            "4561261212345467" => Json(serde_json::json!({
                "order": number,
                "status": "PROCESSED",
                "accrual": 500
            }))
            .into_response(),
            "12345678903" => Json(serde_json::json!({
                "order": number,
                "status": "REGISTERED"
            }))
            .into_response(),
            "79927398713" => StatusCode::NO_CONTENT.into_response(),
            "2377225624" => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "No more than N requests per minute allowed")
                    .into_response()
            }
            "0" => (StatusCode::OK, "{not json").into_response(),
            "26" => Json(serde_json::json!({
                "order": number,
                "status": "PROCESSED",
                "accrual": -5
            }))
            .into_response(),
            "18" => Json(serde_json::json!({
                "order": "26",
                "status": "PROCESSED",
                "accrual": 1
            }))
            .into_response(),
            _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }

    async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn client() -> AccrualClient {
        let app = Router::new().route("/api/orders/{number}", get(accrual_stub));
        let base = spawn_stub(app).await;
        AccrualClient::new(&base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_processed_order() {
        let result = client().await.order_status("4561261212345467").await.unwrap();
        assert_eq!(result.number, "4561261212345467");
        assert_eq!(result.status, OrderStatus::Processed);
        assert_eq!(result.accrual, Decimal::new(500, 0));
    }

    #[tokio::test]
    async fn test_registered_maps_to_processing() {
        let result = client().await.order_status("12345678903").await.unwrap();
        assert_eq!(result.status, OrderStatus::Processing);
        assert_eq!(result.accrual, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_classifies_failures() {
        let client = client().await;

        assert!(matches!(
            client.order_status("79927398713").await,
            Err(AccrualError::NoData)
        ));
        assert!(matches!(
            client.order_status("2377225624").await,
            Err(AccrualError::RateLimited {
                retry_after: Some(d)
            }) if d == Duration::from_secs(60)
        ));
        assert!(matches!(
            client.order_status("0").await,
            Err(AccrualError::Transient(_))
        ));
        assert!(matches!(
            client.order_status("18").await,
            Err(AccrualError::Transient(_))
        ));
        assert!(matches!(
            client.order_status("42").await,
            Err(AccrualError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_accrual_is_transient() {
        let result = client().await.order_status("26").await;
        assert!(matches!(result, Err(AccrualError::Transient(msg)) if msg.contains("negative")));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = AccrualClient::new(&format!("http://{addr}"), Duration::from_secs(1)).unwrap();
        assert!(matches!(
            client.order_status("79927398713").await,
            Err(AccrualError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_keeps_session_cookies() {
        let seen = Arc::new(Mutex::new(Vec::<Option<String>>::new()));
        let app = {
            let seen = seen.clone();
            Router::new().route(
                "/api/orders/{number}",
                get(move |headers: HeaderMap| {
                    let seen = seen.clone();
                    async move {
                        let cookie = headers
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push(cookie);
                        let mut out = HeaderMap::new();
                        out.insert("set-cookie", HeaderValue::from_static("session=abc; Path=/"));
                        (out, StatusCode::NO_CONTENT)
                    }
                }),
            )
        };
        let base = spawn_stub(app).await;
        let client = AccrualClient::new(&base, Duration::from_secs(5)).unwrap();

        let _ = client.order_status("79927398713").await;
        let _ = client.order_status("79927398713").await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1].as_deref(), Some("session=abc"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            AccrualClient::new("localhost:8081", Duration::from_secs(1)),
            Err(WorkerError::Config(_))
        ));
        assert!(matches!(
            AccrualClient::new("ftp://example.com", Duration::from_secs(1)),
            Err(WorkerError::Config(_))
        ));
        assert!(matches!(
            AccrualClient::new("http://127.0.0.1:8081", Duration::ZERO),
            Err(WorkerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_order_url_joins_path() {
        let client = AccrualClient::new("http://accrual:8081/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.order_url("79927398713").unwrap().as_str(),
            "http://accrual:8081/api/orders/79927398713"
        );
    }
}
