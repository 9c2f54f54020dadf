//! HTTP implementation of the remote authority
//!
//! JSON over HTTP. Every write carries the outbox op id in an
//! `Idempotency-Key` header and a `409 Conflict` body holds the winning record.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::is_retryable_status;
use super::{BackendError, RemoteBackend, RemoteRecord, SyncConfig};
use crate::domain::{Detention, Folio, TimeCapture, WorkOrder};

/// Initial backoff delay for per-request retries
const INITIAL_BACKOFF_MS: u64 = 250;

/// Which record type a 409 body holds
#[derive(Debug, Clone, Copy)]
enum ConflictBody {
    Capture,
    Detention,
}

/// Remote authority reached over HTTP
pub struct HttpBackend {
    base_url: String,
    api_key: Option<String>,
    http: Client,
    max_retries: u32,
}

impl HttpBackend {
    pub fn from_config(config: &SyncConfig) -> Result<Self, BackendError> {
        debug!(base_url = %config.base_url, "from_config: called");
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(BackendError::Network)?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
            http,
            max_retries: config.max_request_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying transient failures with exponential backoff
    async fn send(
        &self,
        method: Method,
        url: &str,
        op_id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Response, BackendError> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(attempt, backoff_ms = backoff, %url, "send: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let mut request = self.http.request(method.clone(), url);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            if let Some(op_id) = op_id {
                request = request.header("Idempotency-Key", op_id);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!(attempt, error = %e, "send: network error");
                    last_error = Some(BackendError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if is_retryable_status(status) && attempt < self.max_retries {
                let text = response.text().await.unwrap_or_default();
                debug!(attempt, status, "send: retryable status");
                last_error = Some(BackendError::Api { status, message: text });
                continue;
            }
            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| BackendError::InvalidResponse("Max retries exceeded".to_string())))
    }

    /// Send a write and map the status to success or a typed error
    async fn write(
        &self,
        method: Method,
        path: &str,
        op_id: &str,
        body: Value,
        conflict_body: ConflictBody,
    ) -> Result<(), BackendError> {
        let url = self.url(path);
        debug!(%method, %url, %op_id, "write: called");
        let response = self.send(method, &url, Some(op_id), Some(&body)).await?;
        let status = response.status().as_u16();

        if status == 409 {
            let winner: Value = response.json().await?;
            let remote = match conflict_body {
                ConflictBody::Capture => RemoteRecord::Capture(serde_json::from_value(winner)?),
                ConflictBody::Detention => RemoteRecord::Detention(serde_json::from_value(winner)?),
            };
            debug!(%url, remote = %remote.record_id(), "write: conflict");
            return Err(BackendError::Conflict {
                remote: Box::new(remote),
            });
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, %message, "write: API error");
            return Err(BackendError::Api { status, message });
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.url(path);
        debug!(%url, "read: called");
        let response = self.send(Method::GET, &url, None, None).await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }
        Ok(response.json().await?)
    }
}

fn capture_path(capture: &TimeCapture) -> String {
    format!("/folios/{}/stages/{}/capture", capture.folio, capture.stage.key())
}

fn detention_path(detention: &Detention) -> String {
    format!("/folios/{}/stages/{}/detentions", detention.folio, detention.stage.key())
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn create_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError> {
        let body = serde_json::to_value(capture)?;
        self.write(Method::POST, &capture_path(capture), op_id, body, ConflictBody::Capture)
            .await
    }

    async fn update_capture(&self, op_id: &str, capture: &TimeCapture) -> Result<(), BackendError> {
        let body = serde_json::to_value(capture)?;
        self.write(Method::PUT, &capture_path(capture), op_id, body, ConflictBody::Capture)
            .await
    }

    async fn create_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError> {
        let body = serde_json::to_value(detention)?;
        self.write(Method::POST, &detention_path(detention), op_id, body, ConflictBody::Detention)
            .await
    }

    async fn close_detention(&self, op_id: &str, detention: &Detention) -> Result<(), BackendError> {
        let body = serde_json::to_value(detention)?;
        let path = format!("{}/{}", detention_path(detention), detention.started_at);
        self.write(Method::PUT, &path, op_id, body, ConflictBody::Detention)
            .await
    }

    async fn get_work_order(&self, folio: Folio) -> Result<Option<WorkOrder>, BackendError> {
        let url = self.url(&format!("/folios/{}", folio));
        debug!(%url, "get_work_order: called");
        let response = self.send(Method::GET, &url, None, None).await?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }
        Ok(Some(response.json().await?))
    }

    async fn list_captures(&self, folio: Folio) -> Result<Vec<TimeCapture>, BackendError> {
        self.read(&format!("/folios/{}/captures", folio)).await
    }

    async fn list_detentions(&self, folio: Folio) -> Result<Vec<Detention>, BackendError> {
        self.read(&format!("/folios/{}/detentions", folio)).await
    }

    async fn list_captures_between(&self, from: i64, to: i64) -> Result<Vec<TimeCapture>, BackendError> {
        self.read(&format!("/captures?from={}&to={}", from, to)).await
    }

    async fn list_detentions_between(&self, from: i64, to: i64) -> Result<Vec<Detention>, BackendError> {
        self.read(&format!("/detentions?from={}&to={}", from, to)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stage;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one connection per scripted (status, body) pair and hand back
    /// the raw requests it saw
    async fn scripted_server(script: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in script {
                let (stream, _) = listener.accept().await.unwrap();
                let mut reader = BufReader::new(stream);
                let mut request = String::new();
                let mut length = 0;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':')
                        && name.eq_ignore_ascii_case("content-length")
                    {
                        length = value.trim().parse().unwrap();
                    }
                    request.push_str(&line);
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut payload = vec![0; length];
                reader.read_exact(&mut payload).await.unwrap();
                request.push_str(&String::from_utf8_lossy(&payload));
                requests.push(request);

                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let mut stream = reader.into_inner();
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        });
        (base_url, handle)
    }

    fn backend_at(base_url: String) -> HttpBackend {
        let config = SyncConfig {
            base_url,
            max_request_retries: 2,
            timeout_ms: 5_000,
            ..Default::default()
        };
        HttpBackend::from_config(&config).unwrap()
    }

    #[test]
    fn test_paths() {
        let capture = TimeCapture::start(Folio(1254), Stage::Tapiceria, "a", 0);
        assert_eq!(capture_path(&capture), "/folios/1254/stages/tapiceria/capture");
        let detention = Detention::open(Folio(1254), Stage::Tapiceria, "x", 42);
        assert_eq!(detention_path(&detention), "/folios/1254/stages/tapiceria/detentions");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = SyncConfig {
            base_url: "http://localhost:9/api/".to_string(),
            ..Default::default()
        };
        let backend = HttpBackend::from_config(&config).unwrap();
        assert_eq!(backend.url("/captures"), "http://localhost:9/api/captures");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable_network_error() {
        let config = SyncConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            max_request_retries: 0,
            timeout_ms: 500,
            ..Default::default()
        };
        let backend = HttpBackend::from_config(&config).unwrap();
        let err = backend.list_captures(Folio(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflict_status_returns_winning_capture() {
        let winner = TimeCapture::start(Folio(1254), Stage::Madera, "ana", 0);
        let (base_url, server) = scripted_server(vec![(409, serde_json::to_string(&winner).unwrap())]).await;
        let backend = backend_at(base_url);

        let mine = TimeCapture::start(Folio(1254), Stage::Madera, "luis", 5_000);
        match backend.create_capture("op-7", &mine).await {
            Err(BackendError::Conflict { remote }) => assert_eq!(*remote, RemoteRecord::Capture(winner)),
            other => panic!("expected conflict, got {:?}", other),
        }

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /folios/1254/stages/madera/capture "));
        assert!(requests[0].to_ascii_lowercase().contains("idempotency-key: op-7"));
        assert!(requests[0].contains("\"operator\":\"luis\""));
    }

    #[tokio::test]
    async fn test_transient_status_retried_with_same_key() {
        let (base_url, server) = scripted_server(vec![(503, "busy".to_string()), (200, "{}".to_string())]).await;
        let backend = backend_at(base_url);

        let detention = Detention::open(Folio(1254), Stage::Pintura, "compressor down", 42);
        backend.create_detention("op-9", &detention).await.unwrap();

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            assert!(request.starts_with("POST /folios/1254/stages/pintura/detentions "));
            assert!(request.to_ascii_lowercase().contains("idempotency-key: op-9"));
        }
    }

    #[tokio::test]
    async fn test_rejection_without_retry_is_api_error() {
        let (base_url, server) = scripted_server(vec![(422, "bad stage".to_string())]).await;
        let backend = backend_at(base_url);

        let capture = TimeCapture::start(Folio(1254), Stage::Armado, "ana", 0);
        match backend.update_capture("op-3", &capture).await {
            Err(BackendError::Api { status, message }) => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad stage");
            }
            other => panic!("expected API error, got {:?}", other),
        }
        assert_eq!(server.await.unwrap().len(), 1);
    }
}
