use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, ETAG};
use serde::Serialize;
use serde::de::DeserializeOwned;

use fieldlift_protocol::constants::{FINALIZE_PATH, OCTET_STREAM, PRESIGN_PATH};
use fieldlift_protocol::{
    FinalizeRequest, FinalizeResponse, PresignRequest, PresignResponse, RecordNotifyRequest,
};

/// Errors from the control-plane client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("control plane reported status {0:?}")]
    Unsuccessful(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// Result of a single part PUT.
///
/// Non-2xx responses are returned here rather than as [`Error`] so the
/// caller can classify them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub status: u16,
    pub etag: Option<String>,
}

impl PutOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Control-plane API client.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    record_url: Option<String>,
}

impl Client {
    /// Creates a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let base_url = normalize_base_url(base_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            record_url: None,
        })
    }

    /// Sets the system-of-record endpoint notified after finalize.
    pub fn with_record_url(mut self, url: Option<String>) -> Self {
        self.record_url = url.filter(|u| !u.is_empty());
        self
    }

    /// Sets a custom base URL (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs a JSON POST and decodes the JSON response.
    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Requests one presigned URL per part.
    ///
    /// Returns the URLs in part order. The count is not checked here.
    pub async fn presign(&self, req: &PresignRequest) -> Result<Vec<String>, Error> {
        let url = format!("{}{}", self.base_url, PRESIGN_PATH);
        let resp: PresignResponse = self.post_json(&url, req).await?;
        if !resp.is_success() {
            return Err(Error::Unsuccessful(resp.status));
        }
        Ok(resp.into_urls())
    }

    /// Commits an upload whose parts have all been written.
    pub async fn finalize(&self, req: &FinalizeRequest) -> Result<(), Error> {
        let url = format!("{}{}", self.base_url, FINALIZE_PATH);
        let resp: FinalizeResponse = self.post_json(&url, req).await?;
        if !resp.is_success() {
            return Err(Error::Unsuccessful(resp.status));
        }
        Ok(())
    }

    /// Notifies the system of record. No-op when no record URL is set.
    pub async fn notify_record(&self, req: &RecordNotifyRequest) -> Result<(), Error> {
        let Some(url) = self.record_url.as_deref() else {
            tracing::debug!(job = %req.job_id, "no record URL configured, skipping notification");
            return Ok(());
        };

        let resp = self.http.post(url).json(req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Uploads one part's bytes to its presigned URL.
    pub async fn put_part(&self, url: &str, body: Bytes) -> Result<PutOutcome, Error> {
        let resp = self
            .http
            .put(url)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(body)
            .send()
            .await?;

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Ok(PutOutcome {
            status: resp.status().as_u16(),
            etag,
        })
    }

    /// Returns `true` if the control plane answers at all.
    ///
    /// Any HTTP response, including an error status, counts as reachable.
    pub async fn probe(&self) -> bool {
        match self.http.head(&self.base_url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "reachability probe failed");
                false
            }
        }
    }
}

/// Validates the scheme and strips a trailing slash.
fn normalize_base_url(raw: &str) -> Result<String, Error> {
    let parsed = reqwest::Url::parse(raw).map_err(|e| Error::InvalidBaseUrl(format!("{raw}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidBaseUrl(format!(
            "{raw}: unsupported scheme {}",
            parsed.scheme()
        )));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Starts a one-shot mock HTTP server.
    ///
    /// Responds with `status` plus `extra_headers` and `body`, and hands back
    /// the raw request it received.
    async fn mock_server(
        status: u16,
        extra_headers: &str,
        body: &str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();
        let extra_headers = extra_headers.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let _ = tx.send(read_request(&mut stream).await);

                let resp = format!(
                    "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, rx)
    }

    /// Reads headers plus a `Content-Length` body.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = stream.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn client() -> Client {
        Client::new("http://localhost", Duration::from_secs(5)).unwrap()
    }

    fn presign_req() -> PresignRequest {
        PresignRequest {
            id: "job-1".into(),
            filename: "walk.mp4".into(),
            filetype: "video/mp4".into(),
            total_parts: 2,
        }
    }

    #[tokio::test]
    async fn presign_returns_urls() {
        let json = r#"{"status":"success","result":{"presign_urls":["http://s/0","http://s/1"]}}"#;
        let (url, req_rx) = mock_server(200, "", json).await;

        let urls = client().with_base_url(url).presign(&presign_req()).await.unwrap();
        assert_eq!(urls, vec!["http://s/0", "http://s/1"]);

        let raw = req_rx.await.unwrap();
        assert!(raw.starts_with("POST /uploads/presign "));
        assert!(raw.contains("\"total_parts\":2"));
    }

    #[tokio::test]
    async fn presign_unsuccessful_body_status() {
        let (url, _rx) = mock_server(200, "", r#"{"status":"error"}"#).await;

        let err = client().with_base_url(url).presign(&presign_req()).await.unwrap_err();
        assert!(matches!(err, Error::Unsuccessful(s) if s == "error"));
    }

    #[tokio::test]
    async fn presign_http_error() {
        let (url, _rx) = mock_server(503, "", "unavailable").await;

        let err = client().with_base_url(url).presign(&presign_req()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("503"), "error should mention 503: {msg}");
    }

    #[tokio::test]
    async fn finalize_sends_expected_size() {
        let (url, req_rx) = mock_server(200, "", r#"{"status":"success"}"#).await;

        let req = FinalizeRequest {
            id: "job-1".into(),
            filename: "walk.mp4".into(),
            expected_size: 3,
        };
        client().with_base_url(url).finalize(&req).await.unwrap();

        let raw = req_rx.await.unwrap();
        assert!(raw.starts_with("POST /uploads/finalize "));
        assert!(raw.contains("\"expectedSize\":3"));
    }

    #[tokio::test]
    async fn finalize_malformed_body() {
        let (url, _rx) = mock_server(200, "", "not json").await;

        let req = FinalizeRequest {
            id: "job-1".into(),
            filename: "walk.mp4".into(),
            expected_size: 1,
        };
        let err = client().with_base_url(url).finalize(&req).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[tokio::test]
    async fn put_part_reports_status_and_etag() {
        let (url, req_rx) = mock_server(200, "ETag: \"abc123\"\r\n", "").await;

        let outcome = client()
            .put_part(&format!("{url}/bucket/part-0"), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.etag.as_deref(), Some("\"abc123\""));

        let raw = req_rx.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("put /bucket/part-0 "));
        assert!(raw.contains("content-type: application/octet-stream"));
    }

    #[tokio::test]
    async fn put_part_non_2xx_is_not_an_error() {
        let (url, _rx) = mock_server(403, "", "denied").await;

        let outcome = client()
            .put_part(&url, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(outcome.status, 403);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn notify_record_without_url_is_noop() {
        let req = RecordNotifyRequest {
            job_id: "job-1".into(),
            destination: "insp-1".into(),
            filename: "walk.mp4".into(),
        };
        client().notify_record(&req).await.unwrap();
    }

    #[tokio::test]
    async fn notify_record_posts_to_record_url() {
        let (url, req_rx) = mock_server(204, "", "").await;

        let req = RecordNotifyRequest {
            job_id: "job-1".into(),
            destination: "insp-1".into(),
            filename: "walk.mp4".into(),
        };
        client()
            .with_record_url(Some(format!("{url}/records")))
            .notify_record(&req)
            .await
            .unwrap();

        let raw = req_rx.await.unwrap();
        assert!(raw.starts_with("POST /records "));
        assert!(raw.contains("\"jobId\":\"job-1\""));
    }

    #[tokio::test]
    async fn probe_reachable_on_any_status() {
        let (url, _rx) = mock_server(404, "", "").await;
        assert!(client().with_base_url(url).probe().await);
    }

    #[tokio::test]
    async fn probe_unreachable_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client().with_base_url(format!("http://127.0.0.1:{port}"));
        assert!(!client.probe().await);
    }

    #[test]
    fn base_url_validation() {
        let c = Client::new("https://api.example.com/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url(), "https://api.example.com");

        assert!(matches!(
            Client::new("ftp://example.com", Duration::from_secs(1)),
            Err(Error::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            Client::new("not a url", Duration::from_secs(1)),
            Err(Error::InvalidBaseUrl(_))
        ));
    }
}
