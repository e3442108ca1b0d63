use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching a feed document.
///
/// Any of these skips the feed for this cycle; the stored watermark is never
/// touched on a fetch failure. Retries and conditional requests are
/// deliberately out of scope — one GET per feed per run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Fetches the raw bytes of one feed document.
///
/// Performs a single GET with a bounded timeout and a size-limited body read.
/// The bytes are returned unexamined; parsing belongs to
/// [`crate::feed::parser`].
///
/// # Errors
///
/// - [`FetchError::Timeout`] if the whole transfer, body read included,
///   exceeds `timeout`
/// - [`FetchError::HttpStatus`] for any non-2xx response
/// - [`FetchError::ResponseTooLarge`] if the body exceeds `max_size` bytes
/// - [`FetchError::Network`] for connection-level failures
pub async fn fetch_document(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    max_size: usize,
) -> Result<Vec<u8>, FetchError> {
    // The timeout bounds the whole transfer, not just the response headers;
    // a server dripping its body slowly cannot stall the run.
    tokio::time::timeout(timeout, async {
        let response = client.get(url).send().await.map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, max_size).await
    })
    .await
    .map_err(|_| FetchError::Timeout(timeout.as_secs()))?
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let bytes = fetch_document(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            1024 * 1024,
        )
        .await
        .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_404() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_document(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            1024 * 1024,
        )
        .await;
        match result {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fetch_body_over_limit() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let result = fetch_document(
            &client,
            &format!("{}/feed", mock_server.uri()),
            Duration::from_secs(5),
            1024,
        )
        .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_timeout_covers_slow_body() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Raw socket so the headers arrive promptly but the body never
        // finishes: the timeout must still fire.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\npartial")
                .await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = reqwest::Client::new();
        let result = fetch_document(
            &client,
            &format!("http://{}/feed", addr),
            Duration::from_millis(200),
            1024 * 1024,
        )
        .await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        // Port 1 is essentially never listening.
        let client = reqwest::Client::new();
        let result = fetch_document(
            &client,
            "http://127.0.0.1:1/feed",
            Duration::from_secs(5),
            1024,
        )
        .await;
        assert!(matches!(result, Err(FetchError::Network(_))));
    }
}
