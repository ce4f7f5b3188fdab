//! HTTP retrieval of one upstream source document.
//!
//! A failed fetch is recovered at the cycle level: the sync engine logs
//! it and skips the source until the next scheduled cycle. There are no
//! in-cycle retries, so a misbehaving host costs at most one timeout per
//! cycle.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the per-source timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("response too large")]
    ResponseTooLarge,
}

/// Fetch one source URL and return the response body as text.
///
/// The whole fetch is time-boxed so a slow source cannot stall the
/// cycle, and the body is read through a size cap to bound memory.
/// Bodies that are not valid UTF-8 are decoded lossily; the XML parser
/// downstream decides whether the result is usable.
pub async fn fetch_source(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    fetch_with_timeout(client, url, FETCH_TIMEOUT).await
}

/// One budget covers the request and the body read: a host that returns
/// headers promptly and then trickles the body must still hit the
/// deadline.
async fn fetch_with_timeout(
    client: &reqwest::Client,
    url: &str,
    budget: Duration,
) -> Result<String, FetchError> {
    tokio::time::timeout(budget, async {
        let response = client.get(url).send().await.map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    })
    .await
    .map_err(|_| FetchError::Timeout)?
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

    #[tokio::test]
    async fn test_fetch_success_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<rss><channel></channel></rss>")
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let body = fetch_source(&client, &format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<rss><channel></channel></rss>");
    }

    #[tokio::test]
    async fn test_fetch_404_is_http_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_source(&client, &format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(404) => {}
            e => panic!("expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_5xx_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1) // retried only at the next cycle, never within one
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_source(&client, &format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(503) => {}
            e => panic!("expected HttpStatus(503), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; MAX_FEED_SIZE + 1]))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let err = fetch_source(&client, &format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_stalled_body_hits_the_timeout() {
        use tokio::io::AsyncWriteExt;

        // wiremock can only delay whole responses, so stall the body by
        // hand: headers and a few bytes, then silence on an open socket.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\npartial")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = reqwest::Client::new();
        let err = fetch_with_timeout(
            &client,
            &format!("http://{addr}/feed"),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Timeout));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = reqwest::Client::new();
        // Port 1 is essentially never listening.
        let err = fetch_source(&client, "http://127.0.0.1:1/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
