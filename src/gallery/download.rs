use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Image responses larger than this are rejected outright.
const MAX_IMAGE_SIZE: usize = 20 * 1024 * 1024; // 20MB

/// Errors that can occur while downloading an image.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Network-level error (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the image size limit
    #[error("Image too large")]
    ResponseTooLarge,
}

/// Downloads an image, streaming the body and reporting progress.
///
/// `on_progress` receives fractions in [0,1] computed against
/// Content-Length as chunks arrive; values are non-decreasing and 1.0 is
/// always published on success, even when the server sent no length.
pub async fn download_image(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    mut on_progress: impl FnMut(f32),
) -> Result<Vec<u8>, NetworkError> {
    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .map_err(|_| NetworkError::Timeout)?
        .map_err(NetworkError::Network)?;

    if !response.status().is_success() {
        return Err(NetworkError::HttpStatus(response.status().as_u16()));
    }

    let expected = response.content_length().filter(|len| *len > 0);
    if let Some(len) = expected {
        if len as usize > MAX_IMAGE_SIZE {
            return Err(NetworkError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(NetworkError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > MAX_IMAGE_SIZE {
            return Err(NetworkError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);

        // Unknown length: progress stays where it is until completion
        if let Some(len) = expected {
            let fraction = (bytes.len() as f32 / len as f32).min(1.0);
            on_progress(fraction);
        }
    }

    on_progress(1.0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"image-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let bytes = download_image(
            &client,
            &format!("{}/a.jpg", server.uri()),
            Duration::from_secs(5),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"image-bytes");
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_ends_at_one() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let mut seen = Vec::new();
        download_image(
            &client,
            &format!("{}/a.jpg", server.uri()),
            Duration::from_secs(5),
            |p| seen.push(p),
        )
        .await
        .unwrap();

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let result = download_image(
            &client,
            &format!("{}/a.jpg", server.uri()),
            Duration::from_secs(5),
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(NetworkError::HttpStatus(404))));
    }
}
