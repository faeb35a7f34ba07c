//! [`PlaybackAuthority`] over the Ferrex server REST API.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::authority::{PlaybackAuthority, ProgressReport, StoppedReport};
use crate::error::{OfflineError, RemoteError, Result};

const PROGRESS_PATH: &str = "api/v1/watch/progress";
const STOPPED_PATH: &str = "api/v1/watch/stopped";

fn complete_path(item_id: Uuid) -> String {
    format!("api/v1/media/{item_id}/complete")
}

/// [`PlaybackAuthority`] backed by the Ferrex server's REST API.
#[derive(Clone)]
pub struct HttpPlaybackAuthority {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl fmt::Debug for HttpPlaybackAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPlaybackAuthority")
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.access_token.is_some())
            .finish()
    }
}

impl HttpPlaybackAuthority {
    /// Client with `timeout` applied to every request.
    pub fn new(
        base_url: Url,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            OfflineError::Config(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self::with_client(client, base_url, access_token))
    }

    /// Use a preconfigured client.
    pub fn with_client(
        client: Client,
        mut base_url: Url,
        access_token: Option<String>,
    ) -> Self {
        // Url::join drops the last path segment unless it ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        info!(
            "creating playback authority client with base URL: {}",
            base_url
        );

        Self {
            client,
            base_url,
            access_token,
        }
    }

    /// Server root, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, RemoteError> {
        self.base_url.join(path).map_err(|e| {
            RemoteError::Unexpected(format!("invalid endpoint {path}: {e}"))
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        item_id: Uuid,
    ) -> std::result::Result<(), RemoteError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        debug!(
            "playback authority rejected request for item {}; status={}",
            item_id, status
        );
        Err(classify_status(status, item_id, body))
    }
}

#[async_trait]
impl PlaybackAuthority for HttpPlaybackAuthority {
    async fn report_progress(
        &self,
        report: &ProgressReport,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(PROGRESS_PATH)?;
        self.send(self.client.post(url).json(report), report.item_id)
            .await
    }

    async fn report_stopped(
        &self,
        report: &StoppedReport,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(STOPPED_PATH)?;
        self.send(self.client.post(url).json(report), report.item_id)
            .await
    }

    async fn mark_played(
        &self,
        item_id: Uuid,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(&complete_path(item_id))?;
        self.send(self.client.post(url), item_id).await
    }

    async fn mark_unplayed(
        &self,
        item_id: Uuid,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.endpoint(&complete_path(item_id))?;
        self.send(self.client.delete(url), item_id).await
    }
}

/// Map a failure to get any response at all.
pub fn classify_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_connect() || err.is_request() {
        RemoteError::Network(err.to_string())
    } else {
        RemoteError::Unexpected(err.to_string())
    }
}

/// Map a non-success HTTP status.
pub fn classify_status(
    status: StatusCode,
    item_id: Uuid,
    body: String,
) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::FORBIDDEN => RemoteError::Forbidden,
        StatusCode::NOT_FOUND => RemoteError::NotFound(item_id),
        s if s.is_client_error() => {
            let message = if body.is_empty() {
                s.to_string()
            } else {
                body
            };
            RemoteError::BadRequest(message)
        }
        s if s.is_server_error() => RemoteError::Server {
            status: s.as_u16(),
            message: body,
        },
        s => RemoteError::Unexpected(format!("unexpected status {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    fn authority(base: &str) -> HttpPlaybackAuthority {
        HttpPlaybackAuthority::new(
            Url::parse(base).unwrap(),
            Some("token".into()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[test]
    fn statuses_map_to_remote_errors() {
        let item = Uuid::now_v7();

        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, item, String::new()),
            RemoteError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, item, String::new()),
            RemoteError::Forbidden
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, item, String::new()),
            RemoteError::NotFound(item)
        );
        assert_eq!(
            classify_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                item,
                "bad position".into()
            ),
            RemoteError::BadRequest("bad position".into())
        );

        let server =
            classify_status(StatusCode::BAD_GATEWAY, item, "down".into());
        assert_eq!(
            server,
            RemoteError::Server {
                status: 502,
                message: "down".into()
            }
        );
        assert_eq!(server.class(), FailureClass::Client);

        assert_eq!(
            classify_status(StatusCode::MOVED_PERMANENTLY, item, String::new())
                .class(),
            FailureClass::Unexpected
        );
    }

    #[test]
    fn endpoints_keep_base_path_prefix() {
        let plain = authority("http://media.local:3000");
        assert_eq!(
            plain.endpoint(PROGRESS_PATH).unwrap().as_str(),
            "http://media.local:3000/api/v1/watch/progress"
        );

        let prefixed = authority("https://example.com/ferrex");
        let item = Uuid::nil();
        assert_eq!(
            prefixed.endpoint(&complete_path(item)).unwrap().as_str(),
            format!("https://example.com/ferrex/api/v1/media/{item}/complete")
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let authority = authority(&format!("http://127.0.0.1:{port}"));

        let err = authority.mark_played(Uuid::now_v7()).await.unwrap_err();
        assert!(err.is_network(), "got {err:?}");
    }
}
