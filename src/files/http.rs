//! [`FileApi`] over the hub's HTTP endpoints.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use url::Url;

use super::{ErrorBody, FileApi, FileApiError, FileApiResult, FileContent, FileTree, OpenRequest, WriteRequest};
use crate::protocol::OriginTag;

#[derive(Debug, Clone)]
pub struct HttpFileApi {
    client: Client,
    base: Url,
    origin: Option<OriginTag>,
}

impl HttpFileApi {
    /// `base` is the service root, e.g. `http://127.0.0.1:8001/`.
    pub fn new(base: &str, timeout: Duration) -> FileApiResult<Self> {
        let mut base = Url::parse(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            origin: None,
        })
    }

    /// Derive the HTTP base from the hub's WebSocket URL (`ws://host/ws`).
    pub fn from_ws_url(ws_url: &str, timeout: Duration) -> FileApiResult<Self> {
        let mut url = Url::parse(ws_url)?;
        let scheme = if url.scheme() == "wss" { "https" } else { "http" };
        // Only fails for cannot-be-a-base URLs, which ws URLs never are
        let _ = url.set_scheme(scheme);
        url.set_path("/");
        url.set_query(None);
        Self::new(url.as_str(), timeout)
    }

    /// Tag writes made through this client as coming from `origin`.
    pub fn with_origin(mut self, origin: OriginTag) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Ask the service to resolve and validate a directory root.
    pub async fn open(&self, path: &Path) -> FileApiResult<FileTree> {
        let response = self
            .client
            .post(self.endpoint("api/open")?)
            .json(&OpenRequest {
                path: path.to_path_buf(),
            })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    fn endpoint(&self, route: &str) -> FileApiResult<Url> {
        Ok(self.base.join(route)?)
    }
}

#[async_trait]
impl FileApi for HttpFileApi {
    async fn list(&self, path: &Path) -> FileApiResult<FileTree> {
        let response = self
            .client
            .get(self.endpoint("api/tree")?)
            .query(&[("path", path.to_string_lossy())])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn read(&self, path: &Path) -> FileApiResult<FileContent> {
        let response = self
            .client
            .get(self.endpoint("api/file")?)
            .query(&[("path", path.to_string_lossy())])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn write(&self, path: &Path, content: &str) -> FileApiResult<()> {
        let response = self
            .client
            .post(self.endpoint("api/file")?)
            .json(&WriteRequest {
                path: path.to_path_buf(),
                content: content.to_string(),
                origin_tag: self.origin.clone(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> FileApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = match response.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(FileApiError::Service {
        status: status.as_u16(),
        detail,
    })
}
