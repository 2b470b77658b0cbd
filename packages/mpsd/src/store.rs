use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use rta::{Token, TokenSource};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::activity::ActivityHandle;
use crate::description::{Commit, SessionDescription};
use crate::error::Error;
use crate::reference::{DEFAULT_BASE_URL, SessionReference};

const CONTRACT_VERSION_HEADER: &str = "X-Xbl-Contract-Version";
const CONTRACT_VERSION: &str = "107";

/// HTTPS client for session documents and activity handles in the
/// directory.
#[derive(Clone)]
pub struct SessionStore {
    client: reqwest::Client,
    src: Arc<dyn TokenSource>,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<ActivityHandle>,
}

impl SessionStore {
    pub fn new(src: Arc<dyn TokenSource>) -> Self {
        Self::with_client(reqwest::Client::new(), src)
    }

    pub fn with_client(client: reqwest::Client, src: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            src,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the store at another directory root, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn token(&self) -> Result<Token, Error> {
        Ok(self.src.token()?)
    }

    fn url(&self, reference: &SessionReference) -> String {
        format!("{}{}", self.base_url, reference.path())
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, Error> {
        let token = self.token()?;
        Ok(self
            .client
            .request(method, url)
            .header(CONTRACT_VERSION_HEADER, CONTRACT_VERSION)
            .header(AUTHORIZATION, HeaderValue::from_str(&token.authorization())?))
    }

    /// Fetch the current document of a session.
    pub async fn query(&self, reference: &SessionReference) -> Result<Commit, Error> {
        let url = self.url(reference);
        let resp = self.request(Method::GET, &url)?.send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json().await?),
            status => Err(Error::Status {
                method: Method::GET,
                url,
                status,
            }),
        }
    }

    /// Write `description` into the session, creating it if needed.
    /// Returns `None` when the directory answers without a body, which it
    /// does once the last member has left.
    pub async fn commit(
        &self,
        reference: &SessionReference,
        description: &SessionDescription,
    ) -> Result<Option<Commit>, Error> {
        self.put_description(self.url(reference), description).await
    }

    /// Write `description` into the session an activity handle points at.
    pub async fn commit_handle(
        &self,
        handle_id: Uuid,
        description: &SessionDescription,
    ) -> Result<Option<Commit>, Error> {
        let url = format!("{}/handles/{handle_id}/session", self.base_url);
        self.put_description(url, description).await
    }

    async fn put_description(
        &self,
        url: String,
        description: &SessionDescription,
    ) -> Result<Option<Commit>, Error> {
        let resp = self
            .request(Method::PUT, &url)?
            .json(description)
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let commit: Commit = resp.json().await?;
                debug!(%url, change_number = commit.change_number, "committed session");
                Ok(Some(commit))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => Err(Error::Status {
                method: Method::PUT,
                url,
                status,
            }),
        }
    }

    /// Announce `reference` as the caller's current activity.
    pub async fn commit_activity(&self, reference: &SessionReference) -> Result<(), Error> {
        let url = format!("{}/handles", self.base_url);
        let resp = self
            .request(Method::POST, &url)?
            .json(&ActivityHandle::new(reference.clone()))
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                debug!(session = %reference, "committed activity handle");
                Ok(())
            }
            status => Err(Error::Status {
                method: Method::POST,
                url,
                status,
            }),
        }
    }

    pub(crate) async fn search_handles(&self, query: &Value) -> Result<Vec<ActivityHandle>, Error> {
        let url = format!(
            "{}/handles/query?include=relatedInfo,customProperties",
            self.base_url
        );
        let resp = self.request(Method::POST, &url)?.json(query).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json::<SearchResults>().await?.results),
            status => Err(Error::Status {
                method: Method::POST,
                url,
                status,
            }),
        }
    }
}
