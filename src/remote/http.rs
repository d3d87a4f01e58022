//! JSON-over-HTTP remote service client.
//!
//! Endpoints, relative to the configured base URL:
//! - `POST {collection}` with the payload, answering `{"id": ...}`
//! - `PUT {collection}/{id}` with the payload
//! - `GET {collection}?limit=N&cursor=C`, answering a [`Page`]

use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{Page, RemoteError, RemoteFuture, RemoteResult, RemoteService};
use crate::collection::Collection;

/// Connection settings for [`HttpRemote`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
  pub base_url: String,
  pub timeout: Duration,
  /// Sent as a bearer token when present
  pub api_token: Option<String>,
}

/// Remote data service client wrapper
#[derive(Clone)]
pub struct HttpRemote {
  client: reqwest::Client,
  base_url: Url,
  api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCreated {
  id: Value,
}

impl HttpRemote {
  pub fn new(config: &HttpRemoteConfig) -> RemoteResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout)
      .gzip(true)
      .build()?;

    Ok(Self {
      client,
      base_url: base_url(&config.base_url)?,
      api_token: config.api_token.clone(),
    })
  }

  fn collection_url(&self, collection: &Collection) -> RemoteResult<Url> {
    Ok(self.base_url.join(collection.as_str())?)
  }

  fn entity_url(&self, collection: &Collection, id: &str) -> RemoteResult<Url> {
    let mut url = self.collection_url(collection)?;
    url
      .path_segments_mut()
      .map_err(|_| RemoteError::InvalidResponse("base url cannot hold a path".to_string()))?
      .push(id);
    Ok(url)
  }

  fn list_url(
    &self,
    collection: &Collection,
    page_size: u32,
    cursor: Option<&str>,
  ) -> RemoteResult<Url> {
    let mut url = self.collection_url(collection)?;
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("limit", &page_size.to_string());
      if let Some(cursor) = cursor {
        query.append_pair("cursor", cursor);
      }
    }
    Ok(url)
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.client.request(method, url);
    match &self.api_token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  async fn send(&self, builder: reqwest::RequestBuilder) -> RemoteResult<reqwest::Response> {
    let response = builder.send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
      status: status.as_u16(),
      body,
    })
  }

  async fn create(&self, collection: &Collection, payload: &Value) -> RemoteResult<String> {
    let url = self.collection_url(collection)?;
    let response = self
      .send(self.request(reqwest::Method::POST, url).json(payload))
      .await?;

    let created: ApiCreated = response
      .json()
      .await
      .map_err(|e| RemoteError::InvalidResponse(format!("create {}: {}", collection, e)))?;

    match created.id {
      Value::String(id) => Ok(id),
      Value::Number(id) => Ok(id.to_string()),
      other => Err(RemoteError::InvalidResponse(format!(
        "create {} returned id {}",
        collection, other
      ))),
    }
  }

  async fn update(&self, collection: &Collection, id: &str, payload: &Value) -> RemoteResult<()> {
    let url = self.entity_url(collection, id)?;
    self
      .send(self.request(reqwest::Method::PUT, url).json(payload))
      .await?;
    Ok(())
  }

  async fn list(
    &self,
    collection: &Collection,
    page_size: u32,
    cursor: Option<&str>,
  ) -> RemoteResult<Page> {
    let url = self.list_url(collection, page_size, cursor)?;
    let response = self.send(self.request(reqwest::Method::GET, url)).await?;

    response
      .json()
      .await
      .map_err(|e| RemoteError::InvalidResponse(format!("list {}: {}", collection, e)))
  }
}

/// Parse the base URL, making sure relative joins append to its path.
fn base_url(raw: &str) -> RemoteResult<Url> {
  let mut url = Url::parse(raw)?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

impl RemoteService for HttpRemote {
  fn create_entity<'a>(
    &'a self,
    collection: &'a Collection,
    payload: &'a Value,
  ) -> RemoteFuture<'a, String> {
    self.create(collection, payload).boxed()
  }

  fn update_entity<'a>(
    &'a self,
    collection: &'a Collection,
    id: &'a str,
    payload: &'a Value,
  ) -> RemoteFuture<'a, ()> {
    self.update(collection, id, payload).boxed()
  }

  fn list_entities<'a>(
    &'a self,
    collection: &'a Collection,
    page_size: u32,
    cursor: Option<&'a str>,
  ) -> RemoteFuture<'a, Page> {
    self.list(collection, page_size, cursor).boxed()
  }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
