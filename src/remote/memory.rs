//! In-process remote service.
//!
//! Keeps entities in memory, records every call in order, and can be told
//! to fail. Useful for demos and for exercising offline and retry paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use serde_json::Value;

use super::{Page, RemoteError, RemoteFuture, RemoteResult, RemoteService};
use crate::collection::Collection;

/// A call observed by [`InMemoryRemote`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
  Create {
    collection: Collection,
    payload: Value,
  },
  Update {
    collection: Collection,
    id: String,
    payload: Value,
  },
  List {
    collection: Collection,
    page_size: u32,
    cursor: Option<String>,
  },
}

#[derive(Debug, Default)]
struct State {
  entities: HashMap<Collection, Vec<(String, Value)>>,
  calls: Vec<RemoteCall>,
  next_id: u64,
  failing: bool,
  fail_next: u32,
}

/// Remote service that lives in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
  state: Mutex<State>,
}

impl InMemoryRemote {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Add an entity without recording a call.
  pub fn seed(&self, collection: Collection, payload: Value) -> String {
    let mut state = self.state();
    state.next_id += 1;
    let id = state.next_id.to_string();
    state
      .entities
      .entry(collection)
      .or_default()
      .push((id.clone(), payload));
    id
  }

  /// Make every call fail until switched back.
  pub fn set_failing(&self, failing: bool) {
    self.state().failing = failing;
  }

  /// Make the next `count` calls fail.
  pub fn fail_next(&self, count: u32) {
    self.state().fail_next = count;
  }

  /// Every call received so far, in order. Failed calls are included.
  pub fn calls(&self) -> Vec<RemoteCall> {
    self.state().calls.clone()
  }

  pub fn entities(&self, collection: &Collection) -> Vec<(String, Value)> {
    self
      .state()
      .entities
      .get(collection)
      .cloned()
      .unwrap_or_default()
  }

  /// Record the call and decide whether it fails.
  fn begin(&self, call: RemoteCall) -> Result<MutexGuard<'_, State>, RemoteError> {
    let mut state = self.state();
    state.calls.push(call);
    if state.failing {
      return Err(RemoteError::Unavailable("service offline".to_string()));
    }
    if state.fail_next > 0 {
      state.fail_next -= 1;
      return Err(RemoteError::Unavailable("injected failure".to_string()));
    }
    Ok(state)
  }

  fn create(&self, collection: &Collection, payload: &Value) -> RemoteResult<String> {
    let mut state = self.begin(RemoteCall::Create {
      collection: collection.clone(),
      payload: payload.clone(),
    })?;
    state.next_id += 1;
    let id = state.next_id.to_string();
    state
      .entities
      .entry(collection.clone())
      .or_default()
      .push((id.clone(), payload.clone()));
    Ok(id)
  }

  fn update(&self, collection: &Collection, id: &str, payload: &Value) -> RemoteResult<()> {
    let mut state = self.begin(RemoteCall::Update {
      collection: collection.clone(),
      id: id.to_string(),
      payload: payload.clone(),
    })?;
    let entity = state
      .entities
      .get_mut(collection)
      .and_then(|items| items.iter_mut().find(|(existing, _)| existing == id))
      .ok_or_else(|| RemoteError::Status {
        status: 404,
        body: format!("{} {} not found", collection, id),
      })?;
    entity.1 = payload.clone();
    Ok(())
  }

  fn list(&self, collection: &Collection, page_size: u32, cursor: Option<&str>) -> RemoteResult<Page> {
    let state = self.begin(RemoteCall::List {
      collection: collection.clone(),
      page_size,
      cursor: cursor.map(String::from),
    })?;

    let start = match cursor {
      Some(c) => c
        .parse::<usize>()
        .map_err(|_| RemoteError::InvalidResponse(format!("bad cursor {}", c)))?,
      None => 0,
    };
    let all = state.entities.get(collection).map(Vec::as_slice).unwrap_or(&[]);
    let end = all.len().min(start + page_size as usize);
    let items = all
      .get(start..end)
      .unwrap_or(&[])
      .iter()
      .map(|(_, payload)| payload.clone())
      .collect();
    let has_more = end < all.len();

    Ok(Page {
      items,
      next_cursor: has_more.then(|| end.to_string()),
      has_more,
    })
  }
}

impl RemoteService for InMemoryRemote {
  fn create_entity<'a>(
    &'a self,
    collection: &'a Collection,
    payload: &'a Value,
  ) -> RemoteFuture<'a, String> {
    let result = self.create(collection, payload);
    async move { result }.boxed()
  }

  fn update_entity<'a>(
    &'a self,
    collection: &'a Collection,
    id: &'a str,
    payload: &'a Value,
  ) -> RemoteFuture<'a, ()> {
    let result = self.update(collection, id, payload);
    async move { result }.boxed()
  }

  fn list_entities<'a>(
    &'a self,
    collection: &'a Collection,
    page_size: u32,
    cursor: Option<&'a str>,
  ) -> RemoteFuture<'a, Page> {
    let result = self.list(collection, page_size, cursor);
    async move { result }.boxed()
  }
}
