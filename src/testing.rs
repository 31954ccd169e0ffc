//! Scripted transport and payload builders shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use url::Url;

use crate::cache::{FetchStamp, HttpTransport, StampStore};
use crate::error::{ServiceError, ServiceResult};

type Route = (String, usize);

/// `HttpTransport` answering from responses registered per path and page.
#[derive(Default)]
pub struct StubTransport {
  responses: Mutex<HashMap<Route, Value>>,
  failures: Mutex<HashMap<Route, ()>>,
  gates: Mutex<HashMap<Route, Arc<Notify>>>,
  requests: Mutex<Vec<Url>>,
}

impl StubTransport {
  pub fn respond(&self, path: &str, page: usize, payload: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert((path.to_string(), page), payload);
  }

  pub fn fail(&self, path: &str, page: usize) {
    self
      .failures
      .lock()
      .unwrap()
      .insert((path.to_string(), page), ());
  }

  /// Hold requests for the route until the returned handle is notified.
  pub fn gate(&self, path: &str, page: usize) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    self
      .gates
      .lock()
      .unwrap()
      .insert((path.to_string(), page), Arc::clone(&notify));
    notify
  }

  pub fn request_count(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<Url> {
    self.requests.lock().unwrap().clone()
  }
}

fn route(url: &Url) -> Route {
  let page = url
    .query_pairs()
    .find(|(key, _)| key == "page")
    .and_then(|(_, value)| value.parse().ok())
    .unwrap_or(1);
  (url.path().to_string(), page)
}

#[async_trait]
impl HttpTransport for StubTransport {
  async fn get_json(&self, url: Url) -> ServiceResult<Value> {
    let route = route(&url);
    self.requests.lock().unwrap().push(url);

    let gate = self.gates.lock().unwrap().get(&route).cloned();
    if let Some(gate) = gate {
      gate.notified().await;
    }

    if self.failures.lock().unwrap().contains_key(&route) {
      return Err(ServiceError::Network("connection refused".into()));
    }

    self
      .responses
      .lock()
      .unwrap()
      .get(&route)
      .cloned()
      .ok_or_else(|| ServiceError::Network(format!("no route for {}?page={}", route.0, route.1).into()))
  }
}

/// Stamp registry held in memory, optionally refusing writes.
#[derive(Default)]
pub struct MemoryStampStore {
  stamps: Mutex<HashMap<String, FetchStamp>>,
  fail_writes: bool,
}

impl MemoryStampStore {
  pub fn failing() -> Self {
    Self {
      fail_writes: true,
      ..Self::default()
    }
  }
}

#[async_trait]
impl StampStore for MemoryStampStore {
  async fn stamp(&self, cache_identifier: &str) -> ServiceResult<Option<FetchStamp>> {
    Ok(self.stamps.lock().unwrap().get(cache_identifier).copied())
  }

  async fn record(&self, cache_identifier: &str, stamp: FetchStamp) -> ServiceResult<()> {
    if self.fail_writes {
      return Err(ServiceError::Internal("stamp store is read-only".to_string()));
    }
    self
      .stamps
      .lock()
      .unwrap()
      .insert(cache_identifier.to_string(), stamp);
    Ok(())
  }

  async fn clear(&self) -> ServiceResult<usize> {
    let mut stamps = self.stamps.lock().unwrap();
    let count = stamps.len();
    stamps.clear();
    Ok(count)
  }
}

/// Raw release records with ids from `ids`.
pub fn release_records(ids: impl IntoIterator<Item = u64>) -> Value {
  Value::Array(
    ids
      .into_iter()
      .map(|id| json!({ "id": id, "title": format!("Release {}", id), "year": 1990 }))
      .collect(),
  )
}

/// Artist releases response envelope.
pub fn releases_payload(ids: impl IntoIterator<Item = u64>, total: usize) -> Value {
  json!({
    "pagination": { "items": total },
    "releases": release_records(ids),
  })
}

/// Database search response envelope.
pub fn albums_payload(ids: impl IntoIterator<Item = u64>, total: usize) -> Value {
  let results: Vec<Value> = ids
    .into_iter()
    .map(|id| {
      json!({
        "id": id,
        "title": format!("Album {}", id),
        "country": "US",
        "genre": ["Jazz"],
      })
    })
    .collect();
  json!({
    "pagination": { "items": total },
    "results": results,
  })
}
