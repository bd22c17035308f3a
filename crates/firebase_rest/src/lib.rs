//! [`RemoteStore`] over the Firebase Realtime Database REST API.
//!
//! Reads and writes are plain `GET`/`PUT`/`PATCH`/`DELETE` requests against
//! `{database}/{path}.json`. Subscriptions hold a streaming `GET` open and
//! fold its server-sent `put`/`patch` events into a local copy of the
//! subscribed subtree.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use remote_store::{tree, PushItem, PushStream, RemoteStore};
use reqwest::{header::ACCEPT, Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use shared::{domain::StorePath, error::StoreError};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use tracing::{debug, info, warn};
use url::Url;

pub mod sse;

use sse::{SseParser, StreamEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    /// Database root, e.g. `https://<project>-default-rtdb.firebaseio.com`.
    pub database_url: String,
    /// ID token or database secret sent as the `auth` query parameter.
    pub auth_token: Option<String>,
}

pub struct FirebaseStore {
    http: Client,
    base: Url,
    auth_token: Option<String>,
    online: Arc<watch::Sender<bool>>,
}

impl FirebaseStore {
    pub fn new(config: FirebaseConfig) -> Result<Self, StoreError> {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(http: Client, config: FirebaseConfig) -> Result<Self, StoreError> {
        let base = Url::parse(config.database_url.trim_end_matches('/'))
            .map_err(|err| StoreError::Malformed(format!("database url: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Malformed(format!(
                "database url cannot address paths: {base}"
            )));
        }
        let (online, _) = watch::channel(false);

        Ok(Self {
            http,
            base,
            auth_token: config.auth_token.filter(|token| !token.is_empty()),
            online: Arc::new(online),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// REST location of `path`.
    pub fn url_for(&self, path: &StorePath) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Malformed(format!("cannot address {path}")))?;
            segments.pop_if_empty();
            let mut parts: Vec<String> = path.segments().map(str::to_string).collect();
            match parts.last_mut() {
                Some(last) => last.push_str(".json"),
                None => parts.push(".json".to_string()),
            }
            segments.extend(parts);
        }
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    fn mark_online(&self, online: bool) {
        mark_online(&self.online, online);
    }

    async fn send(&self, path: &StorePath, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.mark_online(false);
                return Err(StoreError::Unavailable(err.to_string()));
            }
        };
        self.mark_online(true);
        check_status(path, response).await
    }

    async fn write(
        &self,
        method: Method,
        path: &StorePath,
        body: Option<&Value>,
    ) -> Result<(), StoreError> {
        if path.is_reserved() {
            return Err(StoreError::Rejected {
                path: path.to_string(),
                reason: "reserved path is read-only".into(),
            });
        }
        let mut request = self.http.request(method, self.url_for(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(path, request).await?;
        Ok(())
    }

    fn connectivity_stream(&self) -> PushStream {
        WatchStream::new(self.online.subscribe())
            .map(|online| Ok(Some(Value::Bool(online))))
            .boxed()
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn subscribe(&self, path: &StorePath) -> Result<PushStream, StoreError> {
        if path.is_reserved() {
            return Ok(self.connectivity_stream());
        }

        let request = self
            .http
            .get(self.url_for(path)?)
            .header(ACCEPT, "text/event-stream");
        let response = self.send(path, request).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_event_stream(
            path.clone(),
            response,
            tx,
            Arc::clone(&self.online),
        ));
        debug!(%path, "event stream opened");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        if path.is_reserved() {
            return Ok(Some(Value::Bool(self.is_online())));
        }
        let response = self.send(path, self.http.get(self.url_for(path)?)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|err| StoreError::Malformed(err.to_string()))?;
        Ok(tree::normalize(value))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.write(Method::PUT, path, Some(&value)).await
    }

    async fn update(&self, updates: &BTreeMap<StorePath, Value>) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        if let Some(reserved) = updates.keys().find(|path| path.is_reserved()) {
            return Err(StoreError::Rejected {
                path: reserved.to_string(),
                reason: "reserved path is read-only".into(),
            });
        }
        let body: Map<String, Value> = updates
            .iter()
            .map(|(path, value)| (path.as_str().to_string(), value.clone()))
            .collect();
        self.write(Method::PATCH, &StorePath::root(), Some(&Value::Object(body)))
            .await
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.write(Method::DELETE, path, None).await
    }
}

fn mark_online(flag: &watch::Sender<bool>, online: bool) {
    let changed = flag.send_if_modified(|current| {
        let changed = *current != online;
        *current = online;
        changed
    });
    if changed {
        info!(online, "database connectivity changed");
    }
}

async fn check_status(path: &StorePath, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied {
            path: path.to_string(),
        },
        status if status.is_server_error() => {
            StoreError::Unavailable(format!("{status}: {}", body.trim()))
        }
        status => StoreError::Rejected {
            path: path.to_string(),
            reason: format!("{status}: {}", body.trim()),
        },
    };
    warn!(%path, %status, "database request failed");
    Err(err)
}

async fn run_event_stream(
    path: StorePath,
    response: Response,
    tx: mpsc::UnboundedSender<PushItem>,
    online: Arc<watch::Sender<bool>>,
) {
    let mut body = response.bytes_stream();
    let mut parser = SseParser::default();
    let mut snapshot = Value::Null;
    let mut last: Option<Option<Value>> = None;

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(%path, "event stream released");
                return;
            }
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                mark_online(&online, false);
                let _ = tx.send(Err(StoreError::Unavailable(err.to_string())));
                return;
            }
            None => {
                mark_online(&online, false);
                let _ = tx.send(Err(StoreError::Unavailable(format!(
                    "event stream for {path} closed by server"
                ))));
                return;
            }
        };

        for event in parser.feed(&bytes) {
            let event = match StreamEvent::from_sse(&event) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    warn!(%path, %err, "skipping malformed stream event");
                    continue;
                }
            };

            match event {
                StreamEvent::KeepAlive => {}
                StreamEvent::Cancel | StreamEvent::AuthRevoked => {
                    warn!(%path, ?event, "listener revoked by server");
                    let _ = tx.send(Err(StoreError::PermissionDenied {
                        path: path.to_string(),
                    }));
                    return;
                }
                data => {
                    data.apply(&mut snapshot);
                    let current = tree::normalize(snapshot.clone());
                    if last.as_ref() != Some(&current) {
                        last = Some(current.clone());
                        if tx.send(Ok(current)).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
