// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use tessera_types::net::Endpoint;

use super::{Connector, NetworkError, TransportClient};
use crate::ShutdownError;

/// Where new connections go. A single address is reached directly, several addresses are tried
/// starting from a random one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discovery {
    Peer(Endpoint),
    Multiple(Vec<Endpoint>),
}

impl Discovery {
    pub(crate) fn new(mut addresses: Vec<Endpoint>) -> Result<Self, NetworkError> {
        match addresses.len() {
            0 => Err(NetworkError::NoAddress),
            1 => Ok(Discovery::Peer(addresses.remove(0))),
            _ => Ok(Discovery::Multiple(addresses)),
        }
    }

    /// Endpoints in the order they should be tried.
    fn candidates(&self) -> Vec<Endpoint> {
        match self {
            Discovery::Peer(endpoint) => vec![endpoint.clone()],
            Discovery::Multiple(endpoints) => {
                let start = rand::thread_rng().gen_range(0..endpoints.len());
                endpoints[start..]
                    .iter()
                    .chain(&endpoints[..start])
                    .cloned()
                    .collect()
            }
        }
    }
}

struct PoolInner<C: Connector> {
    connector: Arc<C>,
    discovery: Discovery,
    idle: Mutex<Vec<C::Client>>,
    closed: AtomicBool,
}

/// Reusable clients for one set of endpoints. A checked out client is used exclusively until
/// its guard is dropped, which returns it to the pool.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub(crate) fn new(connector: Arc<C>, discovery: Discovery) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                discovery,
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Hands out an idle client, or connects a new one if none is available.
    pub async fn checkout(&self) -> Result<PooledClient<C>, NetworkError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ShutdownError.into());
        }

        loop {
            let idle = self.inner.idle.lock().pop();
            match idle {
                Some(client) if client.is_healthy() => {
                    return Ok(PooledClient::new(self.inner.clone(), client));
                }
                Some(client) => {
                    debug!(endpoint = %client.endpoint(), "Discarding unhealthy pooled client");
                }
                None => break,
            }
        }

        let client = self.connect().await?;
        Ok(PooledClient::new(self.inner.clone(), client))
    }

    /// Connects a client that is not managed by the pool.
    pub async fn connect(&self) -> Result<C::Client, NetworkError> {
        let mut last_err = None;
        for endpoint in self.inner.discovery.candidates() {
            match self.inner.connector.connect(&endpoint).await {
                Ok(client) => return Ok(client),
                Err(err) => {
                    warn!(%endpoint, %err, "Failed to connect, trying next endpoint");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.map_or(NetworkError::NoAddress, NetworkError::from))
    }

    /// Closes every idle client. Failing to close one client does not stop the others from
    /// being closed; the last failure is returned.
    pub async fn close(&self) -> Result<(), NetworkError> {
        self.inner.closed.store(true, Ordering::Release);
        let clients = std::mem::take(&mut *self.inner.idle.lock());

        let mut last_err = None;
        for client in clients {
            let endpoint = client.endpoint().clone();
            if let Err(err) = client.close().await {
                debug!(%endpoint, %err, "Failed to close pooled client");
                last_err = Some(err);
            }
        }
        last_err.map_or(Ok(()), Err)
    }
}

/// Exclusive use of a pooled client. Dropping it returns the client to the pool.
pub struct PooledClient<C: Connector> {
    pool: Arc<PoolInner<C>>,
    client: Option<C::Client>,
}

impl<C: Connector> PooledClient<C> {
    fn new(pool: Arc<PoolInner<C>>, client: C::Client) -> Self {
        Self {
            pool,
            client: Some(client),
        }
    }
}

impl<C: Connector> Deref for PooledClient<C> {
    type Target = C::Client;

    fn deref(&self) -> &Self::Target {
        self.client
            .as_ref()
            .expect("client is present until the guard is dropped")
    }
}

impl<C: Connector> DerefMut for PooledClient<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
            .as_mut()
            .expect("client is present until the guard is dropped")
    }
}

impl<C: Connector> Drop for PooledClient<C> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !self.pool.closed.load(Ordering::Acquire) {
                self.pool.idle.lock().push(client);
            }
        }
    }
}
