//! Connection pool: N `async_nats::Client`s, round-robin with skip-on-unhealthy
//! (spec §4.1, §5 "Shared resources").

use std::sync::atomic::{AtomicUsize, Ordering};

use async_nats::Client;
use tracing::{info, warn};

use crate::error::BusError;

/// A pool of NATS client connections. Selection is round-robin starting from
/// an atomically advanced cursor; a connection whose `connection_state()` is
/// not `Connected` is skipped. If every member is unhealthy, selection fails
/// with [`BusError::NotConnected`].
pub struct ConnectionPool {
    clients: Vec<Client>,
    cursor: AtomicUsize,
}

impl ConnectionPool {
    /// Opens `pool_size` connections to `servers`, each an independent
    /// `async_nats::Client` (the async-nats client itself multiplexes one
    /// TCP connection per `connect` call; a pool of clients gives us
    /// multiple sockets and, more importantly, independent reconnect state
    /// so one flaky socket does not stall every in-flight request).
    pub async fn connect(
        servers: &[String],
        pool_size: u8,
        max_reconnect_attempts: u32,
        reconnect_time_wait: std::time::Duration,
    ) -> Result<Self, BusError> {
        let server_list = servers.join(",");
        let mut clients = Vec::with_capacity(pool_size as usize);

        for i in 0..pool_size {
            let options = async_nats::ConnectOptions::new()
                .max_reconnects(max_reconnect_attempts as usize)
                .reconnect_delay_callback(move |attempt| {
                    reconnect_time_wait * 2u32.saturating_pow(attempt.min(5) as u32)
                });
            let client = options.connect(&server_list).await?;
            info!(connection = i, servers = %server_list, "bus connection established");
            clients.push(client);
        }

        Ok(Self {
            clients,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Picks the next healthy connection in round-robin order.
    pub fn select(&self) -> Result<&Client, BusError> {
        let len = self.clients.len();
        if len == 0 {
            return Err(BusError::NotConnected);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            let client = &self.clients[idx];
            if client.connection_state() == async_nats::connection::State::Connected {
                return Ok(client);
            }
        }
        warn!("every pool connection is unhealthy");
        Err(BusError::NotConnected)
    }

    /// A connection chosen deterministically by the caller, used by RPC
    /// retry-on-connection-failure to pick a *different* member than the one
    /// that just failed.
    pub fn select_excluding(&self, excluded_idx: Option<usize>) -> Result<(usize, &Client), BusError> {
        let len = self.clients.len();
        if len == 0 {
            return Err(BusError::NotConnected);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if Some(idx) == excluded_idx && len > 1 {
                continue;
            }
            let client = &self.clients[idx];
            if client.connection_state() == async_nats::connection::State::Connected {
                return Ok((idx, client));
            }
        }
        Err(BusError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.clients
            .iter()
            .any(|c| c.connection_state() == async_nats::connection::State::Connected)
    }

    pub async fn disconnect(&self) {
        for client in &self.clients {
            let _ = client.drain().await;
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_reports_not_connected() {
        let pool = ConnectionPool {
            clients: Vec::new(),
            cursor: AtomicUsize::new(0),
        };
        assert!(!pool.is_connected());
        assert!(matches!(pool.select(), Err(BusError::NotConnected)));
    }
}
