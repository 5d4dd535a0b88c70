//! Handler traits a `Service` implements and registers against the bus.

use async_trait::async_trait;
use serde_json::Value;

use aegis_types::{Command, CoreError, Event, RPCRequest, RPCResponse};

/// Handles one RPC method. Returning `Err` is translated into a failed
/// [`RPCResponse`] whose `error` carries the error's `Display` text; handlers
/// that need the `NOT_ACTIVE` retry contract should return
/// `Err(CoreError::NotActive)` explicitly rather than a generic error.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError>;
}

#[async_trait]
impl<F, Fut> RpcHandler for F
where
    F: Fn(RPCRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CoreError>> + Send,
{
    async fn handle(&self, request: RPCRequest) -> Result<Value, CoreError> {
        (self)(request).await
    }
}

/// Handles one domain event delivery. Core NATS wildcard deliveries auto-ack
/// (there is nothing to ack); JetStream durable deliveries ack on `Ok(())`
/// and nak on `Err`, per spec §9 Open Question 2.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), CoreError>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), CoreError>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), CoreError> {
        (self)(event).await
    }
}

/// Handles one command delivery from a durable JetStream consumer.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Result<Value, CoreError>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(Command) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CoreError>> + Send,
{
    async fn handle(&self, command: Command) -> Result<Value, CoreError> {
        (self)(command).await
    }
}
