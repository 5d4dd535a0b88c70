//! Message Bus Adapter (spec §4.1): the one component in the runtme that
//! actually talks to NATS/JetStream. Everything above this layer —
//! registry, election, discovery, RPC — only ever sees [`MessageBus`]'s
//! typed operations, never a raw `async_nats::Client`.

mod codec;
mod error;
mod handler;
mod pool;
mod streams;

pub use codec::{decode, encode};
pub use error::BusError;
pub use handler::{CommandHandler, EventHandler, RpcHandler};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_nats::jetstream::{self, consumer::pull::Config as PullConfig, AckKind, Context as JetStreamContext};
use async_nats::HeaderMap;
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use aegis_config::CoreConfig;
use aegis_types::{
    subjects, Command, CoreError, Event, InstanceId, MethodName, RPCRequest, RPCResponse,
    ServiceName,
};

use crate::pool::ConnectionPool;

/// Per-subscription concurrency limit (spec §5 "Suspension points"): a slow
/// handler must not block the rest of the subscription's deliveries.
const DEFAULT_HANDLER_CONCURRENCY: usize = 64;

/// The Message Bus Adapter.
pub struct MessageBus {
    pool: ConnectionPool,
    jetstream: JetStreamContext,
    use_msgpack: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancellation: CancellationToken,
    rpc_call_seq: AtomicU64,
}

impl MessageBus {
    /// Opens `pool_size` connections to `config.servers`, initializes a
    /// JetStream context, and ensures the `EVENTS`/`COMMANDS` streams exist.
    #[instrument(skip(config), fields(servers = ?config.servers, pool_size = config.pool_size))]
    pub async fn connect(config: &CoreConfig) -> Result<Self, BusError> {
        let reconnect_wait = config
            .reconnect_time_wait()
            .map_err(|e| BusError::Validation(e.to_string()))?
            .as_std();

        let pool = ConnectionPool::connect(
            &config.servers,
            config.pool_size,
            config.max_reconnect_attempts,
            reconnect_wait,
        )
        .await?;

        let primary = pool.select()?.clone();
        let jetstream = jetstream::new(primary);
        streams::ensure_core_streams(&jetstream).await?;

        info!("message bus connected");

        Ok(Self {
            pool,
            jetstream,
            use_msgpack: config.use_msgpack,
            tasks: Mutex::new(Vec::new()),
            cancellation: CancellationToken::new(),
            rpc_call_seq: AtomicU64::new(0),
        })
    }

    /// Drains and closes all pool connections, cancelling every background
    /// subscription task first.
    pub async fn disconnect(&self) {
        self.cancellation.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        self.pool.disconnect().await;
        info!("message bus disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_connected()
    }

    /// The shared JetStream context this bus ensured `EVENTS`/`COMMANDS` on.
    /// Exposed so composing crates (the Service Lifecycle) can open their
    /// own KV buckets — registry, election — against the same connection
    /// pool without re-dialing.
    pub fn jetstream(&self) -> JetStreamContext {
        self.jetstream.clone()
    }

    async fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    // ---- RPC -----------------------------------------------------------

    /// Subscribes to `rpc.<service>.<method>` under queue group
    /// `rpc.<service>` so that competing instances load-balance requests
    /// (spec §4.1, §5 "RPC queue-group delivery is at-most-once-per-group").
    pub async fn register_rpc_handler(
        &self,
        service: &ServiceName,
        method: &MethodName,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<(), BusError> {
        let subject = subjects::rpc_subject(service, method);
        let queue_group = format!("rpc.{service}");
        let client = self.pool.select()?.clone();
        let mut subscriber = client.queue_subscribe(subject.clone(), queue_group).await?;

        let use_msgpack = self.use_msgpack;
        let cancellation = self.cancellation.clone();
        let semaphore = Arc::new(Semaphore::new(DEFAULT_HANDLER_CONCURRENCY));

        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    message = subscriber.next() => message,
                };
                let Some(message) = message else { break };
                let Some(reply) = message.reply.clone() else {
                    warn!(subject = %message.subject, "rpc message missing reply subject, dropping");
                    continue;
                };

                let client = client.clone();
                let handler = handler.clone();
                let permit = semaphore.clone().acquire_owned().await;
                tokio::spawn(async move {
                    let _permit = permit;
                    let content_type = message
                        .headers
                        .as_ref()
                        .and_then(|h| h.get(codec::CONTENT_TYPE_HEADER))
                        .map(|v| v.to_string());

                    let response = match decode::<RPCRequest>(&message.payload, content_type.as_deref()) {
                        Ok(request) => {
                            let correlation_id = request.correlation_id.clone();
                            match handler.handle(request).await {
                                Ok(result) => RPCResponse::ok(correlation_id, result),
                                Err(CoreError::NotActive) => {
                                    RPCResponse::err(correlation_id, "NOT_ACTIVE")
                                }
                                Err(e) => RPCResponse::err(correlation_id, e.to_string()),
                            }
                        }
                        Err(e) => RPCResponse::err(String::new(), format!("decode error: {e}")),
                    };

                    match encode(&response, use_msgpack) {
                        Ok((bytes, content_type)) => {
                            let mut headers = HeaderMap::new();
                            headers.insert(codec::CONTENT_TYPE_HEADER, content_type);
                            if let Err(e) = client.publish_with_headers(reply, headers, bytes.into()).await {
                                error!(error = %e, "failed to publish rpc response");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to encode rpc response"),
                    }
                });
            }
        });

        self.track(task).await;
        Ok(())
    }

    /// Dispatches `request` with an inbox-reply round trip. On a per-attempt
    /// timeout, returns a failed [`RPCResponse`] (not an `Err`) per spec
    /// §4.1. On a connection failure, fails over to another pool member and
    /// retries exactly once.
    #[instrument(skip(self, request), fields(target = %request.target, method = %request.method))]
    pub async fn call_rpc(&self, request: &RPCRequest) -> Result<RPCResponse, BusError> {
        let subject = subjects::rpc_subject(&request.target, &request.method);
        let (payload, content_type) = encode(request, self.use_msgpack)?;
        let timeout = request.timeout.as_std();

        let seq = self.rpc_call_seq.fetch_add(1, Ordering::Relaxed);
        let mut last_excluded = None;

        for attempt in 0..2u8 {
            let (idx, client) = self.pool.select_excluding(last_excluded)?;
            let mut headers = HeaderMap::new();
            headers.insert(codec::CONTENT_TYPE_HEADER, content_type);

            let call = client.request_with_headers(subject.clone(), headers, payload.clone().into());
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(message)) => {
                    let response_content_type = message
                        .headers
                        .as_ref()
                        .and_then(|h| h.get(codec::CONTENT_TYPE_HEADER))
                        .map(|v| v.to_string());
                    let response: RPCResponse =
                        decode(&message.payload, response_content_type.as_deref())?;
                    return Ok(response);
                }
                Ok(Err(transport_error)) if attempt == 0 => {
                    warn!(attempt, call_seq = seq, error = %transport_error, "rpc transport error, failing over");
                    last_excluded = Some(idx);
                    continue;
                }
                Ok(Err(transport_error)) => {
                    return Err(BusError::Transport(transport_error.to_string()));
                }
                Err(_elapsed) => {
                    debug!(call_seq = seq, timeout_secs = timeout.as_secs_f64(), "rpc call timed out");
                    return Ok(RPCResponse::err(request.correlation_id.clone(), "Timeout"));
                }
            }
        }
        Err(BusError::NotConnected)
    }

    // ---- Events ----------------------------------------------------------

    /// Subscribes to `pattern` (supports `*`/`>` wildcards). Core NATS
    /// wildcard subscriptions auto-ack; when `durable` names a consumer, a
    /// JetStream pull consumer is created instead and messages are
    /// explicitly ack'd/nak'd based on the handler's result (spec §9 Open
    /// Question 2).
    pub async fn subscribe_event(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
        durable: Option<&str>,
    ) -> Result<(), BusError> {
        match durable {
            None => self.subscribe_event_core(pattern, handler).await,
            Some(durable_name) => self.subscribe_event_durable(pattern, durable_name, handler).await,
        }
    }

    async fn subscribe_event_core(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        let client = self.pool.select()?.clone();
        let mut subscriber = client.subscribe(pattern.to_string()).await?;
        let cancellation = self.cancellation.clone();
        let pattern = pattern.to_string();

        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    message = subscriber.next() => message,
                };
                let Some(message) = message else { break };
                let content_type = message
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(codec::CONTENT_TYPE_HEADER))
                    .map(|v| v.to_string());
                match decode::<Event>(&message.payload, content_type.as_deref()) {
                    Ok(event) => {
                        if let Err(e) = handler.handle(event).await {
                            warn!(pattern = %pattern, error = %e, "event handler failed (core subscription, no redelivery)");
                        }
                    }
                    Err(e) => warn!(pattern = %pattern, error = %e, "failed to decode event, skipping"),
                }
            }
        });

        self.track(task).await;
        Ok(())
    }

    async fn subscribe_event_durable(
        &self,
        pattern: &str,
        durable_name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        let stream = self.jetstream.get_stream(streams::EVENTS_STREAM).await?;
        let consumer_config = PullConfig {
            durable_name: Some(durable_name.to_string()),
            filter_subject: pattern.to_string(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };
        let consumer = stream.get_or_create_consumer(durable_name, consumer_config).await?;
        let cancellation = self.cancellation.clone();
        let pattern = pattern.to_string();

        let task = tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "failed to start durable consumer stream");
                    return;
                }
            };
            loop {
                let next = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    next = messages.next() => next,
                };
                let Some(Ok(message)) = next else { break };
                let content_type = message
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(codec::CONTENT_TYPE_HEADER))
                    .map(|v| v.to_string());

                match decode::<Event>(&message.payload, content_type.as_deref()) {
                    Ok(event) => match handler.handle(event).await {
                        Ok(()) => {
                            let _ = message.ack().await;
                        }
                        Err(e) => {
                            warn!(durable = %durable_name, error = %e, "event handler failed, nak for redelivery");
                            let _ = message.ack_with(AckKind::Nak(None)).await;
                        }
                    },
                    Err(e) => {
                        warn!(durable = %durable_name, error = %e, "failed to decode durable event, terminating delivery");
                        let _ = message.ack_with(AckKind::Term).await;
                    }
                }
            }
        });

        self.track(task).await;
        Ok(())
    }

    /// Publishes to `events.<domain>.<event_type>` via JetStream, retrying
    /// transient transport errors up to 3 times before raising
    /// `PublishFailed` (spec §4.1).
    #[instrument(skip(self, event), fields(subject = %event.subject()))]
    pub async fn publish_event(&self, event: &Event) -> Result<(), BusError> {
        let subject = event.subject();
        let (payload, _content_type) = encode(event, self.use_msgpack)?;

        let mut last_error = None;
        for attempt in 1..=3u8 {
            match self.jetstream.publish(subject.clone(), payload.clone().into()).await {
                Ok(ack) => match ack.await {
                    Ok(_) => return Ok(()),
                    Err(e) => {
                        warn!(attempt, error = %e, "jetstream publish ack failed, retrying");
                        last_error = Some(e.to_string());
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "jetstream publish failed, retrying");
                    last_error = Some(e.to_string());
                }
            }
        }
        Err(BusError::PublishFailed(
            last_error.unwrap_or_else(|| "exhausted retries".to_string()),
        ))
    }

    // ---- Commands ----------------------------------------------------------

    /// Registers a durable JetStream consumer `<service>-<command>` on
    /// `commands.<service>.<command>`. Results publish to the command's
    /// callback subject; acks mirror the event durable path.
    pub async fn register_command_handler(
        &self,
        service: &ServiceName,
        command: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), BusError> {
        let subject = subjects::command_subject(service, command);
        let durable_name = format!("{service}-{command}");
        let stream = self.jetstream.get_stream(streams::COMMANDS_STREAM).await?;
        let consumer_config = PullConfig {
            durable_name: Some(durable_name.clone()),
            filter_subject: subject,
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };
        let consumer = stream.get_or_create_consumer(&durable_name, consumer_config).await?;

        let client = self.pool.select()?.clone();
        let use_msgpack = self.use_msgpack;
        let cancellation = self.cancellation.clone();

        let task = tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(durable = %durable_name, error = %e, "failed to start command consumer stream");
                    return;
                }
            };
            loop {
                let next = tokio::select! {
                    _ = cancellation.cancelled() => break,
                    next = messages.next() => next,
                };
                let Some(Ok(message)) = next else { break };
                let content_type = message
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(codec::CONTENT_TYPE_HEADER))
                    .map(|v| v.to_string());

                let decoded: Result<Command, _> = decode(&message.payload, content_type.as_deref());
                let Ok(command) = decoded else {
                    let _ = message.ack_with(AckKind::Term).await;
                    continue;
                };

                let command_id = command.command_id.clone();
                let callback_subject = subjects::command_callback_subject(&command_id);
                match handler.handle(command).await {
                    Ok(result) => {
                        let _ = message.ack().await;
                        if let Ok((bytes, content_type)) = encode(&RPCResponse::ok(command_id, result), use_msgpack) {
                            let mut headers = HeaderMap::new();
                            headers.insert(codec::CONTENT_TYPE_HEADER, content_type);
                            let _ = client.publish_with_headers(callback_subject, headers, bytes.into()).await;
                        }
                    }
                    Err(e) => {
                        let _ = message.ack_with(AckKind::Nak(None)).await;
                        if let Ok((bytes, content_type)) = encode(&RPCResponse::err(command_id, e.to_string()), use_msgpack) {
                            let mut headers = HeaderMap::new();
                            headers.insert(codec::CONTENT_TYPE_HEADER, content_type);
                            let _ = client.publish_with_headers(callback_subject, headers, bytes.into()).await;
                        }
                    }
                }
            }
        });

        self.track(task).await;
        Ok(())
    }

    /// Sends `command`, optionally forwarding progress updates received on
    /// `commands.progress.<command_id>` to `progress_sink`, and returns the
    /// payload published on `commands.callback.<command_id>` once the
    /// command's `timeout` elapses or a callback arrives.
    pub async fn send_command(
        &self,
        command: &Command,
        progress_sink: Option<tokio::sync::mpsc::Sender<serde_json::Value>>,
    ) -> Result<RPCResponse, BusError> {
        let subject = subjects::command_subject(&command.target, &command.command);
        let callback_subject = subjects::command_callback_subject(&command.command_id);
        let progress_subject = subjects::command_progress_subject(&command.command_id);

        let client = self.pool.select()?.clone();
        let mut callback_sub = client.subscribe(callback_subject).await?;
        let mut progress_sub = if progress_sink.is_some() {
            Some(client.subscribe(progress_subject).await?)
        } else {
            None
        };

        let (payload, content_type) = encode(command, self.use_msgpack)?;
        let mut headers = HeaderMap::new();
        headers.insert(codec::CONTENT_TYPE_HEADER, content_type);
        self.jetstream
            .publish_with_headers(subject, headers, payload.into())
            .await?
            .await
            .map_err(|e| BusError::PublishFailed(e.to_string()))?;

        let timeout = command.timeout.as_std();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(BusError::Timeout(command.timeout));
            }

            tokio::select! {
                callback = tokio::time::timeout(remaining, callback_sub.next()) => {
                    match callback {
                        Ok(Some(message)) => {
                            let content_type = message.headers.as_ref().and_then(|h| h.get(codec::CONTENT_TYPE_HEADER)).map(|v| v.to_string());
                            return decode(&message.payload, content_type.as_deref());
                        }
                        Ok(None) => return Err(BusError::Transport("callback subscription closed".to_string())),
                        Err(_) => return Err(BusError::Timeout(command.timeout)),
                    }
                }
                progress = async {
                    match progress_sub.as_mut() {
                        Some(sub) => sub.next().await,
                        None => std::future::pending().await,
                    }
                }, if progress_sub.is_some() => {
                    if let Some(message) = progress {
                        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&message.payload) {
                            if let Some(sink) = &progress_sink {
                                let _ = sink.send(value).await;
                            }
                        }
                    }
                }
            }
        }
    }

    // ---- Heartbeat -----------------------------------------------------

    /// Publishes `internal.heartbeat.<service>` with the instance id, a
    /// timestamp, and an optional metrics snapshot (spec §4.1).
    pub async fn send_heartbeat(
        &self,
        service: &ServiceName,
        instance: &InstanceId,
        metrics_snapshot: HashMap<String, f64>,
    ) -> Result<(), BusError> {
        let subject = subjects::internal_heartbeat_subject(service);
        let payload = serde_json::json!({
            "instance_id": instance.as_str(),
            "timestamp": chrono::Utc::now(),
            "metrics": metrics_snapshot,
        });
        let client = self.pool.select()?.clone();
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| BusError::Validation(format!("heartbeat encode failed: {e}")))?;
        client.publish(subject, bytes.into()).await?;
        Ok(())
    }
}
