//! A blocking connection to one renderer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tonic::transport::Endpoint;

use renderlink::{
    CallOptions, CallbackRegistry, ClientConfig, EventStreamClient, MethodId, RpcError,
    RpcInvoker, StatusCode, StreamError, WireMessage,
};

use crate::transport::GrpcTransport;

/// One connection to a renderer.
///
/// The session owns the tokio runtime driving the channel, so every method
/// here blocks the calling thread and must not be called from inside another
/// tokio runtime.
///
/// It also owns the connection's single event stream. The stream is opened
/// by the first call to [`Session::events`] and closed by
/// [`Session::shutdown`] or when the session is dropped.
pub struct Session {
    config: ClientConfig,
    transport: Arc<GrpcTransport>,
    invoker: RpcInvoker,
    callbacks: Arc<CallbackRegistry>,
    events: Mutex<Option<Arc<EventStreamClient>>>,
    // Declared last so it is dropped after everything using it.
    runtime: Runtime,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to the renderer described by `config`.
    pub fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("renderlink-rt")
            .enable_all()
            .build()
            .map_err(|e| {
                RpcError::transport(StatusCode::Internal, format!("failed to start runtime: {e}"))
            })?;

        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| {
                RpcError::validation(format!("invalid endpoint {}: {e}", config.endpoint))
            })?
            .connect_timeout(config.connect_timeout);

        tracing::debug!(endpoint = %config.endpoint, "connecting to renderer");
        let channel = runtime.block_on(endpoint.connect()).map_err(|e| {
            RpcError::transport(
                StatusCode::Unavailable,
                format!("failed to connect to {}: {e}", config.endpoint),
            )
        })?;
        tracing::info!(endpoint = %config.endpoint, "connected to renderer");

        let transport = Arc::new(GrpcTransport::new(
            channel,
            runtime.handle().clone(),
            config.client_name.clone(),
        ));
        let invoker = RpcInvoker::new(transport.clone())
            .with_default_deadline(config.default_deadline);

        Ok(Self {
            config,
            transport,
            invoker,
            callbacks: Arc::new(CallbackRegistry::new()),
            events: Mutex::new(None),
            runtime,
        })
    }

    /// The callback tables events are dispatched into.
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// The unary call path.
    pub fn invoker(&self) -> &RpcInvoker {
        &self.invoker
    }

    /// Issue a raw unary call.
    pub fn invoke(
        &self,
        method: &MethodId,
        payload: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, RpcError> {
        self.invoker.invoke_raw(method, payload, options)
    }

    /// Issue a typed unary call.
    pub fn call<Req, Resp>(
        &self,
        method: &MethodId,
        request: &Req,
        options: CallOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        self.invoker.invoke(method, request, options)
    }

    /// The connection's event stream, opened on first use.
    ///
    /// Later calls return the same client, whatever its state. A stream that
    /// was lost is not reopened; reconnecting means opening a new session.
    pub fn events(&self) -> Result<Arc<EventStreamClient>, StreamError> {
        let mut events = self.events.lock();
        if let Some(client) = events.as_ref() {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(EventStreamClient::new(
            self.transport.clone(),
            Arc::clone(&self.callbacks),
            self.runtime.handle().clone(),
        ));
        client.connect()?;
        *events = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Close the event stream, if one was opened. Idempotent.
    pub fn shutdown(&self) {
        let client = self.events.lock().clone();
        if let Some(client) = client {
            client.shutdown();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
