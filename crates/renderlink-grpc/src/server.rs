//! A stub renderer implementing the server side of the contract.
//!
//! It knows nothing about scenes or rendering. It hands out object handles,
//! answers a few diagnostic methods and re-broadcasts events that clients ask
//! it to emit, which is enough to exercise a plugin's proxy and callback
//! plumbing without a real renderer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use renderlink::ObjectType;

use crate::proto::{self, InvokeRequest, InvokeResponse, ObjectRef, StreamEventsRequest};

/// Capacity of the event fan-out channel.
const EVENT_BUFFER: usize = 256;

/// Method names understood by the stub.
pub mod methods {
    /// Returns the payload unchanged.
    pub const ECHO: &str = "stub/echo";
    /// Payload: type code as 4 little-endian bytes. Returns an `ObjectRef`.
    pub const CREATE: &str = "stub/create";
    /// Payload: `ObjectRef`. Frees the object.
    pub const DESTROY: &str = "stub/destroy";
    /// Payload: `ObjectRef`. Returns the object's name as UTF-8.
    pub const DESCRIBE: &str = "stub/describe";
    /// Payload: `EventEnvelope`. Broadcasts it on every open event stream.
    pub const EMIT: &str = "stub/emit";
    /// Payload: milliseconds as 8 little-endian bytes. Sleeps, then returns.
    pub const SLEEP: &str = "stub/sleep";
    /// Ends every open event stream.
    pub const CLOSE_STREAMS: &str = "stub/close_streams";
}

#[derive(Clone, Debug)]
enum Signal {
    Event(proto::EventEnvelope),
    Close,
}

#[derive(Debug)]
struct StubObject {
    object_type: ObjectType,
    name: String,
}

#[derive(Debug)]
struct StubState {
    objects: Mutex<HashMap<u64, StubObject>>,
    next_handle: AtomicU64,
    signals: broadcast::Sender<Signal>,
}

/// The stub `Renderer` service.
#[derive(Clone, Debug)]
pub struct StubRenderer {
    state: Arc<StubState>,
}

impl StubRenderer {
    /// Create a stub with no objects.
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Arc::new(StubState {
                objects: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                signals,
            }),
        }
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.state.objects.lock().len()
    }

    fn create(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        let code: [u8; 4] = payload
            .try_into()
            .map_err(|_| Status::invalid_argument("expected a 4 byte type code"))?;
        let object_type = ObjectType::from_code(u32::from_le_bytes(code));
        let handle = self.state.next_handle.fetch_add(1, Ordering::Relaxed);
        let name = format!("{object_type} {handle}");

        tracing::debug!(%object_type, handle, "created object");
        self.state
            .objects
            .lock()
            .insert(handle, StubObject { object_type, name });

        Ok(ObjectRef {
            r#type: object_type.code(),
            handle,
        }
        .encode_to_vec())
    }

    fn destroy(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        let object = decode_ref(payload)?;
        let mut objects = self.state.objects.lock();
        check_ref(&objects, &object)?;
        objects.remove(&object.handle);
        tracing::debug!(handle = object.handle, "destroyed object");
        Ok(Vec::new())
    }

    fn describe(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        let object = decode_ref(payload)?;
        let objects = self.state.objects.lock();
        let stored = check_ref(&objects, &object)?;
        Ok(stored.name.clone().into_bytes())
    }

    fn emit(&self, payload: &[u8]) -> Result<Vec<u8>, Status> {
        let envelope = proto::EventEnvelope::decode(payload)
            .map_err(|e| Status::invalid_argument(format!("bad event envelope: {e}")))?;
        self.state
            .signals
            .send(Signal::Event(envelope))
            .map_err(|_| Status::failed_precondition("no event stream is open"))?;
        Ok(Vec::new())
    }

    async fn sleep(payload: &[u8]) -> Result<Vec<u8>, Status> {
        let millis: [u8; 8] = payload
            .try_into()
            .map_err(|_| Status::invalid_argument("expected 8 bytes of milliseconds"))?;
        tokio::time::sleep(Duration::from_millis(u64::from_le_bytes(millis))).await;
        Ok(Vec::new())
    }

    fn close_streams(&self) -> Vec<u8> {
        let closed = self.state.signals.send(Signal::Close).unwrap_or(0);
        tracing::info!(closed, "closing event streams");
        Vec::new()
    }
}

impl Default for StubRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_ref(payload: &[u8]) -> Result<ObjectRef, Status> {
    ObjectRef::decode(payload)
        .map_err(|e| Status::invalid_argument(format!("bad object reference: {e}")))
}

fn check_ref<'a>(
    objects: &'a HashMap<u64, StubObject>,
    object: &ObjectRef,
) -> Result<&'a StubObject, Status> {
    if object.handle == 0 {
        return Err(Status::invalid_argument("null handle"));
    }
    let stored = objects
        .get(&object.handle)
        .ok_or_else(|| Status::not_found(format!("no object with handle {}", object.handle)))?;
    if stored.object_type.code() != object.r#type {
        return Err(Status::invalid_argument(format!(
            "handle {} is a {}, not type {}",
            object.handle, stored.object_type, object.r#type
        )));
    }
    Ok(stored)
}

type EventStream = Pin<Box<dyn Stream<Item = Result<proto::EventEnvelope, Status>> + Send>>;

#[tonic::async_trait]
impl proto::renderer_server::Renderer for StubRenderer {
    type StreamEventsStream = EventStream;

    async fn invoke(
        &self,
        request: Request<InvokeRequest>,
    ) -> Result<Response<InvokeResponse>, Status> {
        let InvokeRequest { method, payload } = request.into_inner();
        tracing::trace!(%method, bytes = payload.len(), "invoke");

        let payload = match method.as_str() {
            methods::ECHO => payload,
            methods::CREATE => self.create(&payload)?,
            methods::DESTROY => self.destroy(&payload)?,
            methods::DESCRIBE => self.describe(&payload)?,
            methods::EMIT => self.emit(&payload)?,
            methods::SLEEP => Self::sleep(&payload).await?,
            methods::CLOSE_STREAMS => self.close_streams(),
            other => {
                return Err(Status::unimplemented(format!("unknown method {other}")));
            }
        };

        Ok(Response::new(InvokeResponse { payload }))
    }

    async fn stream_events(
        &self,
        request: Request<StreamEventsRequest>,
    ) -> Result<Response<Self::StreamEventsStream>, Status> {
        let client_name = request.into_inner().client_name;
        tracing::info!(%client_name, "event stream opened");

        // Subscribe before answering so that events emitted once the client
        // sees the response are not missed.
        let signals = BroadcastStream::new(self.state.signals.subscribe());
        let stream = signals
            .take_while(|signal| !matches!(signal, Ok(Signal::Close)))
            .filter_map(move |signal| match signal {
                Ok(Signal::Event(envelope)) => Some(Ok(envelope)),
                Ok(Signal::Close) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, skipping forward");
                    None
                }
            });

        Ok(Response::new(Box::pin(stream) as EventStream))
    }
}

/// Server configuration and runner.
#[derive(Debug)]
pub struct StubServer {
    addr: std::net::SocketAddr,
}

impl StubServer {
    /// Create a new server bound to the given address.
    pub fn new(addr: std::net::SocketAddr) -> Self {
        Self { addr }
    }

    /// Run the server until shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let service = StubRenderer::new();

        tracing::info!("Starting stub renderer on {}", self.addr);

        tonic::transport::Server::builder()
            .add_service(proto::renderer_server::RendererServer::new(service))
            .serve_with_shutdown(self.addr, shutdown_signal())
            .await
            .with_context(|| format!("stub renderer failed on {}", self.addr))?;

        tracing::info!("Stub renderer shut down");
        Ok(())
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {
                        tracing::info!("Ctrl-C received, stopping stub renderer");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("SIGTERM received, stopping stub renderer");
                    }
                }
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "no SIGTERM handler, only Ctrl-C stops the stub");
            }
        }
    }

    ctrl_c().await;
    tracing::info!("Ctrl-C received, stopping stub renderer");
}

/// Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "no Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::renderer_server::Renderer;

    fn invoke_request(method: &str, payload: Vec<u8>) -> Request<InvokeRequest> {
        Request::new(InvokeRequest {
            method: method.to_string(),
            payload,
        })
    }

    #[tokio::test]
    async fn shutdown_signal_waits_for_a_signal() {
        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown_signal()).await;
        assert!(waited.is_err(), "resolved without any signal");
    }

    #[tokio::test]
    async fn create_describe_destroy() {
        let stub = StubRenderer::new();
        let created = stub
            .invoke(invoke_request(
                methods::CREATE,
                ObjectType::Node.code().to_le_bytes().to_vec(),
            ))
            .await
            .unwrap()
            .into_inner()
            .payload;
        let object = ObjectRef::decode(created.as_slice()).unwrap();
        assert_eq!(object.r#type, ObjectType::Node.code());
        assert_eq!(stub.object_count(), 1);

        let name = stub
            .invoke(invoke_request(methods::DESCRIBE, object.encode_to_vec()))
            .await
            .unwrap()
            .into_inner()
            .payload;
        assert_eq!(String::from_utf8(name).unwrap(), format!("node {}", object.handle));

        stub.invoke(invoke_request(methods::DESTROY, object.encode_to_vec()))
            .await
            .unwrap();
        assert_eq!(stub.object_count(), 0);

        let stale = stub
            .invoke(invoke_request(methods::DESCRIBE, object.encode_to_vec()))
            .await
            .unwrap_err();
        assert_eq!(stale.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn wrong_type_is_rejected() {
        let stub = StubRenderer::new();
        let created = stub
            .invoke(invoke_request(
                methods::CREATE,
                ObjectType::Window.code().to_le_bytes().to_vec(),
            ))
            .await
            .unwrap()
            .into_inner()
            .payload;
        let mut object = ObjectRef::decode(created.as_slice()).unwrap();
        object.r#type = ObjectType::Table.code();

        let err = stub
            .invoke(invoke_request(methods::DESCRIBE, object.encode_to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn emit_without_streams_fails_precondition() {
        let stub = StubRenderer::new();
        let envelope = proto::EventEnvelope { event: None };
        let err = stub
            .invoke(invoke_request(methods::EMIT, envelope.encode_to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn unknown_methods_are_unimplemented() {
        let stub = StubRenderer::new();
        let err = stub
            .invoke(invoke_request("ApiNode/frobnicate", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn stream_receives_emitted_events_until_closed() {
        let stub = StubRenderer::new();
        let mut stream = stub
            .stream_events(Request::new(StreamEventsRequest {
                client_name: "test".into(),
            }))
            .await
            .unwrap()
            .into_inner();

        for callback_id in [2, 1] {
            let envelope = proto::EventEnvelope {
                event: Some(proto::event_envelope::Event::ButtonClicked(
                    proto::ButtonClicked {
                        callback_id,
                        component: None,
                    },
                )),
            };
            stub.invoke(invoke_request(methods::EMIT, envelope.encode_to_vec()))
                .await
                .unwrap();
        }
        stub.invoke(invoke_request(methods::CLOSE_STREAMS, vec![]))
            .await
            .unwrap();

        let mut ids = Vec::new();
        while let Some(item) = stream.next().await {
            match item.unwrap().event {
                Some(proto::event_envelope::Event::ButtonClicked(click)) => {
                    ids.push(click.callback_id)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(ids, vec![2, 1]);
    }
}
