//! The renderlink transports over a tonic channel.
//!
//! [`GrpcTransport`] implements both halves the core needs: blocking unary
//! calls ([`UnaryTransport`]) and the notification stream
//! ([`EventSource`]). It also owns the conversions between proto messages and
//! the core's types.

use async_trait::async_trait;
use futures::StreamExt;
use prost::Message;
use std::time::Duration;
use tokio::runtime::Handle;
use tonic::transport::Channel;
use tonic::{Code, Status};

use renderlink::{
    CallFailure, EventEnvelope, EventSource, EventStream, MethodId, ObjectType, RemoteHandle,
    RenderImage, RpcError, StatusCode, StreamError, UnaryTransport, WireMessage,
};
use renderlink::wire::callback_id_from_wire;

use crate::proto::{
    self, event_envelope::Event as ProtoEvent, render_notification::Kind as NotificationKind,
    renderer_client::RendererClient,
};

/// gRPC implementation of the renderlink transports.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: RendererClient<Channel>,
    runtime: Handle,
    client_name: String,
}

impl GrpcTransport {
    /// Wrap a connected channel.
    ///
    /// `runtime` must be the runtime the channel was created on; blocking
    /// calls are driven through it.
    pub fn new(channel: Channel, runtime: Handle, client_name: impl Into<String>) -> Self {
        Self {
            client: RendererClient::new(channel),
            runtime,
            client_name: client_name.into(),
        }
    }
}

impl UnaryTransport for GrpcTransport {
    fn call(
        &self,
        method: &MethodId,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, CallFailure> {
        let mut client = self.client.clone();
        let request = tonic::Request::new(proto::InvokeRequest {
            method: method.to_string(),
            payload,
        });

        // The deadline is enforced here rather than sent as grpc-timeout, so
        // an expired call always reports DeadlineExceeded.
        let call = async move { client.invoke(request).await };
        let result = match deadline {
            Some(deadline) => self
                .runtime
                .block_on(async { tokio::time::timeout(deadline, call).await })
                .map_err(|_| {
                    CallFailure::new(
                        StatusCode::DeadlineExceeded,
                        format!("{method} did not complete within {deadline:?}"),
                    )
                })?,
            None => self.runtime.block_on(call),
        };

        result
            .map(|response| response.into_inner().payload)
            .map_err(|status| failure_from_status(&status))
    }
}

#[async_trait]
impl EventSource for GrpcTransport {
    async fn open(&self) -> Result<EventStream, RpcError> {
        let mut client = self.client.clone();
        let response = client
            .stream_events(proto::StreamEventsRequest {
                client_name: self.client_name.clone(),
            })
            .await
            .map_err(|status| RpcError::from(failure_from_status(&status)))?;

        let events = response.into_inner().filter_map(|item| {
            futures::future::ready(match item {
                Ok(envelope) => match event_from_proto(envelope) {
                    Some(event) => Some(Ok(event)),
                    None => {
                        tracing::warn!("skipping malformed event envelope");
                        None
                    }
                },
                Err(status) => Some(Err(StreamError::Read(format!(
                    "{}: {}",
                    status_code(status.code()),
                    status.message()
                )))),
            })
        });
        Ok(events.boxed())
    }
}

/// Map a tonic status onto the core's status codes.
pub fn status_code(code: Code) -> StatusCode {
    match code {
        Code::Cancelled => StatusCode::Cancelled,
        Code::InvalidArgument => StatusCode::InvalidArgument,
        Code::DeadlineExceeded => StatusCode::DeadlineExceeded,
        Code::NotFound => StatusCode::NotFound,
        Code::AlreadyExists => StatusCode::AlreadyExists,
        Code::PermissionDenied => StatusCode::PermissionDenied,
        Code::ResourceExhausted => StatusCode::ResourceExhausted,
        Code::FailedPrecondition => StatusCode::FailedPrecondition,
        Code::Aborted => StatusCode::Aborted,
        Code::OutOfRange => StatusCode::OutOfRange,
        Code::Unimplemented => StatusCode::Unimplemented,
        Code::Internal => StatusCode::Internal,
        Code::Unavailable => StatusCode::Unavailable,
        Code::DataLoss => StatusCode::DataLoss,
        Code::Unauthenticated => StatusCode::Unauthenticated,
        // A failed call never carries OK.
        Code::Ok | Code::Unknown => StatusCode::Unknown,
    }
}

fn failure_from_status(status: &Status) -> CallFailure {
    CallFailure::new(status_code(status.code()), status.message())
}

// Conversions between proto messages and core types

/// Wire form of a handle.
pub fn handle_to_proto(handle: RemoteHandle) -> proto::ObjectRef {
    proto::ObjectRef {
        r#type: handle.object_type().code(),
        handle: handle.raw(),
    }
}

/// Handle from its wire form. A missing reference is the null handle.
pub fn handle_from_proto(object: Option<&proto::ObjectRef>) -> RemoteHandle {
    match object {
        Some(object) => RemoteHandle::new(ObjectType::from_code(object.r#type), object.handle),
        None => RemoteHandle::NULL,
    }
}

/// Encode an event the way the renderer sends it.
pub fn event_to_proto(event: &EventEnvelope) -> proto::EventEnvelope {
    let notification = |callback_id: u32, kind: NotificationKind| {
        ProtoEvent::Notification(proto::RenderNotification {
            callback_id,
            kind: kind.into(),
        })
    };

    let event = match event {
        EventEnvelope::NewImage {
            callback_id,
            images,
        } => ProtoEvent::NewImage(proto::NewImage {
            callback_id: callback_id.get(),
            images: images
                .iter()
                .map(|image| proto::RenderImage {
                    pass_id: image.pass_id,
                    width: image.width,
                    height: image.height,
                    tonemapped: image.tonemapped,
                    buffer: Some(handle_to_proto(image.buffer)),
                })
                .collect(),
        }),
        EventEnvelope::RenderFailure { callback_id } => {
            notification(callback_id.get(), NotificationKind::RenderFailure)
        }
        EventEnvelope::NewStatistics { callback_id } => {
            notification(callback_id.get(), NotificationKind::NewStatistics)
        }
        EventEnvelope::TileBlended { callback_id } => {
            notification(callback_id.get(), NotificationKind::TileBlended)
        }
        EventEnvelope::ProjectChanged { callback_id } => {
            notification(callback_id.get(), NotificationKind::ProjectChanged)
        }
        EventEnvelope::NodeEvaluated { callback_id, node } => {
            ProtoEvent::NodeEvaluated(proto::NodeEvaluated {
                callback_id: callback_id.get(),
                node: Some(handle_to_proto(*node)),
            })
        }
        EventEnvelope::ButtonClicked {
            callback_id,
            component,
        } => ProtoEvent::ButtonClicked(proto::ButtonClicked {
            callback_id: callback_id.get(),
            component: Some(handle_to_proto(*component)),
        }),
        EventEnvelope::CheckboxChanged {
            callback_id,
            component,
            checked,
        } => ProtoEvent::CheckboxChanged(proto::CheckboxChanged {
            callback_id: callback_id.get(),
            component: Some(handle_to_proto(*component)),
            checked: *checked,
        }),
        EventEnvelope::TextChanged {
            callback_id,
            component,
            text,
        } => ProtoEvent::TextChanged(proto::TextChanged {
            callback_id: callback_id.get(),
            component: Some(handle_to_proto(*component)),
            text: text.clone(),
        }),
        // `EventEnvelope` is `#[non_exhaustive]`; every current variant is covered above.
        _ => unreachable!("unhandled event kind {}", event.kind()),
    };

    proto::EventEnvelope { event: Some(event) }
}

/// Decode an inbound event. Returns `None` for an envelope this client
/// cannot route (empty, or an unknown notification kind).
pub fn event_from_proto(envelope: proto::EventEnvelope) -> Option<EventEnvelope> {
    let event = match envelope.event? {
        ProtoEvent::NewImage(msg) => EventEnvelope::NewImage {
            callback_id: callback_id_from_wire(msg.callback_id),
            images: msg
                .images
                .iter()
                .map(|image| RenderImage {
                    pass_id: image.pass_id,
                    width: image.width,
                    height: image.height,
                    tonemapped: image.tonemapped,
                    buffer: handle_from_proto(image.buffer.as_ref()),
                })
                .collect(),
        },
        ProtoEvent::Notification(msg) => {
            let callback_id = callback_id_from_wire(msg.callback_id);
            match NotificationKind::try_from(msg.kind).unwrap_or(NotificationKind::Unspecified) {
                NotificationKind::RenderFailure => EventEnvelope::RenderFailure { callback_id },
                NotificationKind::NewStatistics => EventEnvelope::NewStatistics { callback_id },
                NotificationKind::TileBlended => EventEnvelope::TileBlended { callback_id },
                NotificationKind::ProjectChanged => EventEnvelope::ProjectChanged { callback_id },
                NotificationKind::Unspecified => return None,
            }
        }
        ProtoEvent::NodeEvaluated(msg) => EventEnvelope::NodeEvaluated {
            callback_id: callback_id_from_wire(msg.callback_id),
            node: handle_from_proto(msg.node.as_ref()),
        },
        ProtoEvent::ButtonClicked(msg) => EventEnvelope::ButtonClicked {
            callback_id: callback_id_from_wire(msg.callback_id),
            component: handle_from_proto(msg.component.as_ref()),
        },
        ProtoEvent::CheckboxChanged(msg) => EventEnvelope::CheckboxChanged {
            callback_id: callback_id_from_wire(msg.callback_id),
            component: handle_from_proto(msg.component.as_ref()),
            checked: msg.checked,
        },
        ProtoEvent::TextChanged(msg) => EventEnvelope::TextChanged {
            callback_id: callback_id_from_wire(msg.callback_id),
            component: handle_from_proto(msg.component.as_ref()),
            text: msg.text,
        },
    };
    Some(event)
}

impl WireMessage for proto::ObjectRef {
    fn to_wire(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn from_wire(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

impl WireMessage for proto::EventEnvelope {
    fn to_wire(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    fn from_wire(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}
