//! Renderlink: client core for driving a renderer over RPC
//!
//! A plugin talks to a renderer process that owns every scene object. This
//! crate holds the pieces every generated proxy method relies on:
//!
//! - [`RemoteHandle`]: the `{type, handle}` token identifying a renderer-side
//!   object.
//! - [`CallbackTable`] / [`CallbackRegistry`]: where client callbacks are
//!   registered under small integer ids that the renderer echoes back in its
//!   events.
//! - [`RpcInvoker`]: blocking unary calls, with failures split into
//!   validation errors (the renderer rejected the arguments) and transport
//!   errors (the call never completed).
//! - [`EventStreamClient`]: the single long-lived event stream, read by a
//!   dedicated thread that dispatches each event to its callback in order.
//!
//! The transport itself is abstract ([`UnaryTransport`], [`EventSource`]);
//! the `renderlink-grpc` crate provides the gRPC implementation.
//!
//! # Ordering contract
//!
//! Register a callback *before* sending the request that may trigger it. The
//! renderer assumes the id is live as soon as it sees it, and an event for an
//! id that is not (or no longer) registered is silently dropped.

mod callback;
mod config;
mod error;
mod event;
mod handle;
mod invoker;
mod registry;
mod stream;

#[doc(hidden)]
pub mod wire;

pub use callback::{CallbackId, CallbackTable, Registration};
pub use config::ClientConfig;
pub use error::{CallFailure, RpcError, StatusCode, StreamError};
pub use event::{EventEnvelope, RenderImage};
pub use handle::{ObjectType, RemoteHandle};
pub use invoker::{CallOptions, MethodId, RpcInvoker, UnaryTransport, WireMessage};
pub use registry::{
    CallbackRegistry, CheckboxCallback, ConnectionLostCallback, Dispatch, HandleCallback,
    NewImageCallback, NotifyCallback, TextCallback,
};
pub use stream::{
    CloseReason, EventSource, EventStream, EventStreamClient, READER_THREAD_NAME, StreamState,
};
