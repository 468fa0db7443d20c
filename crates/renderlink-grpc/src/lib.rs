//! Renderlink over gRPC
//!
//! The gRPC transport for the `renderlink` core, plus a stub renderer that
//! serves the same contract.
//!
//! # Architecture
//!
//! A plugin opens one [`Session`] per renderer. All API calls go through the
//! generic `Invoke` unary RPC; all notifications arrive on the single
//! `StreamEvents` server stream, read by the session's event thread.
//!
//! ```text
//! Plugin                                       Renderer
//! │                                               │
//! │  register callback -> id 7                    │
//! │  Invoke{ApiRenderEngine/setOnNewImage, id 7}  │
//! │ ─────────────────────────────────────────────>│
//! │                                 InvokeResponse│
//! │<───────────────────────────────────────────── │
//! │                                               │
//! │             EventEnvelope{NewImage, id 7}     │
//! │<═════════════════════════════════════════════ │  (StreamEvents)
//! │  reader thread: lookup 7, run callback        │
//! ```

pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("renderlink.v1");
}

mod server;
mod session;
mod transport;

pub use server::{StubRenderer, StubServer, methods};
pub use session::Session;
pub use transport::{
    GrpcTransport, event_from_proto, event_to_proto, handle_from_proto, handle_to_proto,
    status_code,
};

// Re-export proto types for convenience
pub use proto::{
    EventEnvelope as ProtoEventEnvelope, ObjectRef, renderer_client::RendererClient,
    renderer_server::RendererServer,
};
