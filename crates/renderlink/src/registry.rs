//! The set of callback tables a connection dispatches events into.

use std::fmt;
use std::sync::Arc;

use crate::callback::CallbackTable;
use crate::event::{EventEnvelope, RenderImage};
use crate::handle::RemoteHandle;
use crate::stream::CloseReason;

/// Called with the images of a new render result.
pub type NewImageCallback = dyn Fn(&[RenderImage]) + Send + Sync;
/// Render notification without payload.
pub type NotifyCallback = dyn Fn() + Send + Sync;
/// Called with the handle of the object the event is about.
pub type HandleCallback = dyn Fn(RemoteHandle) + Send + Sync;
/// Called when a checkbox is toggled.
pub type CheckboxCallback = dyn Fn(RemoteHandle, bool) + Send + Sync;
/// Called when the text of a text editor changes.
pub type TextCallback = dyn Fn(RemoteHandle, &str) + Send + Sync;
/// Called once when the event stream ends without being shut down.
pub type ConnectionLostCallback = dyn Fn(&CloseReason) + Send + Sync;

/// Outcome of dispatching one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A callback ran.
    Delivered,
    /// No callback was registered under the event's id; the event was
    /// discarded.
    Dropped,
}

/// One callback table per event signature.
///
/// A registry is constructed explicitly and shared (`Arc`) between the code
/// issuing requests and the event reader, so independent connections never
/// see each other's callbacks.
pub struct CallbackRegistry {
    /// [`EventEnvelope::NewImage`] callbacks.
    pub new_image: Arc<CallbackTable<NewImageCallback>>,
    /// [`EventEnvelope::RenderFailure`] callbacks.
    pub render_failure: Arc<CallbackTable<NotifyCallback>>,
    /// [`EventEnvelope::NewStatistics`] callbacks.
    pub new_statistics: Arc<CallbackTable<NotifyCallback>>,
    /// [`EventEnvelope::TileBlended`] callbacks.
    pub tile_blended: Arc<CallbackTable<NotifyCallback>>,
    /// [`EventEnvelope::ProjectChanged`] callbacks.
    pub project_changed: Arc<CallbackTable<NotifyCallback>>,
    /// [`EventEnvelope::NodeEvaluated`] callbacks.
    pub node_evaluated: Arc<CallbackTable<HandleCallback>>,
    /// [`EventEnvelope::ButtonClicked`] callbacks.
    pub button_clicked: Arc<CallbackTable<HandleCallback>>,
    /// [`EventEnvelope::CheckboxChanged`] callbacks.
    pub checkbox_changed: Arc<CallbackTable<CheckboxCallback>>,
    /// [`EventEnvelope::TextChanged`] callbacks.
    pub text_changed: Arc<CallbackTable<TextCallback>>,
    /// Local notification when the event stream is lost. Never targeted by
    /// the renderer.
    pub connection_lost: Arc<CallbackTable<ConnectionLostCallback>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.registered())
            .finish_non_exhaustive()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    /// Create a registry with empty tables.
    pub fn new() -> Self {
        Self {
            new_image: Arc::new(CallbackTable::new("new_image")),
            render_failure: Arc::new(CallbackTable::new("render_failure")),
            new_statistics: Arc::new(CallbackTable::new("new_statistics")),
            tile_blended: Arc::new(CallbackTable::new("tile_blended")),
            project_changed: Arc::new(CallbackTable::new("project_changed")),
            node_evaluated: Arc::new(CallbackTable::new("node_evaluated")),
            button_clicked: Arc::new(CallbackTable::new("button_clicked")),
            checkbox_changed: Arc::new(CallbackTable::new("checkbox_changed")),
            text_changed: Arc::new(CallbackTable::new("text_changed")),
            connection_lost: Arc::new(CallbackTable::new("connection_lost")),
        }
    }

    /// Route `event` to the callback it targets and run it on this thread.
    pub fn dispatch(&self, event: &EventEnvelope) -> Dispatch {
        let delivered = match event {
            EventEnvelope::NewImage {
                callback_id,
                images,
            } => self
                .new_image
                .invoke(*callback_id, |f| f(images.as_slice())),
            EventEnvelope::RenderFailure { callback_id } => {
                self.render_failure.invoke(*callback_id, |f| f())
            }
            EventEnvelope::NewStatistics { callback_id } => {
                self.new_statistics.invoke(*callback_id, |f| f())
            }
            EventEnvelope::TileBlended { callback_id } => {
                self.tile_blended.invoke(*callback_id, |f| f())
            }
            EventEnvelope::ProjectChanged { callback_id } => {
                self.project_changed.invoke(*callback_id, |f| f())
            }
            EventEnvelope::NodeEvaluated { callback_id, node } => {
                self.node_evaluated.invoke(*callback_id, |f| f(*node))
            }
            EventEnvelope::ButtonClicked {
                callback_id,
                component,
            } => self.button_clicked.invoke(*callback_id, |f| f(*component)),
            EventEnvelope::CheckboxChanged {
                callback_id,
                component,
                checked,
            } => self
                .checkbox_changed
                .invoke(*callback_id, |f| f(*component, *checked)),
            EventEnvelope::TextChanged {
                callback_id,
                component,
                text,
            } => self
                .text_changed
                .invoke(*callback_id, |f| f(*component, text.as_str())),
        };

        match delivered {
            Some(()) => Dispatch::Delivered,
            None => Dispatch::Dropped,
        }
    }

    /// Tell every connection-lost listener that the stream ended.
    pub(crate) fn notify_connection_lost(&self, reason: &CloseReason) {
        // Snapshot first: listeners may unregister themselves.
        let listeners: Vec<_> = self.connection_lost.snapshot();
        for listener in listeners {
            listener(reason);
        }
    }

    /// Total number of live registrations across all tables.
    pub fn registered(&self) -> usize {
        self.new_image.len()
            + self.render_failure.len()
            + self.new_statistics.len()
            + self.tile_blended.len()
            + self.project_changed.len()
            + self.node_evaluated.len()
            + self.button_clicked.len()
            + self.checkbox_changed.len()
            + self.text_changed.len()
            + self.connection_lost.len()
    }
}
