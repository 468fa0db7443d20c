//! Events delivered over the notification stream.

use serde::{Deserialize, Serialize};

use crate::callback::CallbackId;
use crate::handle::RemoteHandle;

/// One rendered image announced by a [`EventEnvelope::NewImage`] event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderImage {
    /// Render pass the image belongs to.
    pub pass_id: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Whether the image has been tonemapped.
    pub tonemapped: bool,
    /// Image buffer holding the pixels, owned by the renderer.
    pub buffer: RemoteHandle,
}

/// One message on the event stream.
///
/// Every variant carries the id of the callback it targets. The renderer
/// echoes back the id it received at registration time; the client cannot
/// recover from an id the renderer corrupted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventEnvelope {
    /// New render images are available.
    NewImage {
        /// Target callback.
        callback_id: CallbackId,
        /// The images.
        images: Vec<RenderImage>,
    },
    /// Rendering failed.
    RenderFailure {
        /// Target callback.
        callback_id: CallbackId,
    },
    /// New render statistics are available.
    NewStatistics {
        /// Target callback.
        callback_id: CallbackId,
    },
    /// A render tile was blended into the film buffer.
    TileBlended {
        /// Target callback.
        callback_id: CallbackId,
    },
    /// The current project changed (loaded, reset, saved as).
    ProjectChanged {
        /// Target callback.
        callback_id: CallbackId,
    },
    /// A scripted node was evaluated.
    NodeEvaluated {
        /// Target callback.
        callback_id: CallbackId,
        /// The evaluated node.
        node: RemoteHandle,
    },
    /// A button was clicked.
    ButtonClicked {
        /// Target callback.
        callback_id: CallbackId,
        /// The button.
        component: RemoteHandle,
    },
    /// A checkbox was toggled.
    CheckboxChanged {
        /// Target callback.
        callback_id: CallbackId,
        /// The checkbox.
        component: RemoteHandle,
        /// New state.
        checked: bool,
    },
    /// The text of a text editor changed.
    TextChanged {
        /// Target callback.
        callback_id: CallbackId,
        /// The text editor.
        component: RemoteHandle,
        /// New text.
        text: String,
    },
}

impl EventEnvelope {
    /// Id of the callback this event targets.
    pub fn callback_id(&self) -> CallbackId {
        match self {
            Self::NewImage { callback_id, .. }
            | Self::RenderFailure { callback_id }
            | Self::NewStatistics { callback_id }
            | Self::TileBlended { callback_id }
            | Self::ProjectChanged { callback_id }
            | Self::NodeEvaluated { callback_id, .. }
            | Self::ButtonClicked { callback_id, .. }
            | Self::CheckboxChanged { callback_id, .. }
            | Self::TextChanged { callback_id, .. } => *callback_id,
        }
    }

    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewImage { .. } => "new_image",
            Self::RenderFailure { .. } => "render_failure",
            Self::NewStatistics { .. } => "new_statistics",
            Self::TileBlended { .. } => "tile_blended",
            Self::ProjectChanged { .. } => "project_changed",
            Self::NodeEvaluated { .. } => "node_evaluated",
            Self::ButtonClicked { .. } => "button_clicked",
            Self::CheckboxChanged { .. } => "checkbox_changed",
            Self::TextChanged { .. } => "text_changed",
        }
    }
}
