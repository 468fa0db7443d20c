//! Opaque references to objects living in the renderer process.
//!
//! A [`RemoteHandle`] is only a token: the client never dereferences it, it
//! only copies, compares and sends it back over the wire. The renderer owns
//! the object; once the object is destroyed, the renderer answers further
//! calls on the stale handle with an error instead of crashing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Family of a renderer-side object.
///
/// Unknown wire codes are preserved in [`ObjectType::Other`] so a newer
/// renderer can hand out types this client does not know about yet.
///
/// Equality and hashing go by wire code, so `Other(2)` equals `Node`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ObjectType {
    /// Generic scene item.
    Item,
    /// Node in a node graph.
    Node,
    /// Node graph.
    NodeGraph,
    /// The project's root node graph.
    RootNodeGraph,
    /// Input pin of a node.
    Pin,
    /// The render engine singleton.
    RenderEngine,
    /// Image buffer owned by the renderer.
    ImageBuffer,
    /// GUI component (button, checkbox, text editor, ...).
    GuiComponent,
    /// Top level window.
    Window,
    /// Table widget.
    Table,
    /// Type code not known to this client.
    Other(u32),
}

impl ObjectType {
    /// Wire code of this type.
    pub const fn code(self) -> u32 {
        match self {
            Self::Item => 1,
            Self::Node => 2,
            Self::NodeGraph => 3,
            Self::RootNodeGraph => 4,
            Self::Pin => 5,
            Self::RenderEngine => 6,
            Self::ImageBuffer => 7,
            Self::GuiComponent => 8,
            Self::Window => 9,
            Self::Table => 10,
            Self::Other(code) => code,
        }
    }

    /// Decode a wire code.
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Item,
            2 => Self::Node,
            3 => Self::NodeGraph,
            4 => Self::RootNodeGraph,
            5 => Self::Pin,
            6 => Self::RenderEngine,
            7 => Self::ImageBuffer,
            8 => Self::GuiComponent,
            9 => Self::Window,
            10 => Self::Table,
            other => Self::Other(other),
        }
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for ObjectType {}

impl std::hash::Hash for ObjectType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item => f.write_str("item"),
            Self::Node => f.write_str("node"),
            Self::NodeGraph => f.write_str("node-graph"),
            Self::RootNodeGraph => f.write_str("root-node-graph"),
            Self::Pin => f.write_str("pin"),
            Self::RenderEngine => f.write_str("render-engine"),
            Self::ImageBuffer => f.write_str("image-buffer"),
            Self::GuiComponent => f.write_str("gui-component"),
            Self::Window => f.write_str("window"),
            Self::Table => f.write_str("table"),
            Self::Other(code) => write!(f, "type-{code}"),
        }
    }
}

/// Identity of one object in the renderer process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteHandle {
    object_type: ObjectType,
    handle: u64,
}

impl RemoteHandle {
    /// The untyped "no object" handle.
    pub const NULL: RemoteHandle = RemoteHandle {
        object_type: ObjectType::Other(0),
        handle: 0,
    };

    /// Wrap a type and raw handle value.
    ///
    /// `Other` codes that name a known type are stored as that type.
    pub const fn new(object_type: ObjectType, handle: u64) -> Self {
        Self {
            object_type: ObjectType::from_code(object_type.code()),
            handle,
        }
    }

    /// Null handle of the given type.
    pub const fn null(object_type: ObjectType) -> Self {
        Self::new(object_type, 0)
    }

    /// True iff this handle refers to no object.
    pub const fn is_null(&self) -> bool {
        self.handle == 0
    }

    /// Object family.
    pub const fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Raw handle value as issued by the renderer.
    pub const fn raw(&self) -> u64 {
        self.handle
    }

    /// Reject a handle of the wrong family before it is sent anywhere.
    ///
    /// Null handles are accepted for any type, since "no object" is a valid
    /// argument for many calls.
    pub fn expect_type(self, expected: ObjectType) -> Result<Self, RpcError> {
        if self.is_null() || self.object_type == expected {
            Ok(self)
        } else {
            Err(RpcError::validation(format!(
                "expected a {expected} handle, got {self}"
            )))
        }
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_type, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handles() {
        assert!(RemoteHandle::NULL.is_null());
        assert!(RemoteHandle::null(ObjectType::Node).is_null());
        assert!(!RemoteHandle::new(ObjectType::Node, 7).is_null());
    }

    #[test]
    fn equality_is_structural() {
        let a = RemoteHandle::new(ObjectType::Node, 42);
        let b = RemoteHandle::new(ObjectType::Node, 42);
        let c = RemoteHandle::new(ObjectType::Pin, 42);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, RemoteHandle::new(ObjectType::Node, 43));
    }

    #[test]
    fn known_codes_spelled_as_other_are_the_same_type() {
        assert_eq!(ObjectType::Other(2), ObjectType::Node);
        assert_ne!(ObjectType::Other(2), ObjectType::Pin);

        let spelled_out = RemoteHandle::new(ObjectType::Other(1), 9);
        let named = RemoteHandle::new(ObjectType::Item, 9);
        assert_eq!(spelled_out, named);
        assert!(matches!(spelled_out.object_type(), ObjectType::Item));
        assert_eq!(spelled_out.to_string(), "item#9");

        let mut set = std::collections::HashSet::new();
        set.insert(spelled_out);
        assert!(set.contains(&named));
    }

    #[test]
    fn type_codes_round_trip() {
        for code in 0..32 {
            assert_eq!(ObjectType::from_code(code).code(), code);
        }
        assert_eq!(ObjectType::from_code(2), ObjectType::Node);
        assert_eq!(ObjectType::from_code(999), ObjectType::Other(999));
    }

    #[test]
    fn expect_type_checks_family() {
        let node = RemoteHandle::new(ObjectType::Node, 3);
        assert_eq!(node.expect_type(ObjectType::Node).ok(), Some(node));

        let err = node.expect_type(ObjectType::Window).unwrap_err();
        assert!(err.is_validation(), "{err}");
        assert!(err.to_string().contains("node#3"), "{err}");

        assert!(
            RemoteHandle::null(ObjectType::Pin)
                .expect_type(ObjectType::Window)
                .is_ok()
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            RemoteHandle::new(ObjectType::GuiComponent, 9).to_string(),
            "gui-component#9"
        );
        assert_eq!(ObjectType::Other(77).to_string(), "type-77");
    }

    #[test]
    fn serde_round_trip() {
        let handle = RemoteHandle::new(ObjectType::ImageBuffer, 11);
        let json = serde_json::to_string(&handle).unwrap();
        let back: RemoteHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }
}
