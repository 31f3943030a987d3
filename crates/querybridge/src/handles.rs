//! Type-safe handles for bridge resources.
//!
//! Call identifiers, engine values and frames are all plain integers on the
//! wire and in the engine, but they are never interchangeable. Wrapping each in
//! its own newtype means a `Handle` can't be passed where a `CallId` is
//! expected.

use std::fmt;

/// Correlates an outbound query with its eventual response.
///
/// Issued by [`crate::registry::CallRegistry::allocate`], starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl CallId {
    /// Reserved sentinel for "no call". Never issued.
    pub const NONE: CallId = CallId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque reference to a value owned by the script engine.
///
/// Only the engine knows what a handle points at. Holding a `Handle` does not
/// keep the value alive; see [`crate::engine::Retained`] for that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// Identifies a frame within a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);
