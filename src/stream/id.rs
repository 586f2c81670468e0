//! Identity types for the stream engine.
//!
//! Node, graph and link ids are `(index, generation)` pairs into the engine
//! arena. A slot's generation is bumped every time it is freed, so a stale id
//! is detected on lookup instead of aliasing whatever reuses the slot.

use serde::Serialize;
use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            #[inline]
            pub(crate) fn new(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            #[inline]
            pub fn index(self) -> usize {
                self.index as usize
            }

            #[inline]
            pub fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({}v{})"), self.index, self.generation)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

arena_id!(
    /// Handle to one node (pipeline stage) in the engine arena.
    StreamId,
    "StreamId"
);

arena_id!(
    /// Handle to a connected graph of streams.
    GraphId,
    "GraphId"
);

arena_id!(
    /// Handle to a budgeted link between two streams.
    LinkId,
    "LinkId"
);

/// Identifies a registered data or close observer.
///
/// Observer ids come from one engine-wide counter and are never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ObserverId(pub u64);

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_parts() {
        let id = StreamId::new(42, 3);
        assert_eq!(id.index(), 42);
        assert_eq!(id.generation(), 3);
    }

    #[test]
    fn test_generation_distinguishes_reused_slot() {
        let old = StreamId::new(7, 0);
        let reused = StreamId::new(7, 1);
        assert_ne!(old, reused);
        assert_eq!(old.index(), reused.index());
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", GraphId::new(1, 2)), "GraphId(1v2)");
        assert_eq!(format!("{}", LinkId::new(5, 0)), "LinkId(5v0)");
        assert_eq!(format!("{:?}", ObserverId(9)), "ObserverId(9)");
    }
}
