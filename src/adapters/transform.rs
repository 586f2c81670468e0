//! Byte-mapping filter resource.

use crate::error::{NetloomError, Result};
use crate::stream::{Resource, StreamRef};
use std::fmt;

/// Preset transform names accepted by [`Transform::preset`].
pub const PRESETS: &[&str] = &["upper", "lower", "plus-one", "identity"];

type MapFn = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

/// Filter that rewrites every buffer it is handed and passes the result on.
///
/// Attach it to another stream with
/// [`StreamRef::add_filter_upstream`]/[`StreamRef::add_filter_downstream`].
pub struct Transform {
    name: String,
    map: MapFn,
}

impl Transform {
    pub fn new(name: impl Into<String>, map: impl FnMut(&[u8]) -> Vec<u8> + 'static) -> Self {
        Self {
            name: name.into(),
            map: Box::new(map),
        }
    }

    /// Build one of the named [`PRESETS`].
    pub fn preset(name: &str) -> Result<Self> {
        let transform = match name {
            "upper" => Self::new(name, |buf| buf.to_ascii_uppercase()),
            "lower" => Self::new(name, |buf| buf.to_ascii_lowercase()),
            "plus-one" => Self::new(name, |buf| buf.iter().map(|b| b.wrapping_add(1)).collect()),
            "identity" => Self::new(name, |buf| buf.to_vec()),
            _ => return Err(NetloomError::UnknownTransform(name.to_string())),
        };
        Ok(transform)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

impl Resource for Transform {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&mut self, stream: &StreamRef, buf: &[u8]) -> usize {
        let out = (self.map)(buf);
        stream.data(&out);
        buf.len()
    }
}
