//! Result buffers for the numeric backends.

use derivable_core::error::{Error, Result};
use derivable_core::value::{Shape, Value};

/// Where a backend writes the entries of its result.
pub(crate) enum Target<'a> {
    /// A value allocated once the result shape is known.
    Fresh(Option<Value<f64>>),
    /// A caller-provided buffer that must already have the result shape.
    Into(&'a mut Value<f64>),
}

impl Target<'_> {
    /// The buffer for a result of shape `shape`.
    ///
    /// A caller buffer of another shape is rejected before any entry is
    /// written.
    pub(crate) fn buffer(&mut self, shape: &Shape) -> Result<&mut Value<f64>> {
        match self {
            Target::Fresh(slot) => Ok(slot.insert(Value::zeros(shape))),
            Target::Into(out) => {
                let actual = out.shape();
                if actual != *shape {
                    return Err(Error::shape_mismatch(shape, actual));
                }
                Ok(&mut **out)
            }
        }
    }

    pub(crate) fn into_value(self) -> Result<Value<f64>> {
        match self {
            Target::Fresh(Some(value)) => Ok(value),
            _ => Err(Error::evaluation("the backend produced no result")),
        }
    }
}
