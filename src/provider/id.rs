//! Packed resource identifiers: `<plugin id>/<resource id>`.

use crate::{Error, Result};

pub fn pack_id(plugin_id: &str, resource_id: &str) -> String {
    format!("{plugin_id}/{resource_id}")
}

/// Splits on the first `/`; the resource id may itself contain slashes.
pub fn unpack_id(id: &str) -> Result<(&str, &str)> {
    id.split_once('/')
        .ok_or_else(|| Error::InvalidResourceId { id: id.to_string() })
}
