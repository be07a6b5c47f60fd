//! Negotiable codec formats and the factory's preference ordering.

use std::collections::BTreeMap;
use std::fmt;

/// SDP-style codec format: a codec name plus its negotiable parameters.
///
/// Two formats are the same codec profile when name and parameters are
/// equal; catalog membership uses this equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormat {
    /// Codec name, e.g. `"H264"` or `"VP8"`.
    pub name: String,
    /// Negotiable parameters, e.g. `profile-level-id`.
    pub parameters: BTreeMap<String, String>,
}

impl VideoFormat {
    /// A format with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add one parameter (builder style).
    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Whether an equal format appears in `list`.
    pub fn is_in_list(&self, list: &[VideoFormat]) -> bool {
        list.iter().any(|candidate| candidate == self)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " ({})", params.join(";"))?;
        }
        Ok(())
    }
}

/// Fixed codec preference table. Formats whose name is not listed sort
/// after every listed one, keeping their relative discovery order.
const PREFERRED_CODEC_ORDER: [&str; 4] = ["VP8", "VP9", "H264", "AV1X"];

fn preference_rank(format: &VideoFormat) -> usize {
    PREFERRED_CODEC_ORDER
        .iter()
        .position(|name| *name == format.name)
        .unwrap_or(PREFERRED_CODEC_ORDER.len())
}

/// Stable-sort `formats` by the fixed codec preference table.
///
/// Deterministic and idempotent: ties (same codec name, or two unknown
/// codecs) keep their input order, so the software-then-hardware
/// concatenation order of the factory survives the sort.
pub fn sort_by_codec_preference(formats: &mut [VideoFormat]) {
    formats.sort_by_key(preference_rank);
}
