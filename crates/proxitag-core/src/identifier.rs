//! Short identifiers exchanged in BLE advertisements.
//!
//! The whole service-data field of [`SERVICE_UUID`] is the identifier's UTF-8
//! bytes. There is no length prefix, so the character set and length are
//! restricted to keep the payload bounded and unambiguous.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Service UUID carried by every proxitag advertisement and used as the scan filter.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_c204_0000_1000_8000_0080_5f9b_34fb);

/// Maximum length of a canonical identifier, in characters.
pub const IDENTIFIER_MAX_LENGTH: usize = 12;

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("identifier filter regex is valid"));

/// A canonical identifier: `[A-Za-z0-9_-]{0,12}`.
///
/// Every constructor sanitizes, so holding an `Identifier` means holding a
/// canonical value. The empty identifier means "none selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(from = "String", into = "String")]
#[schema(value_type = String, example = "BLE-4821")]
pub struct Identifier(String);

impl Identifier {
    /// Sanitize arbitrary input into a canonical identifier.
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self(sanitize(input))
    }

    /// The empty identifier.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Borrow the canonical string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty identifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes placed in the advertisement's service data.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    /// Whether a decoded advertisement identifier names this identifier.
    ///
    /// The empty identifier never matches anything.
    #[must_use]
    pub fn matches(&self, advertised: Option<&str>) -> bool {
        !self.is_empty() && advertised == Some(self.as_str())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        if is_canonical(&value) {
            Self(value)
        } else {
            Self::new(&value)
        }
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim, drop every character outside `[A-Za-z0-9_-]`, truncate to
/// [`IDENTIFIER_MAX_LENGTH`].
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut filtered = DISALLOWED_CHARS.replace_all(input.trim(), "").into_owned();
    // Only ASCII survives the filter, so byte truncation is char-safe.
    filtered.truncate(IDENTIFIER_MAX_LENGTH);
    filtered
}

/// Whether `input` is already in canonical form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    input.len() <= IDENTIFIER_MAX_LENGTH && !DISALLOWED_CHARS.is_match(input)
}

/// Sanitize and encode an identifier as advertisement service data.
#[must_use]
pub fn encode(id: &str) -> Vec<u8> {
    sanitize(id).into_bytes()
}

/// Decode advertisement service data.
///
/// Invalid UTF-8 is replaced rather than rejected. Blank payloads decode to
/// `None`. The result is trimmed but not sanitized, so a payload outside the
/// canonical alphabet can never equal a canonical target.
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
