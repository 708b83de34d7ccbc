use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Serial port related errors.
pub(crate) mod error;

/// Codecs for encoding/decoding messages to/from wire.
pub(crate) mod codecs;

/// One line of device output, as text.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct SerialMessage(String);

impl SerialMessage {
    /// Decode a line of bytes.
    ///
    /// Strict UTF-8 is tried first.
    /// If that fails the bytes are read as Latin-1, which maps every byte to a char
    /// and therefore cannot fail.
    ///
    /// Trailing carriage returns and whitespace are removed.
    pub fn decode<B: AsRef<[u8]>>(bytes: B) -> Self {
        let bytes = bytes.as_ref();

        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_owned(),
            Err(_) => bytes.iter().map(|&byte| byte as char).collect(),
        };

        Self(text.trim_end().to_owned())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owned form.
    pub fn into_string(self) -> String {
        self.0
    }

    /// True if nothing but whitespace was received.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl<T: AsRef<str>> From<T> for SerialMessage {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for SerialMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;
