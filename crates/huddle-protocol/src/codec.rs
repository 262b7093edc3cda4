//! Codec for encoding and decoding Huddle events.
//!
//! Browsers speak JSON over text frames; native clients may opt into
//! MessagePack over binary frames. Inbound frames are decoded by frame
//! type, so a connection can receive either regardless of its outbound
//! format.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard upper bound on a single encoded event (1 MiB).
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds the size limit.
    #[error("Event size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Outbound encoding chosen by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON in text frames.
    #[default]
    Json,
    /// Named-field MessagePack in binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

/// An encoded event, ready to be wrapped in a transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Text(String),
    Binary(Bytes),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoding is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode an event in the given format.
///
/// # Errors
///
/// Returns an error if the event is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T, format: WireFormat) -> Result<Encoded, ProtocolError> {
    let encoded = match format {
        WireFormat::Json => Encoded::Text(serde_json::to_string(event)?),
        WireFormat::MessagePack => Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(event)?)),
    };

    check_size(encoded.len(), MAX_EVENT_SIZE)?;
    Ok(encoded)
}

/// Decode an event from either frame type.
///
/// # Errors
///
/// Returns an error if the data is too large or invalid.
pub fn decode<T: DeserializeOwned>(encoded: &Encoded) -> Result<T, ProtocolError> {
    match encoded {
        Encoded::Text(text) => decode_text(text),
        Encoded::Binary(data) => decode_binary(data),
    }
}

/// Decode an event from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is too large or not a valid event.
pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    check_size(text.len(), MAX_EVENT_SIZE)?;
    Ok(serde_json::from_str(text)?)
}

/// Decode an event from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid event.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    check_size(data.len(), MAX_EVENT_SIZE)?;
    Ok(rmp_serde::from_slice(data)?)
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::TooLarge { size, max });
    }
    Ok(())
}

/// Per-connection codec carrying the negotiated format and size limit.
#[derive(Debug, Clone, Copy)]
pub struct EventCodec {
    format: WireFormat,
    max_event_size: usize,
}

impl EventCodec {
    /// Create a codec. The size limit is capped at [`MAX_EVENT_SIZE`].
    #[must_use]
    pub fn new(format: WireFormat, max_event_size: usize) -> Self {
        Self {
            format,
            max_event_size: max_event_size.min(MAX_EVENT_SIZE),
        }
    }

    /// Outbound format.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode an outbound event.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, event: &T) -> Result<Encoded, ProtocolError> {
        encode(event, self.format)
    }

    /// Decode an inbound JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame exceeds the limit or is invalid.
    pub fn decode_text<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        check_size(text.len(), self.max_event_size)?;
        decode_text(text)
    }

    /// Decode an inbound MessagePack frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame exceeds the limit or is invalid.
    pub fn decode_binary<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        check_size(data.len(), self.max_event_size)?;
        decode_binary(data)
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new(WireFormat::Json, 64 * 1024)
    }
}
