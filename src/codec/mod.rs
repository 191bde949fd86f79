//! Content codecs: JSON and the Pack binary format
//!
//! Both encodings share one contract: typed encode/decode for request and
//! response bodies, plus a streaming decoder that pulls successive top-level
//! values from one response body without re-parsing from the start. Batch
//! responses are a plain concatenation of values in either encoding.

pub mod pack;

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
pub use serde_json::Value;

use crate::error::{SanchayaError, SanchayaResult};

/// Wire encoding negotiated with the server via `Content-Type`/`Accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Plain JSON (`application/json`).
    #[default]
    Json,
    /// Compact tagged binary (`application/x-sanchaya-pack`).
    Pack,
}

impl Encoding {
    /// MIME type sent in `Content-Type` and `Accept` headers.
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Pack => "application/x-sanchaya-pack",
        }
    }

    /// Serialize a value to wire bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> SanchayaResult<Vec<u8>> {
        match self {
            Encoding::Json => Ok(serde_json::to_vec(value)?),
            Encoding::Pack => {
                let value = serde_json::to_value(value)?;
                Ok(pack::encode(&value))
            }
        }
    }

    /// Deserialize one complete value from wire bytes.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> SanchayaResult<T> {
        match self {
            Encoding::Json => serde_json::from_slice(bytes)
                .map_err(|e| SanchayaError::Protocol(format!("invalid JSON body: {e}"))),
            Encoding::Pack => {
                let value = pack::decode(bytes)?;
                serde_json::from_value(value)
                    .map_err(|e| SanchayaError::Protocol(format!("unexpected pack body: {e}")))
            }
        }
    }
}

/// Incremental decoder over a stream of concatenated top-level values.
///
/// Feed raw body chunks with [`feed`](Self::feed), then pull complete values
/// with [`try_next`](Self::try_next). A partial value at the end of the
/// buffer is not an error; it stays buffered until more bytes arrive.
#[derive(Debug)]
pub struct ValueDecoder {
    encoding: Encoding,
    buf: BytesMut,
}

impl ValueDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            buf: BytesMut::new(),
        }
    }

    /// Append raw bytes from the response body.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete value, if the buffer holds one.
    ///
    /// `Ok(None)` means "need more data" — distinct from a malformed stream,
    /// which is a fatal [`SanchayaError::Protocol`].
    pub fn try_next(&mut self) -> SanchayaResult<Option<Value>> {
        match self.encoding {
            Encoding::Pack => pack::decode_from(&mut self.buf),
            Encoding::Json => self.try_next_json(),
        }
    }

    fn try_next_json(&mut self) -> SanchayaResult<Option<Value>> {
        // Values on the stream may be separated by whitespace/newlines.
        let start = match self.buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => pos,
            None => {
                self.buf.clear();
                return Ok(None);
            }
        };

        let mut stream =
            serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<Value>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                let consumed = start + stream.byte_offset();
                self.buf.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(SanchayaError::Protocol(format!("invalid JSON stream: {e}"))),
        }
    }

    /// True once every buffered byte has been consumed (ignoring whitespace).
    /// Used to tell clean exhaustion from a truncated trailing value.
    pub fn is_drained(&self) -> bool {
        self.buf.iter().all(|b| b.is_ascii_whitespace())
    }
}
