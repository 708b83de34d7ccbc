use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::serial::{error::SerialPortError, SerialMessageBytes};

/// Frames longer than this without a delimiter are discarded.
pub(crate) const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// This codec has a configurable delimiter character for reading,
/// and optionally adds a character to each line it encodes.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a newline into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is not included in the yielded frames.
    read_delimiter: u8,

    /// If provided, which byte to append when writing (encoding) messages.
    /// If `None`, forwards the data as-is.
    write_delimiter: Option<u8>,

    /// Upper bound on buffered bytes without seeing a delimiter.
    max_length: usize,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_delimiter: Option<u8>) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_delimiter,
            max_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl Default for LinesCodec {
    /// Newline delimited in both directions.
    fn default() -> Self {
        Self::new(b'\n', Some(b'\n'))
    }
}

impl Decoder for LinesCodec {
    type Item = SerialMessageBytes;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == self.read_delimiter) {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            // Split at the delimiter, getting a slice of the bytes before it.
            let line = src.split_to(actual_position);

            // Discard the delimiter by advancing the source buffer beyond it.
            src.advance(1);

            Ok(Some(line[..].to_vec()))
        } else if read_to > self.max_length {
            warn!(
                bytes = read_to,
                "No delimiter within max line length, discarding buffered bytes"
            );
            src.clear();
            self.cursor = 0;

            Ok(None)
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be provided to us (same starting point),
            // but possibly with more data.
            // Since our job is to find the delimiter, we don't need to re-read the bytes we have already looked at.
            self.cursor = read_to;

            // Indicate that we need more bytes to look at.
            Ok(None)
        }
    }
}

impl Encoder<SerialMessageBytes> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: SerialMessageBytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);

        if let Some(character) = self.write_delimiter {
            dst.extend_from_slice(&[character]);
        }
        Ok(())
    }
}
