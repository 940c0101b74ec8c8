use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::{error::SerialPortError, SerialLine};

/// This codec has a configurable delimiter character for reading,
/// and adds a character to each line it encodes.
#[derive(Debug, Clone)]
pub struct LinesCodec {
    /// How far we have looked for a delimiter into the buffer
    cursor: usize,

    /// How to delimit incoming byte streams.
    /// This delimiter is kept in the yielded frames.
    read_delimiter: u8,

    /// Which byte to append when writing (encoding) messages.
    write_delimiter: u8,
}

impl LinesCodec {
    /// Create a new codec.
    pub fn new(read_delimiter: u8, write_delimiter: u8) -> Self {
        Self {
            cursor: 0,
            read_delimiter,
            write_delimiter,
        }
    }

    /// Take whatever is buffered even though no delimiter arrived yet.
    ///
    /// A device which stops mid-line would otherwise hold back its output
    /// until the next delimiter, which might never come.
    pub fn take_partial(&mut self, src: &mut BytesMut) -> Option<SerialLine> {
        self.cursor = 0;

        if src.is_empty() {
            None
        } else {
            Some(SerialLine::new_lossy(src.split()))
        }
    }

    /// The number of bytes a command occupies on the wire.
    pub fn encoded_len(&self, command: &str) -> usize {
        command.len() + 1
    }
}

impl Default for LinesCodec {
    fn default() -> Self {
        Self::new(b'\n', b'\n')
    }
}

impl Decoder for LinesCodec {
    type Item = SerialLine;
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

            // Split right after the delimiter, keeping it in the line.
            let line = src.split_to(actual_position + 1);

            Ok(Some(SerialLine::new_lossy(line)))
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

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => Ok(self.take_partial(src)),
        }
    }
}

impl Encoder<&str> for LinesCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.put_u8(self.write_delimiter);

        Ok(())
    }
}
