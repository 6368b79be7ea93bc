//! Frame Protocol
//!
//! Wire format for bridge messages: UTF-8 JSON documents terminated by the
//! character U+FFFF. There is no length prefix.
//!
//! # Frame Format
//!
//! ```text
//! +------------------------------------------+-------------------+
//! | JSON Payload (variable, UTF-8)           | U+FFFF (EF BF BF) |
//! +------------------------------------------+-------------------+
//! ```
//!
//! U+FFFF is a noncharacter: serializers never emit it raw inside a JSON
//! document, and its UTF-8 form `EF BF BF` can only start on a character
//! boundary. The decoder therefore splits on bytes, and a read boundary that
//! falls inside a multi-byte sequence is harmless.
//!
//! # Buffering
//!
//! The decoder reads into a fixed window that starts at 64 KiB and doubles
//! whenever a read fills the remaining space. Frames of any size are
//! accepted; the window simply grows until the frame fits.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::TransportError;

/// Frame terminator
pub const FRAME_DELIMITER: char = '\u{FFFF}';

/// UTF-8 encoding of [`FRAME_DELIMITER`]
pub const DELIMITER_BYTES: [u8; 3] = [0xEF, 0xBF, 0xBF];

/// Initial read window (64 KiB)
pub const INITIAL_BUFFER_SIZE: usize = 64 * 1024;

/// Smallest window a decoder will use
const MIN_BUFFER_CAPACITY: usize = 16;

/// Encode a payload into a delimited frame
#[must_use]
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + DELIMITER_BYTES.len());
    buf.extend_from_slice(payload.as_bytes());
    buf.extend_from_slice(&DELIMITER_BYTES);
    buf
}

/// Position of the first delimiter in `haystack`
fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER_BYTES.len())
        .position(|w| w == DELIMITER_BYTES)
}

/// Decoder state machine for streaming frame parsing
///
/// Owns the growable read window. Callers either read straight into
/// [`spare_mut`](Self::spare_mut) and [`commit`](Self::commit) the count, or
/// [`push`](Self::push) a slice.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// End of valid data in `buffer`
    filled: usize,
    /// Start of the first unconsumed frame
    read_pos: usize,
    /// No delimiter starts before this offset
    scan_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with the default 64 KiB window
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUFFER_SIZE)
    }

    /// Create a decoder with a specific initial window
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(MIN_BUFFER_CAPACITY)],
            filled: 0,
            read_pos: 0,
            scan_pos: 0,
        }
    }

    /// Current window size
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of buffered bytes not yet returned as frames
    #[must_use]
    pub fn available(&self) -> usize {
        self.filled - self.read_pos
    }

    /// Writable tail of the window for the next read
    pub fn spare_mut(&mut self) -> &mut [u8] {
        self.compact();
        if self.filled == self.buffer.len() {
            self.grow();
        }
        &mut self.buffer[self.filled..]
    }

    /// Record that `n` bytes were written into [`spare_mut`](Self::spare_mut)
    pub fn commit(&mut self, n: usize) {
        let remaining = self.buffer.len() - self.filled;
        let n = n.min(remaining);
        self.filled += n;
        if n > 0 && n == remaining {
            self.grow();
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let spare = self.spare_mut();
            let n = spare.len().min(data.len());
            spare[..n].copy_from_slice(&data[..n]);
            self.commit(n);
            data = &data[n..];
        }
    }

    /// Take the next complete frame, if one is buffered
    ///
    /// Empty segments between consecutive delimiters are skipped. The
    /// returned bytes exclude the delimiter and are not yet validated as
    /// UTF-8.
    pub fn decode(&mut self) -> Option<Vec<u8>> {
        loop {
            let start = self.scan_pos.max(self.read_pos);
            match find_delimiter(&self.buffer[start..self.filled]) {
                Some(offset) => {
                    let end = start + offset;
                    let frame = self.buffer[self.read_pos..end].to_vec();
                    self.read_pos = end + DELIMITER_BYTES.len();
                    self.scan_pos = self.read_pos;
                    if frame.is_empty() {
                        continue;
                    }
                    return Some(frame);
                }
                None => {
                    // Keep a possible delimiter prefix in the next scan.
                    self.scan_pos = self
                        .filled
                        .saturating_sub(DELIMITER_BYTES.len() - 1)
                        .max(self.read_pos);
                    return None;
                }
            }
        }
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.filled = 0;
        self.read_pos = 0;
        self.scan_pos = 0;
    }

    /// Move the unconsumed tail to the front of the window
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.buffer.copy_within(self.read_pos..self.filled, 0);
        self.filled -= self.read_pos;
        self.scan_pos -= self.read_pos;
        self.read_pos = 0;
    }

    fn grow(&mut self) {
        let capacity = self.buffer.len() * 2;
        self.buffer.resize(capacity, 0);
        tracing::debug!(capacity, "Frame buffer grown");
    }
}

/// Async reader yielding complete frames from a byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the given initial window
    pub fn new(reader: R, initial_capacity: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::with_capacity(initial_capacity),
        }
    }

    /// Read until the next complete frame
    ///
    /// Returns `Ok(None)` at end of stream. An incomplete trailing segment at
    /// end of stream is discarded.
    ///
    /// # Errors
    ///
    /// Any read failure is returned as `TransportError::Io`.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if let Some(frame) = self.decoder.decode() {
                return Ok(Some(frame));
            }

            let n = self.reader.read(self.decoder.spare_mut()).await?;
            if n == 0 {
                let leftover = self.decoder.available();
                if leftover > 0 {
                    tracing::debug!(bytes = leftover, "Discarding unterminated data at end of stream");
                }
                return Ok(None);
            }
            self.decoder.commit(n);
        }
    }

    /// Current window size
    pub fn capacity(&self) -> usize {
        self.decoder.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frames_of(decoder: &mut FrameDecoder) -> Vec<String> {
        std::iter::from_fn(|| decoder.decode())
            .map(|f| String::from_utf8(f).unwrap())
            .collect()
    }

    fn wire(payloads: &[&str]) -> Vec<u8> {
        payloads.iter().flat_map(|p| encode_frame(p)).collect()
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let encoded = encode_frame("{}");
        assert_eq!(encoded, vec![b'{', b'}', 0xEF, 0xBF, 0xBF]);
        assert_eq!(FRAME_DELIMITER.to_string().as_bytes(), &DELIMITER_BYTES);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire(&[r#"{"id":"1"}"#, r#"{"id":"2"}"#]));

        assert_eq!(frames_of(&mut decoder), vec![r#"{"id":"1"}"#, r#"{"id":"2"}"#]);
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_decode_retains_trailing_partial() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = wire(&["first"]);
        bytes.extend_from_slice(b"seco");
        decoder.push(&bytes);

        assert_eq!(frames_of(&mut decoder), vec!["first"]);
        assert_eq!(decoder.available(), 4);

        decoder.push(b"nd");
        decoder.push(&DELIMITER_BYTES);
        assert_eq!(frames_of(&mut decoder), vec!["second"]);
    }

    #[test]
    fn test_decode_skips_empty_segments() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = DELIMITER_BYTES.to_vec();
        bytes.extend(wire(&["a"]));
        bytes.extend_from_slice(&DELIMITER_BYTES);
        bytes.extend(wire(&["b"]));
        decoder.push(&bytes);

        assert_eq!(frames_of(&mut decoder), vec!["a", "b"]);
    }

    #[test]
    fn test_delimiter_split_across_pushes() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"abc\xEF");
        assert!(decoder.decode().is_none());
        decoder.push(b"\xBF");
        assert!(decoder.decode().is_none());
        decoder.push(b"\xBFdef\xEF\xBF\xBF");
        assert_eq!(frames_of(&mut decoder), vec!["abc", "def"]);
    }

    #[test]
    fn test_one_byte_at_a_time_matches_bulk() {
        let payloads = [r#"{"name":"héllo wörld ✓"}"#, r#"{"id":"x","data":[1,2,3]}"#, "日本語"];
        let bytes = wire(&payloads);

        let mut decoder = FrameDecoder::with_capacity(16);
        let mut out = Vec::new();
        for byte in &bytes {
            decoder.push(std::slice::from_ref(byte));
            out.extend(frames_of(&mut decoder));
        }

        assert_eq!(out, payloads.to_vec());
    }

    #[test]
    fn test_window_doubles_when_filled() {
        let mut decoder = FrameDecoder::with_capacity(16);
        decoder.push(&[b'x'; 16]);
        assert_eq!(decoder.capacity(), 32);

        decoder.push(&[b'x'; 20]);
        assert_eq!(decoder.capacity(), 64);
        assert!(decoder.decode().is_none());

        decoder.push(&DELIMITER_BYTES);
        assert_eq!(decoder.decode().map(|f| f.len()), Some(36));
    }

    #[test]
    fn test_clear() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"partial");
        decoder.clear();
        assert_eq!(decoder.available(), 0);
        assert!(decoder.decode().is_none());
    }

    #[tokio::test]
    async fn test_reader_independent_of_read_boundaries() {
        let payloads = [r#"{"id":"a","data":"ü"}"#, r#"{"id":"b","data":null}"#];
        let bytes = wire(&payloads);

        // Split at every position, including inside the multi-byte 'ü' and
        // inside the delimiter.
        for split in 1..bytes.len() {
            let mock = tokio_test::io::Builder::new()
                .read(&bytes[..split])
                .read(&bytes[split..])
                .build();
            let mut reader = FrameReader::new(mock, 16);

            let mut out = Vec::new();
            while let Some(frame) = reader.next_frame().await.unwrap() {
                out.push(String::from_utf8(frame).unwrap());
            }
            assert_eq!(out, payloads.to_vec(), "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_reader_end_of_stream_discards_partial() {
        let mock = tokio_test::io::Builder::new()
            .read(&wire(&["done"]))
            .read(b"{\"id\":")
            .build();
        let mut reader = FrameReader::new(mock, INITIAL_BUFFER_SIZE);

        assert_eq!(reader.next_frame().await.unwrap(), Some(b"done".to_vec()));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_large_frame_grows_window() {
        let payload = format!(r#"{{"data":"{}"}}"#, "a".repeat(10 * 1024 * 1024));
        let bytes = encode_frame(&payload);

        let (mut tx, rx) = tokio::io::duplex(256 * 1024);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&bytes).await.unwrap();
        });

        let mut reader = FrameReader::new(rx, INITIAL_BUFFER_SIZE);
        let frame = reader.next_frame().await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(frame.len(), payload.len());
        assert!(frame == payload.as_bytes());
        assert!(reader.capacity() > INITIAL_BUFFER_SIZE);
    }
}
