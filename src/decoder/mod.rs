//! Streaming content decoders
//!
//! A decoder transforms transfer-encoded payload bytes (base64,
//! quoted-printable, ...) into their raw form while the payload is still
//! arriving. Decoders are driven through [`decode_into`], which grows the
//! destination [`OutputWindow`] whenever the decoder runs out of space.

pub mod base64;

pub use self::base64::Base64Decoder;

use crate::error::{PloadError, Result};

/// Outcome of a single decode step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Output space exhausted, call again with more room
    MoreOutput,
    /// All input consumed, feed the next chunk
    MoreInput,
    /// End of the encoded stream reached, remaining input is ignored
    Done,
    /// Malformed input
    Error,
}

/// Cursor movement reported by [`Decoder::decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeProgress {
    pub consumed: usize,
    pub produced: usize,
    pub status: DecodeStatus,
}

/// A stateful streaming byte transform.
///
/// Instances are not shared between payloads. A decoder must accept being
/// called again with the unconsumed input after returning
/// [`DecodeStatus::MoreOutput`].
pub trait Decoder: Send {
    /// Encoding name this decoder handles
    fn name(&self) -> &str;

    /// Upper bound of the bytes produced for `input_len` more input bytes
    fn estimate_output_size(&self, input_len: usize) -> usize;

    /// Decode from `input` into `output`
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> DecodeProgress;
}

/// Constructor registered per encoding name
pub type DecoderFactory = fn() -> Box<dyn Decoder>;

/// Append-only destination that can be grown on demand
pub trait OutputWindow {
    /// Writable space after the committed bytes
    fn spare(&mut self) -> &mut [u8];

    /// Mark `len` bytes of the spare space as written
    fn commit(&mut self, len: usize);

    /// Ensure at least `min_size` bytes of spare space
    fn grow(&mut self, min_size: usize) -> Result<()>;
}

/// Run `decoder` over `input`, appending its output to `window`.
///
/// Returns the number of bytes produced.
pub fn decode_into<W: OutputWindow + ?Sized>(
    decoder: &mut dyn Decoder,
    mut input: &[u8],
    window: &mut W,
) -> Result<usize> {
    let estimated = decoder.estimate_output_size(input.len());
    if window.spare().len() < estimated {
        window.grow(estimated)?;
    }

    let mut total = 0;
    loop {
        let progress = decoder.decode(input, window.spare());
        input = &input[progress.consumed..];
        window.commit(progress.produced);
        total += progress.produced;

        match progress.status {
            DecodeStatus::Done => break,
            DecodeStatus::Error => {
                return Err(PloadError::decode(format!(
                    "{} decoder rejected its input",
                    decoder.name()
                )))
            }
            DecodeStatus::MoreOutput => {
                let needed = decoder.estimate_output_size(input.len()).max(1);
                window.grow(needed)?;
            }
            DecodeStatus::MoreInput => {
                if input.is_empty() || progress.consumed == 0 {
                    break;
                }
            }
        }
    }

    Ok(total)
}

/// Heap backed growable buffer used while a payload is unclassified
#[derive(Debug)]
pub struct PloadBuffer {
    data: Vec<u8>,
    len: usize,
    page_size: usize,
}

impl PloadBuffer {
    pub fn new(page_size: usize) -> Self {
        Self {
            data: Vec::new(),
            len: 0,
            page_size: page_size.max(1),
        }
    }

    /// Buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Append raw bytes, or decoded bytes when a decoder is given
    pub fn append(&mut self, decoder: Option<&mut dyn Decoder>, data: &[u8]) -> Result<()> {
        match decoder {
            Some(decoder) => {
                decode_into(decoder, data, self)?;
            }
            None => {
                if self.data.len() - self.len < data.len() {
                    self.grow(data.len())?;
                }
                self.data[self.len..self.len + data.len()].copy_from_slice(data);
                self.len += data.len();
            }
        }
        Ok(())
    }

    /// Drop the contents and the allocation
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.len = 0;
    }
}

impl OutputWindow for PloadBuffer {
    fn spare(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    fn commit(&mut self, len: usize) {
        assert!(self.len + len <= self.data.len(), "commit past the buffer end");
        self.len += len;
    }

    fn grow(&mut self, min_size: usize) -> Result<()> {
        let new_size =
            min_size - (min_size % self.page_size) + self.page_size + self.data.len();
        self.data
            .try_reserve_exact(new_size - self.data.len())
            .map_err(|e| PloadError::io(format!("Failed to grow payload buffer to {}: {}", new_size, e)))?;
        self.data.resize(new_size, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_raw_append_grows_by_pages() {
        let mut buf = PloadBuffer::new(4096);
        buf.append(None, b"hello").unwrap();
        assert_eq!(buf.as_slice(), b"hello");
        assert_eq!(buf.capacity(), 4096);

        let big = vec![7u8; 5000];
        buf.append(None, &big).unwrap();
        assert_eq!(buf.len(), 5005);
        assert_eq!(buf.capacity() % 4096, 0);

        buf.release();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn test_buffer_decoded_append() {
        let mut buf = PloadBuffer::new(16);
        let mut decoder = Base64Decoder::new();
        buf.append(Some(&mut decoder), b"aGVsbG8g").unwrap();
        buf.append(Some(&mut decoder), b"d29y").unwrap();
        buf.append(Some(&mut decoder), b"bGQ=").unwrap();
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn test_decode_into_reports_errors() {
        let mut buf = PloadBuffer::new(16);
        let mut decoder = Base64Decoder::new();
        let err = decode_into(&mut decoder, b"ab$d", &mut buf).unwrap_err();
        assert!(matches!(err, PloadError::Decode { .. }));
    }
}
