//! Streaming base64 decoder

use base64::{
    alphabet,
    engine::{GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};

use super::{DecodeProgress, DecodeStatus, Decoder};

/// Standard alphabet, ignoring leftover bits in the last quantum
const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decodes standard-alphabet base64 across arbitrary chunk boundaries.
///
/// Whitespace is skipped. An incomplete quantum is held until the next
/// call. The stream ends at the first padded quantum.
#[derive(Debug, Default)]
pub struct Base64Decoder {
    pending: [u8; 4],
    pending_len: usize,
    finished: bool,
}

impl Base64Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory suitable for the decoder registry
    pub fn boxed() -> Box<dyn Decoder> {
        Box::new(Self::new())
    }

    fn is_alphabet(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
    }
}

impl Decoder for Base64Decoder {
    fn name(&self) -> &str {
        "base64"
    }

    fn estimate_output_size(&self, input_len: usize) -> usize {
        (input_len + self.pending_len) / 4 * 3 + 3
    }

    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> DecodeProgress {
        let mut produced = 0;

        if self.finished {
            return DecodeProgress {
                consumed: input.len(),
                produced,
                status: DecodeStatus::Done,
            };
        }

        for (i, &b) in input.iter().enumerate() {
            if b.is_ascii_whitespace() {
                continue;
            }
            if !Self::is_alphabet(b) {
                return DecodeProgress {
                    consumed: i,
                    produced,
                    status: DecodeStatus::Error,
                };
            }
            if self.pending_len == 3 && output.len() - produced < 3 {
                return DecodeProgress {
                    consumed: i,
                    produced,
                    status: DecodeStatus::MoreOutput,
                };
            }

            self.pending[self.pending_len] = b;
            self.pending_len += 1;
            if self.pending_len < 4 {
                continue;
            }

            self.pending_len = 0;
            match ENGINE.decode_slice(self.pending, &mut output[produced..]) {
                Ok(n) => produced += n,
                Err(_) => {
                    return DecodeProgress {
                        consumed: i,
                        produced,
                        status: DecodeStatus::Error,
                    }
                }
            }

            if self.pending.contains(&b'=') {
                self.finished = true;
                return DecodeProgress {
                    consumed: input.len(),
                    produced,
                    status: DecodeStatus::Done,
                };
            }
        }

        DecodeProgress {
            consumed: input.len(),
            produced,
            status: DecodeStatus::MoreInput,
        }
    }
}
