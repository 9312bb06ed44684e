//! Incremental text decoding of chunked process output.

use crate::error::{Error, Result};

/// Text encoding of process output. UTF-8 is the only one supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
}

/// What to do with bytes that are not valid in the encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeErrors {
    /// Substitute U+FFFD for each invalid sequence.
    #[default]
    Replace,
    /// Fail the decode.
    Strict,
}

/// A stateful decoder that never splits a character across chunks.
///
/// The trailing bytes of an incomplete character are held back and
/// completed by the next call to [`decode`](Self::decode).
#[derive(Debug, Clone, Default)]
pub struct IncrementalDecoder {
    errors: DecodeErrors,
    pending: Vec<u8>,
}

impl IncrementalDecoder {
    pub fn new(encoding: Encoding, errors: DecodeErrors) -> Self {
        match encoding {
            Encoding::Utf8 => Self {
                errors,
                pending: Vec::new(),
            },
        }
    }

    /// Decode as much of `pending + chunk` as forms whole characters.
    ///
    /// With `last` set, an incomplete tail is an invalid sequence rather than
    /// something to wait for.
    pub fn decode(&mut self, chunk: &[u8], last: bool) -> Result<String> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Checked by from_utf8 above.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            self.invalid(&after[..len])?;
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None if last => {
                            self.invalid(after)?;
                            out.push(char::REPLACEMENT_CHARACTER);
                            break;
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn invalid(&self, bytes: &[u8]) -> Result<()> {
        match self.errors {
            DecodeErrors::Replace => Ok(()),
            DecodeErrors::Strict => Err(Error::Decode {
                reason: format!("invalid UTF-8 sequence {:02x?}", bytes),
            }),
        }
    }
}
