//! Incremental UTF-8 decoding for process output.
//!
//! Pipes hand back arbitrary byte slices, so a multi-byte character can be
//! split across two reads. [`Utf8ChunkDecoder`] keeps the incomplete tail of a
//! read and prepends it to the next one.

/// Longest possible incomplete UTF-8 sequence (a 4-byte char missing its last byte).
const MAX_PENDING: usize = 3;

#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, returning all text that is complete so far.
    ///
    /// Invalid sequences are replaced with U+FFFD. An incomplete trailing
    /// sequence is held back until the next call or [`finish`](Self::finish).
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            if after.len() <= MAX_PENDING {
                                self.pending.extend_from_slice(after);
                            } else {
                                out.push_str(&String::from_utf8_lossy(after));
                            }
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still pending once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }
}
