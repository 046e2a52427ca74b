//! Byte-stream to text conversion for session output.

/// Incremental UTF-8 decoder.
///
/// Process output arrives in arbitrary chunks, so a multi-byte character can
/// be split across two reads. The decoder holds back an incomplete trailing
/// sequence until the next chunk completes it. Invalid sequences decode to
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next chunk, returning all complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        out
    }

    /// Flushes any held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Normalizes line endings to CRLF for display on a terminal that is not
/// backed by a pseudo-terminal.
///
/// A bare `\n` becomes `\r\n`; an existing `\r\n` is kept as is, even when
/// the `\r` and `\n` arrive in different chunks.
#[derive(Debug, Default)]
pub struct CrlfNormalizer {
    after_cr: bool,
}

impl CrlfNormalizer {
    /// Creates a normalizer at the start of a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes the next chunk of text.
    pub fn normalize(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + text.len() / 8);
        for c in text.chars() {
            if c == '\n' && !self.after_cr {
                out.push('\r');
            }
            out.push(c);
            self.after_cr = c == '\r';
        }
        out
    }
}
