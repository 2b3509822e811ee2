//! Byte and line framing for child output streams.
//!
//! Pipes deliver arbitrary byte chunks: a read may end halfway through a
//! UTF-8 sequence or halfway through a line. [`Utf8Decoder`] turns chunks into
//! text while holding back incomplete trailing sequences, and
//! [`frame_chunk`] splits text into complete lines while remembering the
//! trailing fragment (the carry-over). [`LineBuffer`] combines the carry-over
//! with the timestamp of the read that produced it so line-buffered events can
//! report when a line *started* arriving.
//!
//! Lines are terminated by LF. A CR immediately preceding the LF is stripped,
//! and blank-line suppression (when enabled) is applied after that strip.

/// Complete lines extracted from a chunk plus the new carry-over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Framed {
    /// Lines terminated within the combined carry-over and chunk.
    pub lines: Vec<String>,
    /// Trailing text not yet terminated by a newline.
    pub carry: String,
}

/// Split `carry` followed by `chunk` into complete lines.
///
/// The function is pure: feeding chunks one at a time (threading the returned
/// carry-over into the next call) yields the same lines as feeding their
/// concatenation in one call.
///
/// # Examples
/// ```
/// use qel::framing::frame_chunk;
///
/// let first = frame_chunk("alpha\r\nbra", "", false);
/// assert_eq!(first.lines, vec!["alpha".to_owned()]);
/// assert_eq!(first.carry, "bra");
///
/// let second = frame_chunk("vo\n\n", &first.carry, true);
/// assert_eq!(second.lines, vec!["bravo".to_owned()]);
/// assert!(second.carry.is_empty());
/// ```
#[must_use]
pub fn frame_chunk(chunk: &str, carry: &str, skip_blank: bool) -> Framed {
    let combined = join_carry(carry, chunk);
    let (pieces, rest) = split_complete(&combined);
    let lines = pieces
        .into_iter()
        .filter(|line| !(skip_blank && line.is_empty()))
        .map(str::to_owned)
        .collect();
    Framed {
        lines,
        carry: rest.to_owned(),
    }
}

/// Remove blank lines from captured text.
///
/// A line is blank when nothing is left after dropping its `\n` and any
/// trailing `\r`, the same rule [`frame_chunk`] and [`LineBuffer`] apply.
/// Whitespace-only lines are content and survive. Used when finalising
/// scratch-file captures where the whole output is available at once.
#[must_use]
pub fn strip_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if !is_blank(line) {
            out.push_str(line);
        }
    }
    out
}

fn is_blank(line: &str) -> bool {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line).is_empty()
}

fn join_carry(carry: &str, chunk: &str) -> String {
    let mut combined = String::with_capacity(carry.len() + chunk.len());
    combined.push_str(carry);
    combined.push_str(chunk);
    combined
}

fn split_complete(text: &str) -> (Vec<&str>, &str) {
    let mut pieces: Vec<&str> = text.split('\n').collect();
    let rest = pieces.pop().unwrap_or_default();
    let lines = pieces
        .into_iter()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    (lines, rest)
}

/// A line paired with the monotonic timestamp (ms) of the read that first
/// produced any of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedLine {
    /// Line content without its terminator.
    pub text: String,
    /// Timestamp of the earliest read contributing to the line.
    pub timestamp: u64,
}

/// Per-stream line assembler used for line-buffered delivery.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    carry: String,
    carry_timestamp: Option<u64>,
    skip_blank: bool,
}

impl LineBuffer {
    /// Create an empty buffer, optionally suppressing blank lines.
    #[must_use]
    pub fn new(skip_blank: bool) -> Self {
        Self {
            carry: String::new(),
            carry_timestamp: None,
            skip_blank,
        }
    }

    /// Feed a decoded chunk read at `timestamp`, returning completed lines.
    ///
    /// The first line completed from a non-empty carry-over reports the
    /// carry-over's timestamp; every other line reports `timestamp`.
    pub fn push(&mut self, chunk: &str, timestamp: u64) -> Vec<TimedLine> {
        let had_carry = !self.carry.is_empty();
        let started = self.carry_timestamp.filter(|_| had_carry).unwrap_or(timestamp);
        let combined = join_carry(&self.carry, chunk);
        let (pieces, rest) = split_complete(&combined);
        let completed_any = !pieces.is_empty();

        let lines = pieces
            .into_iter()
            .enumerate()
            .filter(|(_, line)| !(self.skip_blank && line.is_empty()))
            .map(|(index, line)| TimedLine {
                text: line.to_owned(),
                timestamp: if index == 0 { started } else { timestamp },
            })
            .collect();

        self.carry_timestamp = if rest.is_empty() {
            None
        } else if completed_any || !had_carry {
            Some(timestamp)
        } else {
            Some(started)
        };
        self.carry = rest.to_owned();
        lines
    }

    /// Flush the pending fragment at end of stream.
    ///
    /// Returns `None` when nothing (or only a blank fragment under blank-line
    /// suppression) is pending. The buffer is left empty either way.
    pub fn finish(&mut self) -> Option<TimedLine> {
        let carry = std::mem::take(&mut self.carry);
        let timestamp = self.carry_timestamp.take()?;
        let text = carry.strip_suffix('\r').unwrap_or(&carry);
        if text.is_empty() {
            return None;
        }
        Some(TimedLine {
            text: text.to_owned(),
            timestamp,
        })
    }

    /// Borrow the current carry-over.
    #[must_use]
    pub fn carry(&self) -> &str {
        &self.carry
    }
}

/// Incremental UTF-8 decoder that never splits a multi-byte sequence.
///
/// Invalid sequences decode to U+FFFD; an incomplete sequence at the end of a
/// chunk is held back until the next call (or [`Utf8Decoder::finish`]).
#[derive(Debug, Clone, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Decode `bytes`, prefixed by any sequence held back from the last call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);
        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    if let Some(len) = err.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = after.get(len..).unwrap_or_default();
                    } else {
                        self.pending = after.to_vec();
                        break;
                    }
                }
            }
        }
        out
    }

    /// Flush any held-back bytes lossily.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Decode a complete byte buffer lossily.
#[must_use]
pub fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
