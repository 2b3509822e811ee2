//! Read-back and post-processing of captured output.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
};

use crate::framing::{bytes_to_string, strip_blank_lines};

/// Message injected when a program could not be found and wrote nothing.
pub const NOT_FOUND_MESSAGE: &str = "Command not found";

/// Rewind `file` and read it to the end, decoding lossily.
pub(crate) fn read_back(mut file: &File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes_to_string(&bytes))
}

/// Rewind a caller-owned file so the caller can read what the child wrote.
pub(crate) fn rewind(mut file: &File) {
    if let Err(err) = file.seek(SeekFrom::Start(0)) {
        tracing::warn!(%err, "failed to rewind output file");
    }
}

/// Apply blank-line suppression, then trimming.
///
/// # Examples
/// ```
/// use qel::process::finish_output;
/// assert_eq!(finish_output("\n a\n\nb \n".into(), true, true), "a\nb");
/// assert_eq!(finish_output("x\n".into(), false, false), "x\n");
/// ```
#[must_use]
pub fn finish_output(text: String, skip_blank_lines: bool, trim: bool) -> String {
    let text = if skip_blank_lines {
        strip_blank_lines(&text)
    } else {
        text
    };
    if trim { text.trim().to_owned() } else { text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_back_rewinds_before_reading() {
        let mut file = tempfile::tempfile().expect("scratch file");
        file.write_all(b"captured\n").expect("write scratch");
        assert_eq!(read_back(&file).expect("read back"), "captured\n");
        assert_eq!(read_back(&file).expect("read back twice"), "captured\n");
    }
}
