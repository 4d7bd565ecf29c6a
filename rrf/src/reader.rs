//! Turning the raw byte stream into lines, and lines into JSON candidates.
//!
//! RepRapFirmware interleaves JSON replies with console echo, `ok`
//! acknowledgements and whatever else happened to be queued on the port, so
//! nothing read here is trusted to be well formed. Bytes we cannot use are
//! dropped, never reported.

/// Assembles newline-terminated lines from arbitrary chunks of bytes.
///
/// Only printable ASCII survives; `\r`, control characters and anything
/// that is not ASCII at all are silently discarded.
#[derive(Debug, Default)]
pub struct LineReader {
    partial: String,
}

impl LineReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of received bytes, appending every line completed by
    /// it to `lines`.
    pub fn push(&mut self, bytes: &[u8], lines: &mut Vec<String>) {
        for &byte in bytes {
            match byte {
                b'\n' => lines.push(std::mem::take(&mut self.partial)),
                0x20..=0x7e => self.partial.push(byte as char),
                _ => {}
            }
        }
    }

    /// Whether a line has started arriving but is not yet terminated.
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    /// Throw away any partially received line.
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

/// Firmware acknowledges a completed command with a line ending in `ok`.
pub fn is_acknowledgement(line: &str) -> bool {
    line.ends_with("ok")
}

/// Whether the line carries at least one complete, brace-balanced object.
pub fn has_frame(line: &str) -> bool {
    let mut frames = vec![];
    frames_in_line(line, &mut frames);
    !frames.is_empty()
}

/// Pull every `{...}` candidate out of the given lines.
///
/// Characters outside of any brace nesting are echo or framing noise and
/// are dropped, as is a `}` that has no matching `{`. Nesting does not
/// carry across lines, so an unterminated object at the end of one line
/// cannot swallow the next.
pub fn json_frames<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut frames = vec![];
    for line in lines {
        frames_in_line(line.as_ref(), &mut frames);
    }
    frames
}

fn frames_in_line(line: &str, frames: &mut Vec<String>) {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut frame = String::new();

    for c in line.chars() {
        if depth == 0 {
            // Outside an object only an opening brace matters.
            if c == '{' {
                depth = 1;
                frame.push(c);
            }
            continue;
        }

        frame.push(c);
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    frames.push(std::mem::take(&mut frame));
                }
            }
            _ => {}
        }
    }
}
