//! Input streams are the engine's only way of pulling source text. The
//! scanner never opens a file or a socket itself: a host hands it
//! owned [`InputStream`] values, one per `#include` level plus the
//! root document.

/// A capability producing physical lines of source text on demand.
///
/// Implementations are owned by the scanner's stream stack once
/// pushed; the scanner pops and drops them once exhausted.
pub trait InputStream {
    /// Returns the next physical line, including its trailing `\n` if
    /// the underlying source has one, or an empty string once
    /// exhausted.
    fn read_line(&mut self) -> String;

    /// Pure predicate: true while `read_line` would still return a
    /// non-empty line.
    fn has_next_line(&self) -> bool;
}

/// The minimal concrete [`InputStream`] over an in-memory buffer. Most
/// hosts and all of this crate's own tests use this rather than
/// writing a file-backed stream.
pub struct StringStream {
    lines: std::vec::IntoIter<String>,
}

impl StringStream {
    pub fn new(source: impl AsRef<str>) -> StringStream {
        let lines = split_keep_newlines(source.as_ref());
        StringStream {
            lines: lines.into_iter(),
        }
    }
}

impl InputStream for StringStream {
    fn read_line(&mut self) -> String {
        self.lines.next().unwrap_or_default()
    }

    fn has_next_line(&self) -> bool {
        self.lines.as_slice().first().is_some()
    }
}

/// Splits `source` into physical lines, each retaining its trailing
/// `\n` (the final line keeps none if the source doesn't end in one).
fn split_keep_newlines(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in source.chars() {
        current.push(ch);
        if ch == '\n' {
            lines.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
