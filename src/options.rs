//! Host-supplied configuration: the error sink, the include resolver,
//! and the small knobs a caller can set before `Preprocessor::new`.
//!
//! There is no config-file format here — the engine reads no disk or
//! environment state of its own, so a plain builder is enough.

use crate::error::ErrorRecord;
use crate::macros::MacroDescriptor;
use crate::stream::InputStream;

pub type ErrorSink = Box<dyn FnMut(ErrorRecord)>;
pub type IncludeResolver = Box<dyn FnMut(&str, bool) -> Option<Box<dyn InputStream>>>;

pub struct Options {
    pub(crate) skip_comments: bool,
    pub(crate) user_defines: Vec<MacroDescriptor>,
    pub(crate) error_sink: ErrorSink,
    pub(crate) include_resolver: IncludeResolver,
}

impl Options {
    pub fn new(
        error_sink: impl FnMut(ErrorRecord) + 'static,
        include_resolver: impl FnMut(&str, bool) -> Option<Box<dyn InputStream>> + 'static,
    ) -> Options {
        Options {
            skip_comments: false,
            user_defines: Vec::new(),
            error_sink: Box::new(error_sink),
            include_resolver: Box::new(include_resolver),
        }
    }

    pub fn with_skip_comments(mut self, skip_comments: bool) -> Options {
        self.skip_comments = skip_comments;
        self
    }

    pub fn with_user_define(mut self, descriptor: MacroDescriptor) -> Options {
        self.user_defines.push(descriptor);
        self
    }
}

/// An include resolver that never resolves anything, for hosts and
/// tests that have no `#include` support to offer.
pub fn no_includes(_path: &str, _is_system: bool) -> Option<Box<dyn InputStream>> {
    None
}

/// An error sink that silently discards every record, for tests that
/// only care about the resulting text.
pub fn ignore_errors(_record: ErrorRecord) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_user_defines() {
        let options = Options::new(ignore_errors, no_includes)
            .with_user_define(MacroDescriptor::object_like("A", vec![]))
            .with_user_define(MacroDescriptor::object_like("B", vec![]))
            .with_skip_comments(true);
        assert_eq!(options.user_defines.len(), 2);
        assert!(options.skip_comments);
    }
}
