//! The engine's closed error taxonomy. Every violation the expander can
//! detect is reported through the host's error sink as an
//! [`ErrorRecord`]; the engine itself never panics or aborts on
//! malformed input.

use thiserror::Error;

/// One structured diagnostic. `kind` is matchable; `kind`'s `Display`
/// (derived by `thiserror`) gives a ready-to-log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub line_index: usize,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, line_index: usize) -> ErrorRecord {
        ErrorRecord { kind, line_index }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line_index, self.kind)
    }
}

impl std::error::Error for ErrorRecord {}

/// The closed set of violations the expander can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("#endif without matching #if")]
    UnbalancedEndif,
    #[error("invalid macro definition")]
    InvalidMacroDefinition,
    #[error("macro already defined")]
    MacroAlreadyDefined,
    #[error("macro called with the wrong number of arguments")]
    InconsistentMacroArity,
    #[error("#undef of a macro that was never defined")]
    UndefinedMacro,
    #[error("invalid #include directive")]
    InvalidIncludeDirective,
    #[error("unexpected end of #include path")]
    UnexpectedEndOfIncludePath,
    #[error("a second #else block was found for this #if")]
    AnotherElseBlockFound,
    #[error("#elif found after #else in the same block")]
    ElifBlockAfterElseFound,
    #[error("unknown directive")]
    UndefinedDirective,
    #[error("# or ## used outside of a macro expansion")]
    IncorrectOperationUsage,
}
