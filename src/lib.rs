//! A small, embeddable preprocessor modeled on the classical C
//! preprocessor: object- and function-like macros, full conditional
//! nesting, file inclusion through a host-supplied stream, token
//! concatenation and stringification, line continuation, and a
//! constant-expression evaluator for `#if`/`#elif`.
//!
//! The engine owns no global state and performs no I/O of its own — a
//! host hands it a root [`stream::InputStream`] and an [`options::Options`]
//! bundle (error sink, include resolver, initial defines) and gets back
//! the expanded text from [`expander::Preprocessor::process`].

pub mod args;
pub mod conditional;
pub mod error;
pub mod expander;
pub mod expr;
pub mod macros;
pub mod options;
pub mod scanner;
pub mod stream;
pub mod token;

pub use error::{ErrorKind, ErrorRecord};
pub use expander::Preprocessor;
pub use macros::MacroDescriptor;
pub use options::{ignore_errors, no_includes, Options};
pub use stream::{InputStream, StringStream};
pub use token::{Token, TokenKind};
