//! The macro table: object-like and function-like macro descriptors,
//! keyed by name, plus the expansion context used to suppress
//! self-reference.

use std::collections::HashMap;

use crate::token::{Token, TokenKind};

pub type Identifier = String;

/// One entry of the symbol table.
///
/// `params` distinguishes object-like macros (`None`) from
/// function-like ones (`Some`, possibly an empty parameter list for a
/// zero-arity function-like macro).
#[derive(Debug, Clone)]
pub struct MacroDescriptor {
    pub name: Identifier,
    pub params: Option<Vec<Identifier>>,
    pub body: Vec<Token>,
}

impl MacroDescriptor {
    pub fn object_like(name: impl Into<String>, body: Vec<Token>) -> MacroDescriptor {
        MacroDescriptor {
            name: name.into(),
            params: None,
            body,
        }
    }

    pub fn function_like(
        name: impl Into<String>,
        params: Vec<Identifier>,
        body: Vec<Token>,
    ) -> MacroDescriptor {
        MacroDescriptor {
            name: name.into(),
            params: Some(params),
            body,
        }
    }

    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }
}

/// The name of the engine's single built-in macro, whose replacement
/// is computed on demand rather than stored.
pub const BUILTIN_LINE: &str = "__LINE__";

/// The macro symbol table. Names are unique; `#define` of an existing
/// name is rejected by the expander before it ever reaches
/// [`MacroTable::define`].
#[derive(Debug, Default)]
pub struct MacroTable {
    definitions: HashMap<Identifier, MacroDescriptor>,
}

impl MacroTable {
    pub fn new() -> MacroTable {
        MacroTable {
            definitions: HashMap::new(),
        }
    }

    pub fn is_builtin(name: &str) -> bool {
        name == BUILTIN_LINE
    }

    pub fn contains(&self, name: &str) -> bool {
        Self::is_builtin(name) || self.definitions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MacroDescriptor> {
        self.definitions.get(name)
    }

    /// Inserts a new definition. Returns `false` (and leaves the table
    /// untouched) if the name is already defined or is the built-in
    /// `__LINE__`, which the caller reports as `MacroAlreadyDefined`.
    pub fn define(&mut self, descriptor: MacroDescriptor) -> bool {
        if self.contains(&descriptor.name) {
            return false;
        }
        self.definitions.insert(descriptor.name.clone(), descriptor);
        true
    }

    /// Removes a definition. Returns `false` if the name was not
    /// defined (the caller reports `UndefinedMacro`).
    pub fn undef(&mut self, name: &str) -> bool {
        self.definitions.remove(name).is_some()
    }

    /// Read-only snapshot of the currently defined macro names, for
    /// `Preprocessor::symbol_table`.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}

/// Walks a function-like macro's body, replacing each identifier token
/// whose text names a parameter with the raw tokens captured for that
/// argument. No rescan is performed here — substituted text only
/// becomes a candidate for further expansion once the caller pushes
/// the result back through the scanner's lookahead (§4.3.2).
pub fn substitute_call(descriptor: &MacroDescriptor, args: &[Vec<Token>]) -> Vec<Token> {
    let params = descriptor
        .params
        .as_ref()
        .expect("substitute_call requires a function-like macro");
    let mut out = Vec::with_capacity(descriptor.body.len());
    for tok in &descriptor.body {
        if tok.kind == TokenKind::Identifier {
            if let Some(index) = params.iter().position(|p| p == &tok.text) {
                if let Some(arg) = args.get(index) {
                    out.extend(arg.iter().cloned());
                    continue;
                }
            }
        }
        out.push(tok.clone());
    }
    out
}

/// The set of macro names currently being expanded, used to suppress
/// unbounded self-reference and mutual recursion (see crate docs).
#[derive(Debug, Default)]
pub struct ExpansionContext {
    active: Vec<Identifier>,
}

impl ExpansionContext {
    pub fn new() -> ExpansionContext {
        ExpansionContext { active: Vec::new() }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.active.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn enter(&mut self, name: impl Into<String>) {
        self.active.push(name.into());
    }

    /// Removes the most recent occurrence of `name`. Called when the
    /// expander consumes the matching `reject_macro` sentinel.
    pub fn leave(&mut self, name: &str) {
        if let Some(pos) = self.active.iter().rposition(|n| n == name) {
            self.active.remove(pos);
        }
    }
}
