//! The main engine: ties the scanner, macro table, conditional stack
//! and expression evaluator together into `Preprocessor::process`.

use std::collections::HashMap;

use log::{debug, trace};

use crate::args::capture_macro_arguments;
use crate::conditional::ConditionalStack;
use crate::error::{ErrorKind, ErrorRecord};
use crate::expr;
use crate::macros::{substitute_call, ExpansionContext, MacroDescriptor, MacroTable};
use crate::options::Options;
use crate::scanner::Scanner;
use crate::stream::InputStream;
use crate::token::{Token, TokenKind};

type CustomDirectiveHandler = Box<dyn FnMut(&mut Preprocessor, &mut Scanner, &str) -> String>;

/// The engine. Owns the macro table, the conditional stack, and the
/// scanner it drives; `process` runs the whole document to completion
/// and returns the expanded text.
pub struct Preprocessor {
    // `Option` so a custom directive handler can be handed `&mut
    // Scanner` directly alongside `&mut Preprocessor` without aliasing
    // the same field twice — see `handle_custom_directive`.
    scanner: Option<Scanner>,
    macros: MacroTable,
    context: ExpansionContext,
    conditionals: ConditionalStack,
    output: String,
    skip_comments: bool,
    error_sink: Box<dyn FnMut(ErrorRecord)>,
    include_resolver: Box<dyn FnMut(&str, bool) -> Option<Box<dyn InputStream>>>,
    custom_directives: HashMap<String, CustomDirectiveHandler>,
}

impl Preprocessor {
    pub fn new(root: Box<dyn InputStream>, options: Options) -> Preprocessor {
        let mut macros = MacroTable::new();
        for descriptor in options.user_defines {
            macros.define(descriptor);
        }
        Preprocessor {
            scanner: Some(Scanner::new(root)),
            macros,
            context: ExpansionContext::new(),
            conditionals: ConditionalStack::new(),
            output: String::new(),
            skip_comments: options.skip_comments,
            error_sink: options.error_sink,
            include_resolver: options.include_resolver,
            custom_directives: HashMap::new(),
        }
    }

    pub fn add_custom_directive(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut Preprocessor, &mut Scanner, &str) -> String + 'static,
    ) {
        let name = name.into();
        self.scanner().add_custom_directive(name.clone());
        self.custom_directives.insert(name, Box::new(handler));
    }

    pub fn symbol_table(&self) -> Vec<String> {
        self.macros.names().map(String::from).collect()
    }

    pub fn process(&mut self) -> String {
        loop {
            let token = self.scanner().next_token();
            if token.is_end() {
                break;
            }
            self.dispatch(token);
        }
        if !self.conditionals.is_empty() {
            debug!("expander: residual conditional frames discarded at end of input");
        }
        std::mem::take(&mut self.output)
    }

    fn scanner(&mut self) -> &mut Scanner {
        self.scanner
            .as_mut()
            .expect("scanner temporarily taken by a custom directive handler")
    }

    fn should_skip(&self) -> bool {
        self.conditionals.should_skip_output()
    }

    fn report_error(&mut self, kind: ErrorKind, line: usize) {
        debug!("expander: {} at line {}", kind, line);
        (self.error_sink)(ErrorRecord::new(kind, line));
    }

    fn append_raw(&mut self, text: &str) {
        if !self.should_skip() {
            self.output.push_str(text);
        }
    }

    fn dispatch(&mut self, token: Token) {
        match token.kind {
            TokenKind::Define => self.handle_define(token.line),
            TokenKind::Undef => self.handle_undef(token.line),
            TokenKind::If => self.handle_if(),
            TokenKind::Ifdef => self.handle_ifdef(true),
            TokenKind::Ifndef => self.handle_ifdef(false),
            TokenKind::Elif => self.handle_elif(token.line),
            TokenKind::Else => self.handle_else(token.line),
            TokenKind::Endif => self.handle_endif(token.line),
            TokenKind::Include => self.handle_include(token.line),
            TokenKind::Identifier => self.handle_identifier(token),
            TokenKind::RejectMacro => self.context.leave(&token.text),
            TokenKind::Concat => self.handle_concat(),
            TokenKind::Stringize => self.handle_stringize(token.line),
            TokenKind::CustomDirective => self.handle_custom_directive(token),
            TokenKind::Commentary => {
                if !self.skip_comments {
                    self.append_raw(&token.text);
                }
            }
            TokenKind::End => {}
            _ => self.append_raw(&token.text),
        }
    }

    // -- directive line helpers -----------------------------------------

    fn skip_spaces(&mut self) {
        while self.scanner().peek_token(0).kind == TokenKind::Space {
            self.scanner().next_token();
        }
    }

    fn skip_to_newline(&mut self) {
        loop {
            let tok = self.scanner().next_token();
            if matches!(tok.kind, TokenKind::Newline | TokenKind::End) {
                break;
            }
        }
    }

    /// Captures the rest of a directive line with all whitespace
    /// stripped — used by `#if`/`#elif`/`#ifdef`/`#ifndef`, none of
    /// which care about internal spacing.
    fn capture_directive_line(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.scanner().next_token();
            if matches!(tok.kind, TokenKind::Newline | TokenKind::End) {
                break;
            }
            if tok.kind == TokenKind::Space {
                continue;
            }
            tokens.push(tok);
        }
        tokens
    }

    // -- #define / #undef -------------------------------------------------

    fn handle_define(&mut self, line: usize) {
        let sp = self.scanner().next_token();
        if sp.kind != TokenKind::Space {
            self.report_error(ErrorKind::InvalidMacroDefinition, line);
            self.skip_to_newline();
            return;
        }
        let name_tok = self.scanner().next_token();
        if name_tok.kind != TokenKind::Identifier {
            self.report_error(ErrorKind::InvalidMacroDefinition, line);
            self.skip_to_newline();
            return;
        }
        let name = name_tok.text.clone();

        let params = if self.scanner().peek_token(0).kind == TokenKind::LeftParen {
            self.scanner().next_token();
            match self.parse_param_list(line) {
                Some(params) => Some(params),
                None => {
                    self.skip_to_newline();
                    return;
                }
            }
        } else {
            None
        };

        let body = self.capture_body(line, &name);
        let descriptor = match params {
            Some(params) => MacroDescriptor::function_like(name, params, body),
            None => MacroDescriptor::object_like(name, body),
        };

        if self.should_skip() {
            return;
        }
        if !self.macros.define(descriptor) {
            self.report_error(ErrorKind::MacroAlreadyDefined, line);
        } else {
            trace!("expander: defined macro {}", self.macros.names().count());
        }
    }

    fn parse_param_list(&mut self, line: usize) -> Option<Vec<String>> {
        let mut params = Vec::new();
        self.skip_spaces();
        if self.scanner().peek_token(0).kind == TokenKind::RightParen {
            self.scanner().next_token();
            return Some(params);
        }
        loop {
            self.skip_spaces();
            let tok = self.scanner().next_token();
            if tok.kind != TokenKind::Identifier {
                self.report_error(ErrorKind::InvalidMacroDefinition, line);
                return None;
            }
            params.push(tok.text);
            self.skip_spaces();
            let sep = self.scanner().next_token();
            match sep.kind {
                TokenKind::Comma => continue,
                TokenKind::RightParen => break,
                _ => {
                    self.report_error(ErrorKind::InvalidMacroDefinition, line);
                    return None;
                }
            }
        }
        Some(params)
    }

    /// An immediate newline after the header is the bodyless-define
    /// case: the macro is given the literal body `1`.
    fn capture_body(&mut self, line: usize, name: &str) -> Vec<Token> {
        self.skip_spaces();
        if matches!(
            self.scanner().peek_token(0).kind,
            TokenKind::Newline | TokenKind::End
        ) {
            self.scanner().next_token();
            return vec![Token::new(TokenKind::Number, "1", line, 0)];
        }
        let mut body = Vec::new();
        loop {
            let tok = self.scanner().next_token();
            if matches!(tok.kind, TokenKind::Newline | TokenKind::End) {
                break;
            }
            if tok.kind == TokenKind::Identifier && tok.text == name {
                body.push(Token::new(TokenKind::Blob, tok.text, tok.line, tok.column));
            } else {
                body.push(tok);
            }
        }
        body
    }

    fn handle_undef(&mut self, line: usize) {
        self.skip_spaces();
        let name_tok = self.scanner().next_token();
        if name_tok.kind != TokenKind::Identifier {
            self.report_error(ErrorKind::UnexpectedToken, line);
            // `name_tok` itself may already be the line's `Newline`/`End`;
            // only resync to the next newline if it isn't, so a
            // malformed header never eats the following physical line.
            if !matches!(name_tok.kind, TokenKind::Newline | TokenKind::End) {
                self.skip_to_newline();
            }
            return;
        }
        let name = name_tok.text.clone();
        self.skip_to_newline();
        if self.should_skip() {
            return;
        }
        if !self.macros.undef(&name) {
            self.report_error(ErrorKind::UndefinedMacro, line);
        }
    }

    // -- conditionals -------------------------------------------------

    fn handle_if(&mut self) {
        let tokens = self.capture_directive_line();
        let value = expr::evaluate(&tokens, &self.macros);
        self.conditionals.push(value != 0);
    }

    fn handle_ifdef(&mut self, want_defined: bool) {
        let tokens = self.capture_directive_line();
        let name = tokens.first().map(|t| t.text.as_str()).unwrap_or("");
        let defined = self.macros.contains(name);
        self.conditionals.push(defined == want_defined);
    }

    fn handle_elif(&mut self, line: usize) {
        let tokens = self.capture_directive_line();
        let value = expr::evaluate(&tokens, &self.macros);
        if let Err(kind) = self.conditionals.elif(value != 0) {
            self.report_error(kind, line);
        }
    }

    fn handle_else(&mut self, line: usize) {
        self.skip_to_newline();
        if let Err(kind) = self.conditionals.else_branch() {
            self.report_error(kind, line);
        }
    }

    fn handle_endif(&mut self, line: usize) {
        self.skip_to_newline();
        if let Err(kind) = self.conditionals.pop() {
            self.report_error(kind, line);
        }
    }

    // -- #include -------------------------------------------------------

    fn handle_include(&mut self, line: usize) {
        self.skip_spaces();
        let opener = self.scanner().next_token();
        let (is_system, closing) = match opener.kind {
            TokenKind::LessThan => (true, TokenKind::GreaterThan),
            TokenKind::Quote => (false, TokenKind::Quote),
            _ => {
                self.report_error(ErrorKind::InvalidIncludeDirective, line);
                self.skip_to_newline();
                return;
            }
        };
        let mut path = String::new();
        loop {
            let tok = self.scanner().next_token();
            if tok.kind == closing {
                break;
            }
            if matches!(tok.kind, TokenKind::Newline | TokenKind::End) {
                self.report_error(ErrorKind::UnexpectedEndOfIncludePath, line);
                return;
            }
            path.push_str(&tok.text);
        }
        self.skip_to_newline();
        if self.should_skip() {
            return;
        }
        if let Some(stream) = (self.include_resolver)(&path, is_system) {
            self.scanner().push_stream(stream);
        }
    }

    // -- identifier expansion -------------------------------------------

    /// Whether the next non-space token in the lookahead is `##`. An
    /// identifier that is the left operand of concatenation is never
    /// expanded (§4.3.2), regardless of whitespace sitting between it
    /// and the operator.
    fn next_significant_is_concat(&mut self) -> bool {
        let mut offset = 0;
        while self.scanner().peek_token(offset).kind == TokenKind::Space {
            offset += 1;
        }
        self.scanner().peek_token(offset).kind == TokenKind::Concat
    }

    fn handle_identifier(&mut self, token: Token) {
        if self.should_skip() {
            return;
        }
        let name = token.text.clone();
        let suppressed_by_concat = self.next_significant_is_concat();

        if MacroTable::is_builtin(&name) {
            if suppressed_by_concat {
                self.output.push_str(&name);
            } else {
                self.output.push_str(&token.line.to_string());
            }
            return;
        }
        if self.context.contains(&name) {
            self.output.push_str(&name);
            return;
        }
        let Some(descriptor) = self.macros.get(&name).cloned() else {
            self.output.push_str(&name);
            return;
        };

        if descriptor.is_function_like() {
            self.expand_function_like(&descriptor, token);
        } else {
            if suppressed_by_concat {
                self.output.push_str(&name);
                return;
            }
            let mut replacement = descriptor.body.clone();
            replacement.push(Token::new(
                TokenKind::RejectMacro,
                name.clone(),
                token.line,
                token.column,
            ));
            self.context.enter(name);
            self.scanner().push_tokens_front(replacement);
        }
    }

    fn expand_function_like(&mut self, descriptor: &MacroDescriptor, name_token: Token) {
        let mut offset = 0;
        while self.scanner().peek_token(offset).kind == TokenKind::Space {
            offset += 1;
        }
        if self.scanner().peek_token(offset).kind != TokenKind::LeftParen {
            self.output.push_str(&name_token.text);
            return;
        }
        for _ in 0..=offset {
            self.scanner().next_token();
        }

        let args = capture_macro_arguments(|| self.scanner().next_token());
        let params_len = descriptor.params.as_ref().unwrap().len();
        if args.len() != params_len {
            self.report_error(ErrorKind::InconsistentMacroArity, name_token.line);
            return;
        }

        let name = descriptor.name.clone();
        let mut replacement = substitute_call(descriptor, &args);
        replacement.push(Token::new(
            TokenKind::RejectMacro,
            name.clone(),
            name_token.line,
            name_token.column,
        ));
        self.context.enter(name);
        self.scanner().push_tokens_front(replacement);
    }

    // -- macro operators --------------------------------------------------

    fn handle_concat(&mut self) {
        self.skip_spaces();
        let next = self.scanner().next_token();
        if self.should_skip() {
            return;
        }
        while self.output.ends_with(' ') {
            self.output.pop();
        }
        self.output.push_str(&next.text);
    }

    fn handle_stringize(&mut self, line: usize) {
        self.skip_spaces();
        let next = self.scanner().next_token();
        if self.should_skip() {
            return;
        }
        if self.context.is_empty() {
            self.report_error(ErrorKind::IncorrectOperationUsage, line);
            return;
        }
        self.output.push('"');
        self.output.push_str(&next.text);
        self.output.push('"');
    }

    fn handle_custom_directive(&mut self, token: Token) {
        let name = token.text.clone();
        let Some(mut handler) = self.custom_directives.remove(&name) else {
            self.report_error(ErrorKind::UndefinedDirective, token.line);
            return;
        };
        let mut scanner = self
            .scanner
            .take()
            .expect("scanner missing during custom directive dispatch");
        let context_snapshot = self.output.clone();
        let text = handler(self, &mut scanner, &context_snapshot);
        self.scanner = Some(scanner);
        self.custom_directives.insert(name, handler);
        self.append_raw(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ignore_errors, no_includes};
    use crate::stream::StringStream;

    fn process(src: &str) -> String {
        let mut pp = Preprocessor::new(
            Box::new(StringStream::new(src)),
            Options::new(ignore_errors, no_includes),
        );
        pp.process()
    }

    #[test]
    fn bodyless_define() {
        assert_eq!(process("#define VALUE\nVALUE"), "1");
    }

    #[test]
    fn stringize_operator() {
        assert_eq!(process("#define FOO(Name) #Name\n FOO(Text)"), " \"Text\"");
    }

    #[test]
    fn builtin_line() {
        assert_eq!(process("__LINE__\n__LINE__\n__LINE__"), "1\n2\n3");
    }

    #[test]
    fn elif_selects_matching_branch() {
        assert_eq!(
            process("#if 0\none\n#elif 1\ntwo\n#else\nthree\n#endif"),
            "two\n"
        );
    }

    #[test]
    fn expression_evaluator_runs_macro_call() {
        let src = "#define A 1\n#define AND(X,Y) (X && Y)\n#if AND(A,0)\nP\n#else\nQ\n#endif";
        assert_eq!(process(src), "Q\n");
    }

    #[test]
    fn concat_does_not_prescan_operands() {
        let src = "#define STRCAT(a,b) a ## b\nSTRCAT(__LINE__,b)";
        assert_eq!(process(src), "__LINE__b");
    }

    #[test]
    fn macro_free_input_is_idempotent() {
        let src = "int main() { return 0 + 1; }\n";
        assert_eq!(process(src), src);
    }

    #[test]
    fn conditional_skip_soundness() {
        assert_eq!(process("before\n#if 0\nhidden\n#endif\nafter"), "before\nafter");
    }

    #[test]
    fn self_referential_macro_terminates() {
        assert_eq!(process("#define X X + 1\nX"), "X + 1");
    }

    #[test]
    fn undef_removes_macro() {
        assert_eq!(process("#define A 1\n#undef A\nA"), "A");
    }

    #[test]
    fn object_like_macro_before_concat_is_not_expanded() {
        let src = "#define A 1\n#define J(x) x ## A\nJ(z)";
        assert_eq!(process(src), "zA");
    }

    #[test]
    fn concat_suppresses_expansion_across_intervening_whitespace() {
        let src = "#define A 1\nA   ##   B";
        assert_eq!(process(src), "AB");
    }

    #[test]
    fn malformed_undef_does_not_swallow_the_following_line() {
        let mut seen = Vec::new();
        let out = {
            let mut pp = Preprocessor::new(
                Box::new(StringStream::new("#undef\nFOO\n")),
                Options::new(|record| seen.push(record.kind), no_includes),
            );
            pp.process()
        };
        assert_eq!(out, "FOO\n");
        assert_eq!(seen, vec![ErrorKind::UnexpectedToken]);
    }

    #[test]
    fn function_like_macro_without_call_passes_through() {
        assert_eq!(process("#define F(x) x\nF"), "F");
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let mut seen = Vec::new();
        {
            let mut pp = Preprocessor::new(
                Box::new(StringStream::new("#define F(a,b) a\nF(1)")),
                Options::new(|record| seen.push(record.kind), no_includes),
            );
            pp.process();
        }
        assert_eq!(seen, vec![ErrorKind::InconsistentMacroArity]);
    }

    #[test]
    fn symbol_table_reflects_defines_and_undefs() {
        let mut pp = Preprocessor::new(
            Box::new(StringStream::new("#define A 1\n#define B 2\n#undef A\n")),
            Options::new(ignore_errors, no_includes),
        );
        pp.process();
        let table = pp.symbol_table();
        assert!(!table.contains(&"A".to_string()));
        assert!(table.contains(&"B".to_string()));
    }
}
