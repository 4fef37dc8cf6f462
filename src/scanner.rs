//! The token scanner: multi-stream input stack, backslash-newline
//! continuation, comment extraction, and the token-priority chain of
//! §4.2.

use std::collections::{HashSet, VecDeque};

use log::trace;

use crate::stream::InputStream;
use crate::token::{lookup_directive, is_keyword, Token, TokenKind};

const SEPARATORS: &[char] = &[
    ',', '(', ')', '[', ']', '<', '>', '"', '+', '-', '*', '/', '&', '|', '!', '=', ';',
];

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

pub struct Scanner {
    streams: Vec<Box<dyn InputStream>>,
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    lookahead: VecDeque<Token>,
    custom_directives: HashSet<String>,
}

impl Scanner {
    /// Creates a scanner with a single root stream already pushed.
    pub fn new(root: Box<dyn InputStream>) -> Scanner {
        Scanner {
            streams: vec![root],
            chars: Vec::new(),
            pos: 0,
            line: 0,
            column: 0,
            lookahead: VecDeque::new(),
            custom_directives: HashSet::new(),
        }
    }

    pub fn add_custom_directive(&mut self, name: impl Into<String>) {
        self.custom_directives.insert(name.into());
    }

    pub fn push_stream(&mut self, stream: Box<dyn InputStream>) {
        self.streams.push(stream);
        trace!("scanner: push_stream depth={}", self.streams.len());
    }

    pub fn pop_stream(&mut self) {
        self.streams.pop();
        trace!("scanner: pop_stream depth={}", self.streams.len());
    }

    pub fn current_line(&self) -> usize {
        self.line
    }

    pub fn current_column(&self) -> usize {
        self.column
    }

    pub fn push_tokens_front(&mut self, tokens: Vec<Token>) {
        for token in tokens.into_iter().rev() {
            self.lookahead.push_front(token);
        }
    }

    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.lookahead.pop_front() {
            return token;
        }
        self.scan_token()
    }

    pub fn peek_token(&mut self, offset: usize) -> Token {
        while self.lookahead.len() <= offset {
            let at_end = self.lookahead.back().map(Token::is_end).unwrap_or(false);
            if at_end {
                break;
            }
            let token = self.scan_token();
            self.lookahead.push_back(token);
        }
        self.lookahead
            .get(offset)
            .cloned()
            .unwrap_or_else(|| Token::end(self.line, self.column))
    }

    // -- buffer management -------------------------------------------------

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += 1;
        if c == '\n' {
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Ensures at least one character is available in `self.chars`,
    /// pulling and splicing physical lines (following backslash-newline
    /// continuations) as needed. Returns `false` once every stream is
    /// exhausted.
    fn ensure_buffer(&mut self) -> bool {
        if self.pos < self.chars.len() {
            return true;
        }
        self.fill_logical_line()
    }

    fn fill_logical_line(&mut self) -> bool {
        loop {
            let Some(line) = self.read_physical_line() else {
                return false;
            };
            self.line += 1;
            self.column = 0;
            self.pos = 0;
            self.chars = line.chars().collect();

            while trailing_backslash_is_continuation(&self.chars) {
                // Drop the line's own trailing newline, then the
                // continuation backslash itself, before splicing in the
                // next physical line.
                if self.chars.last() == Some(&'\n') {
                    self.chars.pop();
                }
                if self.chars.last() == Some(&'\r') {
                    self.chars.pop();
                }
                self.chars.pop();
                match self.read_physical_line() {
                    Some(next) => {
                        self.line += 1;
                        self.chars.extend(next.chars());
                    }
                    None => break,
                }
            }
            if !self.chars.is_empty() {
                return true;
            }
            // An empty physical line (e.g. the stream reported
            // has_next_line() true but then produced nothing) — loop
            // to try the next stream/line rather than emit a phantom
            // empty token sequence.
        }
    }

    /// Pops exhausted streams and returns the next non-empty physical
    /// line from whichever stream is current, or `None` once every
    /// stream is drained.
    fn read_physical_line(&mut self) -> Option<String> {
        loop {
            let stream = self.streams.last_mut()?;
            if stream.has_next_line() {
                return Some(stream.read_line());
            }
            self.pop_stream();
            if self.streams.is_empty() {
                return None;
            }
        }
    }

    // -- token scanning ------------------------------------------------

    fn scan_token(&mut self) -> Token {
        if !self.ensure_buffer() {
            return Token::end(self.line, self.column);
        }
        let start_line = self.line;
        let start_col = self.column;

        match self.peek_char().unwrap() {
            '/' if self.peek_char_at(1) == Some('/') => self.scan_line_comment(start_line, start_col),
            '/' if self.peek_char_at(1) == Some('*') => self.scan_block_comment(start_line, start_col),
            '\n' => {
                self.advance_char();
                Token::new(TokenKind::Newline, "\n", start_line, start_col)
            }
            '\r' if self.peek_char_at(1) == Some('\n') => {
                self.advance_char();
                self.advance_char();
                Token::new(TokenKind::Newline, "\r\n", start_line, start_col)
            }
            c if c.is_whitespace() => {
                self.advance_char();
                Token::new(TokenKind::Space, c.to_string(), start_line, start_col)
            }
            '#' => self.scan_hash(start_line, start_col),
            c if c.is_ascii_digit() => self.scan_number(start_line, start_col),
            c if is_ident_start(c) => self.scan_identifier(start_line, start_col),
            c if SEPARATORS.contains(&c) => self.scan_punct(start_line, start_col),
            _ => self.scan_blob(start_line, start_col),
        }
    }

    fn scan_line_comment(&mut self, start_line: usize, start_col: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.advance_char();
        }
        Token::new(TokenKind::Commentary, text, start_line, start_col)
    }

    fn scan_block_comment(&mut self, start_line: usize, start_col: usize) -> Token {
        let mut text = String::new();
        text.push(self.advance_char().unwrap()); // '/'
        text.push(self.advance_char().unwrap()); // '*'
        let mut depth: u32 = 1;

        loop {
            if self.peek_char().is_none() {
                if !self.ensure_buffer() {
                    // Unterminated comment at true EOF: close silently
                    // (see design notes).
                    break;
                }
                continue;
            }
            if self.peek_char() == Some('/') && self.peek_char_at(1) == Some('*') {
                text.push(self.advance_char().unwrap());
                text.push(self.advance_char().unwrap());
                depth += 1;
                continue;
            }
            if self.peek_char() == Some('*') && self.peek_char_at(1) == Some('/') {
                text.push(self.advance_char().unwrap());
                text.push(self.advance_char().unwrap());
                depth -= 1;
                if depth == 0 {
                    break;
                }
                continue;
            }
            text.push(self.advance_char().unwrap());
        }

        Token::new(TokenKind::Commentary, text, start_line, start_col)
    }

    fn scan_hash(&mut self, start_line: usize, start_col: usize) -> Token {
        self.advance_char(); // consume '#'
        let restore_pos = self.pos;
        let restore_col = self.column;

        while matches!(self.peek_char(), Some(c) if c == ' ' || c == '\t') {
            self.advance_char();
        }
        let name = self.scan_ident_chars();
        if !name.is_empty() {
            if let Some(kind) = lookup_directive(&name) {
                return Token::new(kind, name, start_line, start_col);
            }
            if self.custom_directives.contains(&name) {
                return Token::new(TokenKind::CustomDirective, name, start_line, start_col);
            }
        }

        self.pos = restore_pos;
        self.column = restore_col;
        match self.peek_char() {
            Some('#') => {
                self.advance_char();
                Token::new(TokenKind::Concat, "##", start_line, start_col)
            }
            Some(c) if c != ' ' && c != '\t' => {
                Token::new(TokenKind::Stringize, "#", start_line, start_col)
            }
            _ => Token::new(TokenKind::Blob, "#", start_line, start_col),
        }
    }

    fn scan_ident_chars(&mut self) -> String {
        let mut text = String::new();
        if !matches!(self.peek_char(), Some(c) if is_ident_start(c)) {
            return text;
        }
        while let Some(c) = self.peek_char() {
            if !is_ident_continue(c) {
                break;
            }
            text.push(c);
            self.advance_char();
        }
        text
    }

    fn scan_number(&mut self, start_line: usize, start_col: usize) -> Token {
        let mut text = String::new();
        if self.peek_char() == Some('0') && matches!(self.peek_char_at(1), Some('x') | Some('X')) {
            text.push(self.advance_char().unwrap());
            text.push(self.advance_char().unwrap());
            while matches!(self.peek_char(), Some(c) if c.is_ascii_hexdigit()) {
                text.push(self.advance_char().unwrap());
            }
            return Token::new(TokenKind::Number, text, start_line, start_col);
        }
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance_char().unwrap());
        }
        Token::new(TokenKind::Number, text, start_line, start_col)
    }

    fn scan_identifier(&mut self, start_line: usize, start_col: usize) -> Token {
        let text = self.scan_ident_chars();
        let kind = if is_keyword(&text) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, text, start_line, start_col)
    }

    fn scan_punct(&mut self, start_line: usize, start_col: usize) -> Token {
        let c = self.advance_char().unwrap();
        let two = |scanner: &mut Scanner, expect: char| -> bool {
            if scanner.peek_char() == Some(expect) {
                scanner.advance_char();
                true
            } else {
                false
            }
        };
        let (kind, second) = match c {
            ',' => (TokenKind::Comma, None),
            '(' => (TokenKind::LeftParen, None),
            ')' => (TokenKind::RightParen, None),
            '[' => (TokenKind::LeftBracket, None),
            ']' => (TokenKind::RightBracket, None),
            '"' => (TokenKind::Quote, None),
            ';' => (TokenKind::Semicolon, None),
            '+' => (TokenKind::Plus, None),
            '-' => (TokenKind::Minus, None),
            '*' => (TokenKind::Star, None),
            '/' => (TokenKind::Slash, None),
            '<' => {
                if two(self, '<') {
                    (TokenKind::ShiftLeft, Some('<'))
                } else if two(self, '=') {
                    (TokenKind::LessEq, Some('='))
                } else {
                    (TokenKind::LessThan, None)
                }
            }
            '>' => {
                if two(self, '>') {
                    (TokenKind::ShiftRight, Some('>'))
                } else if two(self, '=') {
                    (TokenKind::GreaterEq, Some('='))
                } else {
                    (TokenKind::GreaterThan, None)
                }
            }
            '&' => {
                if two(self, '&') {
                    (TokenKind::AndAnd, Some('&'))
                } else {
                    (TokenKind::Amp, None)
                }
            }
            '|' => {
                if two(self, '|') {
                    (TokenKind::OrOr, Some('|'))
                } else {
                    (TokenKind::Pipe, None)
                }
            }
            '!' => {
                if two(self, '=') {
                    (TokenKind::NotEq, Some('='))
                } else {
                    (TokenKind::Bang, None)
                }
            }
            '=' => {
                if two(self, '=') {
                    (TokenKind::EqEq, Some('='))
                } else {
                    return Token::new(TokenKind::Blob, "=", start_line, start_col);
                }
            }
            _ => unreachable!("scan_punct called on non-separator"),
        };
        let mut text = c.to_string();
        if let Some(second) = second {
            text.push(second);
        }
        Token::new(kind, text, start_line, start_col)
    }

    fn scan_blob(&mut self, start_line: usize, start_col: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek_char() {
            if is_boundary_char(c) {
                break;
            }
            text.push(c);
            self.advance_char();
        }
        if text.is_empty() {
            // Defensive: never silently skip an unclassified character.
            text.push(self.advance_char().unwrap());
        }
        Token::new(TokenKind::Blob, text, start_line, start_col)
    }
}

fn is_boundary_char(c: char) -> bool {
    c.is_ascii_digit() || is_ident_start(c) || SEPARATORS.contains(&c) || c == '#' || c.is_whitespace()
}

/// A physical line (without its own trailing `\n`/`\r\n`) continues
/// onto the next one when its last character is a backslash that is
/// not itself escaped by a preceding backslash — i.e. the run of
/// trailing backslashes has odd length. An even-length run means the
/// final backslash is escaped (e.g. the end of a string literal's
/// `\\`) and does not splice lines.
fn trailing_backslash_is_continuation(chars: &[char]) -> bool {
    let content_end = match chars.len() {
        0 => return false,
        n if chars[n - 1] == '\n' => {
            if n >= 2 && chars[n - 2] == '\r' {
                n - 2
            } else {
                n - 1
            }
        }
        n => n,
    };
    let mut count = 0;
    let mut i = content_end;
    while i > 0 && chars[i - 1] == '\\' {
        count += 1;
        i -= 1;
    }
    count % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StringStream;

    fn scanner(src: &str) -> Scanner {
        Scanner::new(Box::new(StringStream::new(src)))
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut s = scanner(src);
        let mut out = Vec::new();
        loop {
            let tok = s.next_token();
            if tok.is_end() {
                break;
            }
            out.push(tok.kind);
        }
        out
    }

    #[test]
    fn identifiers_and_numbers() {
        let mut s = scanner("foo 123");
        assert_eq!(s.next_token().kind, TokenKind::Identifier);
        assert_eq!(s.next_token().kind, TokenKind::Space);
        let n = s.next_token();
        assert_eq!(n.kind, TokenKind::Number);
        assert_eq!(n.text, "123");
    }

    #[test]
    fn fractional_number_is_not_fused() {
        let mut s = scanner("1.0001");
        let a = s.next_token();
        assert_eq!(a.kind, TokenKind::Number);
        assert_eq!(a.text, "1");
        let b = s.next_token();
        assert_eq!(b.kind, TokenKind::Blob);
        assert_eq!(b.text, ".");
        let c = s.next_token();
        assert_eq!(c.kind, TokenKind::Number);
        assert_eq!(c.text, "0001");
    }

    #[test]
    fn hex_number() {
        let mut s = scanner("0x1A");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Number);
        assert_eq!(t.text, "0x1A");
    }

    #[test]
    fn two_char_operators_are_greedy() {
        assert_eq!(
            kinds("&& || == != <= >= << >>"),
            vec![
                TokenKind::AndAnd,
                TokenKind::Space,
                TokenKind::OrOr,
                TokenKind::Space,
                TokenKind::EqEq,
                TokenKind::Space,
                TokenKind::NotEq,
                TokenKind::Space,
                TokenKind::LessEq,
                TokenKind::Space,
                TokenKind::GreaterEq,
                TokenKind::Space,
                TokenKind::ShiftLeft,
                TokenKind::Space,
                TokenKind::ShiftRight,
            ]
        );
    }

    #[test]
    fn bare_equals_is_a_blob() {
        let mut s = scanner("=");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Blob);
        assert_eq!(t.text, "=");
    }

    #[test]
    fn directive_is_recognised_after_hash() {
        let mut s = scanner("#define");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Define);
    }

    #[test]
    fn directive_with_interior_whitespace() {
        let mut s = scanner("#   include");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Include);
    }

    #[test]
    fn stringize_and_concat() {
        let mut s = scanner("#X ##Y");
        assert_eq!(s.next_token().kind, TokenKind::Stringize);
        let x = s.next_token();
        assert_eq!(x.kind, TokenKind::Identifier);
        assert_eq!(x.text, "X");
        assert_eq!(s.next_token().kind, TokenKind::Space);
        assert_eq!(s.next_token().kind, TokenKind::Concat);
        let y = s.next_token();
        assert_eq!(y.text, "Y");
    }

    #[test]
    fn lone_hash_before_space_is_a_blob() {
        let mut s = scanner("# ");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Blob);
        assert_eq!(t.text, "#");
    }

    #[test]
    fn line_comment_runs_to_newline() {
        let mut s = scanner("// hi\nnext");
        let c = s.next_token();
        assert_eq!(c.kind, TokenKind::Commentary);
        assert_eq!(c.text, "// hi");
        assert_eq!(s.next_token().kind, TokenKind::Newline);
        assert_eq!(s.next_token().kind, TokenKind::Identifier);
    }

    #[test]
    fn block_comment_spans_lines_and_nests() {
        let mut s = scanner("/* a /* b */ c */x");
        let c = s.next_token();
        assert_eq!(c.kind, TokenKind::Commentary);
        assert_eq!(c.text, "/* a /* b */ c */");
        let x = s.next_token();
        assert_eq!(x.text, "x");
    }

    #[test]
    fn unterminated_block_comment_closes_silently_at_eof() {
        let mut s = scanner("/* never closes");
        let c = s.next_token();
        assert_eq!(c.kind, TokenKind::Commentary);
        assert_eq!(s.next_token().kind, TokenKind::End);
    }

    #[test]
    fn line_continuation_joins_physical_lines() {
        let mut s = scanner("foo\\\nbar\n");
        let a = s.next_token();
        assert_eq!(a.kind, TokenKind::Identifier);
        assert_eq!(a.text, "foobar");
    }

    #[test]
    fn line_index_increments_per_physical_line() {
        let mut s = scanner("a\nb\nc");
        assert_eq!(s.next_token().line, 1);
        s.next_token(); // newline
        assert_eq!(s.next_token().line, 2);
        s.next_token();
        assert_eq!(s.next_token().line, 3);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut s = scanner("ab");
        let peeked = s.peek_token(0);
        assert_eq!(peeked.kind, TokenKind::Identifier);
        let next = s.next_token();
        assert_eq!(next.kind, peeked.kind);
        assert_eq!(next.text, peeked.text);
    }

    #[test]
    fn push_tokens_front_is_seen_before_fresh_tokens() {
        let mut s = scanner("tail");
        s.push_tokens_front(vec![Token::new(TokenKind::Identifier, "head", 0, 0)]);
        assert_eq!(s.next_token().text, "head");
        assert_eq!(s.next_token().text, "tail");
    }

    #[test]
    fn custom_directive_is_recognised() {
        let mut s = scanner("#mydir");
        s.add_custom_directive("mydir");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::CustomDirective);
        assert_eq!(t.text, "mydir");
    }

    #[test]
    fn unknown_hash_name_is_not_a_directive() {
        let mut s = scanner("#bogus");
        let t = s.next_token();
        assert_eq!(t.kind, TokenKind::Stringize);
    }

    #[test]
    fn include_pushes_new_stream() {
        let mut s = scanner("outer");
        s.push_stream(Box::new(StringStream::new("inner")));
        let t = s.next_token();
        assert_eq!(t.text, "inner");
    }
}
