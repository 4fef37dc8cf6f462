//! The constant-expression evaluator driving `#if`/`#elif`.
//!
//! Structured as a `Parser` holding a cursor over an owned token slice
//! with one method per precedence level (see the design notes on
//! avoiding nested closures): this keeps the grammar testable without
//! going through the scanner or the expander's main loop.

use crate::args::capture_macro_arguments;
use crate::macros::{substitute_call, ExpansionContext, MacroTable};
use crate::token::{Token, TokenKind};

/// Evaluates a captured `#if`/`#elif` expression (whitespace already
/// stripped by the caller) against the current macro table. `0` is
/// false, anything else is true.
pub fn evaluate(tokens: &[Token], macros: &MacroTable) -> i64 {
    let mut guard = ExpansionContext::new();
    let mut parser = Parser {
        tokens,
        pos: 0,
        macros,
        guard: &mut guard,
    };
    parser.parse_or()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    macros: &'a MacroTable,
    guard: &'a mut ExpansionContext,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> i64 {
        let mut value = self.parse_and();
        while self.eat(TokenKind::OrOr) {
            let rhs = self.parse_and();
            value = bool_to_int(value != 0 || rhs != 0);
        }
        value
    }

    fn parse_and(&mut self) -> i64 {
        let mut value = self.parse_eq();
        while self.eat(TokenKind::AndAnd) {
            let rhs = self.parse_eq();
            value = bool_to_int(value != 0 && rhs != 0);
        }
        value
    }

    fn parse_eq(&mut self) -> i64 {
        let mut value = self.parse_cmp();
        loop {
            if self.eat(TokenKind::EqEq) {
                value = bool_to_int(value == self.parse_cmp());
            } else if self.eat(TokenKind::NotEq) {
                value = bool_to_int(value != self.parse_cmp());
            } else {
                break;
            }
        }
        value
    }

    fn parse_cmp(&mut self) -> i64 {
        let mut value = self.parse_add();
        loop {
            if self.eat(TokenKind::LessThan) {
                value = bool_to_int(value < self.parse_add());
            } else if self.eat(TokenKind::GreaterThan) {
                value = bool_to_int(value > self.parse_add());
            } else if self.eat(TokenKind::LessEq) {
                value = bool_to_int(value <= self.parse_add());
            } else if self.eat(TokenKind::GreaterEq) {
                value = bool_to_int(value >= self.parse_add());
            } else {
                break;
            }
        }
        value
    }

    fn parse_add(&mut self) -> i64 {
        let mut value = self.parse_mul();
        loop {
            if self.eat(TokenKind::Plus) {
                value += self.parse_mul();
            } else if self.eat(TokenKind::Minus) {
                value -= self.parse_mul();
            } else {
                break;
            }
        }
        value
    }

    fn parse_mul(&mut self) -> i64 {
        let mut value = self.parse_unary();
        loop {
            if self.eat(TokenKind::Star) {
                value *= self.parse_unary();
            } else if self.eat(TokenKind::Slash) {
                let rhs = self.parse_unary();
                value = if rhs == 0 { 0 } else { value / rhs };
            } else {
                break;
            }
        }
        value
    }

    fn parse_unary(&mut self) -> i64 {
        let mut negate = false;
        let mut invert = false;
        loop {
            if self.eat(TokenKind::Bang) {
                invert = !invert;
            } else if self.eat(TokenKind::Minus) {
                negate = !negate;
            } else {
                break;
            }
        }
        let mut value = self.parse_primary();
        if invert {
            value = bool_to_int(value == 0);
        }
        if negate {
            value = -value;
        }
        value
    }

    fn parse_primary(&mut self) -> i64 {
        match self.peek_kind() {
            Some(TokenKind::Number) => {
                let text = self.advance().unwrap().text.clone();
                parse_integer(&text)
            }
            Some(TokenKind::LeftParen) => {
                self.advance();
                let value = self.parse_or();
                self.eat(TokenKind::RightParen);
                value
            }
            Some(TokenKind::Identifier) if self.peek().unwrap().text == "defined" => {
                self.advance();
                self.eat(TokenKind::LeftParen);
                let name = self
                    .advance()
                    .map(|t| t.text.clone())
                    .unwrap_or_default();
                self.eat(TokenKind::RightParen);
                bool_to_int(self.macros.contains(&name))
            }
            Some(TokenKind::Identifier) => {
                let name = self.advance().unwrap().text.clone();
                self.eval_identifier(&name)
            }
            _ => {
                self.advance();
                0
            }
        }
    }

    fn eval_identifier(&mut self, name: &str) -> i64 {
        if crate::macros::MacroTable::is_builtin(name) {
            return parse_integer(&self.peek_builtin_line());
        }
        let Some(descriptor) = self.macros.get(name) else {
            return parse_integer(name);
        };
        if self.guard.contains(name) {
            return 0;
        }
        if descriptor.is_function_like() {
            if self.peek_kind() != Some(TokenKind::LeftParen) {
                return parse_integer(name);
            }
            self.advance(); // consume '('
            let args = capture_macro_arguments(|| {
                self.advance().cloned().unwrap_or(Token::end(0, 0))
            });
            let replacement = substitute_call(descriptor, &args);
            self.guard.enter(name.to_string());
            let value = evaluate_with_guard(&replacement, self.macros, self.guard);
            self.guard.leave(name);
            value
        } else {
            self.guard.enter(name.to_string());
            let value = evaluate_with_guard(&descriptor.body, self.macros, self.guard);
            self.guard.leave(name);
            value
        }
    }

    /// `__LINE__` has no source line in a captured expression slice;
    /// expressions that reference it fall back to `0` since the
    /// evaluator never sees the identifier's original position.
    fn peek_builtin_line(&self) -> String {
        "0".to_string()
    }
}

fn evaluate_with_guard(tokens: &[Token], macros: &MacroTable, guard: &mut ExpansionContext) -> i64 {
    let mut parser = Parser {
        tokens,
        pos: 0,
        macros,
        guard,
    };
    parser.parse_or()
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

/// "parse-as-integer-or-zero": honors a `0x`/`0X` hex prefix, otherwise
/// parses decimal; anything that doesn't parse (including an
/// undefined identifier's own name) evaluates to `0`.
fn parse_integer(text: &str) -> i64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    text.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroDescriptor;

    fn toks(kinds: Vec<(TokenKind, &str)>) -> Vec<Token> {
        kinds
            .into_iter()
            .map(|(k, t)| Token::new(k, t, 0, 0))
            .collect()
    }

    #[test]
    fn numeric_literal() {
        let table = MacroTable::new();
        let expr = toks(vec![(TokenKind::Number, "1")]);
        assert_eq!(evaluate(&expr, &table), 1);
    }

    #[test]
    fn precedence_mul_before_add() {
        let table = MacroTable::new();
        // 1 + 2 * 3 == 7
        let expr = toks(vec![
            (TokenKind::Number, "1"),
            (TokenKind::Plus, ""),
            (TokenKind::Number, "2"),
            (TokenKind::Star, ""),
            (TokenKind::Number, "3"),
        ]);
        assert_eq!(evaluate(&expr, &table), 7);
    }

    #[test]
    fn division_by_zero_is_false() {
        let table = MacroTable::new();
        let expr = toks(vec![
            (TokenKind::Number, "1"),
            (TokenKind::Slash, ""),
            (TokenKind::Number, "0"),
        ]);
        assert_eq!(evaluate(&expr, &table), 0);
    }

    #[test]
    fn unary_minus_negates() {
        let table = MacroTable::new();
        let expr = toks(vec![(TokenKind::Minus, ""), (TokenKind::Number, "5")]);
        assert_eq!(evaluate(&expr, &table), -5);
    }

    #[test]
    fn double_negation_is_identity() {
        let table = MacroTable::new();
        let expr = toks(vec![
            (TokenKind::Bang, ""),
            (TokenKind::Bang, ""),
            (TokenKind::Number, "5"),
        ]);
        assert_eq!(evaluate(&expr, &table), 1);
    }

    #[test]
    fn defined_checks_symbol_table() {
        let mut table = MacroTable::new();
        table.define(MacroDescriptor::object_like("FOO", vec![]));
        let expr = toks(vec![
            (TokenKind::Identifier, "defined"),
            (TokenKind::LeftParen, ""),
            (TokenKind::Identifier, "FOO"),
            (TokenKind::RightParen, ""),
        ]);
        assert_eq!(evaluate(&expr, &table), 1);
    }

    #[test]
    fn undefined_identifier_is_zero() {
        let table = MacroTable::new();
        let expr = toks(vec![(TokenKind::Identifier, "NOPE")]);
        assert_eq!(evaluate(&expr, &table), 0);
    }

    #[test]
    fn object_like_macro_expands_recursively() {
        let mut table = MacroTable::new();
        table.define(MacroDescriptor::object_like(
            "A",
            vec![Token::new(TokenKind::Number, "1", 0, 0)],
        ));
        let expr = toks(vec![(TokenKind::Identifier, "A")]);
        assert_eq!(evaluate(&expr, &table), 1);
    }

    #[test]
    fn function_like_macro_call_is_expanded_and_evaluated() {
        let mut table = MacroTable::new();
        // AND(X, Y) => (X && Y)
        let body = vec![
            Token::bare(TokenKind::LeftParen, 0, 0),
            Token::new(TokenKind::Identifier, "X", 0, 0),
            Token::bare(TokenKind::AndAnd, 0, 0),
            Token::new(TokenKind::Identifier, "Y", 0, 0),
            Token::bare(TokenKind::RightParen, 0, 0),
        ];
        table.define(MacroDescriptor::function_like(
            "AND",
            vec!["X".to_string(), "Y".to_string()],
            body,
        ));
        table.define(MacroDescriptor::object_like(
            "A",
            vec![Token::new(TokenKind::Number, "1", 0, 0)],
        ));
        let expr = toks(vec![
            (TokenKind::Identifier, "AND"),
            (TokenKind::LeftParen, ""),
            (TokenKind::Identifier, "A"),
            (TokenKind::Comma, ""),
            (TokenKind::Number, "0"),
            (TokenKind::RightParen, ""),
        ]);
        assert_eq!(evaluate(&expr, &table), 0);
    }
}
