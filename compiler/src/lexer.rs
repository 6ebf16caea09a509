// lexer.rs — Ember tokens
//
// Splits a source file into keywords, punctuation, literals and
// identifiers with a `logos` DFA. `//` comments and whitespace are skipped.
//
// Preconditions: input is valid UTF-8.
// Postconditions: every byte is covered by a token, a skipped run, or a
//   `LexError`.
// Failure modes: a stray character becomes a `LexError` and lexing resumes
//   after it.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Ember token types.
///
/// Keywords and symbols are matched as fixed strings.
/// Literals carry parsed values. Identifiers carry no value; use the span
/// to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq, Eq, Hash)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("type")]
    Type,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token("->")]
    Arrow,
    #[token("=")]
    Assign,

    // ── Operators ──
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,

    // ── Literals ──
    /// Integer literal. Out-of-range literals are lex errors.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    /// String literal with `\"`, `\\` and `\n` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    Str(String),

    // ── Identifier ──
    //
    // Placed after keywords. logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `let` matches Let, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Fn => write!(f, "fn"),
            Token::Let => write!(f, "let"),
            Token::Type => write!(f, "type"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::Return => write!(f, "return"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Semi => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Arrow => write!(f, "->"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::LtEq => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::GtEq => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Tokenize `source`. Errors never stop the scan.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected input: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    /// Helper: lex and return (tokens, errors).
    fn lex_all(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let result = lex(source);
        let tokens = result.tokens.into_iter().map(|(t, _)| t).collect();
        (tokens, result.errors)
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("fn let type if else while return true false");
        assert_eq!(
            tokens,
            vec![
                Token::Fn,
                Token::Let,
                Token::Type,
                Token::If,
                Token::Else,
                Token::While,
                Token::Return,
                Token::True,
                Token::False,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `letter` is an identifier, not keyword `let` + `ter`
        let tokens = lex_ok("let letter");
        assert_eq!(tokens, vec![Token::Let, Token::Ident]);
    }

    #[test]
    fn two_char_operators_win() {
        let tokens = lex_ok("== != <= >= && || -> = < >");
        assert_eq!(
            tokens,
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::LtEq,
                Token::GtEq,
                Token::AndAnd,
                Token::OrOr,
                Token::Arrow,
                Token::Assign,
                Token::Lt,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn literals() {
        let tokens = lex_ok(r#"42 "hi\n" x_1"#);
        assert_eq!(
            tokens,
            vec![Token::Int(42), Token::Str("hi\n".into()), Token::Ident]
        );
    }

    #[test]
    fn comments_and_newlines_are_skipped() {
        let tokens = lex_ok("let x; // trailing\n// whole line\nprint(x);");
        assert_eq!(tokens.len(), 8);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("let  abc");
        assert_eq!(result.tokens[1].1, Span { start: 5, end: 8 });
    }

    #[test]
    fn unknown_character_is_reported_and_skipped() {
        let (tokens, errors) = lex_all("let $ x;");
        assert_eq!(tokens, vec![Token::Let, Token::Ident, Token::Semi]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span { start: 4, end: 5 });
    }

    #[test]
    fn oversized_int_is_an_error() {
        let (_, errors) = lex_all("99999999999999999999999");
        assert_eq!(errors.len(), 1);
    }
}
