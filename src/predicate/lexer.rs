//! Tokenizer shared by the predicate parser and the runtime config loader.
//!
//! Both grammars are built from the same tokens so a predicate can sit
//! inline inside a serialized options map and be parsed in place.

use super::PredicateError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Semicolon,
    Dot,
    Pipe,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unescaped string contents.
    Str(String),
    /// Raw numeric text, parsed by the consumer.
    Num(String),
    /// Identifier or keyword (`true`, `false`, `null`).
    Ident(String),
}

impl Token {
    /// Human-readable token description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Str(s) => format!("string '{s}'"),
            Self::Num(n) => format!("number {n}"),
            Self::Ident(i) => format!("`{i}`"),
            other => format!("`{}`", other.symbol()),
        }
    }

    const fn symbol(&self) -> &'static str {
        match self {
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Dot => ".",
            Self::Pipe => "|",
            Self::Bang => "!",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Str(_) | Self::Num(_) | Self::Ident(_) => "",
        }
    }
}

/// Token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split `src` into tokens.
pub fn tokenize(src: &str) -> Result<Vec<Spanned>, PredicateError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let offset = pos;
        let b = bytes[pos];

        if b.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        // two-byte operators first
        let pair = bytes.get(pos..pos + 2);
        let double = match pair {
            Some(b"&&") => Some(Token::AndAnd),
            Some(b"||") => Some(Token::OrOr),
            Some(b"==") => Some(Token::EqEq),
            Some(b"!=") => Some(Token::NotEq),
            Some(b"<=") => Some(Token::Le),
            Some(b">=") => Some(Token::Ge),
            _ => None,
        };
        if let Some(token) = double {
            tokens.push(Spanned { token, offset });
            pos += 2;
            continue;
        }

        let single = match b {
            b'{' => Some(Token::LBrace),
            b'}' => Some(Token::RBrace),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b':' => Some(Token::Colon),
            b',' => Some(Token::Comma),
            b';' => Some(Token::Semicolon),
            b'.' => Some(Token::Dot),
            b'|' => Some(Token::Pipe),
            b'!' => Some(Token::Bang),
            b'<' => Some(Token::Lt),
            b'>' => Some(Token::Gt),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            pos += 1;
            continue;
        }

        if b == b'\'' || b == b'"' {
            let (value, end) = lex_string(src, pos)?;
            tokens.push(Spanned { token: Token::Str(value), offset });
            pos = end;
            continue;
        }

        let negative_number = b == b'-' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit);
        if b.is_ascii_digit() || negative_number {
            let end = scan_while(bytes, pos + 1, |c| {
                c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-')
            });
            tokens.push(Spanned { token: Token::Num(src[pos..end].to_string()), offset });
            pos = end;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' || b == b'$' {
            let end = scan_while(bytes, pos + 1, |c| c.is_ascii_alphanumeric() || c == b'_' || c == b'$');
            tokens.push(Spanned { token: Token::Ident(src[pos..end].to_string()), offset });
            pos = end;
            continue;
        }

        let ch = src[pos..].chars().next().unwrap_or('?');
        return Err(PredicateError::UnexpectedChar { ch, offset });
    }

    Ok(tokens)
}

fn scan_while(bytes: &[u8], mut pos: usize, pred: impl Fn(u8) -> bool) -> usize {
    while pos < bytes.len() && pred(bytes[pos]) {
        pos += 1;
    }
    pos
}

/// Lex a quoted string starting at `start` (the quote). Returns the
/// unescaped contents and the offset just past the closing quote.
fn lex_string(src: &str, start: usize) -> Result<(String, usize), PredicateError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        let at = start + 1 + i;
        match c {
            c if c == quote => return Ok((out, at + 1)),
            '\\' => {
                let (_, esc) = chars.next().ok_or(PredicateError::UnterminatedString(start))?;
                match esc {
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or(PredicateError::InvalidEscape(at))?;
                        out.push(ch);
                    }
                    _ => return Err(PredicateError::InvalidEscape(at)),
                }
            }
            c => out.push(c),
        }
    }

    Err(PredicateError::UnterminatedString(start))
}

/// Quote a string with single quotes, escaping backslashes, quotes and
/// every control character so the result is a safe embedded literal.
pub fn quote(s: &str) -> String {
    quote_with(s, '\'')
}

/// Like [`quote`], with double quotes. Used for mapping keys.
pub fn quote_key(s: &str) -> String {
    quote_with(s, '"')
}

fn quote_with(s: &str, q: char) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(q);
    out
}
