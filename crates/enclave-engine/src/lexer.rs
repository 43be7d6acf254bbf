//! Tokenizer

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(Rc<str>),
    /// Identifiers and keywords alike; the parser tells them apart.
    Ident(Rc<str>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
    /// A line terminator precedes this token. Drives semicolon insertion.
    pub newline_before: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

// Longest first so that greedy matching picks `>>>=` over `>>`.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", "**=", "<<=", ">>=", ">>>", "...", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "**", "<<", ">>",
    "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "&", "|", "^",
    "!", "~", "?", ":", "=", ".",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: self.line,
            column: self.column,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                    newline_before,
                });
                return Ok(tokens);
            };
            let kind = if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if is_ident_start(c) {
                self.ident()
            } else {
                self.punct()?
            };
            tokens.push(Token {
                kind,
                line,
                column,
                newline_before,
            });
        }
    }

    /// Skips whitespace and comments; reports whether a newline was crossed.
    fn skip_trivia(&mut self) -> Result<bool, LexError> {
        let mut newline = false;
        while let Some(c) = self.peek() {
            match c {
                '\n' | '\r' | '\u{2028}' | '\u{2029}' => {
                    newline = true;
                    self.bump();
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some('\n') => newline = true,
                            Some(_) => {}
                            None => return Err(self.error("Unterminated comment")),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(newline)
    }

    fn number(&mut self) -> Result<TokenKind, LexError> {
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek().filter(|c| c.is_ascii_hexdigit()) {
                digits.push(c);
                self.bump();
            }
            return u64::from_str_radix(&digits, 16)
                .map(|v| TokenKind::Number(v as f64))
                .map_err(|_| self.error("Invalid or unexpected token"));
        }
        let mut text = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
            text.push(c);
            self.bump();
        }
        if self.peek() == Some('.') {
            text.push('.');
            self.bump();
            while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
                text.push(c);
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|d| d.is_ascii_digit()) {
                for _ in 0..digit_at {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                while let Some(c) = self.peek().filter(|c| c.is_ascii_digit()) {
                    text.push(c);
                    self.bump();
                }
            }
        }
        if self.peek().is_some_and(is_ident_start) {
            return Err(self.error("Invalid or unexpected token"));
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error("Invalid or unexpected token"))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, LexError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("Invalid or unexpected token")),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("Invalid or unexpected token"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        'v' => out.push('\u{b}'),
                        '0' => out.push('\0'),
                        '\n' => {}
                        'x' => out.push(self.hex_escape(2)?),
                        'u' => out.push(self.hex_escape(4)?),
                        other => out.push(other),
                    }
                }
                Some(c) => out.push(c),
            }
        }
        Ok(TokenKind::String(Rc::from(out)))
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, LexError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                _ => return Err(self.error("Invalid hexadecimal escape sequence")),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("Invalid Unicode escape sequence"))
    }

    fn ident(&mut self) -> TokenKind {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|c| is_ident_part(*c)) {
            name.push(c);
            self.bump();
        }
        TokenKind::Ident(Rc::from(name))
    }

    fn punct(&mut self) -> Result<TokenKind, LexError> {
        for &p in PUNCTUATORS {
            let matches = p
                .chars()
                .enumerate()
                .all(|(i, pc)| self.peek_at(i) == Some(pc));
            if matches {
                for _ in 0..p.chars().count() {
                    self.bump();
                }
                return Ok(TokenKind::Punct(p));
            }
        }
        Err(self.error("Invalid or unexpected token"))
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_tokens() {
        let toks = kinds("x = 1.5 + 'a';");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident(Rc::from("x")),
                TokenKind::Punct("="),
                TokenKind::Number(1.5),
                TokenKind::Punct("+"),
                TokenKind::String(Rc::from("a")),
                TokenKind::Punct(";"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_greedy_punctuators() {
        assert_eq!(kinds("a >>>= b")[1], TokenKind::Punct(">>>="));
        assert_eq!(kinds("a !== b")[1], TokenKind::Punct("!=="));
    }

    #[test]
    fn test_newline_tracking() {
        let toks = tokenize("a\n/* x\n */ b // c\nd").unwrap();
        assert!(!toks[0].newline_before);
        assert!(toks[1].newline_before);
        assert_eq!(toks[1].line, 3);
        assert!(toks[2].newline_before);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\n\x41B""#)[0], TokenKind::String(Rc::from("a\nAB")));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], TokenKind::Number(31.0));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds(".5")[0], TokenKind::Number(0.5));
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
