use crate::language::{
    span::Span,
    token::{Token, TokenKind},
};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{char, multispace0, one_of},
    combinator::{not, opt, recognize},
    multi::many0,
    sequence::{pair, tuple},
    IResult,
};

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

/// Whitespace handling applied while splitting template text from tags.
#[derive(Clone, Copy, Debug, Default)]
pub struct LexOptions {
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
}

pub fn lex(source: &str, options: LexOptions) -> Result<Vec<Token>, Vec<LexError>> {
    let lexer = Lexer::new(source, options);
    lexer.run()
}

/// Template text up to (not including) the next `{{`, `{%` or `{#`.
fn data_chunk(input: &str) -> IResult<&str, &str> {
    recognize(many0(alt((
        is_not("{"),
        recognize(pair(char('{'), not(one_of("{%#")))),
    ))))(input)
}

/// `{% raw %}` / `{%- raw -%}` opener.
fn raw_open(input: &str) -> IResult<&str, (Option<char>, Option<char>)> {
    let (input, (_, left, _, _, _, right, _)) = tuple((
        tag("{%"),
        opt(char('-')),
        multispace0,
        tag("raw"),
        multispace0,
        opt(char('-')),
        tag("%}"),
    ))(input)?;
    Ok((input, (left, right)))
}

fn raw_close(input: &str) -> IResult<&str, Option<char>> {
    let (input, (_, left, _, _, _, _, _)) = tuple((
        tag("{%"),
        opt(char('-')),
        multispace0,
        tag("endraw"),
        multispace0,
        opt(char('-')),
        tag("%}"),
    ))(input)?;
    Ok((input, left))
}

fn comment_body(input: &str) -> IResult<&str, &str> {
    take_until("#}")(input)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Variable,
    Block,
}

struct Lexer<'a> {
    src: &'a str,
    offset: usize,
    line: usize,
    column: usize,
    options: LexOptions,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
    strip_next_data: bool,
    drop_next_newline: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str, options: LexOptions) -> Self {
        Self {
            src,
            offset: 0,
            line: 1,
            column: 1,
            options,
            tokens: Vec::new(),
            errors: Vec::new(),
            strip_next_data: false,
            drop_next_newline: false,
        }
    }

    fn run(mut self) -> Result<Vec<Token>, Vec<LexError>> {
        while self.offset < self.src.len() {
            self.lex_data();
            let rest = self.rest();
            if rest.starts_with("{{") {
                self.lex_tag(TagKind::Variable);
            } else if rest.starts_with("{#") {
                self.lex_comment();
            } else if rest.starts_with("{%") {
                if let Ok((after, (left, right))) = raw_open(rest) {
                    let consumed = rest.len() - after.len();
                    self.lex_raw(consumed, left.is_some(), right.is_some());
                } else {
                    self.lex_tag(TagKind::Block);
                }
            }
            if !self.errors.is_empty() {
                break;
            }
        }
        let span = self.span_here(0);
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span,
        });

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.offset..]
    }

    fn span_here(&self, len: usize) -> Span {
        Span::new(self.offset, self.offset + len, self.line, self.column)
    }

    fn advance(&mut self, len: usize) {
        let end = (self.offset + len).min(self.src.len());
        for ch in self.src[self.offset..end].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset = end;
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.rest().chars();
        chars.next();
        chars.next()
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push(LexError {
            message: message.into(),
            span,
        });
    }

    fn push_token(&mut self, kind: TokenKind, span: Span) {
        self.tokens.push(Token { kind, span });
    }

    fn push_data(&mut self, mut text: &str, span: Span) {
        if self.drop_next_newline {
            self.drop_next_newline = false;
            if let Some(stripped) = text.strip_prefix("\r\n") {
                text = stripped;
            } else if let Some(stripped) = text.strip_prefix('\n') {
                text = stripped;
            }
        }
        if self.strip_next_data {
            self.strip_next_data = false;
            text = text.trim_start();
        }
        if !text.is_empty() {
            self.push_token(TokenKind::Data(text.to_string()), span);
        }
    }

    /// Strips whitespace at the end of the previous data token before a tag opener.
    fn strip_previous_data(&mut self, only_line_indent: bool) {
        let Some(Token {
            kind: TokenKind::Data(text),
            ..
        }) = self.tokens.last_mut()
        else {
            return;
        };
        if only_line_indent {
            let trimmed = text.trim_end_matches([' ', '\t']);
            let line_start = trimmed.is_empty() || trimmed.ends_with('\n');
            if !line_start {
                return;
            }
            let keep = trimmed.len();
            text.truncate(keep);
        } else {
            let keep = text.trim_end().len();
            text.truncate(keep);
        }
        if text.is_empty() {
            self.tokens.pop();
        }
    }

    fn lex_data(&mut self) {
        let rest = self.rest();
        let text = match data_chunk(rest) {
            Ok((_, text)) => text,
            Err(_) => return,
        };
        if text.is_empty() {
            return;
        }
        let span = self.span_here(text.len());
        self.advance(text.len());
        self.push_data(text, span);
    }

    fn lex_comment(&mut self) {
        let start = self.span_here(2);
        let trim_left = self.rest()[2..].starts_with('-');
        if trim_left {
            self.strip_previous_data(false);
        }
        self.advance(2);
        match comment_body(self.rest()) {
            Ok((_, body)) => {
                let trim_right = body.ends_with('-');
                self.advance(body.len() + 2);
                self.strip_next_data = trim_right;
                self.drop_next_newline = self.options.trim_blocks;
            }
            Err(_) => self.error(start, "Unterminated comment"),
        }
    }

    fn lex_raw(&mut self, opener_len: usize, trim_left: bool, trim_right: bool) {
        let start = self.span_here(opener_len);
        if trim_left {
            self.strip_previous_data(false);
        } else if self.options.lstrip_blocks {
            self.strip_previous_data(true);
        }
        self.advance(opener_len);
        self.strip_next_data = trim_right;
        self.drop_next_newline = self.options.trim_blocks;

        let body = self.rest();
        let mut search = 0;
        while let Some(found) = body[search..].find("{%") {
            let at = search + found;
            if let Ok((after, close_trim)) = raw_close(&body[at..]) {
                let closer_len = body.len() - at - after.len();
                let content = &body[..at];
                let span = self.span_here(at);
                let content = if close_trim.is_some() {
                    content.trim_end()
                } else {
                    content
                };
                self.push_data(content, span);
                self.advance(at + closer_len);
                self.drop_next_newline = self.options.trim_blocks;
                return;
            }
            search = at + 2;
        }
        self.error(start, "Unterminated raw block; expected `{% endraw %}`");
    }

    fn lex_tag(&mut self, kind: TagKind) {
        let open_span = self.span_here(2);
        let trim_left = self.rest()[2..].starts_with('-');
        if trim_left {
            self.strip_previous_data(false);
        } else if kind == TagKind::Block && self.options.lstrip_blocks {
            self.strip_previous_data(true);
        }
        let open_kind = match kind {
            TagKind::Variable => TokenKind::VariableStart,
            TagKind::Block => TokenKind::BlockStart,
        };
        self.push_token(open_kind, open_span);
        self.advance(if trim_left { 3 } else { 2 });

        let closer = match kind {
            TagKind::Variable => "}}",
            TagKind::Block => "%}",
        };
        let mut brace_depth = 0usize;

        loop {
            let Some(ch) = self.current() else {
                self.error(open_span, format!("Unterminated tag; expected `{closer}`"));
                return;
            };
            if ch.is_whitespace() {
                self.advance(ch.len_utf8());
                continue;
            }
            let rest = self.rest();
            if brace_depth == 0 {
                let trimmed_close = rest.starts_with('-') && rest[1..].starts_with(closer);
                if trimmed_close || rest.starts_with(closer) {
                    let len = if trimmed_close { 3 } else { 2 };
                    let span = self.span_here(len);
                    let close_kind = match kind {
                        TagKind::Variable => TokenKind::VariableEnd,
                        TagKind::Block => TokenKind::BlockEnd,
                    };
                    self.push_token(close_kind, span);
                    self.advance(len);
                    self.strip_next_data = trimmed_close;
                    self.drop_next_newline =
                        kind == TagKind::Block && self.options.trim_blocks;
                    return;
                }
            }
            match ch {
                ch if ch.is_ascii_alphabetic() || ch == '_' => self.lex_identifier(),
                ch if ch.is_ascii_digit() => self.lex_number(),
                '"' | '\'' => self.lex_string(ch),
                '{' => {
                    brace_depth += 1;
                    self.lex_symbol();
                }
                '}' => {
                    brace_depth = brace_depth.saturating_sub(1);
                    self.lex_symbol();
                }
                _ => self.lex_symbol(),
            }
            if !self.errors.is_empty() {
                return;
            }
        }
    }

    fn lex_identifier(&mut self) {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '_'))
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let span = self.span_here(len);
        let name = rest[..len].to_string();
        self.advance(len);
        self.push_token(TokenKind::Identifier(name), span);
    }

    fn lex_number(&mut self) {
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut len = 0;
        while len < bytes.len() && (bytes[len].is_ascii_digit() || bytes[len] == b'_') {
            len += 1;
        }
        let mut is_float = false;
        if len + 1 < bytes.len() && bytes[len] == b'.' && bytes[len + 1].is_ascii_digit() {
            is_float = true;
            len += 1;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
        if len < bytes.len() && (bytes[len] == b'e' || bytes[len] == b'E') {
            let mut probe = len + 1;
            if probe < bytes.len() && (bytes[probe] == b'+' || bytes[probe] == b'-') {
                probe += 1;
            }
            if probe < bytes.len() && bytes[probe].is_ascii_digit() {
                is_float = true;
                len = probe;
                while len < bytes.len() && bytes[len].is_ascii_digit() {
                    len += 1;
                }
            }
        }

        let span = self.span_here(len);
        let text: String = rest[..len].chars().filter(|ch| *ch != '_').collect();
        self.advance(len);
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => self.push_token(TokenKind::Float(value), span),
                Err(_) => self.error(span, format!("Invalid float literal `{text}`")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push_token(TokenKind::Integer(value), span),
                Err(_) => self.error(span, format!("Integer literal `{text}` is out of range")),
            }
        }
    }

    fn lex_string(&mut self, quote: char) {
        let start = self.span_here(1);
        self.advance(1);
        let mut value = String::new();
        loop {
            let Some(ch) = self.current() else {
                self.error(start, "Unterminated string literal");
                return;
            };
            self.advance(ch.len_utf8());
            match ch {
                ch if ch == quote => break,
                '\\' => {
                    let Some(escaped) = self.current() else {
                        self.error(start, "Unterminated string literal");
                        return;
                    };
                    self.advance(escaped.len_utf8());
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        other => value.push(other),
                    }
                }
                other => value.push(other),
            }
        }
        let span = Span::new(start.start, self.offset, start.line, start.column);
        self.push_token(TokenKind::String(value), span);
    }

    fn lex_symbol(&mut self) {
        let Some(ch) = self.current() else {
            return;
        };
        let next = self.peek();
        let (kind, len) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::BangEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('*', Some('*')) => (TokenKind::StarStar, 2),
            ('/', Some('/')) => (TokenKind::SlashSlash, 2),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('.', _) => (TokenKind::Dot, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('|', _) => (TokenKind::Pipe, 1),
            ('~', _) => (TokenKind::Tilde, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            (other, _) => {
                let span = self.span_here(other.len_utf8());
                self.advance(other.len_utf8());
                self.error(span, format!("Unexpected character `{other}`"));
                return;
            }
        };
        let span = self.span_here(len);
        self.advance(len);
        self.push_token(kind, span);
    }
}
