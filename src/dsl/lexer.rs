//! Lexer for the Quarry modeling and query language.
//!
//! Converts source text into `(Token, Span)` pairs. Keywords are matched
//! case-insensitively; everything else that looks like a word is an
//! identifier. Comments are produced by [`lex_with_comments`] and dropped by
//! [`lex`].

use chumsky::prelude::*;
use chumsky::span::{SimpleSpan, Span as _};

use super::span::{position_at, Position, Span};

/// A token in the Quarry language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    // ========================================================================
    // Statement Keywords
    // ========================================================================
    Import,
    As,
    Key,
    Property,
    Metric,
    Auto,
    Datasource,
    Grain,

    // ========================================================================
    // Query Keywords
    // ========================================================================
    Select,
    Where,
    Having,
    Order,
    By,
    Asc,
    Desc,
    Limit,

    // ========================================================================
    // Expression Keywords
    // ========================================================================
    And,
    Or,
    Not,
    Is,
    In,
    Like,
    Null,
    True,
    False,

    // ========================================================================
    // Literals
    // ========================================================================
    /// An identifier (not a keyword).
    Ident(&'src str),
    /// A single- or double-quoted string (contents without quotes).
    Str(&'src str),
    /// A backtick-quoted name (contents without backticks).
    Quoted(&'src str),
    /// An integer or decimal literal.
    Number(&'src str),
    /// `::name` type annotation (name only).
    TypeAnnotation(&'src str),
    /// Comment text, including its opening marker.
    Comment(&'src str),
    /// A string or block comment that never closed.
    Unterminated(Unclosed),

    // ========================================================================
    // Operators
    // ========================================================================
    /// `<-`
    LeftArrow,
    /// `->`
    Arrow,
    /// `*`
    Star,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `=` or `==`
    Eq,
    /// `!=` or `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,

    // ========================================================================
    // Delimiters
    // ========================================================================
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Colon,
}

/// What an [`Token::Unterminated`] token failed to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unclosed {
    String,
    Comment,
}

impl std::fmt::Display for Unclosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unclosed::String => write!(f, "string literal"),
            Unclosed::Comment => write!(f, "block comment"),
        }
    }
}

/// Coarse token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Keyword,
    TypeAnnotation,
    Operator,
    String,
    Number,
    Identifier,
    Delimiter,
}

impl<'src> Token<'src> {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Ident(_) => TokenKind::Identifier,
            Token::Str(_) | Token::Quoted(_) => TokenKind::String,
            Token::Number(_) => TokenKind::Number,
            Token::TypeAnnotation(_) => TokenKind::TypeAnnotation,
            Token::Comment(_) => TokenKind::Comment,
            Token::Unterminated(Unclosed::String) => TokenKind::String,
            Token::Unterminated(Unclosed::Comment) => TokenKind::Comment,
            Token::LeftArrow
            | Token::Arrow
            | Token::Star
            | Token::Plus
            | Token::Minus
            | Token::Slash
            | Token::Percent
            | Token::Bang
            | Token::Eq
            | Token::Ne
            | Token::Lt
            | Token::Lte
            | Token::Gt
            | Token::Gte => TokenKind::Operator,
            Token::LParen
            | Token::RParen
            | Token::Comma
            | Token::Semicolon
            | Token::Dot
            | Token::Colon => TokenKind::Delimiter,
            _ => TokenKind::Keyword,
        }
    }

    /// The text a keyword token stands for, used where keywords are allowed
    /// as names (after a `.` in a concept path).
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Import => "import",
            Token::As => "as",
            Token::Key => "key",
            Token::Property => "property",
            Token::Metric => "metric",
            Token::Auto => "auto",
            Token::Datasource => "datasource",
            Token::Grain => "grain",
            Token::Select => "select",
            Token::Where => "where",
            Token::Having => "having",
            Token::Order => "order",
            Token::By => "by",
            Token::Asc => "asc",
            Token::Desc => "desc",
            Token::Limit => "limit",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Is => "is",
            Token::In => "in",
            Token::Like => "like",
            Token::Null => "null",
            Token::True => "true",
            Token::False => "false",
            _ => return None,
        };
        Some(text)
    }
}

impl<'src> std::fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(text) = self.keyword_text() {
            return write!(f, "{}", text);
        }
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Quoted(s) => write!(f, "`{}`", s),
            Token::Number(s) => write!(f, "{}", s),
            Token::TypeAnnotation(s) => write!(f, "::{}", s),
            Token::Comment(s) => write!(f, "{}", s),
            Token::Unterminated(what) => write!(f, "unterminated {}", what),
            Token::LeftArrow => write!(f, "<-"),
            Token::Arrow => write!(f, "->"),
            Token::Star => write!(f, "*"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Bang => write!(f, "!"),
            Token::Eq => write!(f, "="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Lte => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Gte => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            _ => Ok(()),
        }
    }
}

/// Map an identifier string to a keyword token or return Ident.
fn keyword_or_ident(s: &str) -> Token<'_> {
    match s.to_ascii_lowercase().as_str() {
        "import" => Token::Import,
        "as" => Token::As,
        "key" => Token::Key,
        "property" => Token::Property,
        "metric" => Token::Metric,
        "auto" => Token::Auto,
        "datasource" => Token::Datasource,
        "grain" => Token::Grain,

        "select" => Token::Select,
        "where" => Token::Where,
        "having" => Token::Having,
        "order" => Token::Order,
        "by" => Token::By,
        "asc" => Token::Asc,
        "desc" => Token::Desc,
        "limit" => Token::Limit,

        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "is" => Token::Is,
        "in" => Token::In,
        "like" => Token::Like,
        "null" => Token::Null,
        "true" => Token::True,
        "false" => Token::False,

        _ => Token::Ident(s),
    }
}

/// Create the chumsky lexer.
///
/// Unclosed strings and block comments do not fail the parse here; they
/// come back as [`Token::Unterminated`] so the error can point at the
/// opening quote rather than the end of input.
pub fn lexer<'src>(
) -> impl Parser<'src, &'src str, Vec<(Token<'src>, Span)>, extra::Err<Rich<'src, char>>> {
    let ident = text::ident().map(keyword_or_ident);

    // `::name` must win over `:`
    let type_annotation = just("::")
        .ignore_then(text::ident())
        .map(Token::TypeAnnotation);

    let single_quoted = just('\'')
        .ignore_then(none_of('\'').repeated().to_slice())
        .then(just('\'').or_not())
        .map(|(s, close)| match close {
            Some(_) => Token::Str(s),
            None => Token::Unterminated(Unclosed::String),
        });

    let double_quoted = just('"')
        .ignore_then(none_of('"').repeated().to_slice())
        .then(just('"').or_not())
        .map(|(s, close)| match close {
            Some(_) => Token::Str(s),
            None => Token::Unterminated(Unclosed::String),
        });

    let backtick_quoted = just('`')
        .ignore_then(none_of('`').repeated().to_slice())
        .then(just('`').or_not())
        .map(|(s, close)| match close {
            Some(_) => Token::Quoted(s),
            None => Token::Unterminated(Unclosed::String),
        });

    let number = text::digits(10)
        .then(just('.').then(text::digits(10)).or_not())
        .to_slice()
        .map(Token::Number);

    let line_comment = just("#")
        .or(just("//"))
        .then(any().and_is(just('\n').not()).repeated())
        .to_slice()
        .map(Token::Comment);

    let block_comment = just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .to_slice()
        .then(just("*/").or_not())
        .map(|(body, close)| match close {
            Some(_) => Token::Comment(body),
            None => Token::Unterminated(Unclosed::Comment),
        });

    // Multi-char operators first
    let operator = choice((
        just("<-").to(Token::LeftArrow),
        just("->").to(Token::Arrow),
        just("<=").to(Token::Lte),
        just(">=").to(Token::Gte),
        just("!=").to(Token::Ne),
        just("<>").to(Token::Ne),
        just("==").to(Token::Eq),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
        just('=').to(Token::Eq),
        just('!').to(Token::Bang),
        just('*').to(Token::Star),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
    ));

    let delimiter = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just(',').to(Token::Comma),
        just(';').to(Token::Semicolon),
        just('.').to(Token::Dot),
        just(':').to(Token::Colon),
    ));

    let token = choice((
        line_comment,
        block_comment,
        type_annotation,
        ident,
        single_quoted,
        double_quoted,
        backtick_quoted,
        number,
        operator,
        delimiter,
    ))
    .map_with(|tok, e| {
        let span: SimpleSpan = e.span();
        (tok, span.start()..span.end())
    });

    token.padded().repeated().collect().padded().then_ignore(end())
}

/// A lexical error with a resolved line/column.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at {position}")]
pub struct LexError {
    pub message: String,
    pub span: Span,
    pub position: Position,
}

impl LexError {
    fn new(source: &str, span: Span, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: position_at(source, span.start),
            span,
        }
    }

    pub fn line(&self) -> usize {
        self.position.line
    }

    pub fn column(&self) -> usize {
        self.position.column
    }
}

/// Lex a source string, keeping comment tokens.
pub fn lex_with_comments(source: &str) -> Result<Vec<(Token<'_>, Span)>, Vec<LexError>> {
    let (tokens, errs) = lexer().parse(source).into_output_errors();

    let mut errors: Vec<LexError> = errs
        .into_iter()
        .map(|e| {
            let span = e.span();
            LexError::new(source, span.start()..span.end(), e.to_string())
        })
        .collect();

    let tokens = tokens.unwrap_or_default();
    for (tok, span) in &tokens {
        if let Token::Unterminated(what) = tok {
            errors.push(LexError::new(
                source,
                span.clone(),
                format!("unterminated {}", what),
            ));
        }
    }

    if errors.is_empty() {
        Ok(tokens)
    } else {
        errors.sort_by_key(|e| e.span.start);
        Err(errors)
    }
}

/// Lex a source string into tokens, dropping comments.
pub fn lex(source: &str) -> Result<Vec<(Token<'_>, Span)>, Vec<LexError>> {
    let tokens = lex_with_comments(source)?;
    Ok(tokens
        .into_iter()
        .filter(|(tok, _)| tok.kind() != TokenKind::Comment)
        .collect())
}
