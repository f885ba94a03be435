//! Error definitions for the lexing and parsing process.

use crate::token::Span;
use std::fmt;
use thiserror::Error;

/// Error encountered when tokenizing source text.
#[derive(Debug, Eq, PartialEq, Clone, Hash, Error)]
#[non_exhaustive]
pub enum LexError {
    /// An unexpected character is encountered in the source text.
    #[error("unexpected '{0}'")]
    UnexpectedInput(String),
    /// A string literal is not terminated before a new-line or EOF.
    #[error("string literal is not terminated")]
    UnterminatedString,
    /// A string literal exceeds the maximum length.
    #[error("length of string literal exceeds the maximum limit ({0})")]
    StringTooLong(usize),
    /// An escape sequence inside a string literal is malformed.
    #[error("invalid escape sequence: '{0}'")]
    MalformedEscapeSequence(String),
    /// A unicode escape `\u{...}` is not closed before the string ends.
    #[error("unicode escape is not terminated")]
    UnterminatedUnicodeEscape,
    /// A numeric literal is malformed, e.g. a misplaced digit separator.
    #[error("invalid number: '{0}'")]
    MalformedNumber(String),
    /// An identifier is malformed, e.g. a backtick-quoted name crossing a line.
    #[error("invalid identifier: '{0}'")]
    MalformedIdentifier(String),
}

impl LexError {
    /// Convert a [`LexError`] into a [`ParseError`] at the given span.
    #[inline(always)]
    #[must_use]
    pub fn into_err(self, span: Span) -> ParseError {
        ParseError(Box::new(ParseErrorKind::BadInput(self)), span)
    }
}

/// Kind of error encountered when parsing source text.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
#[non_exhaustive]
pub enum ParseErrorKind {
    /// The source text ends prematurely.
    UnexpectedEof,
    /// Error in the source text. Wrapped value is the lex error.
    BadInput(LexError),
    /// Expecting a particular token but not finding one.
    /// Wrapped values are the token and a description of its context.
    MissingToken(String, String),
    /// Expecting a particular symbol but not finding one. Wrapped value is the description.
    MissingSymbol(String),
    /// Missing an expression. Wrapped value is the kind of expression expected.
    ExprExpected(String),
    /// Missing a member name.
    PropertyExpected,
    /// Missing a variable name after `let`, `for` or a parameter list.
    VariableExpected,
    /// Missing a type after `:`, `is`, `as` or in a type-argument list.
    TypeExpected,
    /// The same member key is defined twice in one object literal.
    /// Wrapped value is the rendered key.
    DuplicateDefinition(String),
    /// A modifier is repeated or not applicable to the declaration.
    /// Wrapped value is the modifier keyword.
    BadModifier(String),
    /// A line break appears where the grammar requires the same line,
    /// e.g. between a value expression and its amending `{`.
    UnexpectedLineBreak(String),
    /// An expression is of the wrong shape for its context.
    /// Wrapped values are the shape required and the shape found.
    MismatchedType(String, String),
    /// Expression nesting exceeds the maximum depth.
    ExprTooDeep,
}

impl ParseErrorKind {
    /// Make a [`ParseError`] from this kind at the given span.
    #[inline(always)]
    #[must_use]
    pub(crate) fn into_err(self, span: Span) -> ParseError {
        ParseError(Box::new(self), span)
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadInput(err) => write!(f, "{}", err),
            Self::UnexpectedEof => f.write_str("source is incomplete"),
            Self::MissingToken(token, s) => write!(f, "expecting '{}' {}", token, s),
            Self::MissingSymbol(s) if s.is_empty() => f.write_str("expecting a symbol"),
            Self::MissingSymbol(s) => f.write_str(s),
            Self::ExprExpected(s) => write!(f, "expecting {} expression", s),
            Self::PropertyExpected => f.write_str("expecting name of a member"),
            Self::VariableExpected => f.write_str("expecting name of a variable"),
            Self::TypeExpected => f.write_str("expecting a type"),
            Self::DuplicateDefinition(s) => write!(f, "duplicate definition of member '{}'", s),
            Self::BadModifier(s) => write!(f, "modifier '{}' is not applicable here", s),
            Self::UnexpectedLineBreak(s) => write!(f, "unexpected line break {}", s),
            Self::MismatchedType(r, a) => write!(f, "expecting {}, not {}", r, a),
            Self::ExprTooDeep => f.write_str("expression exceeds maximum complexity"),
        }
    }
}

impl From<LexError> for ParseErrorKind {
    #[inline(always)]
    fn from(err: LexError) -> Self {
        Self::BadInput(err)
    }
}

/// Error when parsing source text, with the [`Span`] where it occurred.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct ParseError(pub Box<ParseErrorKind>, pub Span);

impl std::error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)?;

        // Do not write any span if none
        if !self.1.is_none() {
            write!(f, " ({})", self.1)?;
        }

        Ok(())
    }
}

impl ParseError {
    /// Kind of this parse error.
    #[inline(always)]
    #[must_use]
    pub fn kind(&self) -> &ParseErrorKind {
        &self.0
    }
    /// [`Span`] of this parse error.
    #[inline(always)]
    #[must_use]
    pub const fn span(&self) -> Span {
        self.1
    }
}
