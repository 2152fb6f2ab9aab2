use crate::language::span::Span;
use miette::SourceSpan;
use std::fmt;

#[derive(Clone, Debug)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn to_source_span(&self) -> SourceSpan {
        (self.span.start, self.span.len()).into()
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.span)
    }
}

/// Every syntax error found in one template, with the source kept for diagnostics.
#[derive(Clone, Debug)]
pub struct SyntaxErrors {
    pub template: String,
    pub source: String,
    pub errors: Vec<SyntaxError>,
}

impl SyntaxErrors {
    pub fn new(template: impl Into<String>, source: impl Into<String>, errors: Vec<SyntaxError>) -> Self {
        Self {
            template: template.into(),
            source: source.into(),
            errors,
        }
    }

    pub fn first(&self) -> Option<&SyntaxError> {
        self.errors.first()
    }
}

impl fmt::Display for SyntaxErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.first() {
            Some(first) if self.errors.len() == 1 => {
                write!(f, "Syntax error in `{}`: {}", self.template, first)
            }
            Some(first) => write!(
                f,
                "Syntax error in `{}`: {} (and {} more)",
                self.template,
                first,
                self.errors.len() - 1
            ),
            None => write!(f, "Syntax error in `{}`", self.template),
        }
    }
}
