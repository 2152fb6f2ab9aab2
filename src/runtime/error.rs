use crate::compiler::CompileError;
use crate::language::errors::SyntaxErrors;
use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

/// Failures surfaced by a render call. Cloneable so one error can be observed through
/// every handle of a shared pending value.
#[derive(Clone, Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Syntax(SyntaxErrors),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Template `{name}` not found")]
    TemplateNotFound { name: String },
    #[error("Unknown filter `{name}`")]
    UnknownFilter { name: String },
    #[error("No extension handles the `{tag}` tag")]
    UnknownExtension { tag: String },
    #[error("Attempted to output undefined value `{name}` (line {line}, column {column})")]
    UndefinedValue {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("`{name}` is not callable")]
    NotCallable { name: String },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("`{name}` is still pending; asynchronous values require an async-mode environment")]
    UnresolvedAsync { name: String },
    #[error("Buffer slot {index} was flattened before it was written")]
    UnresolvedSlot { index: usize },
    #[error("Failed to read template `{name}`: {message}")]
    Io { name: String, message: String },
    #[error("`{name}` is not exported by `{template}`")]
    ImportMissing { name: String, template: String },
    #[error("{message}")]
    Custom { message: String },
}

impl RenderError {
    /// Error raised by user code; rendered back to the caller verbatim.
    pub fn custom(message: impl Into<String>) -> Self {
        RenderError::Custom {
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        RenderError::TypeMismatch {
            message: message.into(),
        }
    }
}

impl From<SyntaxErrors> for RenderError {
    fn from(errors: SyntaxErrors) -> Self {
        RenderError::Syntax(errors)
    }
}
