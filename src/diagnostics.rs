use crate::{
    config::ConfigError,
    language::errors::{SyntaxError, SyntaxErrors},
    runtime::error::RenderError,
};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource,
    #[label("{label}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
    label: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(src: NamedSource, err: SyntaxError) -> Self {
        let label = match err.message.split_once(':') {
            Some((head, _)) => head.to_string(),
            None => "here".to_string(),
        };
        Self {
            src,
            span: err.to_source_span(),
            help: err.help.clone(),
            message: err.message,
            label,
        }
    }
}

pub fn emit_syntax_errors(errors: &SyntaxErrors) {
    for err in &errors.errors {
        let src = NamedSource::new(&errors.template, errors.source.clone());
        let diagnostic = SyntaxDiagnostic::from_error(src, err.clone());
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn report_render_error(error: &RenderError) {
    match error {
        RenderError::Syntax(errors) => emit_syntax_errors(errors),
        other => eprintln!("Render error: {}", other),
    }
}

pub fn report_config_error(error: &ConfigError) {
    eprintln!("Config error: {}", error);
}
