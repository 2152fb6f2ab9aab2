use crate::language::{ast::Node, errors::SyntaxError, parser::Parser, span::Span};
use crate::runtime::{error::RenderResult, value::Value};
use futures::future::LocalBoxFuture;
use std::collections::BTreeMap;

/// Evaluated arguments of one extension tag.
pub struct ExtensionCall {
    pub tag: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
    /// Rendered body for tags that have one.
    pub body: Option<Value>,
}

/// A custom tag. The default parser reads a comma separated argument list and, when
/// [`Extension::has_body`] says so, a body closed by `end<tag>`.
pub trait Extension {
    fn tags(&self) -> &[&str];

    fn has_body(&self, _tag: &str) -> bool {
        false
    }

    fn parse(&self, parser: &mut Parser<'_>, tag: &str, span: Span) -> Result<Node, SyntaxError> {
        parser.parse_call_extension(tag, span, self.has_body(tag))
    }

    /// May finish later; the result is written where the tag appears.
    fn run(&self, call: ExtensionCall) -> LocalBoxFuture<'static, RenderResult<Value>>;
}
