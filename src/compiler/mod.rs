pub mod async_gen;
pub mod base;
pub mod ir;

use crate::language::ast::{self, Expr, Node};
use ir::{CompileMode, Instr, Op, Program};
use std::collections::BTreeMap;
use thiserror::Error;

pub use async_gen::AsyncCompiler;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Clone, Debug, Error)]
pub enum CompileError {
    #[error("Malformed `{tag}` extension node: arguments must be an argument list (line {line})")]
    MalformedExtension { tag: String, line: usize },
    #[error("Block `{name}` is defined more than once in `{template}`")]
    DuplicateBlock { name: String, template: String },
    #[error("`super()` used outside of a block (line {line})")]
    SuperOutsideBlock { line: usize },
    #[error("Bare argument list used as a value (line {line})")]
    MisplacedArguments { line: usize },
}

/// Bookkeeping carried through one template compilation.
#[derive(Default)]
pub struct CompileState {
    pub template: String,
    pub blocks: BTreeMap<String, ir::Block>,
    pub current_block: Option<String>,
}

/// Code generator, one hook per node and expression kind. Every hook defaults to the
/// synchronous lowering in [`base`]; a strategy overrides only the constructs it emits
/// differently and delegates the rest.
pub trait NodeCompiler {
    fn mode(&self) -> CompileMode;

    /// Marks an operand that must be settled before use. Identity for synchronous output.
    fn awaited(&self, op: Op) -> Op {
        op
    }

    fn compile_node(
        &self,
        st: &mut CompileState,
        node: &Node,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_node(self, st, node, out)
    }

    fn compile_text(
        &self,
        st: &mut CompileState,
        node: &ast::TextNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_text(self, st, node, out)
    }

    fn compile_output(
        &self,
        st: &mut CompileState,
        node: &ast::OutputNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_output(self, st, node, out)
    }

    fn compile_if(
        &self,
        st: &mut CompileState,
        node: &ast::IfNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_if(self, st, node, out)
    }

    fn compile_for(
        &self,
        st: &mut CompileState,
        node: &ast::ForNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_for(self, st, node, out)
    }

    fn compile_set(
        &self,
        st: &mut CompileState,
        node: &ast::SetNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_set(self, st, node, out)
    }

    fn compile_capture(
        &self,
        st: &mut CompileState,
        node: &ast::CaptureNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_capture(self, st, node, out)
    }

    fn compile_macro(
        &self,
        st: &mut CompileState,
        node: &ast::MacroNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_macro(self, st, node, out)
    }

    fn compile_call_block(
        &self,
        st: &mut CompileState,
        node: &ast::CallBlockNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_call_block(self, st, node, out)
    }

    fn compile_include(
        &self,
        st: &mut CompileState,
        node: &ast::IncludeNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_include(self, st, node, out)
    }

    fn compile_import(
        &self,
        st: &mut CompileState,
        node: &ast::ImportNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_import(self, st, node, out)
    }

    fn compile_from_import(
        &self,
        st: &mut CompileState,
        node: &ast::FromImportNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_from_import(self, st, node, out)
    }

    fn compile_extends(
        &self,
        st: &mut CompileState,
        node: &ast::ExtendsNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_extends(self, st, node, out)
    }

    fn compile_block(
        &self,
        st: &mut CompileState,
        node: &ast::BlockNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_block(self, st, node, out)
    }

    fn compile_filter_block(
        &self,
        st: &mut CompileState,
        node: &ast::FilterBlockNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_filter_block(self, st, node, out)
    }

    fn compile_extension(
        &self,
        st: &mut CompileState,
        node: &ast::CallExtensionNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        base::compile_extension(self, st, node, out)
    }

    fn compile_expr(&self, st: &mut CompileState, expr: &Expr) -> CompileResult<Op> {
        base::compile_expr(self, st, expr)
    }

    fn compile_symbol(&self, st: &mut CompileState, name: &str) -> CompileResult<Op> {
        base::compile_symbol(self, st, name)
    }

    fn compile_lookup(
        &self,
        st: &mut CompileState,
        target: &Expr,
        key: &Expr,
    ) -> CompileResult<Op> {
        base::compile_lookup(self, st, target, key)
    }

    fn compile_call(
        &self,
        st: &mut CompileState,
        callee: &Expr,
        args: &ast::Arguments,
        span: crate::language::span::Span,
    ) -> CompileResult<Op> {
        base::compile_call(self, st, callee, args, span)
    }

    fn compile_filter(
        &self,
        st: &mut CompileState,
        name: &str,
        input: &Expr,
        args: &ast::Arguments,
    ) -> CompileResult<Op> {
        base::compile_filter(self, st, name, input, args)
    }
}

/// Plain synchronous lowering: direct appends, no awaited operands, no async blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncCompiler;

impl NodeCompiler for SyncCompiler {
    fn mode(&self) -> CompileMode {
        CompileMode::Sync
    }
}

pub fn compile_template(
    generator: &dyn NodeCompiler,
    template: &ast::Template,
) -> CompileResult<Program> {
    let mut st = CompileState {
        template: template.name.clone(),
        ..CompileState::default()
    };
    let body = base::compile_body(generator, &mut st, &template.body)?;
    tracing::trace!(
        template = %template.name,
        instructions = body.len(),
        blocks = st.blocks.len(),
        "compiled template"
    );
    Ok(Program {
        name: template.name.clone(),
        mode: generator.mode(),
        body,
        blocks: st.blocks,
    })
}
