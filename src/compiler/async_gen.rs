use super::{base, CompileResult, CompileState, NodeCompiler};
use crate::compiler::ir::{AsyncBlock, Capture, CompileMode, Dispatch, Instr, Op};
use crate::language::ast::{self, Expr, Node};

/// Generator for templates whose values may still be pending.
///
/// Operand positions are settled in line (`Op::Resolve`). Anything that writes output
/// and may suspend is wrapped in a buffered-async-block so its slot is reserved in
/// document order while the work itself runs concurrently.
#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncCompiler;

impl AsyncCompiler {
    fn buffered<F>(&self, capture: Capture, out: &mut Vec<Instr>, lower: F) -> CompileResult<()>
    where
        F: FnOnce(&mut Vec<Instr>) -> CompileResult<()>,
    {
        let mut body = Vec::new();
        lower(&mut body)?;
        out.push(Instr::Async(AsyncBlock {
            body: body.into(),
            capture,
        }));
        Ok(())
    }
}

impl NodeCompiler for AsyncCompiler {
    fn mode(&self) -> CompileMode {
        CompileMode::Async
    }

    fn awaited(&self, op: Op) -> Op {
        if op.is_resolved() {
            op
        } else {
            Op::Resolve(Box::new(op))
        }
    }

    fn compile_output(
        &self,
        st: &mut CompileState,
        node: &ast::OutputNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        if matches!(node.expr, Expr::Literal { .. }) {
            return base::compile_output(self, st, node, out);
        }
        self.buffered(Capture::Snapshot, out, |body| {
            base::compile_output(self, st, node, body)
        })
    }

    fn compile_if(
        &self,
        st: &mut CompileState,
        node: &ast::IfNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        if writes_enclosing_frame(&node.body)
            || node.else_body.as_deref().is_some_and(writes_enclosing_frame)
        {
            return base::compile_if(self, st, node, out);
        }
        self.buffered(Capture::Live, out, |body| {
            base::compile_if(self, st, node, body)
        })
    }

    fn compile_for(
        &self,
        st: &mut CompileState,
        node: &ast::ForNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        let mut lower = |body: &mut Vec<Instr>| -> CompileResult<()> {
            base::compile_for(self, st, node, body)?;
            if let Some(Instr::For(for_loop)) = body.last_mut() {
                for_loop.dispatch = Dispatch::Async;
            }
            Ok(())
        };
        if node.else_body.as_deref().is_some_and(writes_enclosing_frame) {
            return lower(out);
        }
        self.buffered(Capture::Live, out, lower)
    }

    fn compile_call_block(
        &self,
        st: &mut CompileState,
        node: &ast::CallBlockNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        self.buffered(Capture::Snapshot, out, |body| {
            base::compile_call_block(self, st, node, body)
        })
    }

    fn compile_include(
        &self,
        st: &mut CompileState,
        node: &ast::IncludeNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        self.buffered(Capture::Snapshot, out, |body| {
            base::compile_include(self, st, node, body)
        })
    }

    fn compile_filter_block(
        &self,
        st: &mut CompileState,
        node: &ast::FilterBlockNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        self.buffered(Capture::Snapshot, out, |body| {
            base::compile_filter_block(self, st, node, body)
        })
    }

    fn compile_extension(
        &self,
        st: &mut CompileState,
        node: &ast::CallExtensionNode,
        out: &mut Vec<Instr>,
    ) -> CompileResult<()> {
        self.buffered(Capture::Snapshot, out, |body| {
            base::compile_extension(self, st, node, body)
        })
    }

    fn compile_symbol(&self, st: &mut CompileState, name: &str) -> CompileResult<Op> {
        let op = base::compile_symbol(self, st, name)?;
        Ok(self.awaited(op))
    }

    fn compile_lookup(
        &self,
        st: &mut CompileState,
        target: &Expr,
        key: &Expr,
    ) -> CompileResult<Op> {
        let op = base::compile_lookup(self, st, target, key)?;
        Ok(self.awaited(op))
    }

    fn compile_filter(
        &self,
        st: &mut CompileState,
        name: &str,
        input: &Expr,
        args: &ast::Arguments,
    ) -> CompileResult<Op> {
        let op = base::compile_filter(self, st, name, input, args)?;
        Ok(self.awaited(op))
    }
}

/// Whether running `nodes` in the enclosing frame can bind names there (or pick a
/// parent template). Such a conditional has to run in the main flow so that later
/// snapshots observe its writes in document order; only the output inside it is
/// dispatched.
fn writes_enclosing_frame(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| match node {
        Node::Set(_)
        | Node::Capture(_)
        | Node::Macro(_)
        | Node::Import(_)
        | Node::FromImport(_)
        | Node::Extends(_) => true,
        Node::If(node) => {
            writes_enclosing_frame(&node.body)
                || node.else_body.as_deref().is_some_and(writes_enclosing_frame)
        }
        Node::For(node) => node.else_body.as_deref().is_some_and(writes_enclosing_frame),
        _ => false,
    })
}
