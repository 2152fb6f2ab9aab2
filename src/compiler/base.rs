//! Synchronous lowering of every node kind. These are the bodies behind the default
//! [`NodeCompiler`] hooks; they recurse through the hooks so an overriding strategy sees
//! every nested node.

use super::{CompileError, CompileResult, CompileState, NodeCompiler};
use crate::compiler::ir::{BinaryKind, Block, Dispatch, ForLoop, Instr, MacroDef, Op, Origin};
use crate::language::ast::{self, BinaryOp, Expr, Literal, Node, UnaryOp};
use crate::language::span::Span;
use crate::runtime::value::Value;
use std::rc::Rc;

pub fn compile_body<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    nodes: &[Node],
) -> CompileResult<Block> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        c.compile_node(st, node, &mut out)?;
    }
    Ok(out.into())
}

pub fn compile_node<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &Node,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    match node {
        Node::Text(node) => c.compile_text(st, node, out),
        Node::Output(node) => c.compile_output(st, node, out),
        Node::If(node) => c.compile_if(st, node, out),
        Node::For(node) => c.compile_for(st, node, out),
        Node::Set(node) => c.compile_set(st, node, out),
        Node::Capture(node) => c.compile_capture(st, node, out),
        Node::Macro(node) => c.compile_macro(st, node, out),
        Node::CallBlock(node) => c.compile_call_block(st, node, out),
        Node::Include(node) => c.compile_include(st, node, out),
        Node::Import(node) => c.compile_import(st, node, out),
        Node::FromImport(node) => c.compile_from_import(st, node, out),
        Node::Extends(node) => c.compile_extends(st, node, out),
        Node::Block(node) => c.compile_block(st, node, out),
        Node::FilterBlock(node) => c.compile_filter_block(st, node, out),
        Node::CallExtension(node) => c.compile_extension(st, node, out),
    }
}

pub fn compile_text<C: NodeCompiler + ?Sized>(
    _c: &C,
    _st: &mut CompileState,
    node: &ast::TextNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    out.push(Instr::Text(node.value.clone()));
    Ok(())
}

pub fn compile_output<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::OutputNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let value = c.compile_expr(st, &node.expr)?;
    out.push(Instr::Emit {
        value: c.awaited(value),
        origin: origin(&node.expr, node.expr.span()),
    });
    Ok(())
}

pub fn compile_if<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::IfNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let cond = c.compile_expr(st, &node.cond)?;
    let body = compile_body(c, st, &node.body)?;
    let else_body = match &node.else_body {
        Some(nodes) => Some(compile_body(c, st, nodes)?),
        None => None,
    };
    out.push(Instr::If {
        cond: c.awaited(cond),
        body,
        else_body,
    });
    Ok(())
}

pub fn compile_for<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::ForNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let iter = c.compile_expr(st, &node.iter)?;
    let body = compile_body(c, st, &node.body)?;
    let else_body = match &node.else_body {
        Some(nodes) => Some(compile_body(c, st, nodes)?),
        None => None,
    };
    out.push(Instr::For(ForLoop {
        targets: node.targets.clone(),
        iter: c.awaited(iter),
        body,
        else_body,
        dispatch: Dispatch::Inline,
    }));
    Ok(())
}

pub fn compile_set<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::SetNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let value = c.compile_expr(st, &node.value)?;
    out.push(Instr::Set {
        targets: node.targets.clone(),
        value,
    });
    Ok(())
}

pub fn compile_capture<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::CaptureNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let body = compile_body(c, st, &node.body)?;
    out.push(Instr::Capture {
        target: node.target.clone(),
        body,
    });
    Ok(())
}

pub fn compile_macro<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::MacroNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let def = macro_def(c, st, &node.name, &node.params, &node.body)?;
    out.push(Instr::Macro(Rc::new(def)));
    Ok(())
}

/// Lowers `{% call %}` to an output of the call with an extra `caller` keyword argument.
pub fn compile_call_block<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::CallBlockNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let caller = Rc::new(macro_def(c, st, "caller", &node.caller_params, &node.body)?);
    let mut op = match &node.call {
        Expr::Call { callee, args, span } => c.compile_call(st, callee, args, *span)?,
        other => c.compile_expr(st, other)?,
    };
    if let Op::Call { kwargs, .. } = &mut op {
        kwargs.push(("caller".to_string(), Op::Caller(caller)));
    }
    out.push(Instr::Emit {
        value: c.awaited(op),
        origin: origin(&node.call, node.span),
    });
    Ok(())
}

pub fn compile_include<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::IncludeNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let template = c.compile_expr(st, &node.template)?;
    out.push(Instr::Include {
        template: c.awaited(template),
        ignore_missing: node.ignore_missing,
    });
    Ok(())
}

pub fn compile_import<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::ImportNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let template = c.compile_expr(st, &node.template)?;
    out.push(Instr::Import {
        template: c.awaited(template),
        alias: node.alias.clone(),
    });
    Ok(())
}

pub fn compile_from_import<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::FromImportNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let template = c.compile_expr(st, &node.template)?;
    let names = node
        .names
        .iter()
        .map(|import| {
            let alias = import.alias.clone().unwrap_or_else(|| import.name.clone());
            (import.name.clone(), alias)
        })
        .collect();
    out.push(Instr::FromImport {
        template: c.awaited(template),
        names,
    });
    Ok(())
}

pub fn compile_extends<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::ExtendsNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let template = c.compile_expr(st, &node.template)?;
    out.push(Instr::Extends(c.awaited(template)));
    Ok(())
}

pub fn compile_block<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::BlockNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let previous = st.current_block.replace(node.name.clone());
    let body = compile_body(c, st, &node.body);
    st.current_block = previous;
    let body = body?;
    if st.blocks.contains_key(&node.name) {
        return Err(CompileError::DuplicateBlock {
            name: node.name.clone(),
            template: st.template.clone(),
        });
    }
    st.blocks.insert(node.name.clone(), body);
    out.push(Instr::Block(node.name.clone()));
    Ok(())
}

pub fn compile_filter_block<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::FilterBlockNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let (args, kwargs) = compile_arguments(c, st, &node.args)?;
    let body = compile_body(c, st, &node.body)?;
    out.push(Instr::FilterBlock {
        filter: node.name.clone(),
        args,
        kwargs,
        body,
        origin: Origin {
            name: node.name.clone(),
            line: node.span.line,
            column: node.span.column,
        },
    });
    Ok(())
}

pub fn compile_extension<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    node: &ast::CallExtensionNode,
    out: &mut Vec<Instr>,
) -> CompileResult<()> {
    let Expr::Args { args, .. } = &node.args else {
        return Err(CompileError::MalformedExtension {
            tag: node.tag.clone(),
            line: node.span.line,
        });
    };
    let (args, kwargs) = compile_arguments(c, st, args)?;
    let body = match &node.body {
        Some(nodes) => Some(compile_body(c, st, nodes)?),
        None => None,
    };
    out.push(Instr::Extension {
        tag: node.tag.clone(),
        args,
        kwargs,
        body,
        origin: Origin {
            name: node.tag.clone(),
            line: node.span.line,
            column: node.span.column,
        },
    });
    Ok(())
}

pub fn compile_expr<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    expr: &Expr,
) -> CompileResult<Op> {
    let op = match expr {
        Expr::Literal { value, .. } => Op::Const(literal_value(value)),
        Expr::Symbol { name, .. } => c.compile_symbol(st, name)?,
        Expr::List { items, .. } => Op::List(
            items
                .iter()
                .map(|item| c.compile_expr(st, item))
                .collect::<CompileResult<_>>()?,
        ),
        Expr::Dict { entries, .. } => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let key = c.compile_expr(st, key)?;
                pairs.push((c.awaited(key), c.compile_expr(st, value)?));
            }
            Op::Dict(pairs)
        }
        Expr::Lookup { target, key, .. } => c.compile_lookup(st, target, key)?,
        Expr::Call { callee, args, span } => c.compile_call(st, callee, args, *span)?,
        Expr::Filter {
            name, input, args, ..
        } => c.compile_filter(st, name, input, args)?,
        Expr::Unary { op, operand, .. } => {
            let operand = c.compile_expr(st, operand)?;
            let operand = Box::new(c.awaited(operand));
            match op {
                UnaryOp::Not => Op::Not(operand),
                UnaryOp::Neg => Op::Neg(operand),
                UnaryOp::Pos => Op::Pos(operand),
            }
        }
        Expr::Binary {
            op, left, right, ..
        } => {
            let left = c.compile_expr(st, left)?;
            let left = Box::new(c.awaited(left));
            let right = c.compile_expr(st, right)?;
            let right = Box::new(c.awaited(right));
            match binary_kind(*op) {
                Some(kind) => Op::Binary {
                    op: kind,
                    left,
                    right,
                },
                None if *op == BinaryOp::And => Op::And(left, right),
                None => Op::Or(left, right),
            }
        }
        Expr::InlineIf {
            cond,
            then,
            otherwise,
            ..
        } => {
            let cond = c.compile_expr(st, cond)?;
            let then = c.compile_expr(st, then)?;
            let otherwise = match otherwise {
                Some(expr) => Some(Box::new(c.compile_expr(st, expr)?)),
                None => None,
            };
            Op::InlineIf {
                cond: Box::new(c.awaited(cond)),
                then: Box::new(then),
                otherwise,
            }
        }
        Expr::Args { span, .. } => {
            return Err(CompileError::MisplacedArguments { line: span.line });
        }
    };
    Ok(op)
}

pub fn compile_symbol<C: NodeCompiler + ?Sized>(
    _c: &C,
    _st: &mut CompileState,
    name: &str,
) -> CompileResult<Op> {
    Ok(Op::Symbol(name.to_string()))
}

pub fn compile_lookup<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    target: &Expr,
    key: &Expr,
) -> CompileResult<Op> {
    let target = c.compile_expr(st, target)?;
    let key = c.compile_expr(st, key)?;
    Ok(Op::Lookup {
        target: Box::new(c.awaited(target)),
        key: Box::new(c.awaited(key)),
    })
}

pub fn compile_call<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    callee: &Expr,
    args: &ast::Arguments,
    span: Span,
) -> CompileResult<Op> {
    if matches!(callee, Expr::Symbol { name, .. } if name == "super") && args.is_empty() {
        return match &st.current_block {
            Some(block) => Ok(Op::Super(block.clone())),
            None => Err(CompileError::SuperOutsideBlock { line: span.line }),
        };
    }
    let name = label(callee);
    let callee = c.compile_expr(st, callee)?;
    let (args, kwargs) = compile_arguments(c, st, args)?;
    Ok(Op::Call {
        name,
        callee: Box::new(c.awaited(callee)),
        args,
        kwargs,
    })
}

pub fn compile_filter<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    name: &str,
    input: &Expr,
    args: &ast::Arguments,
) -> CompileResult<Op> {
    let input = c.compile_expr(st, input)?;
    let (args, kwargs) = compile_arguments(c, st, args)?;
    Ok(Op::Filter {
        name: name.to_string(),
        input: Box::new(c.awaited(input)),
        args,
        kwargs,
    })
}

pub fn compile_arguments<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    args: &ast::Arguments,
) -> CompileResult<(Vec<Op>, Vec<(String, Op)>)> {
    let mut positional = Vec::with_capacity(args.positional.len());
    for arg in &args.positional {
        let op = c.compile_expr(st, arg)?;
        positional.push(c.awaited(op));
    }
    let mut keyword = Vec::with_capacity(args.keyword.len());
    for (name, arg) in &args.keyword {
        let op = c.compile_expr(st, arg)?;
        keyword.push((name.clone(), c.awaited(op)));
    }
    Ok((positional, keyword))
}

fn macro_def<C: NodeCompiler + ?Sized>(
    c: &C,
    st: &mut CompileState,
    name: &str,
    params: &[ast::Param],
    body: &[Node],
) -> CompileResult<MacroDef> {
    let mut lowered = Vec::with_capacity(params.len());
    for param in params {
        let default = match &param.default {
            Some(expr) => Some(c.compile_expr(st, expr)?),
            None => None,
        };
        lowered.push((param.name.clone(), default));
    }
    Ok(MacroDef {
        name: name.to_string(),
        params: lowered,
        body: compile_body(c, st, body)?,
    })
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::None => Value::None,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// `None` for the short-circuit operators, which lower to `Op::And` / `Op::Or`.
fn binary_kind(op: BinaryOp) -> Option<BinaryKind> {
    let kind = match op {
        BinaryOp::Eq => BinaryKind::Eq,
        BinaryOp::NotEq => BinaryKind::NotEq,
        BinaryOp::Lt => BinaryKind::Lt,
        BinaryOp::LtEq => BinaryKind::LtEq,
        BinaryOp::Gt => BinaryKind::Gt,
        BinaryOp::GtEq => BinaryKind::GtEq,
        BinaryOp::In => BinaryKind::In,
        BinaryOp::NotIn => BinaryKind::NotIn,
        BinaryOp::Concat => BinaryKind::Concat,
        BinaryOp::Add => BinaryKind::Add,
        BinaryOp::Sub => BinaryKind::Sub,
        BinaryOp::Mul => BinaryKind::Mul,
        BinaryOp::Div => BinaryKind::Div,
        BinaryOp::FloorDiv => BinaryKind::FloorDiv,
        BinaryOp::Mod => BinaryKind::Mod,
        BinaryOp::Pow => BinaryKind::Pow,
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(kind)
}

/// Readable name for an expression in error messages.
fn label(expr: &Expr) -> String {
    match expr {
        Expr::Symbol { name, .. } => name.clone(),
        Expr::Lookup { target, key, .. } => match key.as_ref() {
            Expr::Literal {
                value: Literal::String(key),
                ..
            } => format!("{}.{key}", label(target)),
            _ => format!("{}[..]", label(target)),
        },
        Expr::Call { callee, .. } => format!("{}()", label(callee)),
        Expr::Filter { name, .. } => format!("filter `{name}`"),
        _ => "expression".to_string(),
    }
}

fn origin(expr: &Expr, span: Span) -> Origin {
    Origin {
        name: label(expr),
        line: span.line,
        column: span.column,
    }
}
