//! Instruction form of a compiled template.
//!
//! Output is always an explicit instruction: `Text` and `Emit` append to the current
//! buffer, while `Async` reserves a slot and fills it from a tracked task. The same
//! instruction set serves both generator strategies.

use crate::runtime::value::Value;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type Block = Rc<[Instr]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompileMode {
    Sync,
    Async,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub name: String,
    pub mode: CompileMode,
    pub body: Block,
    pub blocks: BTreeMap<String, Block>,
}

/// Where an emitted value came from, for undefined-value errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    pub name: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Clone, Debug)]
pub enum Instr {
    Text(String),
    Emit {
        value: Op,
        origin: Origin,
    },
    Async(AsyncBlock),
    If {
        cond: Op,
        body: Block,
        else_body: Option<Block>,
    },
    For(ForLoop),
    Set {
        targets: Vec<String>,
        value: Op,
    },
    Capture {
        target: String,
        body: Block,
    },
    Macro(Rc<MacroDef>),
    Include {
        template: Op,
        ignore_missing: bool,
    },
    Import {
        template: Op,
        alias: String,
    },
    FromImport {
        template: Op,
        names: Vec<(String, String)>,
    },
    Extends(Op),
    Block(String),
    FilterBlock {
        filter: String,
        args: Vec<Op>,
        kwargs: Vec<(String, Op)>,
        body: Block,
        origin: Origin,
    },
    Extension {
        tag: String,
        args: Vec<Op>,
        kwargs: Vec<(String, Op)>,
        body: Option<Block>,
        origin: Origin,
    },
}

/// Buffered-async-block: runs `body` into its own buffer, written back into a slot
/// reserved where the block appears.
#[derive(Clone, Debug)]
pub struct AsyncBlock {
    pub body: Block,
    pub capture: Capture,
}

/// Which frame a spawned block sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    /// Copy of the frame taken when the block starts.
    Snapshot,
    /// The enclosing frame itself, so bindings made inside stay visible after it.
    Live,
}

#[derive(Clone, Debug)]
pub struct ForLoop {
    pub targets: Vec<String>,
    pub iter: Op,
    pub body: Block,
    pub else_body: Option<Block>,
    pub dispatch: Dispatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Iterations run one after another into the enclosing buffer.
    Inline,
    /// Each iteration is its own buffered-async-block.
    Async,
}

#[derive(Debug)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<(String, Option<Op>)>,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub enum Op {
    Const(Value),
    Symbol(String),
    Lookup {
        target: Box<Op>,
        key: Box<Op>,
    },
    Call {
        name: String,
        callee: Box<Op>,
        args: Vec<Op>,
        kwargs: Vec<(String, Op)>,
    },
    Filter {
        name: String,
        input: Box<Op>,
        args: Vec<Op>,
        kwargs: Vec<(String, Op)>,
    },
    Not(Box<Op>),
    Neg(Box<Op>),
    Pos(Box<Op>),
    And(Box<Op>, Box<Op>),
    Or(Box<Op>, Box<Op>),
    Binary {
        op: BinaryKind,
        left: Box<Op>,
        right: Box<Op>,
    },
    InlineIf {
        cond: Box<Op>,
        then: Box<Op>,
        otherwise: Option<Box<Op>>,
    },
    List(Vec<Op>),
    Dict(Vec<(Op, Op)>),
    /// `caller` body of a call block, evaluated to a macro closing over the call site.
    Caller(Rc<MacroDef>),
    /// Renders the next definition of the named block.
    Super(String),
    /// Awaited-inline: settles a pending value or getter before use.
    Resolve(Box<Op>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl Op {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Op::Resolve(_) | Op::Const(_))
    }
}
