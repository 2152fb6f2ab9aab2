use crate::language::span::Span;

#[derive(Clone, Debug)]
pub struct Template {
    pub name: String,
    pub body: Vec<Node>,
}

#[derive(Clone, Debug)]
pub enum Node {
    Text(TextNode),
    Output(OutputNode),
    If(IfNode),
    For(ForNode),
    Set(SetNode),
    Capture(CaptureNode),
    Macro(MacroNode),
    CallBlock(CallBlockNode),
    Include(IncludeNode),
    Import(ImportNode),
    FromImport(FromImportNode),
    Extends(ExtendsNode),
    Block(BlockNode),
    FilterBlock(FilterBlockNode),
    CallExtension(CallExtensionNode),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Text(node) => node.span,
            Node::Output(node) => node.span,
            Node::If(node) => node.span,
            Node::For(node) => node.span,
            Node::Set(node) => node.span,
            Node::Capture(node) => node.span,
            Node::Macro(node) => node.span,
            Node::CallBlock(node) => node.span,
            Node::Include(node) => node.span,
            Node::Import(node) => node.span,
            Node::FromImport(node) => node.span,
            Node::Extends(node) => node.span,
            Node::Block(node) => node.span,
            Node::FilterBlock(node) => node.span,
            Node::CallExtension(node) => node.span,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextNode {
    pub value: String,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct OutputNode {
    pub expr: Expr,
    pub span: Span,
}

/// `elif` chains are represented as a nested `If` in `else_body`.
#[derive(Clone, Debug)]
pub struct IfNode {
    pub cond: Expr,
    pub body: Vec<Node>,
    pub else_body: Option<Vec<Node>>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ForNode {
    pub targets: Vec<String>,
    pub iter: Expr,
    pub body: Vec<Node>,
    pub else_body: Option<Vec<Node>>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct SetNode {
    pub targets: Vec<String>,
    pub value: Expr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct CaptureNode {
    pub target: String,
    pub body: Vec<Node>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct MacroNode {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Node>,
    pub span: Span,
}

/// `{% call target(args) %}body{% endcall %}`; the body is handed to the callee as `caller`.
#[derive(Clone, Debug)]
pub struct CallBlockNode {
    pub call: Expr,
    pub caller_params: Vec<Param>,
    pub body: Vec<Node>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct IncludeNode {
    pub template: Expr,
    pub ignore_missing: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ImportNode {
    pub template: Expr,
    pub alias: String,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ImportName {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FromImportNode {
    pub template: Expr,
    pub names: Vec<ImportName>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ExtendsNode {
    pub template: Expr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct BlockNode {
    pub name: String,
    pub body: Vec<Node>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FilterBlockNode {
    pub name: String,
    pub args: Arguments,
    pub body: Vec<Node>,
    pub span: Span,
}

/// Node produced by an extension tag. `args` is expected to be an [`Expr::Args`] list;
/// extensions with a custom parser may hand back anything, which the compiler rejects.
#[derive(Clone, Debug)]
pub struct CallExtensionNode {
    pub tag: String,
    pub args: Expr,
    pub body: Option<Vec<Node>>,
    pub span: Span,
}

#[derive(Clone, Debug, Default)]
pub struct Arguments {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
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

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    Symbol {
        name: String,
        span: Span,
    },
    List {
        items: Vec<Expr>,
        span: Span,
    },
    Dict {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
    Lookup {
        target: Box<Expr>,
        key: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Arguments,
        span: Span,
    },
    Filter {
        name: String,
        input: Box<Expr>,
        args: Arguments,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    InlineIf {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
        span: Span,
    },
    /// A bare argument list; only valid as the `args` of an extension node.
    Args {
        args: Arguments,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Symbol { span, .. }
            | Expr::List { span, .. }
            | Expr::Dict { span, .. }
            | Expr::Lookup { span, .. }
            | Expr::Call { span, .. }
            | Expr::Filter { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::InlineIf { span, .. }
            | Expr::Args { span, .. } => *span,
        }
    }

    pub fn string(value: impl Into<String>, span: Span) -> Self {
        Expr::Literal {
            value: Literal::String(value.into()),
            span,
        }
    }
}
