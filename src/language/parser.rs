use crate::extension::Extension;
use crate::language::{
    ast::*,
    errors::{SyntaxError, SyntaxErrors},
    lexer::{lex, LexOptions},
    span::Span,
    token::{Token, TokenKind},
};
use std::rc::Rc;

/// Parses template source into a syntax tree. Tags not built into the language are
/// offered to `extensions` by name.
pub fn parse_template(
    name: &str,
    source: &str,
    options: LexOptions,
    extensions: &[Rc<dyn Extension>],
) -> Result<Template, SyntaxErrors> {
    let tokens = match lex(source, options) {
        Ok(tokens) => tokens,
        Err(errors) => {
            let errs = errors
                .into_iter()
                .map(|err| SyntaxError::new(err.message, err.span))
                .collect();
            return Err(SyntaxErrors::new(name, source, errs));
        }
    };
    let mut parser = Parser::new(tokens, extensions);
    let body = parser.parse_root();
    if parser.errors.is_empty() {
        Ok(Template {
            name: name.to_string(),
            body,
        })
    } else {
        Err(SyntaxErrors::new(name, source, parser.errors))
    }
}

pub struct Parser<'e> {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
    extensions: &'e [Rc<dyn Extension>],
}

impl<'e> Parser<'e> {
    fn new(tokens: Vec<Token>, extensions: &'e [Rc<dyn Extension>]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            extensions,
        }
    }

    fn parse_root(&mut self) -> Vec<Node> {
        match self.parse_nodes(&[]) {
            Ok((nodes, _)) => nodes,
            Err(err) => {
                self.report(err);
                Vec::new()
            }
        }
    }

    /// Parses nodes until one of `end_tags` opens a block tag. The block start and the
    /// tag name are consumed; the rest of that tag is left to the caller.
    fn parse_nodes(
        &mut self,
        end_tags: &[&str],
    ) -> Result<(Vec<Node>, Option<String>), SyntaxError> {
        let mut nodes = Vec::new();
        loop {
            let token = self.peek().clone();
            match token.kind {
                TokenKind::Eof => {
                    if end_tags.is_empty() {
                        return Ok((nodes, None));
                    }
                    let expected = end_tags
                        .iter()
                        .map(|tag| format!("`{{% {tag} %}}`"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return Err(SyntaxError::new(
                        "Unexpected end of template",
                        token.span,
                    )
                    .with_help(format!("expected one of {expected}")));
                }
                TokenKind::Data(text) => {
                    self.advance();
                    nodes.push(Node::Text(TextNode {
                        value: text,
                        span: token.span,
                    }));
                }
                TokenKind::VariableStart => {
                    self.advance();
                    match self.parse_output(token.span) {
                        Ok(node) => nodes.push(node),
                        Err(err) => {
                            self.report(err);
                            self.synchronize();
                        }
                    }
                }
                TokenKind::BlockStart => {
                    let tag = match &self.peek_at(1).kind {
                        TokenKind::Identifier(name) => name.clone(),
                        _ => {
                            self.advance();
                            let err = self.error_here("Expected a tag name after `{%`");
                            self.report(err);
                            self.synchronize();
                            continue;
                        }
                    };
                    if end_tags.contains(&tag.as_str()) {
                        self.advance();
                        self.advance();
                        return Ok((nodes, Some(tag)));
                    }
                    self.advance();
                    self.advance();
                    match self.parse_statement(&tag, token.span) {
                        Ok(node) => nodes.push(node),
                        Err(err) => {
                            self.report(err);
                            self.synchronize();
                        }
                    }
                }
                _ => {
                    let err = SyntaxError::new(
                        format!("Unexpected {}", token.kind.describe()),
                        token.span,
                    );
                    self.advance();
                    self.report(err);
                }
            }
        }
    }

    fn parse_output(&mut self, start: Span) -> Result<Node, SyntaxError> {
        let expr = self.parse_expression()?;
        self.expect(TokenKind::VariableEnd)?;
        Ok(Node::Output(OutputNode {
            expr,
            span: start.to(self.previous_span()),
        }))
    }

    fn parse_statement(&mut self, tag: &str, span: Span) -> Result<Node, SyntaxError> {
        match tag {
            "if" => self.parse_if(span),
            "for" => self.parse_for(span),
            "set" => self.parse_set(span),
            "macro" => self.parse_macro(span),
            "call" => self.parse_call_block(span),
            "include" => self.parse_include(span),
            "import" => self.parse_import(span),
            "from" => self.parse_from_import(span),
            "extends" => self.parse_extends(span),
            "block" => self.parse_block(span),
            "filter" => self.parse_filter_block(span),
            other => {
                let extension = self
                    .extensions
                    .iter()
                    .find(|ext| ext.tags().contains(&other))
                    .cloned();
                match extension {
                    Some(extension) => extension.parse(self, other, span),
                    None => Err(SyntaxError::new(format!("Unknown block tag `{other}`"), span)
                        .with_help("register an extension to handle custom tags")),
                }
            }
        }
    }

    fn parse_if(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let cond = self.parse_expression()?;
        self.expect_block_end()?;
        let (body, end) = self.parse_nodes(&["elif", "else", "endif"])?;
        let else_body = match end.as_deref() {
            Some("elif") => {
                let elif_span = self.previous_span();
                Some(vec![self.parse_if(elif_span)?])
            }
            Some("else") => {
                self.expect_block_end()?;
                let (nodes, _) = self.parse_nodes(&["endif"])?;
                self.expect_block_end()?;
                Some(nodes)
            }
            _ => {
                self.expect_block_end()?;
                None
            }
        };
        Ok(Node::If(IfNode {
            cond,
            body,
            else_body,
            span,
        }))
    }

    fn parse_for(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let mut targets = vec![self.expect_identifier("Expected loop variable")?.0];
        while self.matches(&TokenKind::Comma) {
            targets.push(self.expect_identifier("Expected loop variable after `,`")?.0);
        }
        if !self.matches_keyword("in") {
            return Err(self.error_here("Expected `in` after loop variables"));
        }
        let iter = self.parse_expression()?;
        self.expect_block_end()?;
        let (body, end) = self.parse_nodes(&["else", "endfor"])?;
        self.expect_block_end()?;
        let else_body = if end.as_deref() == Some("else") {
            let (nodes, _) = self.parse_nodes(&["endfor"])?;
            self.expect_block_end()?;
            Some(nodes)
        } else {
            None
        };
        Ok(Node::For(ForNode {
            targets,
            iter,
            body,
            else_body,
            span,
        }))
    }

    fn parse_set(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let mut targets = vec![self.expect_identifier("Expected variable name")?.0];
        while self.matches(&TokenKind::Comma) {
            targets.push(self.expect_identifier("Expected variable name after `,`")?.0);
        }
        if self.matches(&TokenKind::Assign) {
            let value = self.parse_expression()?;
            self.expect_block_end()?;
            return Ok(Node::Set(SetNode {
                targets,
                value,
                span,
            }));
        }
        if targets.len() != 1 {
            return Err(SyntaxError::new(
                "Block `set` captures into exactly one variable",
                span,
            ));
        }
        self.expect_block_end()?;
        let body = self.parse_body("endset")?;
        Ok(Node::Capture(CaptureNode {
            target: targets.remove(0),
            body,
            span,
        }))
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        let mut params = Vec::new();
        self.expect(TokenKind::LParen)?;
        while !self.check(&TokenKind::RParen) {
            let name = self.expect_identifier("Expected parameter name")?.0;
            let default = if self.matches(&TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_macro(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let name = self.expect_identifier("Expected macro name")?.0;
        let params = if self.check(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        self.expect_block_end()?;
        let body = self.parse_body("endmacro")?;
        Ok(Node::Macro(MacroNode {
            name,
            params,
            body,
            span,
        }))
    }

    fn parse_call_block(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let caller_params = if self.check(&TokenKind::LParen) {
            self.parse_params()?
        } else {
            Vec::new()
        };
        let call = self.parse_expression()?;
        if !matches!(call, Expr::Call { .. }) {
            return Err(SyntaxError::new("`call` expects a macro call", call.span())
                .with_help("write `{% call name(args) %}`"));
        }
        self.expect_block_end()?;
        let body = self.parse_body("endcall")?;
        Ok(Node::CallBlock(CallBlockNode {
            call,
            caller_params,
            body,
            span,
        }))
    }

    fn parse_include(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let template = self.parse_expression()?;
        let ignore_missing = if self.matches_keyword("ignore") {
            if !self.matches_keyword("missing") {
                return Err(self.error_here("Expected `missing` after `ignore`"));
            }
            true
        } else {
            false
        };
        self.expect_block_end()?;
        Ok(Node::Include(IncludeNode {
            template,
            ignore_missing,
            span,
        }))
    }

    fn parse_import(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let template = self.parse_expression()?;
        if !self.matches_keyword("as") {
            return Err(self.error_here("Expected `as` after import target"));
        }
        let alias = self.expect_identifier("Expected import alias")?.0;
        self.expect_block_end()?;
        Ok(Node::Import(ImportNode {
            template,
            alias,
            span,
        }))
    }

    fn parse_from_import(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let template = self.parse_expression()?;
        if !self.matches_keyword("import") {
            return Err(self.error_here("Expected `import` after template name"));
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_identifier("Expected name to import")?.0;
            let alias = if self.matches_keyword("as") {
                Some(self.expect_identifier("Expected alias after `as`")?.0)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect_block_end()?;
        Ok(Node::FromImport(FromImportNode {
            template,
            names,
            span,
        }))
    }

    fn parse_extends(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let template = self.parse_expression()?;
        self.expect_block_end()?;
        Ok(Node::Extends(ExtendsNode { template, span }))
    }

    fn parse_block(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let name = self.expect_identifier("Expected block name")?.0;
        self.expect_block_end()?;
        let (body, _) = self.parse_nodes(&["endblock"])?;
        if let TokenKind::Identifier(closing) = &self.peek().kind {
            if closing != &name {
                let err = SyntaxError::new(
                    format!("Mismatched `endblock {closing}` for block `{name}`"),
                    self.peek().span,
                );
                return Err(err);
            }
            self.advance();
        }
        self.expect_block_end()?;
        Ok(Node::Block(BlockNode { name, body, span }))
    }

    fn parse_filter_block(&mut self, span: Span) -> Result<Node, SyntaxError> {
        let name = self.expect_identifier("Expected filter name")?.0;
        let args = if self.matches(&TokenKind::LParen) {
            self.parse_call_arguments()?
        } else {
            Arguments::default()
        };
        self.expect_block_end()?;
        let body = self.parse_body("endfilter")?;
        Ok(Node::FilterBlock(FilterBlockNode {
            name,
            args,
            body,
            span,
        }))
    }

    /// Default parse for an extension tag: a comma separated argument list up to `%}`,
    /// optionally followed by a body closed by `end<tag>`.
    pub fn parse_call_extension(
        &mut self,
        tag: &str,
        span: Span,
        with_body: bool,
    ) -> Result<Node, SyntaxError> {
        let args_start = self.current_span();
        let args = self.parse_tag_arguments()?;
        let args_span = args_start.to(self.previous_span());
        self.expect_block_end()?;
        let body = if with_body {
            Some(self.parse_body(&format!("end{tag}"))?)
        } else {
            None
        };
        Ok(Node::CallExtension(CallExtensionNode {
            tag: tag.to_string(),
            args: Expr::Args {
                args,
                span: args_span,
            },
            body,
            span,
        }))
    }

    /// Arguments written directly inside a tag, without parentheses.
    pub fn parse_tag_arguments(&mut self) -> Result<Arguments, SyntaxError> {
        let mut args = Arguments::default();
        while !self.check(&TokenKind::BlockEnd) && !self.check(&TokenKind::Eof) {
            self.parse_argument(&mut args)?;
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    /// Parses nodes up to `{% end_tag %}` and consumes the closing tag.
    pub fn parse_body(&mut self, end_tag: &str) -> Result<Vec<Node>, SyntaxError> {
        let (nodes, _) = self.parse_nodes(&[end_tag])?;
        self.expect_block_end()?;
        Ok(nodes)
    }

    pub fn expect_block_end(&mut self) -> Result<(), SyntaxError> {
        self.expect(TokenKind::BlockEnd).map(|_| ())
    }

    pub fn current_span(&self) -> Span {
        self.peek().span
    }

    pub fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_inline_if()
    }

    fn parse_inline_if(&mut self) -> Result<Expr, SyntaxError> {
        let then = self.parse_or()?;
        if !self.matches_keyword("if") {
            return Ok(then);
        }
        let cond = self.parse_or()?;
        let otherwise = if self.matches_keyword("else") {
            Some(Box::new(self.parse_inline_if()?))
        } else {
            None
        };
        let span = then.span().to(self.previous_span());
        Ok(Expr::InlineIf {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
            span,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;
        while self.matches_keyword("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_not()?;
        while self.matches_keyword("and") {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.check_keyword("not") {
            let span = self.advance().span;
            let operand = self.parse_not()?;
            let span = span.to(operand.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::BangEq => BinaryOp::NotEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::GtEq => BinaryOp::GtEq,
                TokenKind::Identifier(word) if word == "in" => BinaryOp::In,
                TokenKind::Identifier(word)
                    if word == "not"
                        && matches!(&self.peek_at(1).kind, TokenKind::Identifier(next) if next == "in") =>
                {
                    self.advance();
                    BinaryOp::NotIn
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_concat()?;
            left = binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_additive()?;
        while self.matches(&TokenKind::Tilde) {
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_pow()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::SlashSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_pow()?;
            left = binary(op, left, right);
        }
    }

    fn parse_pow(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary(false)?;
        while self.matches(&TokenKind::StarStar) {
            let right = self.parse_unary(false)?;
            left = binary(BinaryOp::Pow, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self, no_filters: bool) -> Result<Expr, SyntaxError> {
        let op = match self.peek().kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            _ => None,
        };
        let node = match op {
            Some(op) => {
                let span = self.advance().span;
                let operand = self.parse_unary(true)?;
                let span = span.to(operand.span());
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                    span,
                }
            }
            None => self.parse_postfix()?,
        };
        if no_filters {
            Ok(node)
        } else {
            self.parse_filters(node)
        }
    }

    fn parse_filters(&mut self, mut node: Expr) -> Result<Expr, SyntaxError> {
        while self.matches(&TokenKind::Pipe) {
            let (name, name_span) = self.expect_identifier("Expected filter name after `|`")?;
            let args = if self.matches(&TokenKind::LParen) {
                self.parse_call_arguments()?
            } else {
                Arguments::default()
            };
            let span = node.span().to(name_span).to(self.previous_span());
            node = Expr::Filter {
                name,
                input: Box::new(node),
                args,
                span,
            };
        }
        Ok(node)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut node = self.parse_primary()?;
        loop {
            if self.matches(&TokenKind::Dot) {
                let token = self.advance().clone();
                let key = match token.kind {
                    TokenKind::Identifier(name) => Expr::string(name, token.span),
                    TokenKind::Integer(index) => Expr::Literal {
                        value: Literal::Int(index),
                        span: token.span,
                    },
                    other => {
                        return Err(SyntaxError::new(
                            format!("Expected attribute name after `.`, found {}", other.describe()),
                            token.span,
                        ))
                    }
                };
                let span = node.span().to(token.span);
                node = Expr::Lookup {
                    target: Box::new(node),
                    key: Box::new(key),
                    span,
                };
            } else if self.matches(&TokenKind::LBracket) {
                let key = self.parse_expression()?;
                self.expect(TokenKind::RBracket)?;
                let span = node.span().to(self.previous_span());
                node = Expr::Lookup {
                    target: Box::new(node),
                    key: Box::new(key),
                    span,
                };
            } else if self.matches(&TokenKind::LParen) {
                let args = self.parse_call_arguments()?;
                let span = node.span().to(self.previous_span());
                node = Expr::Call {
                    callee: Box::new(node),
                    args,
                    span,
                };
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.advance().clone();
        let span = token.span;
        let literal = |value| Ok(Expr::Literal { value, span });
        match token.kind {
            TokenKind::Integer(value) => literal(Literal::Int(value)),
            TokenKind::Float(value) => literal(Literal::Float(value)),
            TokenKind::String(value) => literal(Literal::String(value)),
            TokenKind::Identifier(name) => match name.as_str() {
                "true" | "True" => literal(Literal::Bool(true)),
                "false" | "False" => literal(Literal::Bool(false)),
                "none" | "None" | "null" => literal(Literal::None),
                _ => Ok(Expr::Symbol { name, span }),
            },
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List {
                    items,
                    span: span.to(self.previous_span()),
                })
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let key = match self.parse_primary()? {
                        Expr::Symbol { name, span } => Expr::string(name, span),
                        other => other,
                    };
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.matches(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Expr::Dict {
                    entries,
                    span: span.to(self.previous_span()),
                })
            }
            other => Err(SyntaxError::new(
                format!("Expected expression, found {}", other.describe()),
                span,
            )),
        }
    }

    /// Arguments of a call; the opening parenthesis is already consumed.
    fn parse_call_arguments(&mut self) -> Result<Arguments, SyntaxError> {
        let mut args = Arguments::default();
        while !self.check(&TokenKind::RParen) {
            self.parse_argument(&mut args)?;
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_argument(&mut self, args: &mut Arguments) -> Result<(), SyntaxError> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            if self.peek_at(1).kind == TokenKind::Assign {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.parse_expression()?;
                args.keyword.push((name, value));
                return Ok(());
            }
        }
        if !args.keyword.is_empty() {
            return Err(self.error_here("Positional argument follows keyword argument"));
        }
        args.positional.push(self.parse_expression()?);
        Ok(())
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn advance(&mut self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        &self.tokens[idx]
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(name) if name == word)
    }

    fn matches_keyword(&mut self, word: &str) -> bool {
        if self.check_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, SyntaxError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let found = self.peek().kind.describe();
            Err(self.error_here(format!("Expected {}, found {found}", kind.describe())))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> Result<(String, Span), SyntaxError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, token.span))
            }
            _ => Err(self.error_here(message)),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.peek().span)
    }

    fn report(&mut self, err: SyntaxError) {
        self.errors.push(err);
    }

    /// Skips to just past the end of the current tag.
    fn synchronize(&mut self) {
        loop {
            match self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::BlockEnd | TokenKind::VariableEnd => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span().to(right.span());
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        span,
    }
}
