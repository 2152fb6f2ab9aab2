use super::{
    ast::*,
    lexer::{lex, LexOptions},
    parser::parse_template,
    token::TokenKind,
};

fn parse(source: &str) -> Template {
    parse_template("test.njk", source, LexOptions::default(), &[]).expect("parse")
}

fn data_tokens(source: &str, options: LexOptions) -> Vec<String> {
    lex(source, options)
        .expect("lex")
        .into_iter()
        .filter_map(|token| match token.kind {
            TokenKind::Data(text) => Some(text),
            _ => None,
        })
        .collect()
}

#[test]
fn lexer_splits_text_and_tags() {
    let tokens = lex("Hi {{ name }}!", LexOptions::default()).expect("lex");
    let kinds: Vec<_> = tokens.into_iter().map(|token| token.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Data("Hi ".into()),
            TokenKind::VariableStart,
            TokenKind::Identifier("name".into()),
            TokenKind::VariableEnd,
            TokenKind::Data("!".into()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn lexer_honors_whitespace_control() {
    let text = data_tokens("a  {%- if x -%}  b  {%- endif %}\n", LexOptions::default());
    assert_eq!(text, vec!["a", "b", "\n"]);
}

#[test]
fn trim_blocks_drops_newline_after_block_tag() {
    let options = LexOptions {
        trim_blocks: true,
        lstrip_blocks: true,
    };
    let text = data_tokens("<ul>\n  {% if x %}\n  <li/>\n  {% endif %}\n</ul>", options);
    assert_eq!(text, vec!["<ul>\n", "  <li/>\n", "</ul>"]);
}

#[test]
fn comments_and_raw_blocks() {
    let text = data_tokens(
        "a{# hidden #}b{% raw %}{{ not a tag }}{% endraw %}",
        LexOptions::default(),
    );
    assert_eq!(text, vec!["a", "b", "{{ not a tag }}"]);
}

#[test]
fn unterminated_tag_is_reported() {
    let errors = lex("Hello {{ name", LexOptions::default()).expect_err("lex error");
    assert!(errors[0].message.contains("Unterminated tag"));
}

#[test]
fn parses_filters_with_arguments() {
    let template = parse("{{ user.name | default('anon') | upper }}");
    let Node::Output(OutputNode { expr, .. }) = &template.body[0] else {
        panic!("expected output node");
    };
    let Expr::Filter { name, input, .. } = expr else {
        panic!("expected filter");
    };
    assert_eq!(name, "upper");
    let Expr::Filter { name, input, args, .. } = input.as_ref() else {
        panic!("expected inner filter");
    };
    assert_eq!(name, "default");
    assert_eq!(args.positional.len(), 1);
    assert!(matches!(input.as_ref(), Expr::Lookup { .. }));
}

#[test]
fn negation_binds_tighter_than_filters() {
    let template = parse("{{ -x | abs }}");
    let Node::Output(OutputNode { expr, .. }) = &template.body[0] else {
        panic!("expected output node");
    };
    let Expr::Filter { input, .. } = expr else {
        panic!("expected filter");
    };
    assert!(matches!(input.as_ref(), Expr::Unary { op: UnaryOp::Neg, .. }));
}

#[test]
fn arithmetic_precedence() {
    let template = parse("{{ 1 + 2 * 3 ~ 'x' }}");
    let Node::Output(OutputNode { expr, .. }) = &template.body[0] else {
        panic!("expected output node");
    };
    let Expr::Binary { op, left, .. } = expr else {
        panic!("expected binary");
    };
    assert_eq!(*op, BinaryOp::Concat);
    let Expr::Binary { op, right, .. } = left.as_ref() else {
        panic!("expected addition");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(right.as_ref(), Expr::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn not_in_is_a_single_operator() {
    let template = parse("{{ 'a' not in items }}");
    let Node::Output(OutputNode { expr, .. }) = &template.body[0] else {
        panic!("expected output node");
    };
    assert!(matches!(expr, Expr::Binary { op: BinaryOp::NotIn, .. }));
}

#[test]
fn elif_chain_nests_into_else_body() {
    let template = parse("{% if a %}1{% elif b %}2{% else %}3{% endif %}");
    let Node::If(outer) = &template.body[0] else {
        panic!("expected if");
    };
    let else_body = outer.else_body.as_ref().expect("else body");
    let Node::If(inner) = &else_body[0] else {
        panic!("expected nested if");
    };
    assert!(inner.else_body.is_some());
}

#[test]
fn for_loop_with_else_and_two_targets() {
    let template = parse("{% for k, v in pairs %}{{ k }}{% else %}none{% endfor %}");
    let Node::For(node) = &template.body[0] else {
        panic!("expected for");
    };
    assert_eq!(node.targets, vec!["k".to_string(), "v".to_string()]);
    assert_eq!(node.body.len(), 1);
    assert!(node.else_body.is_some());
}

#[test]
fn block_set_becomes_capture() {
    let template = parse("{% set greeting %}Hello {{ name }}{% endset %}");
    let Node::Capture(node) = &template.body[0] else {
        panic!("expected capture");
    };
    assert_eq!(node.target, "greeting");
    assert_eq!(node.body.len(), 2);
}

#[test]
fn macro_with_defaults_and_call_block() {
    let template = parse(
        "{% macro card(title, kind='info') %}{{ caller() }}{% endmacro %}\
         {% call(user) card('T') %}body{% endcall %}",
    );
    let Node::Macro(node) = &template.body[0] else {
        panic!("expected macro");
    };
    assert_eq!(node.params.len(), 2);
    assert!(node.params[1].default.is_some());
    let Node::CallBlock(call) = &template.body[1] else {
        panic!("expected call block");
    };
    assert_eq!(call.caller_params.len(), 1);
}

#[test]
fn imports_and_inheritance_tags() {
    let template = parse(
        "{% extends 'base.html' %}{% import 'forms.html' as forms %}\
         {% from 'forms.html' import input as field, label %}\
         {% block content %}x{% endblock content %}{% include 'x' ignore missing %}",
    );
    assert!(matches!(template.body[0], Node::Extends(_)));
    let Node::FromImport(from) = &template.body[2] else {
        panic!("expected from import");
    };
    assert_eq!(from.names[0].alias.as_deref(), Some("field"));
    assert!(from.names[1].alias.is_none());
    let Node::Include(include) = &template.body[4] else {
        panic!("expected include");
    };
    assert!(include.ignore_missing);
}

#[test]
fn dict_keys_accept_bare_identifiers() {
    let template = parse("{{ { a: 1, 'b': 2 } }}");
    let Node::Output(OutputNode { expr, .. }) = &template.body[0] else {
        panic!("expected output node");
    };
    let Expr::Dict { entries, .. } = expr else {
        panic!("expected dict");
    };
    assert!(matches!(
        &entries[0].0,
        Expr::Literal { value: Literal::String(key), .. } if key == "a"
    ));
}

#[test]
fn unknown_tag_is_a_syntax_error() {
    let errors =
        parse_template("t", "{% frobnicate %}", LexOptions::default(), &[]).expect_err("error");
    assert!(errors.errors[0].message.contains("Unknown block tag"));
}

#[test]
fn missing_end_tag_reports_expected_tags() {
    let errors = parse_template("t", "{% if x %}open", LexOptions::default(), &[])
        .expect_err("error");
    let first = errors.first().expect("first error");
    assert!(first.message.contains("Unexpected end of template"));
    assert!(first.help.as_deref().unwrap_or("").contains("endif"));
}

#[test]
fn mismatched_endblock_name_is_rejected() {
    let errors = parse_template(
        "t",
        "{% block a %}{% endblock b %}",
        LexOptions::default(),
        &[],
    )
    .expect_err("error");
    assert!(errors.errors[0].message.contains("Mismatched"));
}
