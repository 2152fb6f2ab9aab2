use super::{delayed, env_with, no_vars, sync_config};
use crate::{Config, Environment, RenderError, RenderResult, Value};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

fn failing(name: &str, millis: u64, message: &str) -> Value {
    let message = message.to_string();
    Value::async_function(name, move |_| {
        let message = message.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            RenderResult::<Value>::Err(RenderError::custom(message))
        }
    })
}

#[tokio::test]
async fn async_failures_reach_the_caller() {
    let env = Environment::new(Config::default());
    let err = env
        .render_string("a{{ boom() }}b", [("boom", failing("boom", 5, "boom"))])
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Custom { message } if message == "boom"));
}

#[tokio::test]
async fn earliest_failure_wins_and_siblings_still_finish() {
    let env = Environment::new(Config::default());
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let sibling = Value::async_function("sibling", move |_| {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            flag.set(true);
            RenderResult::Ok(Value::from("ok"))
        }
    });
    let vars = [
        ("late", failing("late", 20, "late")),
        ("early", failing("early", 5, "early")),
        ("sibling", sibling),
    ];
    let err = env
        .render_string("{{ late() }}{{ early() }}{{ sibling() }}", vars)
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::Custom { message } if message == "early"));
    assert!(ran.get());
}

#[tokio::test]
async fn failures_inside_loops_and_macros_propagate() {
    let env = Environment::new(Config::default());
    let template = "{% macro row(x) %}{{ check(x) }}{% endmacro %}{% for x in [1, 2] %}{{ row(x) }}{% endfor %}";
    let check = Value::async_function("check", |args| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        match args.get(0).and_then(Value::as_i64) {
            Some(2) => Err(RenderError::custom("bad row")),
            _ => Ok(Value::from("ok")),
        }
    });
    let err = env.render_string(template, [("check", check)]).await.unwrap_err();
    assert!(matches!(err, RenderError::Custom { message } if message == "bad row"));
}

#[tokio::test]
async fn sync_mode_rejects_values_that_are_still_pending() {
    let env = Environment::new(sync_config());
    let err = env
        .render_string("{{ slow() }}", [("slow", delayed("slow", 5, "x"))])
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::UnresolvedAsync { .. }));

    let ready = Value::async_function("ready", |_| async { Ok(Value::from("now")) });
    let out = env.render_string("{{ ready() }}", [("ready", ready)]).await.unwrap();
    assert_eq!(out, "now");
}

#[tokio::test]
async fn undefined_output_can_be_an_error() {
    let env = Environment::new(Config {
        throw_on_undefined: true,
        ..Config::default()
    });
    let err = env.render_string("\n{{ missing }}", no_vars()).await.unwrap_err();
    match err {
        RenderError::UndefinedValue { name, line, .. } => {
            assert_eq!(name, "missing");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn lookup_failures_are_typed() {
    let env = Environment::new(Config::default());
    let err = env.render_string("{{ nothing() }}", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::NotCallable { name } if name == "nothing"));

    let err = env.render_string("{{ 1 | nope }}", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::UnknownFilter { name } if name == "nope"));

    let err = env.render_string("{{ 1 in 2 }}", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::TypeMismatch { .. }));
}

#[tokio::test]
async fn syntax_errors_are_reported_before_rendering() {
    let env = Environment::new(Config::default());
    let err = env.render_string("{% if x %}unclosed", no_vars()).await.unwrap_err();
    let RenderError::Syntax(errors) = err else {
        panic!("expected syntax error");
    };
    assert!(!errors.errors.is_empty());
    assert_eq!(errors.source, "{% if x %}unclosed");

    let err = env.render_string("{% frobnicate %}", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::Syntax(_)));
}

#[tokio::test]
async fn missing_templates_and_imports() {
    let env = env_with(&[
        ("macros.njk", "{% macro greet(who) %}Hi {{ who }}{% endmacro %}"),
        ("include.njk", "{% include 'gone.njk' %}"),
        ("import.njk", "{% from 'macros.njk' import nope %}"),
    ]);
    let err = env.render("absent.njk", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::TemplateNotFound { name } if name == "absent.njk"));

    let err = env.render("include.njk", no_vars()).await.unwrap_err();
    assert!(matches!(err, RenderError::TemplateNotFound { name } if name == "gone.njk"));

    let err = env.render("import.njk", no_vars()).await.unwrap_err();
    assert!(matches!(
        err,
        RenderError::ImportMissing { name, template } if name == "nope" && template == "macros.njk"
    ));
}
