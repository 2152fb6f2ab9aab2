use super::{delayed, env_with, no_vars};
use crate::{Config, Environment, RenderResult, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

#[tokio::test]
async fn output_keeps_source_order_when_later_values_finish_first() {
    let env = Environment::new(Config::default());
    let vars = [
        ("slow", delayed("slow", 40, "A")),
        ("fast", delayed("fast", 5, "B")),
    ];
    let out = env
        .render_string("{{ slow() }}{{ fast() }}", vars)
        .await
        .unwrap();
    assert_eq!(out, "AB");
}

#[tokio::test]
async fn loop_iterations_run_concurrently_but_render_in_order() {
    let env = Environment::new(Config::default());
    let finished = Rc::new(RefCell::new(Vec::new()));
    let log = finished.clone();
    let get_data = Value::async_function("getData", move |args| {
        let id = args.get(0).and_then(Value::as_i64).unwrap_or(0);
        let log = log.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10 * (4 - id as u64))).await;
            log.borrow_mut().push(id);
            RenderResult::Ok(Value::from(format!("Data for ID {id}")))
        }
    });
    let vars = [
        ("ids", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ("getData", get_data),
    ];
    let out = env
        .render_string(
            "{% for id in ids %}{{ getData(id) }}{% if not loop.last %} {% endif %}{% endfor %}",
            vars,
        )
        .await
        .unwrap();
    assert_eq!(out, "Data for ID 1 Data for ID 2 Data for ID 3");
    assert_eq!(*finished.borrow(), vec![3, 2, 1]);
}

#[tokio::test]
async fn set_binds_a_pending_value_awaited_at_use() {
    let env = Environment::new(Config::default());
    let fetch_user = Value::async_function("fetchUser", |_| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut user = BTreeMap::new();
        user.insert("name".to_string(), Value::from("John Doe"));
        RenderResult::Ok(Value::from(user))
    });
    let out = env
        .render_string(
            "{% set user = fetchUser(1) %}User: {{ user.name }}",
            [("fetchUser", fetch_user)],
        )
        .await
        .unwrap();
    assert_eq!(out, "User: John Doe");
}

#[tokio::test]
async fn nested_macros_receive_async_arguments() {
    let env = Environment::new(Config::default());
    let template = "{% macro inner(x) %}<i>{{ x }}</i>{% endmacro %}\
                    {% macro outer(x) %}[{{ inner(x) }}]{% endmacro %}\
                    {{ outer(load()) }}";
    let out = env
        .render_string(template, [("load", delayed("load", 10, "v"))])
        .await
        .unwrap();
    assert_eq!(out, "[<i>v</i>]");
}

#[tokio::test]
async fn call_block_caller_sees_the_call_site() {
    let env = Environment::new(Config::default());
    let template = "{% macro panel(title) %}<div>{{ title }}:{{ caller() }}</div>{% endmacro %}\
                    {% set who = 'Ann' %}\
                    {% call panel(load()) %}hi {{ who }}{% endcall %}";
    let out = env
        .render_string(template, [("load", delayed("load", 5, "T"))])
        .await
        .unwrap();
    assert_eq!(out, "<div>T:hi Ann</div>");
}

#[tokio::test]
async fn async_filters_and_values_settle_before_output() {
    let env = Environment::new(Config::default());
    env.add_async_filter("shout", |value, _| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Value::from(value.to_string().to_uppercase()))
    });
    let out = env
        .render_string(
            "{{ 'hi' | shout }} {{ name() | shout }}",
            [("name", delayed("name", 10, "bo"))],
        )
        .await
        .unwrap();
    assert_eq!(out, "HI BO");
}

#[tokio::test]
async fn pending_context_values_and_getters_resolve() {
    let env = Environment::new(Config::default());
    let vars = [
        (
            "later",
            Value::from_future(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Value::from("soon"))
            }),
        ),
        ("lazy", Value::getter(|| Value::from("computed"))),
    ];
    let out = env
        .render_string("{{ later }}/{{ lazy }}", vars)
        .await
        .unwrap();
    assert_eq!(out, "soon/computed");
}

#[tokio::test]
async fn captured_blocks_wait_for_their_contents() {
    let env = Environment::new(Config::default());
    let out = env
        .render_string(
            "{% set box %}[{{ load() }}]{% endset %}{{ box }}{{ box }}",
            [("load", delayed("load", 5, "x"))],
        )
        .await
        .unwrap();
    assert_eq!(out, "[x][x]");
}

#[tokio::test]
async fn repeated_renders_are_independent() {
    let env = env_with(&[("page.njk", "{{ greet() }}, {{ name }}")]);
    let template = env.get_template("page.njk").await.unwrap();
    let first = template
        .render([("greet", delayed("greet", 5, "Hi")), ("name", Value::from("A"))])
        .await
        .unwrap();
    let second = template
        .render([("greet", delayed("greet", 1, "Yo")), ("name", Value::from("B"))])
        .await
        .unwrap();
    assert_eq!(first, "Hi, A");
    assert_eq!(second, "Yo, B");
    assert_eq!(env.render("page.njk", [("greet", delayed("greet", 1, "Hey"))]).await.unwrap(), "Hey, ");
    assert!(env.render_string("", no_vars()).await.unwrap().is_empty());
}

fn pending_flag(millis: u64, flag: bool) -> Value {
    Value::from_future(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(Value::Bool(flag))
    })
}

#[tokio::test]
async fn sets_behind_pending_conditions_are_seen_by_later_output() {
    let template = "{% if flag %}{% set x = 'y' %}{% endif %}[{{ x }}]\
                    {% if other %}-{% else %}{% set z = load() %}{% endif %}[{{ z }}]\
                    {% for i in [] %}{% else %}{% if flag %}{% set w = 'w' %}{% endif %}{% endfor %}[{{ w }}]";
    let env = Environment::new(Config::default());
    let out = env
        .render_string(
            template,
            [
                ("flag", pending_flag(5, true)),
                ("other", pending_flag(10, false)),
                ("load", delayed("load", 5, "z")),
            ],
        )
        .await
        .unwrap();
    assert_eq!(out, "[y][z][w]");

    let env = Environment::new(super::sync_config());
    let out = env
        .render_string(
            template,
            [
                ("flag", Value::Bool(true)),
                ("other", Value::Bool(false)),
                ("load", Value::function("load", |_| Ok(Value::from("z")))),
            ],
        )
        .await
        .unwrap();
    assert_eq!(out, "[y][z][w]");
}

#[tokio::test]
async fn async_results_are_escaped_when_written() {
    let env = Environment::new(Config::default());
    let out = env
        .render_string(
            "{{ load() }}|{% for i in [1] %}{{ load() }}{% endfor %}|{{ load() | safe }}",
            [("load", delayed("load", 5, "<b>"))],
        )
        .await
        .unwrap();
    assert_eq!(out, "&lt;b&gt;|&lt;b&gt;|<b>");
}
