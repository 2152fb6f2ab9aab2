use super::{env_with, no_vars, sync_config};
use crate::runtime::{buffer::Buffer, value::Fragment};
use crate::{
    loader::FnLoader, Config, Environment, Extension, ExtensionCall, RenderResult, Value,
};
use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::BTreeMap;
use std::time::Duration;

async fn render(source: &str, vars: Vec<(&str, Value)>) -> String {
    let env = Environment::new(Config::default());
    env.render_string(source, vars).await.unwrap()
}

async fn render_sync(source: &str, vars: Vec<(&str, Value)>) -> String {
    let env = Environment::new(sync_config());
    env.render_string(source, vars).await.unwrap()
}

#[tokio::test]
async fn output_is_escaped_unless_safe() {
    let vars = || vec![("x", Value::from("<b>\"hi\" & 'yo'</b>"))];
    assert_eq!(
        render("{{ x }}", vars()).await,
        "&lt;b&gt;&quot;hi&quot; &amp; &#39;yo&#39;&lt;/b&gt;"
    );
    assert_eq!(render("{{ x | safe }}", vars()).await, "<b>\"hi\" & 'yo'</b>");
    assert_eq!(render_sync("{{ x }}", vars()).await, render("{{ x }}", vars()).await);

    let env = Environment::new(Config {
        autoescape: false,
        ..Config::default()
    });
    assert_eq!(env.render_string("{{ x }}", vars()).await.unwrap(), "<b>\"hi\" & 'yo'</b>");
}

fn raw_markup() -> Value {
    Value::function("raw", |_| {
        let buffer = Buffer::new();
        buffer.append_literal("<i>");
        Ok(Value::Fragment(Fragment { buffer, safe: false }))
    })
}

#[tokio::test]
async fn unsafe_fragments_are_escaped_on_output() {
    assert_eq!(render("{{ raw() }}", vec![("raw", raw_markup())]).await, "&lt;i&gt;");
    assert_eq!(render_sync("{{ raw() }}", vec![("raw", raw_markup())]).await, "&lt;i&gt;");
    let env = Environment::new(Config {
        autoescape: false,
        ..Config::default()
    });
    let out = env.render_string("{{ raw() }}", [("raw", raw_markup())]).await.unwrap();
    assert_eq!(out, "<i>");
}

#[tokio::test]
async fn macro_output_truthiness_matches_across_modes() {
    let template = "{% macro empty() %}{% if false %}x{% endif %}{% endmacro %}\
                    {% macro full(v) %}{{ v }}{% endmacro %}\
                    {% if empty() %}T{% else %}F{% endif %}\
                    {% if full(v) %}T{% else %}F{% endif %}";
    let vars = || vec![("v", Value::from("x"))];
    assert_eq!(render(template, vars()).await, "FT");
    assert_eq!(render_sync(template, vars()).await, "FT");
}

#[tokio::test]
async fn undefined_and_none_render_empty() {
    assert_eq!(render("[{{ missing }}][{{ none }}]", vec![]).await, "[][]");
    assert_eq!(render("{{ missing.deep.path }}", vec![]).await, "");
}

#[tokio::test]
async fn conditionals_and_expressions() {
    let template = "{% if n > 3 %}big{% elif n == 3 %}three{% else %}small{% endif %}";
    assert_eq!(render(template, vec![("n", Value::Int(5))]).await, "big");
    assert_eq!(render(template, vec![("n", Value::Int(3))]).await, "three");
    assert_eq!(render_sync(template, vec![("n", Value::Int(1))]).await, "small");

    assert_eq!(render("{{ 1 + 2 * 3 }}|{{ 7 // 2 }}|{{ 2 ** 3 }}", vec![]).await, "7|3|8");
    assert_eq!(render("{{ 'a' ~ 1 ~ 'b' }}", vec![]).await, "a1b");
    assert_eq!(render("{{ 'yes' if ok else 'no' }}", vec![("ok", Value::Bool(false))]).await, "no");
    assert_eq!(render("{{ 2 in [1, 2] }}-{{ 'z' not in 'abc' }}", vec![]).await, "true-true");
    assert_eq!(render("{{ d.a }}{{ d['b'] }}", vec![("d", Value::map([("a", Value::Int(1)), ("b", Value::Int(2))]))]).await, "12");
}

#[tokio::test]
async fn loops_bind_targets_and_loop_variables() {
    let items = Value::list(vec!["a".into(), "b".into(), "c".into()]);
    let out = render(
        "{% for x in items %}{{ loop.index }}{{ x }}{% if not loop.last %},{% endif %}{% endfor %}",
        vec![("items", items.clone())],
    )
    .await;
    assert_eq!(out, "1a,2b,3c");
    let out = render_sync(
        "{% for x in items %}{{ loop.revindex0 }}{% endfor %}",
        vec![("items", items)],
    )
    .await;
    assert_eq!(out, "210");

    let mut entries = BTreeMap::new();
    entries.insert("a".to_string(), Value::Int(1));
    entries.insert("b".to_string(), Value::Int(2));
    let out = render(
        "{% for k, v in d %}{{ k }}={{ v }};{% endfor %}{% for k in d %}{{ k }}{% endfor %}",
        vec![("d", Value::from(entries))],
    )
    .await;
    assert_eq!(out, "a=1;b=2;ab");

    assert_eq!(
        render("{% for x in [] %}x{% else %}empty{% endfor %}", vec![]).await,
        "empty"
    );
    assert_eq!(
        render("{% for a, b in [[1, 2], [3, 4]] %}{{ a + b }} {% endfor %}", vec![]).await,
        "3 7 "
    );
}

#[tokio::test]
async fn sets_inside_loops_do_not_leak() {
    let template = "{% set x = 'outer' %}{% for i in [1, 2] %}{% set x = i %}{{ x }}{% endfor %}:{{ x }}";
    assert_eq!(render(template, vec![]).await, "12:outer");
    assert_eq!(render_sync(template, vec![]).await, "12:outer");
}

#[tokio::test]
async fn filters_apply_in_both_modes() {
    let template = "{{ name | upper }} {{ items | join('-') }} {{ missing | default('none') }} {{ items | length }}";
    let vars = || {
        vec![
            ("name", Value::from("ann")),
            ("items", Value::list(vec![Value::Int(1), Value::Int(2)])),
        ]
    };
    assert_eq!(render(template, vars()).await, "ANN 1-2 none 2");
    assert_eq!(render_sync(template, vars()).await, "ANN 1-2 none 2");
    assert_eq!(
        render("{% filter upper %}a{{ 'b' }}c{% endfilter %}", vec![]).await,
        "ABC"
    );
}

#[tokio::test]
async fn custom_filters_and_globals() {
    let env = Environment::new(Config::default());
    env.add_filter("wrap", |value, args| {
        let edge = args.arg(0, "edge").map(Value::to_string).unwrap_or_default();
        Ok(Value::from(format!("{edge}{value}{edge}")))
    });
    env.add_global("site", Value::from("docs"));
    let out = env
        .render_string("{{ site | wrap('*') }} {{ site | wrap(edge='_') }}", no_vars())
        .await
        .unwrap();
    assert_eq!(out, "*docs* _docs_");
}

#[tokio::test]
async fn captures_produce_safe_fragments() {
    let out = render(
        "{% set box %}<b>{{ v }}</b>{% endset %}{{ box }}",
        vec![("v", Value::from("&"))],
    )
    .await;
    assert_eq!(out, "<b>&amp;</b>");
}

#[tokio::test]
async fn whitespace_control_and_trim_options() {
    assert_eq!(render("a {{- 'b' -}} c", vec![]).await, "abc");
    let env = Environment::new(Config {
        trim_blocks: true,
        lstrip_blocks: true,
        ..Config::default()
    });
    let out = env
        .render_string("<ul>\n  {% for i in [1, 2] %}\n<li>{{ i }}</li>\n  {% endfor %}\n</ul>", no_vars())
        .await
        .unwrap();
    assert_eq!(out, "<ul>\n<li>1</li>\n<li>2</li>\n</ul>");
}

struct Fetch;

impl Extension for Fetch {
    fn tags(&self) -> &[&str] {
        &["fetch", "shout"]
    }

    fn has_body(&self, tag: &str) -> bool {
        tag == "shout"
    }

    fn run(&self, call: ExtensionCall) -> LocalBoxFuture<'static, RenderResult<Value>> {
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            match call.tag.as_str() {
                "shout" => Ok(Value::from(
                    call.body.map(|body| body.to_string()).unwrap_or_default().to_uppercase(),
                )),
                _ => {
                    let what = call.args.first().map(Value::to_string).unwrap_or_default();
                    let suffix = call.kwargs.get("suffix").map(Value::to_string).unwrap_or_default();
                    Ok(Value::from(format!("fetched:{what}{suffix}")))
                }
            }
        }
        .boxed_local()
    }
}

#[tokio::test]
async fn extensions_run_asynchronously_in_place() {
    let env = Environment::new(Config::default());
    env.add_extension(Fetch);
    let out = env
        .render_string(
            "{% fetch 'a' %}-{% fetch 'b', suffix='!' %}-{% shout %}hi {{ who }}{% endshout %}",
            [("who", Value::from("ann"))],
        )
        .await
        .unwrap();
    assert_eq!(out, "fetched:a-fetched:b!-HI ANN");
}

#[tokio::test]
async fn file_system_loader_reads_below_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.njk"), "Hello {{ name }}").unwrap();
    let env = Environment::new(Config {
        template_root: Some(dir.path().to_path_buf()),
        ..Config::default()
    });
    let out = env.render("hello.njk", [("name", "FS")]).await.unwrap();
    assert_eq!(out, "Hello FS");
}

#[tokio::test]
async fn async_loaders_feed_includes() {
    let loader = FnLoader::new(|name: String| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(match name.as_str() {
            "main.njk" => Some("<{% include 'part.njk' %}>".to_string()),
            "part.njk" => Some("part {{ v }}".to_string()),
            _ => None,
        })
    });
    let env = Environment::with_loader(sync_config(), loader);
    let out = env.render("main.njk", [("v", Value::Int(1))]).await.unwrap();
    assert_eq!(out, "<part 1>");
}

#[tokio::test]
async fn includes_see_the_including_scope() {
    let env = env_with(&[
        ("page.njk", "{% set title = 'T' %}{% for i in [1] %}{% include 'row.njk' %}{% endfor %}{% include 'nope.njk' ignore missing %}"),
        ("row.njk", "[{{ title }}{{ i }}{{ user }}]"),
    ]);
    let out = env.render("page.njk", [("user", "u")]).await.unwrap();
    assert_eq!(out, "[T1u]");
}
