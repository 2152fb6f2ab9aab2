use crate::runtime::{
    error::{RenderError, RenderResult},
    value::{CallArgs, Value},
};
use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

pub type SyncFilterFn = Rc<dyn Fn(Value, CallArgs) -> RenderResult<Value>>;
pub type AsyncFilterFn = Rc<dyn Fn(Value, CallArgs) -> LocalBoxFuture<'static, RenderResult<Value>>>;

#[derive(Clone)]
pub enum Filter {
    Sync(SyncFilterFn),
    Async(AsyncFilterFn),
}

impl Filter {
    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(Value, CallArgs) -> RenderResult<Value> + 'static,
    {
        Filter::Sync(Rc::new(func))
    }

    pub fn from_async<F, Fut>(func: F) -> Self
    where
        F: Fn(Value, CallArgs) -> Fut + 'static,
        Fut: Future<Output = RenderResult<Value>> + 'static,
    {
        Filter::Async(Rc::new(move |value, args| func(value, args).boxed_local()))
    }

    pub fn apply(&self, value: Value, args: CallArgs) -> LocalBoxFuture<'static, RenderResult<Value>> {
        match self {
            Filter::Sync(func) => futures::future::ready(func(value, args)).boxed_local(),
            Filter::Async(func) => func(value, args),
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Keeps markup safe across a string transform.
fn same_safety(input: &Value, text: String) -> Value {
    if input.is_safe() {
        Value::Safe(text)
    } else {
        Value::String(text)
    }
}

fn string_arg(args: &CallArgs, index: usize, name: &str, filter: &str) -> RenderResult<String> {
    match args.arg(index, name) {
        Some(value) => Ok(value.to_string()),
        None => Err(RenderError::type_mismatch(format!(
            "filter `{filter}` requires a `{name}` argument"
        ))),
    }
}

fn list_items(value: &Value, filter: &str) -> RenderResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Map(entries) => Ok(entries.keys().map(|key| Value::from(key.as_str())).collect()),
        Value::String(s) | Value::Safe(s) => {
            Ok(s.chars().map(|ch| Value::String(ch.to_string())).collect())
        }
        Value::Undefined | Value::None => Ok(Vec::new()),
        other => Err(RenderError::type_mismatch(format!(
            "filter `{filter}` cannot iterate over {}",
            other.type_name()
        ))),
    }
}

fn capitalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut start = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            start = true;
            out.push(ch);
        } else if start {
            out.extend(ch.to_uppercase());
            start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

fn round(value: f64, precision: i64, method: &str) -> f64 {
    let factor = 10f64.powi(precision.clamp(0, 15) as i32);
    let scaled = value * factor;
    let rounded = match method {
        "floor" => scaled.floor(),
        "ceil" => scaled.ceil(),
        _ => scaled.round(),
    };
    rounded / factor
}

pub fn builtin_filters() -> HashMap<String, Filter> {
    let mut filters: HashMap<String, Filter> = HashMap::new();
    let mut add = |names: &[&str], filter: Filter| {
        for name in names {
            filters.insert(name.to_string(), filter.clone());
        }
    };

    add(
        &["abs"],
        Filter::sync(|value, _| match value {
            Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
            other => match other.as_f64() {
                Some(f) => Ok(Value::Float(f.abs())),
                None => Err(RenderError::type_mismatch(format!(
                    "abs expects a number, found {}",
                    other.type_name()
                ))),
            },
        }),
    );
    add(
        &["capitalize"],
        Filter::sync(|value, _| {
            let text = capitalize(&value.to_string());
            Ok(same_safety(&value, text))
        }),
    );
    add(
        &["default", "d"],
        Filter::sync(|value, args| {
            let fallback = args.arg(0, "value").cloned().unwrap_or(Value::String(String::new()));
            let boolean = args.arg(1, "boolean").map(Value::is_truthy).unwrap_or(false);
            let use_fallback = if boolean {
                !value.is_truthy()
            } else {
                value.is_undefined()
            };
            Ok(if use_fallback { fallback } else { value })
        }),
    );
    add(
        &["dump"],
        Filter::sync(|value, args| {
            let json = value.to_json();
            let text = match args.arg(0, "indent") {
                Some(indent) if indent.is_truthy() => serde_json::to_string_pretty(&json),
                _ => serde_json::to_string(&json),
            }
            .map_err(|err| RenderError::custom(err.to_string()))?;
            Ok(Value::String(text))
        }),
    );
    add(
        &["escape", "e"],
        Filter::sync(|value, _| {
            if value.is_safe() {
                Ok(value)
            } else {
                Ok(Value::Safe(escape_html(&value.to_string())))
            }
        }),
    );
    add(
        &["first"],
        Filter::sync(|value, _| {
            Ok(list_items(&value, "first")?
                .into_iter()
                .next()
                .unwrap_or(Value::Undefined))
        }),
    );
    add(
        &["last"],
        Filter::sync(|value, _| {
            Ok(list_items(&value, "last")?
                .pop()
                .unwrap_or(Value::Undefined))
        }),
    );
    add(
        &["float"],
        Filter::sync(|value, args| {
            let parsed = match &value {
                Value::String(s) | Value::Safe(s) => s.trim().parse::<f64>().ok(),
                other => other.as_f64(),
            };
            Ok(match parsed {
                Some(f) => Value::Float(f),
                None => args.arg(0, "default").cloned().unwrap_or(Value::Float(0.0)),
            })
        }),
    );
    add(
        &["int"],
        Filter::sync(|value, args| {
            let parsed = match &value {
                Value::String(s) | Value::Safe(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
                }
                other => other.as_i64(),
            };
            Ok(match parsed {
                Some(i) => Value::Int(i),
                None => args.arg(0, "default").cloned().unwrap_or(Value::Int(0)),
            })
        }),
    );
    add(
        &["join"],
        Filter::sync(|value, args| {
            let separator = args
                .arg(0, "separator")
                .map(|sep| sep.to_string())
                .unwrap_or_default();
            let attribute = args.arg(1, "attribute").cloned();
            let items = list_items(&value, "join")?;
            let parts: Vec<String> = items
                .iter()
                .map(|item| match &attribute {
                    Some(attr) => item.get_member(attr).to_string(),
                    None => item.to_string(),
                })
                .collect();
            Ok(Value::String(parts.join(&separator)))
        }),
    );
    add(
        &["length", "count"],
        Filter::sync(|value, _| Ok(Value::Int(value.len().unwrap_or(0) as i64))),
    );
    add(
        &["list"],
        Filter::sync(|value, _| Ok(Value::list(list_items(&value, "list")?))),
    );
    add(
        &["lower"],
        Filter::sync(|value, _| {
            let text = value.to_string().to_lowercase();
            Ok(same_safety(&value, text))
        }),
    );
    add(
        &["upper"],
        Filter::sync(|value, _| {
            let text = value.to_string().to_uppercase();
            Ok(same_safety(&value, text))
        }),
    );
    add(
        &["replace"],
        Filter::sync(|value, args| {
            let from = string_arg(&args, 0, "old", "replace")?;
            let to = string_arg(&args, 1, "new", "replace")?;
            let text = value.to_string();
            let replaced = match args.arg(2, "count").and_then(Value::as_i64) {
                Some(count) if count >= 0 => text.replacen(&from, &to, count as usize),
                _ => text.replace(&from, &to),
            };
            Ok(same_safety(&value, replaced))
        }),
    );
    add(
        &["reverse"],
        Filter::sync(|value, _| match &value {
            Value::String(s) | Value::Safe(s) => {
                Ok(same_safety(&value, s.chars().rev().collect()))
            }
            other => {
                let mut items = list_items(other, "reverse")?;
                items.reverse();
                Ok(Value::list(items))
            }
        }),
    );
    add(
        &["round"],
        Filter::sync(|value, args| {
            let number = value.as_f64().ok_or_else(|| {
                RenderError::type_mismatch(format!(
                    "round expects a number, found {}",
                    value.type_name()
                ))
            })?;
            let precision = args.arg(0, "precision").and_then(Value::as_i64).unwrap_or(0);
            let method = args
                .arg(1, "method")
                .map(|m| m.to_string())
                .unwrap_or_else(|| "common".to_string());
            Ok(Value::Float(round(number, precision, &method)))
        }),
    );
    add(
        &["safe"],
        Filter::sync(|value, _| match value {
            Value::Fragment(mut fragment) => {
                fragment.safe = true;
                Ok(Value::Fragment(fragment))
            }
            Value::Safe(_) => Ok(value),
            other => Ok(Value::Safe(other.to_string())),
        }),
    );
    add(
        &["sort"],
        Filter::sync(|value, args| {
            let mut items = list_items(&value, "sort")?;
            let reverse = args.arg(0, "reverse").map(Value::is_truthy).unwrap_or(false);
            let attribute = args.arg(2, "attribute").cloned();
            let key = |item: &Value| match &attribute {
                Some(attr) => item.get_member(attr),
                None => item.clone(),
            };
            items.sort_by(|a, b| {
                key(a)
                    .compare(&key(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }),
    );
    add(
        &["string"],
        Filter::sync(|value, _| Ok(same_safety(&value, value.to_string()))),
    );
    add(
        &["title"],
        Filter::sync(|value, _| {
            let text = title(&value.to_string());
            Ok(same_safety(&value, text))
        }),
    );
    add(
        &["trim"],
        Filter::sync(|value, _| {
            let text = value.to_string().trim().to_string();
            Ok(same_safety(&value, text))
        }),
    );

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn run(name: &str, value: Value, args: Vec<Value>) -> Value {
        let filters = builtin_filters();
        filters[name]
            .apply(value, CallArgs::new(args))
            .now_or_never()
            .expect("builtin filters are synchronous")
            .expect("filter succeeds")
    }

    #[test]
    fn escape_covers_quotes() {
        assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn default_only_replaces_undefined_unless_boolean() {
        assert_eq!(run("default", Value::Undefined, vec!["x".into()]).to_string(), "x");
        assert_eq!(run("d", Value::from(""), vec!["x".into()]).to_string(), "");
        assert_eq!(
            run("default", Value::from(""), vec!["x".into(), true.into()]).to_string(),
            "x"
        );
    }

    #[test]
    fn string_filters_keep_markup_safe() {
        let upper = run("upper", Value::safe("<b>a</b>"), vec![]);
        assert!(upper.is_safe());
        assert_eq!(upper.to_string(), "<B>A</B>");
        assert!(!run("upper", Value::from("a"), vec![]).is_safe());
    }

    #[test]
    fn list_filters() {
        let items = Value::list(vec![3.into(), 1.into(), 2.into()]);
        assert_eq!(run("sort", items.clone(), vec![]).to_string(), "1,2,3");
        assert_eq!(run("join", items.clone(), vec!["-".into()]).to_string(), "3-1-2");
        assert_eq!(run("first", items.clone(), vec![]).to_string(), "3");
        assert_eq!(run("last", items.clone(), vec![]).to_string(), "2");
        assert_eq!(run("length", items, vec![]).to_string(), "3");
    }

    #[test]
    fn numeric_filters() {
        assert_eq!(run("round", Value::Float(2.567), vec![2.into()]).to_string(), "2.57");
        assert_eq!(run("int", Value::from("42"), vec![]).to_string(), "42");
        assert_eq!(run("abs", Value::Int(-3), vec![]).to_string(), "3");
        assert_eq!(run("title", Value::from("hello wORLD"), vec![]).to_string(), "Hello World");
    }

    #[test]
    fn dump_writes_json() {
        let value = Value::map([("a", Value::Int(1))]);
        assert_eq!(run("dump", value, vec![]).to_string(), r#"{"a":1}"#);
    }
}
