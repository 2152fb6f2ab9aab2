use crate::compiler::ir::MacroDef;
use crate::runtime::{
    buffer::Buffer,
    error::{RenderError, RenderResult},
    executor::Executor,
    frame::Frame,
};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

pub type NativeFn = Rc<dyn Fn(CallArgs) -> LocalBoxFuture<'static, RenderResult<Value>>>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Markup that is emitted without escaping.
    Safe(String),
    List(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<String, Value>>),
    Fragment(Fragment),
    Function(FunctionValue),
    Macro(MacroValue),
    Getter(Getter),
    Pending(AsyncValue),
}

/// Output of a nested render scope, kept as a buffer so it can be spliced into the
/// parent without flattening early.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub buffer: Buffer,
    pub safe: bool,
}

impl Fragment {
    /// Rendered text. A scope hands out its fragment only after every slot is written.
    pub fn text(&self) -> String {
        let text = self.buffer.flatten();
        debug_assert!(text.is_ok(), "fragment has an unwritten slot");
        text.unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct FunctionValue {
    pub name: String,
    pub func: NativeFn,
}

#[derive(Clone)]
pub struct MacroValue {
    pub def: Rc<MacroDef>,
    /// Frame the macro was defined in, if it was not defined at template top level.
    pub closure: Option<Frame>,
    pub scope: Executor,
}

/// Computed on every read; the result may itself be pending.
#[derive(Clone)]
pub struct Getter(pub Rc<dyn Fn() -> Value>);

/// A value that is still being computed. Every clone observes the same result.
#[derive(Clone)]
pub struct AsyncValue(pub Shared<LocalBoxFuture<'static, RenderResult<Value>>>);

impl AsyncValue {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = RenderResult<Value>> + 'static,
    {
        AsyncValue(future.boxed_local().shared())
    }

    pub fn now(&self) -> Option<RenderResult<Value>> {
        self.0.clone().now_or_never()
    }
}

/// Arguments handed to native functions, filters and macros.
#[derive(Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.keyword
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Positional argument `index`, falling back to the keyword `name`.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.get(index).or_else(|| self.kwarg(name))
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Value {
    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> RenderResult<Value> + 'static,
    {
        let func: NativeFn = Rc::new(move |args| futures::future::ready(func(args)).boxed_local());
        Value::Function(FunctionValue {
            name: name.into(),
            func,
        })
    }

    pub fn async_function<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CallArgs) -> Fut + 'static,
        Fut: Future<Output = RenderResult<Value>> + 'static,
    {
        let func: NativeFn = Rc::new(move |args| func(args).boxed_local());
        Value::Function(FunctionValue {
            name: name.into(),
            func,
        })
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = RenderResult<Value>> + 'static,
    {
        Value::Pending(AsyncValue::new(future))
    }

    pub fn getter<F>(func: F) -> Self
    where
        F: Fn() -> Value + 'static,
    {
        Value::Getter(Getter(Rc::new(func)))
    }

    pub fn safe(text: impl Into<String>) -> Self {
        Value::Safe(text.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Rc::new(items.into_iter().collect()))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Rc::new(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        ))
    }

    /// Awaits pending values and evaluates getters until a settled value remains.
    pub async fn resolve(self) -> RenderResult<Value> {
        let mut value = self;
        loop {
            value = match value {
                Value::Pending(pending) => pending.0.await?,
                Value::Getter(getter) => (getter.0)(),
                other => return Ok(other),
            };
        }
    }

    /// Like [`Value::resolve`] but without suspending; `None` if something is still pending.
    pub fn resolve_now(self) -> Option<RenderResult<Value>> {
        let mut value = self;
        loop {
            value = match value {
                Value::Pending(pending) => match pending.now()? {
                    Ok(value) => value,
                    Err(err) => return Some(Err(err)),
                },
                Value::Getter(getter) => (getter.0)(),
                other => return Some(Ok(other)),
            };
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_none_or_undefined(&self) -> bool {
        matches!(self, Value::Undefined | Value::None)
    }

    pub fn is_safe(&self) -> bool {
        match self {
            Value::Safe(_) => true,
            Value::Fragment(fragment) => fragment.safe,
            _ => false,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) | Value::Safe(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Fragment(fragment) => !fragment.text().is_empty(),
            Value::Function(_) | Value::Macro(_) | Value::Getter(_) | Value::Pending(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) | Value::Safe(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Fragment(_) => "markup",
            Value::Function(_) => "function",
            Value::Macro(_) => "macro",
            Value::Getter(_) => "getter",
            Value::Pending(_) => "pending value",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) | Value::Safe(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    /// Member access: `value.key` and `value[key]`. Missing members are undefined.
    pub fn get_member(&self, key: &Value) -> Value {
        match (self, key) {
            (Value::Map(entries), key) => match key.as_str() {
                Some(name) => entries.get(name).cloned().unwrap_or(Value::Undefined),
                None => entries.get(&key.to_string()).cloned().unwrap_or(Value::Undefined),
            },
            (Value::List(items), Value::Int(index)) => usize::try_from(*index)
                .ok()
                .and_then(|index| items.get(index).cloned())
                .unwrap_or(Value::Undefined),
            (Value::String(s) | Value::Safe(s), Value::Int(index)) => usize::try_from(*index)
                .ok()
                .and_then(|index| s.chars().nth(index))
                .map(|ch| Value::String(ch.to_string()))
                .unwrap_or(Value::Undefined),
            (target, key) if key.as_str() == Some("length") => target
                .len()
                .map(|len| Value::Int(len as i64))
                .unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        }
    }

    /// Equality as templates see it: numbers compare by value, markup compares with text.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::None, Value::Undefined | Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => false,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a) | Value::Safe(a), Value::String(b) | Value::Safe(b)) => {
                Some(a.cmp(b))
            }
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Undefined | Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) | Value::Safe(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Fragment(_) => Json::String(self.to_string()),
            Value::Function(_) | Value::Macro(_) | Value::Getter(_) | Value::Pending(_) => {
                Json::Null
            }
        }
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined | Value::None => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::String(v) | Value::Safe(v) => write!(f, "{v}"),
            Value::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Fragment(fragment) => write!(f, "{}", fragment.text()),
            Value::Function(func) => write!(f, "[function {}]", func.name),
            Value::Macro(mac) => write!(f, "[macro {}]", mac.def.name),
            Value::Getter(_) => write!(f, "[getter]"),
            Value::Pending(_) => write!(f, "[pending]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::None => write!(f, "None"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Safe(v) => write!(f, "Safe({v:?})"),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Map(entries) => f.debug_map().entries(entries.iter()).finish(),
            other => write!(f, "{other}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(Rc::new(entries))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::None)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::list(items.into_iter().map(Value::from)),
            Json::Object(entries) => Value::map(entries.into_iter().map(|(k, v)| (k, v.into()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_print_like_template_numbers() {
        assert_eq!(Value::Float(2.0).to_string(), "2");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::list(vec![1.into(), "a".into()]).to_string(), "1,a");
    }

    #[test]
    fn member_lookup_covers_maps_lists_and_length() {
        let user = Value::map([("name", Value::from("Ada"))]);
        assert_eq!(user.get_member(&"name".into()).to_string(), "Ada");
        assert!(user.get_member(&"missing".into()).is_undefined());
        let items = Value::list(vec![10.into(), 20.into()]);
        assert_eq!(items.get_member(&Value::Int(1)).to_string(), "20");
        assert_eq!(items.get_member(&"length".into()).to_string(), "2");
        assert!(Value::Undefined.get_member(&"x".into()).is_undefined());
    }

    #[test]
    fn loose_equality_crosses_number_kinds() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::from("a").loose_eq(&Value::safe("a")));
        assert!(Value::None.loose_eq(&Value::Undefined));
        assert!(!Value::Int(0).loose_eq(&Value::from("0")));
    }

    #[test]
    fn json_values_convert() {
        let value = Value::from(serde_json::json!({"id": 1, "tags": ["a"], "ok": true}));
        assert_eq!(value.get_member(&"id".into()).to_string(), "1");
        assert_eq!(value.to_json()["tags"][0], "a");
    }

    #[tokio::test]
    async fn resolve_unwraps_getters_and_futures() {
        let value = Value::getter(|| Value::from_future(async { Ok(Value::from("done")) }));
        assert_eq!(value.resolve().await.unwrap().to_string(), "done");
    }

    #[tokio::test]
    async fn resolve_now_reports_suspended_values() {
        let slow = Value::from_future(async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok(Value::Int(1))
        });
        assert!(slow.clone().resolve_now().is_none());
        assert_eq!(slow.resolve().await.unwrap().to_string(), "1");
    }
}
