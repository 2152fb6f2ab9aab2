use crate::compiler::ir::Block;
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Variables and block overrides shared by every scope of one template render.
#[derive(Clone, Default)]
pub struct Context {
    inner: Rc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    vars: RefCell<HashMap<String, Value>>,
    exports: RefCell<Vec<String>>,
    /// Most derived template first.
    blocks: RefCell<HashMap<String, Vec<Block>>>,
}

impl Context {
    pub fn new(vars: HashMap<String, Value>) -> Self {
        let context = Self::default();
        *context.inner.vars.borrow_mut() = vars;
        context
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.inner.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.inner.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.inner.vars.borrow().clone()
    }

    /// Names starting with `_` stay private to the template.
    pub fn add_export(&self, name: &str) {
        if name.starts_with('_') {
            return;
        }
        let mut exports = self.inner.exports.borrow_mut();
        if !exports.iter().any(|existing| existing == name) {
            exports.push(name.to_string());
        }
    }

    pub fn exported(&self) -> BTreeMap<String, Value> {
        let vars = self.inner.vars.borrow();
        self.inner
            .exports
            .borrow()
            .iter()
            .filter_map(|name| vars.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }

    /// Registers a template's blocks behind any already registered by a child template.
    pub fn add_blocks(&self, blocks: &BTreeMap<String, Block>) {
        let mut registry = self.inner.blocks.borrow_mut();
        for (name, body) in blocks {
            registry.entry(name.clone()).or_default().push(body.clone());
        }
    }

    pub fn block(&self, name: &str, level: usize) -> Option<Block> {
        self.inner
            .blocks
            .borrow()
            .get(name)
            .and_then(|levels| levels.get(level).cloned())
    }

    /// Drops everything the context holds. Macros keep their defining context alive, so
    /// a finished render calls this to release the cycle.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.inner.vars.borrow_mut());
        drop(vars);
        self.inner.exports.borrow_mut().clear();
        self.inner.blocks.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_skip_private_names() {
        let context = Context::default();
        context.set("visible", Value::Int(1));
        context.set("_hidden", Value::Int(2));
        context.add_export("visible");
        context.add_export("_hidden");
        let exported = context.exported();
        assert_eq!(exported.len(), 1);
        assert!(exported.contains_key("visible"));
    }
}
