use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One link of the lexical scope chain. Variables live behind an `Rc` so a snapshot
/// shares storage until either side writes.
#[derive(Clone)]
pub struct Frame {
    inner: Rc<FrameInner>,
}

struct FrameInner {
    vars: RefCell<Rc<HashMap<String, Value>>>,
    parent: Option<Frame>,
    top_level: bool,
}

impl Frame {
    /// Top-level frame of a template render.
    pub fn root() -> Self {
        Self::build(None, true)
    }

    /// Isolated frame with no parent, used for macro bodies.
    pub fn isolated() -> Self {
        Self::build(None, false)
    }

    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), false)
    }

    fn build(parent: Option<Frame>, top_level: bool) -> Self {
        Self {
            inner: Rc::new(FrameInner {
                vars: RefCell::new(Rc::new(HashMap::new())),
                parent,
                top_level,
            }),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.inner.top_level
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(current) = frame {
            if let Some(value) = current.inner.vars.borrow().get(name) {
                return Some(value.clone());
            }
            frame = current.inner.parent.as_ref();
        }
        None
    }

    /// Binds `name` in this frame only.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let mut vars = self.inner.vars.borrow_mut();
        Rc::make_mut(&mut *vars).insert(name.into(), value);
    }

    /// Copy of the whole chain as it is now. Later writes on either side are not seen by
    /// the other.
    pub fn snapshot(&self) -> Frame {
        Frame {
            inner: Rc::new(FrameInner {
                vars: RefCell::new(self.inner.vars.borrow().clone()),
                parent: self.inner.parent.as_ref().map(Frame::snapshot),
                top_level: self.inner.top_level,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parents() {
        let root = Frame::root();
        root.set("a", Value::Int(1));
        let child = root.child();
        child.set("b", Value::Int(2));
        assert_eq!(child.lookup("a").unwrap().to_string(), "1");
        assert!(root.lookup("b").is_none());
        assert!(!child.is_top_level());
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let root = Frame::root();
        root.set("x", Value::from("before"));
        let snap = root.snapshot();
        root.set("x", Value::from("after"));
        snap.set("y", Value::Int(1));
        assert_eq!(snap.lookup("x").unwrap().to_string(), "before");
        assert!(root.lookup("y").is_none());
    }
}
