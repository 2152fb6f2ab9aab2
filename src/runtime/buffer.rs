use crate::runtime::error::{RenderError, RenderResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Rewrites everything accumulated before it in the same buffer.
pub type Finalizer = Rc<dyn Fn(String) -> String>;

#[derive(Clone)]
enum Segment {
    Reserved,
    Text(String),
    Nested(Buffer),
    Finalizer(Finalizer),
}

/// Value written into a reserved slot.
pub enum SlotValue {
    Text(String),
    Nested(Buffer),
    /// A nested buffer followed by a finalizer that sees only that buffer's output.
    Finalized(Buffer, Finalizer),
}

/// Output of one render scope. Slots are reserved in document order before their
/// content is known, so writers that complete out of order still land in place.
#[derive(Clone, Default)]
pub struct Buffer {
    segments: Rc<RefCell<Vec<Segment>>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve_slot(&self) -> usize {
        let mut segments = self.segments.borrow_mut();
        segments.push(Segment::Reserved);
        segments.len() - 1
    }

    pub fn write_slot(&self, index: usize, value: SlotValue) {
        let mut segments = self.segments.borrow_mut();
        let Some(slot) = segments.get_mut(index) else {
            tracing::error!(index, "write to a slot that was never reserved");
            return;
        };
        *slot = match value {
            SlotValue::Text(text) => Segment::Text(text),
            SlotValue::Nested(buffer) => Segment::Nested(buffer),
            SlotValue::Finalized(buffer, finalizer) => {
                let wrapper = Buffer::new();
                wrapper.push(Segment::Nested(buffer));
                wrapper.push(Segment::Finalizer(finalizer));
                Segment::Nested(wrapper)
            }
        };
    }

    /// Reserves and fills a slot in one step.
    pub fn append(&self, value: SlotValue) {
        let index = self.reserve_slot();
        self.write_slot(index, value);
    }

    pub fn append_literal(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut segments = self.segments.borrow_mut();
        if let Some(Segment::Text(last)) = segments.last_mut() {
            last.push_str(text);
        } else {
            segments.push(Segment::Text(text.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.segments.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.borrow().is_empty()
    }

    /// Concatenates depth-first in slot order. A finalizer replaces the text gathered so
    /// far in its own buffer. Reading a slot that was reserved but never written is an
    /// error: the caller flattened before the render went quiet.
    pub fn flatten(&self) -> RenderResult<String> {
        let segments = self.segments.borrow();
        let mut out = String::new();
        for (index, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Reserved => return Err(RenderError::UnresolvedSlot { index }),
                Segment::Text(text) => out.push_str(text),
                Segment::Nested(buffer) => out.push_str(&buffer.flatten()?),
                Segment::Finalizer(finalizer) => out = finalizer(out),
            }
        }
        Ok(out)
    }

    fn push(&self, segment: Segment) {
        self.segments.borrow_mut().push(segment);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("slots", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_keep_reservation_order() {
        let buffer = Buffer::new();
        buffer.append_literal("<");
        let first = buffer.reserve_slot();
        let second = buffer.reserve_slot();
        buffer.append_literal(">");
        buffer.write_slot(second, SlotValue::Text("B".into()));
        buffer.write_slot(first, SlotValue::Text("A".into()));
        assert_eq!(buffer.flatten().unwrap(), "<AB>");
    }

    #[test]
    fn nested_buffers_flatten_in_place() {
        let outer = Buffer::new();
        let inner = Buffer::new();
        let slot = outer.reserve_slot();
        outer.append_literal("!");
        outer.write_slot(slot, SlotValue::Nested(inner.clone()));
        inner.append_literal("late");
        assert_eq!(outer.flatten().unwrap(), "late!");
    }

    #[test]
    fn finalizer_sees_only_its_own_value() {
        let outer = Buffer::new();
        outer.append_literal("<p>");
        let inner = Buffer::new();
        inner.append_literal("a<b");
        let escape: Finalizer = Rc::new(|text: String| text.replace('<', "&lt;"));
        outer.append(SlotValue::Finalized(inner, escape));
        outer.append_literal("</p>");
        assert_eq!(outer.flatten().unwrap(), "<p>a&lt;b</p>");
    }

    #[test]
    fn unwritten_slot_is_reported() {
        let buffer = Buffer::new();
        buffer.append_literal("x");
        buffer.reserve_slot();
        assert!(matches!(
            buffer.flatten(),
            Err(RenderError::UnresolvedSlot { index: 1 })
        ));
    }

    #[test]
    fn flatten_is_idempotent() {
        let buffer = Buffer::new();
        let inner = Buffer::new();
        inner.append_literal("x");
        buffer.append(SlotValue::Finalized(
            inner,
            Rc::new(|text: String| format!("[{text}]")),
        ));
        assert_eq!(buffer.flatten().unwrap(), "[x]");
        assert_eq!(buffer.flatten().unwrap(), "[x]");
    }
}
