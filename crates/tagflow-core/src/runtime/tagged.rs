use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::engine::Value;

/// Opaque, policy-defined tag. Two tags are equal only if they are the same
/// allocation.
#[derive(Clone)]
pub struct Tag(Rc<dyn Any>);

impl Tag {
    pub fn new<T: Any>(payload: T) -> Self {
        Tag(Rc::new(payload))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Tag {}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<String>() {
            write!(f, "Tag({s:?})")
        } else if let Some(s) = self.downcast_ref::<&'static str>() {
            write!(f, "Tag({s:?})")
        } else {
            write!(f, "Tag({:p})", self.addr())
        }
    }
}

/// A raw host value paired with an optional tag. Never wraps another tagged
/// value.
#[derive(Debug, Clone)]
pub struct TaggedValue {
    pub value: Value,
    pub tag: Option<Tag>,
}

impl TaggedValue {
    /// Pairs `value` with `tag`. An already tagged `value` is returned as is
    /// and `tag` is dropped.
    pub fn new(value: Value, tag: Option<Tag>) -> Rc<TaggedValue> {
        match value {
            Value::Tagged(tv) => tv,
            raw => Rc::new(TaggedValue { value: raw, tag }),
        }
    }

    /// Views any value as a tagged one; raw values get no tag.
    pub fn of(value: &Value) -> Rc<TaggedValue> {
        TaggedValue::new(value.clone(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_is_idempotent_and_flat() {
        let tag = Tag::new("lit".to_string());
        let once = TaggedValue::new(Value::Number(1.0), Some(tag.clone()));
        let twice = TaggedValue::new(Value::Tagged(once.clone()), Some(Tag::new(2u8)));
        assert!(Rc::ptr_eq(&once, &twice));
        assert!(!matches!(twice.value, Value::Tagged(_)));
        assert_eq!(twice.tag.as_ref(), Some(&tag));
    }

    #[test]
    fn tags_compare_by_identity() {
        let a = Tag::new(7u32);
        let b = Tag::new(7u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<u32>(), Some(&7));
        assert_eq!(format!("{:?}", Tag::new("x".to_string())), "Tag(\"x\")");
    }
}
