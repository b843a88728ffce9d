//! Identity types for subscriptions and selections

use crate::Value;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Unique identifier for a subscription within one producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription:{}", self.0)
    }
}

/// Identity comparison used to decide whether a selection changed
///
/// Shared containers (`Value` lists and maps, `Arc`, `Rc`) compare by pointer;
/// plain data compares by value.
pub trait Same {
    fn same(&self, other: &Self) -> bool;
}

impl Same for Value {
    fn same(&self, other: &Self) -> bool {
        Value::same(self, other)
    }
}

impl<T: ?Sized> Same for Arc<T> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Same for Rc<T> {
    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: Same> Same for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! same_by_value {
    ($($ty:ty),*) => {
        $(
            impl Same for $ty {
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_by_value!(bool, i32, i64, u32, u64, usize, f32, f64, String, &'static str);
