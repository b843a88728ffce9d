//! Subscription handles and the `wait` future

use crate::identity::SubscriptionId;
use crate::producer::Inner;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// Handle returned by `subscribe`, `observe` and `once`
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone, Debug)]
pub struct Subscription {
    id: SubscriptionId,
    producer: Weak<Inner>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, producer: Weak<Inner>) -> Self {
        Self { id, producer }
    }

    /// The subscription's id within its producer
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving notifications
    ///
    /// Safe to call any number of times, from inside a listener, after
    /// `destroy()`, or after the producer itself is gone.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.producer.upgrade() {
            inner.remove_subscriber(self.id);
        }
    }

    /// Whether the listener is still registered
    pub fn is_active(&self) -> bool {
        self.producer
            .upgrade()
            .is_some_and(|inner| inner.has_subscriber(self.id))
    }
}

pub(crate) struct WaitSlot<T> {
    pub(crate) value: Option<T>,
    pub(crate) waker: Option<Waker>,
    pub(crate) subscription: Option<Subscription>,
}

impl<T> Default for WaitSlot<T> {
    fn default() -> Self {
        Self {
            value: None,
            waker: None,
            subscription: None,
        }
    }
}

/// Future returned by `Producer::wait`
///
/// Resolves with the next selection that differs from the one seen when the
/// wait started. Cancelling (or dropping) the future unsubscribes without
/// resolving.
#[must_use = "a wait does nothing unless polled"]
pub struct Wait<T> {
    slot: Rc<RefCell<WaitSlot<T>>>,
}

impl<T> Wait<T> {
    pub(crate) fn new(slot: Rc<RefCell<WaitSlot<T>>>) -> Self {
        Self { slot }
    }

    /// Stop waiting
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether a matching selection has already arrived
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().value.is_some()
    }
}

impl<T> Future for Wait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.slot.borrow_mut();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        let subscription = self.slot.borrow_mut().subscription.take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}
