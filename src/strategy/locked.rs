use core::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::node::Node;

use super::Reclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Locked
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Serializes all queue operations through a per-queue mutex and deallocates
/// removed nodes immediately.
///
/// Since no other thread can hold a reference to a node while the lock is
/// held, unlinked nodes are freed right away by the thread unlinking them.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Locked;

/********** impl Reclaim **************************************************************************/

unsafe impl Reclaim for Locked {
    type Arena<T> = Mutex<()>;

    #[inline]
    fn enter<T>(arena: &Self::Arena<T>) -> Option<MutexGuard<'_, ()>> {
        // the mutex guards no data, poisoning can be ignored
        Some(arena.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[inline]
    fn alloc<T>(_: &Self::Arena<T>, value: T) -> NonNull<Node<T>> {
        Node::boxed(value, Default::default())
    }

    #[inline]
    unsafe fn retire<T>(_: &Self::Arena<T>, first: *mut Node<T>, end: *mut Node<T>) {
        let mut curr = first;
        while curr != end {
            match NonNull::new(curr) {
                Some(node) => {
                    curr = node.as_ref().next();
                    Node::dealloc(node);
                }
                None => return,
            }
        }
    }
}
