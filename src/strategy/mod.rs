//! The memory reclamation strategies a [`Queue`][crate::Queue] can be
//! instantiated with.

mod leak;
mod locked;
#[cfg(target_pointer_width = "64")]
mod ref_count;

pub use self::leak::Leak;
pub use self::locked::Locked;
#[cfg(target_pointer_width = "64")]
pub use self::ref_count::RefCounted;

use core::ptr::NonNull;
use std::sync::MutexGuard;

use crate::control::ControlBlock;
use crate::node::Node;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Reclaim (trait)
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A strategy that determines when the nodes of a queue are synchronized and
/// when removed nodes are deallocated.
///
/// This trait is sealed and can not be implemented outside of this crate.
///
/// # Safety
///
/// Implementations must ensure no node is deallocated or reused while any
/// thread may still dereference it.
pub unsafe trait Reclaim: Sized + 'static + private::Sealed {
    /// The per-queue state required by the strategy.
    #[doc(hidden)]
    type Arena<T>: Default;

    /// Enters a (potentially) exclusive section spanning an entire queue
    /// operation.
    #[doc(hidden)]
    #[inline]
    fn enter<T>(_arena: &Self::Arena<T>) -> Option<MutexGuard<'_, ()>> {
        None
    }

    /// Allocates the queue's head sentinel.
    #[doc(hidden)]
    #[inline]
    fn alloc_sentinel<T>() -> NonNull<Node<T>> {
        Node::sentinel(ControlBlock::EMPTY)
    }

    /// Allocates an unlinked node holding `value`.
    ///
    /// The returned node carries one reference, which becomes the list
    /// reference of its predecessor once it is linked.
    #[doc(hidden)]
    fn alloc<T>(arena: &Self::Arena<T>, value: T) -> NonNull<Node<T>>;

    /// Acquires an additional reference to `node`.
    ///
    /// # Safety
    ///
    /// The caller must already hold a reference to `node`.
    #[doc(hidden)]
    #[inline]
    unsafe fn acquire<T>(_arena: &Self::Arena<T>, _node: NonNull<Node<T>>) {}

    /// Loads the control word of `node` and acquires a reference to its
    /// successor, if there is any.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference to `node`.
    #[doc(hidden)]
    #[inline]
    unsafe fn protect_next<T>(
        _arena: &Self::Arena<T>,
        node: &Node<T>,
    ) -> (ControlBlock, Option<NonNull<Node<T>>>) {
        let control = node.load();
        (control, NonNull::new(control.next_ptr()))
    }

    /// Releases a reference to `node`.
    ///
    /// # Safety
    ///
    /// The caller must hold the reference it releases and must not access
    /// `node` through it afterwards.
    #[doc(hidden)]
    #[inline]
    unsafe fn release<T>(_arena: &Self::Arena<T>, _node: NonNull<Node<T>>) {}

    /// Hands the physically unlinked run of nodes `[first, end)` to the
    /// strategy, along with the list reference that used to point at `first`.
    ///
    /// # Safety
    ///
    /// The run must have been unlinked by the caller and all its nodes must be
    /// marked with their values moved out or dropped.
    #[doc(hidden)]
    unsafe fn retire<T>(arena: &Self::Arena<T>, first: *mut Node<T>, end: *mut Node<T>);
}

mod private {
    pub trait Sealed {}

    impl Sealed for super::Leak {}
    impl Sealed for super::Locked {}
    #[cfg(target_pointer_width = "64")]
    impl Sealed for super::RefCounted {}
}
