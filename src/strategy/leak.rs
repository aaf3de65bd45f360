use core::ptr::NonNull;

use crate::node::Node;

use super::Reclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Leak
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Never deallocates removed nodes.
///
/// Removed nodes are still marked and unlinked, but their memory is leaked.
/// Only the nodes still linked when the queue is dropped are freed.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Leak;

/********** impl Reclaim **************************************************************************/

unsafe impl Reclaim for Leak {
    type Arena<T> = ();

    #[inline]
    fn alloc<T>(_: &Self::Arena<T>, value: T) -> NonNull<Node<T>> {
        Node::boxed(value, Default::default())
    }

    #[inline]
    unsafe fn retire<T>(_: &Self::Arena<T>, _: *mut Node<T>, _: *mut Node<T>) {}
}
