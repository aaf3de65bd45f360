use core::fmt;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::control::ControlBlock;
use crate::node::Node;
use crate::strategy::Reclaim;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Shared
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A handle to a node that owns one reference to it, as far as the strategy
/// `R` counts references.
///
/// Cloning acquires another reference, dropping releases it.
pub(crate) struct Shared<'a, T, R: Reclaim> {
    node: NonNull<Node<T>>,
    arena: &'a R::Arena<T>,
}

/********** impl inherent *************************************************************************/

impl<'a, T, R: Reclaim> Shared<'a, T, R> {
    /// Acquires a new reference to `node`.
    ///
    /// # Safety
    ///
    /// The node must be kept alive by some other reference for the duration of
    /// this call, e.g. the queue's ownership of its head sentinel.
    #[inline]
    pub unsafe fn acquire(node: NonNull<Node<T>>, arena: &'a R::Arena<T>) -> Self {
        R::acquire(arena, node);
        Self { node, arena }
    }

    /// Returns the raw pointer to the node.
    #[inline]
    pub fn as_ptr(&self) -> *mut Node<T> {
        self.node.as_ptr()
    }

    /// Loads the node's control word along with a handle to its successor.
    #[inline]
    pub fn load_next(&self) -> (ControlBlock, Option<Self>) {
        let (control, next) = unsafe { R::protect_next(self.arena, self.node.as_ref()) };
        (control, next.map(|node| Self { node, arena: self.arena }))
    }

    /// Acquires an additional reference on behalf of a list link about to be
    /// pointed at the node.
    #[inline]
    pub fn acquire_link(&self) {
        unsafe { R::acquire(self.arena, self.node) };
    }

    /// Releases a reference previously taken by
    /// [`acquire_link`][Shared::acquire_link] for a link that was never
    /// installed.
    ///
    /// # Safety
    ///
    /// The link reference must not have been handed over to the list.
    #[inline]
    pub unsafe fn release_link(&self) {
        R::release(self.arena, self.node);
    }
}

/********** impl Clone ****************************************************************************/

impl<T, R: Reclaim> Clone for Shared<'_, T, R> {
    #[inline]
    fn clone(&self) -> Self {
        unsafe { Self::acquire(self.node, self.arena) }
    }
}

/********** impl Deref ****************************************************************************/

impl<T, R: Reclaim> Deref for Shared<'_, T, R> {
    type Target = Node<T>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.node.as_ref() }
    }
}

/********** impl Debug ****************************************************************************/

impl<T, R: Reclaim> fmt::Debug for Shared<'_, T, R> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shared").field("node", &self.node).finish()
    }
}

/********** impl Drop *****************************************************************************/

impl<T, R: Reclaim> Drop for Shared<'_, T, R> {
    #[inline]
    fn drop(&mut self) {
        unsafe { R::release(self.arena, self.node) };
    }
}
