//! The packed control word of a list node.
//!
//! Every node carries exactly one machine word that is only ever updated by
//! *compare-and-swap*, so that the removal marker, the pointer to the
//! successor and (on 64-bit targets) the reference count are always changed
//! together.
//!
//! # Bit Layout (64-bit)
//!
//! ```text
//! 63        62 .. 48+N   48+N-1 .. 48   47 .. 1            0
//! reclaimed | reserved | ref count    | next >> 1       | marker
//! ```
//!
//! Node allocations are aligned to (at least) 8 bytes, so the lowest bit of
//! every node address is zero and the address can be stored shifted down by
//! one bit.
//! Addresses are assumed to fit into the 48 bit virtual address space used by
//! all common 64-bit platforms.
//! On 32-bit targets the word only contains the marker and the next pointer.

use core::fmt;

#[cfg(target_pointer_width = "64")]
include!(concat!(env!("OUT_DIR"), "/build_constants.rs"));

const MARKER_BIT: usize = 0b1;
const NEXT_SHIFT: u32 = 1;

#[cfg(target_pointer_width = "64")]
const NEXT_BITS: u32 = 47;
#[cfg(not(target_pointer_width = "64"))]
const NEXT_BITS: u32 = usize::BITS - 1;

const NEXT_MASK: usize = ((1 << NEXT_BITS) - 1) << NEXT_SHIFT;

#[cfg(target_pointer_width = "64")]
const REF_COUNT_SHIFT: u32 = NEXT_SHIFT + NEXT_BITS;
#[cfg(target_pointer_width = "64")]
const REF_COUNT_MASK: usize = ((1 << REF_COUNT_BITS) - 1) << REF_COUNT_SHIFT;
#[cfg(target_pointer_width = "64")]
const RECLAIMED_BIT: usize = 1 << (usize::BITS - 1);

/// The highest reference count a control block can represent.
#[cfg(target_pointer_width = "64")]
pub(crate) const MAX_REF_COUNT: usize = (1 << REF_COUNT_BITS) - 1;

////////////////////////////////////////////////////////////////////////////////////////////////////
// ControlBlock
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A snapshot of a node's control word.
///
/// All modifications return a modified copy, which must then be installed
/// with a *compare-and-swap* against the snapshot it was derived from.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct ControlBlock(usize);

/********** impl inherent *************************************************************************/

impl ControlBlock {
    /// A live control block without successor and without references.
    pub const EMPTY: Self = Self(0);

    /// Creates a control block from its raw representation.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw representation.
    #[inline]
    pub const fn into_raw(self) -> usize {
        self.0
    }

    /// Returns `true` if the node is logically removed.
    #[inline]
    pub const fn is_marked(self) -> bool {
        self.0 & MARKER_BIT != 0
    }

    /// Returns a copy with the removal marker set.
    #[inline]
    pub const fn with_marker(self) -> Self {
        Self(self.0 | MARKER_BIT)
    }

    /// Returns the (unshifted) address of the successor or 0.
    #[inline]
    pub const fn next(self) -> usize {
        ((self.0 & NEXT_MASK) >> NEXT_SHIFT) << 1
    }

    /// Returns the successor as a (possibly `null`) pointer.
    #[inline]
    pub fn next_ptr<N>(self) -> *mut N {
        self.next() as *mut N
    }

    /// Returns a copy with the successor replaced by `addr`.
    #[inline]
    pub fn with_next(self, addr: usize) -> Self {
        debug_assert_eq!(addr & MARKER_BIT, 0, "node address is not aligned");
        debug_assert_eq!((addr >> 1) << NEXT_SHIFT & !NEXT_MASK, 0, "node address out of range");
        Self((self.0 & !NEXT_MASK) | (((addr >> 1) << NEXT_SHIFT) & NEXT_MASK))
    }
}

#[cfg(target_pointer_width = "64")]
impl ControlBlock {
    /// Returns the reference count.
    #[inline]
    pub const fn ref_count(self) -> usize {
        (self.0 & REF_COUNT_MASK) >> REF_COUNT_SHIFT
    }

    /// Returns a copy with the reference count replaced by `count`.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds [`MAX_REF_COUNT`].
    #[inline]
    pub fn with_ref_count(self, count: usize) -> Self {
        assert!(count <= MAX_REF_COUNT, "reference count overflow");
        Self((self.0 & !REF_COUNT_MASK) | (count << REF_COUNT_SHIFT))
    }

    /// Returns `true` if the node has been claimed for reclamation.
    #[inline]
    pub const fn is_reclaimed(self) -> bool {
        self.0 & RECLAIMED_BIT != 0
    }

    /// Returns a copy with the reclaimed flag set to `reclaimed`.
    #[inline]
    pub const fn with_reclaimed(self, reclaimed: bool) -> Self {
        if reclaimed {
            Self(self.0 | RECLAIMED_BIT)
        } else {
            Self(self.0 & !RECLAIMED_BIT)
        }
    }
}

/********** impl Debug ****************************************************************************/

impl fmt::Debug for ControlBlock {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut dbg = f.debug_struct("ControlBlock");
        dbg.field("marker", &self.is_marked()).field("next", &(self.next() as *const ()));
        #[cfg(target_pointer_width = "64")]
        dbg.field("ref_count", &self.ref_count()).field("reclaimed", &self.is_reclaimed());
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        let cb = ControlBlock::EMPTY;
        assert!(!cb.is_marked());
        assert_eq!(cb.next(), 0);
        assert_eq!(cb.into_raw(), 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn marker_and_next_are_independent() {
        let addr = 0x7f00_dead_bee8;
        let cb = ControlBlock::EMPTY.with_next(addr);
        assert_eq!(cb.next(), addr);
        assert!(!cb.is_marked());

        let marked = cb.with_marker();
        assert!(marked.is_marked());
        assert_eq!(marked.next(), addr);

        let moved = marked.with_next(0x1000);
        assert!(moved.is_marked());
        assert_eq!(moved.next(), 0x1000);
        assert_eq!(moved.with_next(0).next(), 0);
    }

    #[test]
    fn next_is_stored_shifted() {
        let cb = ControlBlock::EMPTY.with_next(0b1010_0000);
        assert_eq!(cb.into_raw() & MARKER_BIT, 0);
        assert_eq!((cb.into_raw() & NEXT_MASK) >> NEXT_SHIFT, 0b101_0000);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn ref_count_does_not_clobber_next() {
        let addr = 0x0000_7fff_ffff_fff8;
        let cb = ControlBlock::EMPTY.with_next(addr).with_marker();
        let counted = cb.with_ref_count(MAX_REF_COUNT);
        assert_eq!(counted.ref_count(), MAX_REF_COUNT);
        assert_eq!(counted.next(), addr);
        assert!(counted.is_marked());
        assert!(!counted.is_reclaimed());

        let claimed = counted.with_ref_count(0).with_reclaimed(true);
        assert_eq!(claimed.ref_count(), 0);
        assert!(claimed.is_reclaimed());
        assert_eq!(claimed.next(), addr);
        assert!(!claimed.with_reclaimed(false).is_reclaimed());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    #[should_panic(expected = "reference count overflow")]
    fn ref_count_overflow() {
        let _ = ControlBlock::EMPTY.with_ref_count(MAX_REF_COUNT + 1);
    }
}
