//! Provides `PrioBitmap`, the ready bitmap word with a logarithmic-time bit
//! scan.
use core::fmt;

use super::{ctz::trailing_zeros, BinInteger, Init};

/// A single-word bit array with a fast "find the first set bit" operation.
///
/// Bit `i` represents priority level `i`. The lowest set bit is the highest
/// priority level that has a runnable task.
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Init + Send + Sync + Clone + Copy + fmt::Debug + 'static {
    /// The number of bits this bitmap can store.
    const CAPACITY: usize;

    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the first set bit.
    fn find_set(&self) -> Option<usize>;

    /// Return `true` if no bits are set.
    #[inline]
    fn is_empty(&self) -> bool {
        self.find_set().is_none()
    }
}

macro_rules! impl_prio_bitmap {
    ($($ty:ty),*) => {$(
        impl PrioBitmap for $ty {
            const CAPACITY: usize = <$ty as BinInteger>::BITS as usize;

            #[inline]
            fn get(&self, i: usize) -> bool {
                assert!(i < Self::CAPACITY);
                self.get_bit(i as u32)
            }

            #[inline]
            fn clear(&mut self, i: usize) {
                assert!(i < Self::CAPACITY);
                self.clear_bit(i as u32);
            }

            #[inline]
            fn set(&mut self, i: usize) {
                assert!(i < Self::CAPACITY);
                self.set_bit(i as u32);
            }

            #[inline]
            fn find_set(&self) -> Option<usize> {
                // `usize` can hold every supported word on 64-bit targets.
                // Elsewhere `u64` takes the generic path.
                let i = if Self::CAPACITY <= usize::BITS as usize {
                    trailing_zeros::<{ <$ty as BinInteger>::BITS as usize }>(*self as usize)
                } else {
                    (*self).trailing_zeros()
                };
                if i >= Self::CAPACITY as u32 {
                    None
                } else {
                    Some(i as usize)
                }
            }
        }
    )*};
}

impl_prio_bitmap!(u8, u16, u32, u64, usize);
