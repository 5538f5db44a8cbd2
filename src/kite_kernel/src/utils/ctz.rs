//! Count trailing zeros
//!
//! The bitmap scan is on the hot path of every scheduling decision. Targets
//! without a count-trailing-zeros instruction get a narrower routine picked
//! by the bitmap width.
#![allow(clippy::if_same_then_else)]

const USIZE_BITS: u32 = usize::BITS;

#[allow(clippy::needless_bool)]
const HAS_CTZ: bool = if cfg!(target_arch = "riscv32") || cfg!(target_arch = "riscv64") {
    cfg!(target_feature = "zbb")
} else if cfg!(target_arch = "arm") {
    // CLZ + RBIT
    cfg!(target_feature = "v6t2")
} else if cfg!(target_arch = "msp430") || cfg!(target_arch = "avr") {
    false
} else {
    true
};

/// Small in-order cores load from a table faster than they shuffle bits.
#[allow(clippy::needless_bool)]
const HAS_FAST_LOAD: bool =
    if cfg!(target_arch = "arm") || cfg!(target_arch = "msp430") || cfg!(target_arch = "avr") {
        true
    } else {
        false
    };

/// Return the number of trailing zeros in `x` (`< 1 << BITS`). Returns
/// `usize::BITS` if `x` is zero.
#[inline]
pub fn trailing_zeros<const BITS: usize>(x: usize) -> u32 {
    if BITS == 0 || x == 0 {
        USIZE_BITS
    } else if BITS == 1 || HAS_CTZ {
        x.trailing_zeros()
    } else if BITS <= 4 && HAS_FAST_LOAD {
        ctz_array_lut::<16>(x)
    } else if BITS <= 8 {
        ctz8_debruijn(x)
    } else if BITS <= 16 {
        let low = x & 0xff;
        if low != 0 {
            ctz8_debruijn(low)
        } else {
            8 + ctz8_debruijn(x >> 8)
        }
    } else {
        ctz_linear::<BITS>(x)
    }
}

/// Implements [`trailing_zeros`] using a [de Bruijn sequence].
/// `x` must be in range `1..0x100`.
///
/// [de Bruijn sequence]: https://en.wikipedia.org/wiki/De_Bruijn_sequence
#[inline]
fn ctz8_debruijn(x: usize) -> u32 {
    debug_assert!(x != 0 && x < 0x100);
    let pat = (((x & x.wrapping_neg()) * 0b11101) >> 3) & 0b11100;
    (0b0011_0100_0101_0111_0010_0110_0001_0000 >> pat) & 0b111
}

/// Implements [`trailing_zeros`] using an array-based look-up table.
#[inline]
fn ctz_array_lut<const LEN: usize>(x: usize) -> u32 {
    struct Lut<const LEN: usize>;
    impl<const LEN: usize> Lut<LEN> {
        const LUT: &'static [u8] = &{
            let mut array = [0u8; LEN];
            // `for` is unusable in `const fn`
            let mut i = 1;
            while i < array.len() {
                array[i] = i.trailing_zeros() as u8;
                i += 1;
            }
            array
        };
    }

    let lut = Lut::<LEN>::LUT;
    lut[x & (lut.len() - 1)] as u32
}

/// Implements [`trailing_zeros`] using linear search.
#[inline]
fn ctz_linear<const BITS: usize>(mut x: usize) -> u32 {
    for i in 0..BITS as u32 {
        if x & 1 != 0 {
            return i;
        }
        x >>= 1;
    }
    USIZE_BITS
}
