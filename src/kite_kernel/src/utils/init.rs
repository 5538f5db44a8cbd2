#![allow(clippy::declare_interior_mutable_const)]
use core::{
    cell::Cell,
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize},
};

/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
///
/// Kernel state is placed in `static`s by [`build!`](crate::build), so every
/// piece of it must be constructible in a constant context.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: ?Sized> Init for PhantomData<T> {
    const INIT: Self = PhantomData;
}

impl<T: Init, const LEN: usize> Init for [T; LEN] {
    const INIT: Self = [const { T::INIT }; LEN];
}

impl<T: Init> Init for Cell<T> {
    const INIT: Self = Cell::new(T::INIT);
}

impl<T: Init, I: Init> Init for tokenlock::UnsyncTokenLock<T, I> {
    const INIT: Self = Self::new(I::INIT, T::INIT);
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}

macro_rules! impl_init {
    (
        $(
            $( #[$meta:meta] )*
            $ty:ty => $value:expr,
        )*
    ) => {
        $(
            $( #[$meta] )*
            impl Init for $ty {
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u8 => 0,
    u16 => 0,
    u32 => 0,
    u64 => 0,
    usize => 0,
    () => (),
    AtomicBool => AtomicBool::new(false),
    AtomicU8 => AtomicU8::new(0),
    AtomicU32 => AtomicU32::new(0),
    AtomicUsize => AtomicUsize::new(0),
}

impl<T1: Init, T2: Init> Init for (T1, T2) {
    const INIT: Self = (T1::INIT, T2::INIT);
}
