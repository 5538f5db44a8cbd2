//! Kernel state locking mechanism
//!
//! Every piece of scheduler state lives in a [`CpuLockCell`]. The cells can
//! only be opened with the token held by a [`CpuLockGuard`], and the only way
//! to obtain a guard is to enter CPU Lock (masking kernel-managed interrupts),
//! so the borrow checker proves that scheduler state is never touched with
//! interrupts enabled.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{
    error::BadContextError,
    utils::{intrusive_list::CellLike, Init},
    PortThreading,
};

pub struct CpuLockTag<Traits>(Traits);

/// Proof of being in CPU Lock. Opens every [`CpuLockCell`] of `Traits`.
pub type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// Identifies the cells opened by [`CpuLockToken`].
pub type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// A piece of scheduler state. Read and written through the token held by a
/// [`CpuLockGuard`].
pub struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

impl<Traits: PortThreading, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Ok(lock) = lock_cpu::<Traits>() {
            f.write_str("CpuLockCell(")?;
            self.0.read(&*lock).fmt(f)?;
            f.write_str(")")
        } else {
            f.write_str("CpuLockCell(< locked >)")
        }
    }
}

impl<Traits, T: Init> Init for CpuLockCell<Traits, T> {
    const INIT: Self = Self(Init::INIT);
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, Element: Clone, Traits: PortThreading> CellLike<CpuLockTokenRefMut<'a, Traits>>
    for CpuLockCell<Traits, Element>
{
    type Target = Element;

    fn get(&self, key: &CpuLockTokenRefMut<'a, Traits>) -> Self::Target {
        self.0.read(&**key).clone()
    }
    fn set(&self, key: &mut CpuLockTokenRefMut<'a, Traits>, value: Self::Target) {
        self.0.replace(&mut **key, value);
    }
}

/// Enter CPU Lock and return a guard that leaves it on drop.
///
/// CPU Lock doesn't nest. If it's already active (because the caller holds a
/// guard, or the application masked interrupts), this returns `BadContext`.
pub fn lock_cpu<Traits: PortThreading>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    // Safety: We are the kernel
    if unsafe { Traits::try_enter_cpu_lock() } {
        // Safety: CPU Lock was inactive until now, so no guard exists
        Ok(unsafe { assume_cpu_lock() })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// Create a guard for a CPU Lock state entered by someone else, e.g., the
/// port before calling [`PortToKernel::choose_running_task`].
///
/// # Safety
///
/// CPU Lock must be active, and no other `CpuLockGuard` may exist.
///
/// [`PortToKernel::choose_running_task`]: crate::PortToKernel::choose_running_task
pub unsafe fn assume_cpu_lock<Traits: PortThreading>() -> CpuLockGuard<Traits> {
    debug_assert!(Traits::is_cpu_lock_active());

    CpuLockGuard {
        // Safety: Uniqueness is upheld by the caller
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// Owns the CPU Lock state until dropped.
pub struct CpuLockGuard<Traits: PortThreading> {
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> CpuLockGuard<Traits> {
    /// Lend the token to a callee.
    pub fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: The guard's existence proves that the kernel entered CPU
        // Lock
        unsafe {
            Traits::leave_cpu_lock();
        }
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// A zero-sized mutable borrow of the CPU Lock token. Kernel functions take
/// this instead of `&mut CpuLockGuard`.
///
/// It isn't reborrowed implicitly; pass `lock.borrow_mut()` to keep using
/// `lock` after the call.
pub type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;
