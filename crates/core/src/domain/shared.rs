//! Shared fields for cross-thread parameter exchange
//!
//! A shared field is the only place where the control thread and the mixer
//! thread meet. Each field has exactly one writer and one reader, and both
//! only touch it from their update callback:
//!
//! ```text
//! control fields ──update_control_side──▶ Shared ──update_audio_side──▶ audio fields
//! control fields ◀──update_control_side── Shared ◀──update_audio_side── audio fields
//! ```
//!
//! Values are single machine words, so a reader sees either the previous or
//! the latest value, never a torn one. Fields are ordered independently; values
//! that must move together are packed into one word (see [`pack_f32_pair`]).

use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// A scalar whose whole value fits in one atomic word.
pub trait SharedScalar: Copy + Send + Sync + 'static {
    /// Atomic storage backing the scalar
    type Atomic: Send + Sync;

    fn new_atomic(value: Self) -> Self::Atomic;
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self;
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering);
}

macro_rules! shared_integer {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl SharedScalar for $ty {
                type Atomic = $atomic;

                #[inline]
                fn new_atomic(value: Self) -> Self::Atomic {
                    <$atomic>::new(value)
                }

                #[inline]
                fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
                    atomic.load(order)
                }

                #[inline]
                fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
                    atomic.store(value, order)
                }
            }
        )*
    };
}

shared_integer! {
    u32 => AtomicU32,
    i32 => AtomicI32,
    u64 => AtomicU64,
    i64 => AtomicI64,
    usize => AtomicUsize,
    bool => AtomicBool,
}

impl SharedScalar for f32 {
    type Atomic = AtomicU32;

    #[inline]
    fn new_atomic(value: Self) -> Self::Atomic {
        AtomicU32::new(value.to_bits())
    }

    #[inline]
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
        f32::from_bits(atomic.load(order))
    }

    #[inline]
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
        atomic.store(value.to_bits(), order)
    }
}

impl SharedScalar for f64 {
    type Atomic = AtomicU64;

    #[inline]
    fn new_atomic(value: Self) -> Self::Atomic {
        AtomicU64::new(value.to_bits())
    }

    #[inline]
    fn load(atomic: &Self::Atomic, order: Ordering) -> Self {
        f64::from_bits(atomic.load(order))
    }

    #[inline]
    fn store(atomic: &Self::Atomic, value: Self, order: Ordering) {
        atomic.store(value.to_bits(), order)
    }
}

/// One shared field between the control and mixer threads
///
/// Cache-padded so that fields written by different threads never share a
/// cache line.
pub struct Shared<T: SharedScalar> {
    cell: CachePadded<T::Atomic>,
}

impl<T: SharedScalar> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: CachePadded::new(T::new_atomic(value)),
        }
    }

    /// Publish a value. Call only from the field's writer-side update callback.
    #[inline]
    pub fn store(&self, value: T) {
        T::store(&self.cell, value, Ordering::Release);
    }

    /// Read the latest published value. Call only from the reader-side update callback.
    #[inline]
    pub fn load(&self) -> T {
        T::load(&self.cell, Ordering::Acquire)
    }
}

impl<T: SharedScalar + Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: SharedScalar + fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&self.load()).finish()
    }
}

/// Pack two `f32` values into one word so they cross threads together.
#[inline]
pub fn pack_f32_pair(first: f32, second: f32) -> u64 {
    ((first.to_bits() as u64) << 32) | second.to_bits() as u64
}

/// Inverse of [`pack_f32_pair`].
#[inline]
pub fn unpack_f32_pair(packed: u64) -> (f32, f32) {
    (
        f32::from_bits((packed >> 32) as u32),
        f32::from_bits(packed as u32),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_shared_f32_store_load() {
        let field = Shared::new(1.0_f32);
        assert_eq!(field.load(), 1.0);

        field.store(0.25);
        assert_eq!(field.load(), 0.25);
    }

    #[test]
    fn test_shared_preserves_special_floats() {
        let field = Shared::new(0.0_f32);
        field.store(-0.0);
        assert!(field.load().is_sign_negative());

        field.store(f32::INFINITY);
        assert_eq!(field.load(), f32::INFINITY);
    }

    #[test]
    fn test_shared_bool_and_integers() {
        let flag = Shared::<bool>::default();
        assert!(!flag.load());
        flag.store(true);
        assert!(flag.load());

        let frames = Shared::new(0_u64);
        frames.store(u64::MAX);
        assert_eq!(frames.load(), u64::MAX);

        let offset = Shared::new(0_i32);
        offset.store(-42);
        assert_eq!(offset.load(), -42);
    }

    #[test]
    fn test_shared_is_padded() {
        assert!(std::mem::size_of::<Shared<f32>>() >= 32);
    }

    #[test]
    fn test_packed_pair_moves_together() {
        let field = Arc::new(Shared::new(pack_f32_pair(0.0, 0.0)));
        let writer = Arc::clone(&field);

        let handle = thread::spawn(move || {
            for i in 0..10_000 {
                let v = i as f32;
                writer.store(pack_f32_pair(v, -v));
            }
        });

        for _ in 0..10_000 {
            let (a, b) = unpack_f32_pair(field.load());
            assert_eq!(a, -b);
        }

        handle.join().unwrap();
        assert_eq!(unpack_f32_pair(field.load()), (9999.0, -9999.0));
    }

    #[test]
    fn test_reader_sees_monotonic_values_from_single_writer() {
        let field = Arc::new(Shared::new(0_u64));
        let writer = Arc::clone(&field);

        let handle = thread::spawn(move || {
            for i in 1..=50_000_u64 {
                writer.store(i);
            }
        });

        let mut last = 0;
        while last < 50_000 {
            let seen = field.load();
            assert!(seen >= last, "went back from {last} to {seen}");
            last = seen;
        }

        handle.join().unwrap();
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_is_lossless(a in any::<f32>(), b in any::<f32>()) {
            let (x, y) = unpack_f32_pair(pack_f32_pair(a, b));
            prop_assert_eq!(x.to_bits(), a.to_bits());
            prop_assert_eq!(y.to_bits(), b.to_bits());
        }
    }
}
