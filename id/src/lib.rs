// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A "typed" 64-bit id crate.
//!
//! The goal of this crate is to create compile-time associations between
//! plain `u64` identifiers and the kernel-space they were allocated from, so
//! that, e.g., a kernel id and a type-registry id can never be silently
//! swapped for one another even though both are "just a number" underneath.
//! This mirrors the UUID-based typed-id pattern used elsewhere in this
//! workspace, but backs the wrapper with a `u64` because kernel ids are
//! allocated from small, per-node contiguous ranges rather than drawn from a
//! global random namespace.

use core::fmt::{Debug, Display, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU64, Ordering};

#[allow(unused_imports)]
#[cfg(any(test, feature = "bolero"))]
pub use contract::*;

/// A typed 64-bit id.
///
/// ```
/// # use factory_id::Id;
/// struct Kernel;
/// struct TypeTag;
///
/// let k: Id<Kernel> = Id::from_raw(42);
/// let t: Id<TypeTag> = Id::from_raw(42);
/// assert_eq!(k.into_raw(), t.into_raw());
/// // but `k` and `t` are not interchangeable at compile time.
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id<T>(u64, PhantomData<fn() -> T>);

// SAFETY: the phantom marker carries no data; `Id<T>` is as `Send`/`Sync` as
// a bare `u64` regardless of what `T` is.
unsafe impl<T> Send for Id<T> {}
unsafe impl<T> Sync for Id<T> {}

impl<T> Display for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<T> Debug for Id<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::from_raw(0)
    }
}

impl<T> Id<T> {
    /// The reserved value meaning "no id" / "root".
    pub const NIL: Self = Self(0, PhantomData);

    /// Wrap a raw `u64` with a compile-time type tag.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw, PhantomData)
    }

    /// Strip the type tag and return the bare `u64`.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// `true` for [`Id::NIL`].
    #[must_use]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl<T> From<Id<T>> for u64 {
    fn from(value: Id<T>) -> Self {
        value.0
    }
}

impl<T> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::from_raw(value)
    }
}

/// A contiguous, half-open `[pos0, pos1)` sub-range of the 64-bit id space,
/// from which a single node allocates ids with a monotonic counter that
/// wraps back to `pos0` on exhaustion.
///
/// Two nodes that were handed disjoint ranges (e.g. derived from disjoint
/// addresses on the same subnet, see `factory_discovery::interface_range`)
/// can never hand out the same id.
#[derive(Debug)]
pub struct IdRange<T> {
    pos0: u64,
    pos1: u64,
    next: AtomicU64,
    _tag: PhantomData<fn() -> T>,
}

/// Errors constructing or exhausting an [`IdRange`].
#[derive(Debug, thiserror::Error, Copy, Clone, PartialEq, Eq)]
pub enum IdRangeError {
    /// `pos0 >= pos1`, so the range contains no usable ids.
    #[error("empty id range [{pos0}, {pos1})")]
    Empty { pos0: u64, pos1: u64 },
    /// The range's lower bound is the reserved nil id (0); shift it by one.
    #[error("id range must not include the reserved nil id 0")]
    IncludesNil,
}

impl<T> IdRange<T> {
    /// Construct a range covering `[pos0, pos1)`. `pos0` must be non-zero
    /// (0 is reserved for [`Id::NIL`]) and `pos0 < pos1`.
    pub fn new(pos0: u64, pos1: u64) -> Result<Self, IdRangeError> {
        if pos0 >= pos1 {
            return Err(IdRangeError::Empty { pos0, pos1 });
        }
        if pos0 == 0 {
            return Err(IdRangeError::IncludesNil);
        }
        Ok(Self {
            pos0,
            pos1,
            next: AtomicU64::new(pos0),
            _tag: PhantomData,
        })
    }

    /// Lower bound (inclusive) of this range.
    #[must_use]
    pub const fn pos0(&self) -> u64 {
        self.pos0
    }

    /// Upper bound (exclusive) of this range.
    #[must_use]
    pub const fn pos1(&self) -> u64 {
        self.pos1
    }

    /// `true` if `id` was (or could have been) allocated from this range.
    #[must_use]
    pub fn contains(&self, id: Id<T>) -> bool {
        let raw = id.into_raw();
        raw >= self.pos0 && raw < self.pos1
    }

    /// Allocate the next id, wrapping back to `pos0` when the range is
    /// exhausted. Lock-free: concurrent callers from any thread observe
    /// distinct values via a single atomic fetch-add, so no two threads on
    /// this node can ever be handed the same id.
    pub fn generate(&self) -> Id<T> {
        let width = self.pos1 - self.pos0;
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        Id::from_raw(self.pos0 + (raw - self.pos0) % width)
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use crate::Id;
    use bolero::{Driver, TypeGenerator};

    impl<T: 'static> TypeGenerator for Id<T> {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(Id::from_raw(driver.produce::<u64>()?))
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{Id, IdRange, IdRangeError};

    fn parse_back_test<T: 'static>() {
        bolero::check!()
            .with_type()
            .for_each(|x: &Id<T>| assert_eq!(*x, Id::from_raw(x.into_raw())));
    }

    #[test]
    fn parse_back_unit() {
        parse_back_test::<()>();
    }

    #[test]
    fn parse_back_u32() {
        parse_back_test::<u32>();
    }

    #[test]
    fn nil_is_zero() {
        assert!(Id::<()>::NIL.is_nil());
        assert_eq!(Id::<()>::NIL.into_raw(), 0);
    }

    #[test]
    fn rejects_empty_range() {
        assert_eq!(
            IdRange::<()>::new(10, 10).unwrap_err(),
            IdRangeError::Empty { pos0: 10, pos1: 10 }
        );
        assert_eq!(
            IdRange::<()>::new(10, 5).unwrap_err(),
            IdRangeError::Empty { pos0: 10, pos1: 5 }
        );
    }

    #[test]
    fn rejects_nil_inclusive_range() {
        assert_eq!(
            IdRange::<()>::new(0, 100).unwrap_err(),
            IdRangeError::IncludesNil
        );
    }

    #[test]
    fn generate_stays_in_range() {
        let range = IdRange::<()>::new(5, 8).unwrap();
        for _ in 0..20 {
            let id = range.generate();
            assert!(range.contains(id));
        }
    }

    #[test]
    fn generate_wraps_around() {
        let range = IdRange::<()>::new(100, 103).unwrap();
        let got: Vec<u64> = (0..7).map(|_| range.generate().into_raw()).collect();
        assert_eq!(got, vec![100, 101, 102, 100, 101, 102, 100]);
    }

    #[test]
    fn generate_is_unique_under_concurrency() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let range = Arc::new(IdRange::<()>::new(1, 1_000_000).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let range = Arc::clone(&range);
            handles.push(thread::spawn(move || {
                (0..1000).map(|_| range.generate().into_raw()).collect::<Vec<_>>()
            }));
        }
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate id {id} generated concurrently");
            }
        }
        assert_eq!(all.len(), 8000);
    }
}
