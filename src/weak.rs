use std::{cmp, fmt, hash::Hash, hash::Hasher, ptr::NonNull};

use crate::{
    count::{StrongCount, WeakCount},
    shared::Shared,
};

/// An observing handle to an allocation managed by [`Shared`] handles.
///
/// A `Weak<T>` tracks the payload's liveness without extending it: the
/// payload is disposed as soon as the last `Shared` drops, however many weak
/// handles remain. What a weak handle does keep alive is the control block,
/// so [`expired`][Weak::expired] and [`upgrade`][Weak::upgrade] stay safe to
/// call forever.
///
/// A weak handle cannot provide a reference to the payload, because another
/// thread may dispose it at any time. Access goes through
/// [`upgrade`][Weak::upgrade] first.
pub struct Weak<T>
where
    T: ?Sized + 'static,
{
    ptr: NonNull<T>,
    count: WeakCount,
}

unsafe impl<T> Send for Weak<T> where T: ?Sized + Send + Sync + 'static {}

unsafe impl<T> Sync for Weak<T> where T: ?Sized + Send + Sync + 'static {}

impl<T> Weak<T>
where
    T: 'static,
{
    /// Creates a weak handle to nothing. It is expired from the start and
    /// [`upgrade`][Weak::upgrade] on it always fails.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Weak;
    /// let w = Weak::<i32>::new();
    ///
    /// assert!(w.expired());
    /// assert!(w.upgrade().is_none());
    /// ```
    pub fn new() -> Self {
        Weak {
            ptr: NonNull::dangling(),
            count: WeakCount::new(),
        }
    }
}

impl<T> Weak<T>
where
    T: ?Sized + 'static,
{
    pub(crate) fn from_parts(ptr: NonNull<T>, count: WeakCount) -> Self {
        Weak { ptr, count }
    }

    /// Attempts to promote into a strong handle. Returns `None` once the
    /// payload has been disposed. Racing against the final drop of the last
    /// `Shared` on another thread yields either a fully valid handle or
    /// `None`, never a handle to a disposed payload.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let s = Shared::new(5);
    /// let w = Shared::downgrade(&s);
    ///
    /// assert_eq!(*w.upgrade().unwrap(), 5);
    ///
    /// drop(s);
    /// assert!(w.upgrade().is_none());
    /// ```
    pub fn upgrade(&self) -> Option<Shared<T>> {
        let count = StrongCount::from_weak(&self.count);

        if count.is_empty() {
            None
        } else {
            Some(Shared::from_parts(self.ptr, count))
        }
    }

    /// Gets the number of strong handles to the allocation. See
    /// [`Shared::strong_count`]; this version returns 0 once the payload is
    /// gone.
    pub fn strong_count(&self) -> usize {
        self.count.use_count()
    }

    /// Whether the payload has been disposed. Once true it stays true.
    ///
    /// This is a non-mutating fast check and may race with a disposal in
    /// progress on another thread; for an answer that stays coherent while
    /// you use the payload, [`upgrade`][Weak::upgrade] instead.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let s = Shared::new(5);
    /// let w = Shared::downgrade(&s);
    ///
    /// assert!(!w.expired());
    /// drop(s);
    /// assert!(w.expired());
    /// ```
    pub fn expired(&self) -> bool {
        self.strong_count() == 0
    }

    fn owner_addr(&self) -> usize {
        self.count.owner_addr()
    }
}

impl<T> Default for Weak<T>
where
    T: 'static,
{
    fn default() -> Self {
        Weak::new()
    }
}

impl<T> Clone for Weak<T>
where
    T: ?Sized + 'static,
{
    fn clone(&self) -> Self {
        Weak {
            ptr: self.ptr,
            count: self.count.clone(),
        }
    }
}

impl<T> fmt::Debug for Weak<T>
where
    T: ?Sized + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("Weak");
        if let Some(strong) = self.upgrade() {
            f.field(&strong);
        }
        f.finish()
    }
}

impl<T> PartialEq for Weak<T>
where
    T: ?Sized + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.owner_addr() == other.owner_addr()
    }
}

impl<T> Eq for Weak<T> where T: ?Sized + 'static {}

impl<T> PartialOrd for Weak<T>
where
    T: ?Sized + 'static,
{
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Weak<T>
where
    T: ?Sized + 'static,
{
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Ord::cmp(&self.owner_addr(), &other.owner_addr())
    }
}

impl<T> Hash for Weak<T>
where
    T: ?Sized + 'static,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner_addr().hash(state)
    }
}
