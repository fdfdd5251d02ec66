use std::{
    any::Any, borrow::Borrow, fmt, hash::Hash, hash::Hasher, ops::Deref, ptr::NonNull,
};

use crate::{
    count::{StrongCount, WeakCount},
    weak::Weak,
};

/// A reference counted owning handle, similar to [`Arc`].
///
/// A `Shared<T>` keeps its payload alive: the payload is guaranteed valid
/// for as long as any `Shared` to it exists, and its destructor runs on the
/// thread that drops the last one, immediately. The control block behind the
/// handle may outlive the payload while [`Weak`] observers remain; its
/// memory is returned only when the last of those is gone.
///
/// A `Shared<T>` is never empty. Operations that can come back without a
/// handle ([`Weak::upgrade`], [`downcast`][Shared::downcast]) express that
/// through `Option` and `Result` instead, so dereferencing never needs a
/// runtime check.
///
/// Cycles of `Shared` handles are not detected and leak permanently; break
/// them with [`Weak`].
///
/// [`Arc`]: std::sync::Arc
pub struct Shared<T>
where
    T: ?Sized + 'static,
{
    ptr: NonNull<T>,
    count: StrongCount,
}

unsafe impl<T> Send for Shared<T> where T: ?Sized + Send + Sync + 'static {}

unsafe impl<T> Sync for Shared<T> where T: ?Sized + Send + Sync + 'static {}

impl<T> Shared<T>
where
    T: 'static,
{
    /// Creates a new allocation holding `value`. Payload and control block
    /// share a single heap allocation, and a single deallocation returns
    /// both once the last handle (strong or weak) is gone.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let s = Shared::new(5);
    /// assert_eq!(*s, 5);
    /// ```
    pub fn new(value: T) -> Self {
        let count = StrongCount::new_inline(value);
        let ptr = unsafe { count.inline_ptr::<T>() };

        Shared { ptr, count }
    }
}

impl<T> Shared<T>
where
    T: ?Sized + 'static,
{
    /// Takes ownership of an already boxed payload. The payload keeps its
    /// own allocation and the control block is allocated separately; use
    /// [`Shared::new`] for the single-allocation path.
    ///
    /// This is also the entry point for unsized payloads:
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let s: Shared<[i32]> = Shared::from_box(vec![1, 2, 3].into_boxed_slice());
    /// assert_eq!(s.len(), 3);
    /// ```
    pub fn from_box(value: Box<T>) -> Self {
        let payload = Box::into_raw(value);

        unsafe {
            Shared {
                // `Box` never hands out null.
                ptr: NonNull::new_unchecked(payload),
                count: StrongCount::from_ptr(payload),
            }
        }
    }

    /// Takes ownership of an externally managed payload together with a
    /// cleanup action. When the last strong handle drops, `cleanup` is
    /// invoked with the payload pointer, exactly once, on whichever thread
    /// drops last.
    ///
    /// # Safety
    ///
    /// `payload` must stay valid until `cleanup` runs, and `cleanup` must
    /// fully end its lifetime. No other owner may free it.
    pub unsafe fn from_raw_with<F>(payload: NonNull<T>, cleanup: F) -> Self
    where
        F: FnOnce(NonNull<T>) + Send + 'static,
    {
        Shared {
            ptr: payload,
            count: StrongCount::from_ptr_with(payload.as_ptr(), cleanup),
        }
    }

    pub(crate) fn from_parts(ptr: NonNull<T>, count: StrongCount) -> Self {
        debug_assert!(!count.is_empty());

        Shared { ptr, count }
    }

    /// Gets a raw pointer to the payload.
    pub fn as_ptr(this: &Self) -> *const T {
        this.ptr.as_ptr()
    }

    /// Gets the number of strong handles to this allocation.
    ///
    /// Always positive, because the count includes `this`. The same method
    /// on [`Weak::strong_count`] can return 0.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let a = Shared::new(5);
    /// assert_eq!(Shared::strong_count(&a), 1);
    ///
    /// let b = a.clone();
    /// assert_eq!(Shared::strong_count(&a), 2);
    ///
    /// drop(b);
    /// assert_eq!(Shared::strong_count(&a), 1);
    /// ```
    pub fn strong_count(this: &Self) -> usize {
        this.count.use_count()
    }

    /// Whether two handles observe the same payload address.
    ///
    /// Aliased handles into different parts of one allocation compare
    /// unequal here; use [`same_allocation`][Shared::same_allocation] for
    /// owner identity.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr.cast::<u8>() == other.ptr.cast::<u8>()
    }

    /// Whether two handles share one control block, regardless of the
    /// address each one observes.
    pub fn same_allocation<U: ?Sized + 'static>(this: &Self, other: &Shared<U>) -> bool {
        this.count.same_block(&other.count)
    }

    /// Creates a new weak handle to the allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let s = Shared::new(5);
    /// let w = Shared::downgrade(&s);
    ///
    /// assert!(!w.expired());
    /// assert_eq!(Shared::strong_count(&s), 1);
    /// ```
    pub fn downgrade(this: &Self) -> Weak<T> {
        Weak::from_parts(this.ptr, WeakCount::from_strong(&this.count))
    }

    /// Creates a handle to a part of the payload which shares `this`'s
    /// control block: the projected handle keeps the whole allocation alive
    /// and counts against the same strong count as a plain clone.
    ///
    /// This is also how a handle is upcast to a trait object.
    ///
    /// # Examples
    ///
    /// ```
    /// # use keepsake::Shared;
    /// let pair = Shared::new((5, String::from("five")));
    /// let name = Shared::map(&pair, |p| &p.1);
    ///
    /// drop(pair);
    /// assert_eq!(*name, "five");
    /// ```
    pub fn map<U, F>(this: &Self, f: F) -> Shared<U>
    where
        U: ?Sized + 'static,
        F: FnOnce(&T) -> &U,
    {
        Shared {
            ptr: NonNull::from(f(&**this)),
            count: this.count.clone(),
        }
    }

    /// Creates a handle observing `ptr` while sharing `this`'s control
    /// block.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as the shared allocation is alive.
    pub unsafe fn alias<U>(this: &Self, ptr: NonNull<U>) -> Shared<U>
    where
        U: ?Sized + 'static,
    {
        Shared {
            ptr,
            count: this.count.clone(),
        }
    }
}

impl Shared<dyn Any + Send + Sync> {
    /// Checked downcast to a concrete payload type. Failure returns the
    /// original handle untouched; it is an expected outcome, not an error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::any::Any;
    /// # use keepsake::Shared;
    /// let s: Shared<dyn Any + Send + Sync> = Shared::from_box(Box::new(5_i32));
    ///
    /// let n = s.downcast::<i32>().unwrap();
    /// assert_eq!(*n, 5);
    /// ```
    pub fn downcast<T: Any>(self) -> Result<Shared<T>, Self> {
        if (*self).is::<T>() {
            let Shared { ptr, count } = self;

            Ok(Shared {
                ptr: ptr.cast::<T>(),
                count,
            })
        } else {
            Err(self)
        }
    }
}

impl Shared<dyn Any> {
    /// See [`Shared::<dyn Any + Send + Sync>::downcast`].
    pub fn downcast<T: Any>(self) -> Result<Shared<T>, Self> {
        if (*self).is::<T>() {
            let Shared { ptr, count } = self;

            Ok(Shared {
                ptr: ptr.cast::<T>(),
                count,
            })
        } else {
            Err(self)
        }
    }
}

impl<T> Clone for Shared<T>
where
    T: ?Sized + 'static,
{
    /// Creates another handle to the same allocation, incrementing the
    /// strong count.
    fn clone(&self) -> Self {
        Shared {
            ptr: self.ptr,
            count: self.count.clone(),
        }
    }
}

impl<T> Deref for Shared<T>
where
    T: ?Sized + 'static,
{
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> AsRef<T> for Shared<T>
where
    T: ?Sized + 'static,
{
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> Borrow<T> for Shared<T>
where
    T: ?Sized + 'static,
{
    fn borrow(&self) -> &T {
        self
    }
}

impl<T> fmt::Debug for Shared<T>
where
    T: ?Sized + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> fmt::Display for Shared<T>
where
    T: ?Sized + fmt::Display + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}

impl<T> PartialEq for Shared<T>
where
    T: ?Sized + PartialEq + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T> Eq for Shared<T> where T: ?Sized + Eq + 'static {}

impl<T> Hash for Shared<T>
where
    T: ?Sized + Hash + 'static,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state)
    }
}
