use std::{
    cell::UnsafeCell, mem::ManuallyDrop, mem::MaybeUninit, ptr, ptr::NonNull,
    sync::atomic::AtomicUsize, sync::atomic::Ordering::AcqRel, sync::atomic::Ordering::Acquire,
    sync::atomic::Ordering::Relaxed,
};

/// Unconditional `+1`. Relaxed suffices: adding an owner publishes nothing
/// about the payload to other threads.
pub(crate) fn increment(counter: &AtomicUsize) {
    let old = counter.fetch_add(1, Relaxed);
    debug_assert!(old > 0);
}

/// Unconditional `-1`, returning the value before the decrement. The caller
/// detects the last-owner transition with `previous == 1`. Acquire-release so
/// the thread that ends up disposing sees every prior owner's writes.
pub(crate) fn decrement(counter: &AtomicUsize) -> usize {
    let old = counter.fetch_sub(1, AcqRel);
    debug_assert!(old > 0);
    old
}

/// `+1` only if the counter is nonzero, returning the pre-increment value
/// (`0` means the increment did not happen). Acquire on the successful
/// exchange so a promoted owner observes the payload in full.
pub(crate) fn conditional_increment(counter: &AtomicUsize) -> usize {
    let mut n = counter.load(Relaxed);
    loop {
        if n == 0 {
            return 0;
        }

        match counter.compare_exchange_weak(n, n + 1, Acquire, Relaxed) {
            Ok(prev) => return prev,
            Err(seen) => n = seen,
        }
    }
}

/// The two counts every control block carries. `weak` starts at 1: that
/// baseline stands for "at least one strong holder exists" and is released
/// only when the strong count hits zero.
pub(crate) struct Counts {
    strong: AtomicUsize,
    weak: AtomicUsize,
}

impl Counts {
    fn new() -> Self {
        Counts {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
        }
    }
}

/// A heap-allocated record tracking one shared payload. Implementations only
/// supply storage and [`dispose`][ControlBlock::dispose]; every count
/// transition goes through the free functions below, and deallocation of the
/// block itself is `Box::from_raw` on the erased pointer (the vtable recovers
/// the concrete layout).
pub(crate) trait ControlBlock {
    fn counts(&self) -> &Counts;

    /// Ends the payload's lifetime. Called exactly once, on the thread that
    /// moves the strong count from 1 to 0. The block itself stays allocated.
    unsafe fn dispose(&self);
}

pub(crate) type BlockPtr = NonNull<dyn ControlBlock>;

pub(crate) fn allocate<B: ControlBlock + 'static>(block: B) -> BlockPtr {
    let raw: *mut dyn ControlBlock = Box::into_raw(Box::new(block));

    // `Box` never hands out null.
    unsafe { NonNull::new_unchecked(raw) }
}

/// # Safety
///
/// `block` must be live and the caller must already own one strong count.
pub(crate) unsafe fn add_ref_copy(block: BlockPtr) {
    increment(&block.as_ref().counts().strong);
}

/// Attempts to gain a strong count for a weak-to-strong promotion. Fails
/// (returns `false`, no mutation) once the strong count has reached zero; a
/// disposed payload is never resurrected.
///
/// # Safety
///
/// `block` must be live: the caller must own a weak count on it.
pub(crate) unsafe fn add_ref_lock(block: BlockPtr) -> bool {
    conditional_increment(&block.as_ref().counts().strong) != 0
}

/// Gives up one strong count. The thread that moves the count to zero
/// disposes the payload and then releases the baseline weak count, which may
/// in turn free the block.
///
/// # Safety
///
/// Consumes one strong count the caller owns; `block` must not be used by
/// this owner afterwards.
pub(crate) unsafe fn release(block: BlockPtr) {
    if decrement(&block.as_ref().counts().strong) == 1 {
        block.as_ref().dispose();
        weak_release(block);
    }
}

/// # Safety
///
/// `block` must be live and the caller must already own a count on it.
pub(crate) unsafe fn weak_add_ref(block: BlockPtr) {
    increment(&block.as_ref().counts().weak);
}

/// Gives up one weak count. The thread that moves the count to zero frees
/// the block.
///
/// # Safety
///
/// Consumes one weak count the caller owns; `block` must not be used by this
/// owner afterwards.
pub(crate) unsafe fn weak_release(block: BlockPtr) {
    if decrement(&block.as_ref().counts().weak) == 1 {
        drop(Box::from_raw(block.as_ptr()));
    }
}

/// # Safety
///
/// `block` must be live.
pub(crate) unsafe fn use_count(block: BlockPtr) -> usize {
    block.as_ref().counts().strong.load(Acquire)
}

/// Block for a payload that lives in its own heap allocation, with default
/// cleanup: disposing reconstructs and drops the `Box`.
pub(crate) struct BoxBlock<T: ?Sized + 'static> {
    counts: Counts,
    payload: *mut T,
}

impl<T: ?Sized + 'static> BoxBlock<T> {
    /// `payload` must come from `Box::into_raw`; the block takes ownership.
    pub(crate) fn new(payload: *mut T) -> Self {
        BoxBlock {
            counts: Counts::new(),
            payload,
        }
    }
}

impl<T: ?Sized + 'static> ControlBlock for BoxBlock<T> {
    fn counts(&self) -> &Counts {
        &self.counts
    }

    unsafe fn dispose(&self) {
        drop(Box::from_raw(self.payload));
    }
}

/// Block for an externally managed payload paired with a cleanup action.
/// Disposing takes the action out of its slot and invokes it with the
/// payload pointer, exactly once; the action is never dropped unused except
/// on the null-input path, where no block exists at all.
pub(crate) struct CleanupBlock<T, F>
where
    T: ?Sized + 'static,
    F: FnOnce(NonNull<T>) + Send + 'static,
{
    counts: Counts,
    payload: NonNull<T>,
    cleanup: UnsafeCell<ManuallyDrop<F>>,
}

impl<T, F> CleanupBlock<T, F>
where
    T: ?Sized + 'static,
    F: FnOnce(NonNull<T>) + Send + 'static,
{
    pub(crate) fn new(payload: NonNull<T>, cleanup: F) -> Self {
        CleanupBlock {
            counts: Counts::new(),
            payload,
            cleanup: UnsafeCell::new(ManuallyDrop::new(cleanup)),
        }
    }
}

impl<T, F> ControlBlock for CleanupBlock<T, F>
where
    T: ?Sized + 'static,
    F: FnOnce(NonNull<T>) + Send + 'static,
{
    fn counts(&self) -> &Counts {
        &self.counts
    }

    unsafe fn dispose(&self) {
        // dispose runs exactly once, so the slot still holds the action.
        let cleanup = ManuallyDrop::take(&mut *self.cleanup.get());
        cleanup(self.payload);
    }
}

/// Block with the payload embedded in its own storage: one allocation covers
/// payload and counts, and one deallocation (the block's) returns both.
/// Disposing drops the payload in place; the storage outlives it for as long
/// as weak counts keep the block alive.
pub(crate) struct InlineBlock<T: 'static> {
    counts: Counts,
    storage: UnsafeCell<MaybeUninit<T>>,
}

impl<T: 'static> InlineBlock<T> {
    pub(crate) fn new(value: T) -> Self {
        InlineBlock {
            counts: Counts::new(),
            storage: UnsafeCell::new(MaybeUninit::new(value)),
        }
    }

    /// Address of the embedded storage.
    pub(crate) fn storage_ptr(this: NonNull<Self>) -> NonNull<T> {
        unsafe {
            let slot = UnsafeCell::raw_get(ptr::addr_of!((*this.as_ptr()).storage));
            NonNull::new_unchecked(slot.cast::<T>())
        }
    }
}

impl<T: 'static> ControlBlock for InlineBlock<T> {
    fn counts(&self) -> &Counts {
        &self.counts
    }

    unsafe fn dispose(&self) {
        ptr::drop_in_place((*self.storage.get()).as_mut_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_increment_fails_at_zero() {
        let counter = AtomicUsize::new(0);
        assert_eq!(conditional_increment(&counter), 0);
        assert_eq!(counter.load(Relaxed), 0);
    }

    #[test]
    fn conditional_increment_returns_previous() {
        let counter = AtomicUsize::new(2);
        assert_eq!(conditional_increment(&counter), 2);
        assert_eq!(counter.load(Relaxed), 3);
    }

    #[test]
    fn decrement_returns_previous() {
        let counter = AtomicUsize::new(2);
        assert_eq!(decrement(&counter), 2);
        assert_eq!(decrement(&counter), 1);
        assert_eq!(counter.load(Relaxed), 0);
    }

    #[test]
    fn counts_start_at_one() {
        let counts = Counts::new();
        assert_eq!(counts.strong.load(Relaxed), 1);
        assert_eq!(counts.weak.load(Relaxed), 1);
    }
}
