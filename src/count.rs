use std::ptr::NonNull;

use crate::block::{self, BlockPtr, BoxBlock, CleanupBlock, InlineBlock};

/// Owns one strong count on a control block, or nothing.
///
/// Every legal strong-count transition is encapsulated here: the front-end
/// handles never touch a block directly. A `StrongCount` participates in the
/// block's weak count only through the baseline held by the strong side as a
/// whole; it never increments `weak` itself.
pub(crate) struct StrongCount {
    block: Option<BlockPtr>,
}

impl StrongCount {
    pub(crate) const fn new() -> Self {
        StrongCount { block: None }
    }

    /// Wraps an externally allocated payload in a fresh block with default
    /// cleanup. A null `payload` yields an empty count and allocates nothing.
    ///
    /// # Safety
    ///
    /// A non-null `payload` must come from `Box::into_raw` and ownership of
    /// it transfers here.
    pub(crate) unsafe fn from_ptr<T: ?Sized + 'static>(payload: *mut T) -> Self {
        if payload.is_null() {
            return StrongCount::new();
        }

        StrongCount {
            block: Some(block::allocate(BoxBlock::new(payload))),
        }
    }

    /// Wraps an externally managed payload together with a cleanup action to
    /// be invoked on it when the last strong count drops. A null `payload`
    /// yields an empty count; the action is dropped without ever running.
    ///
    /// # Safety
    ///
    /// A non-null `payload` must stay valid until the cleanup action runs,
    /// and the action must fully end its lifetime.
    pub(crate) unsafe fn from_ptr_with<T, F>(payload: *mut T, cleanup: F) -> Self
    where
        T: ?Sized + 'static,
        F: FnOnce(NonNull<T>) + Send + 'static,
    {
        match NonNull::new(payload) {
            Some(payload) => StrongCount {
                block: Some(block::allocate(CleanupBlock::new(payload, cleanup))),
            },
            None => StrongCount::new(),
        }
    }

    /// Constructs the payload inside the block itself: one allocation holds
    /// both. The payload's address is recovered with [`inline_ptr`].
    ///
    /// [`inline_ptr`]: StrongCount::inline_ptr
    pub(crate) fn new_inline<T: 'static>(value: T) -> Self {
        StrongCount {
            block: Some(block::allocate(InlineBlock::new(value))),
        }
    }

    /// Address of the storage embedded in an inline block.
    ///
    /// # Safety
    ///
    /// The caller must know, by its own bookkeeping, that this count was
    /// produced by [`new_inline::<T>`][StrongCount::new_inline].
    pub(crate) unsafe fn inline_ptr<T: 'static>(&self) -> NonNull<T> {
        debug_assert!(self.block.is_some());
        InlineBlock::storage_ptr(self.block.unwrap_unchecked().cast::<InlineBlock<T>>())
    }

    /// Promotion attempt: shares `other`'s block if its payload is still
    /// alive, otherwise comes back empty. Never resurrects a disposed
    /// payload; the strong counter itself arbitrates the race against a
    /// concurrent final release.
    pub(crate) fn from_weak(other: &WeakCount) -> Self {
        match other.block {
            Some(block) if unsafe { block::add_ref_lock(block) } => {
                StrongCount { block: Some(block) }
            }
            _ => StrongCount::new(),
        }
    }

    pub(crate) fn use_count(&self) -> usize {
        match self.block {
            Some(block) => unsafe { block::use_count(block) },
            None => 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    pub(crate) fn same_block(&self, other: &StrongCount) -> bool {
        self.owner_addr() == other.owner_addr()
    }

    /// Block address, usable as an owner identity and ordering key. Empty
    /// counts report 0.
    pub(crate) fn owner_addr(&self) -> usize {
        match self.block {
            Some(block) => block.cast::<u8>().as_ptr() as usize,
            None => 0,
        }
    }
}

impl Clone for StrongCount {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block::add_ref_copy(block) };
        }

        StrongCount { block: self.block }
    }
}

impl Drop for StrongCount {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block::release(block) };
        }
    }
}

/// Owns one weak count on a control block, or nothing.
///
/// The mirror image of [`StrongCount`] over the weak counter. Promotion does
/// not live here; a `WeakCount` is only ever read from by
/// [`StrongCount::from_weak`].
pub(crate) struct WeakCount {
    block: Option<BlockPtr>,
}

impl WeakCount {
    pub(crate) const fn new() -> Self {
        WeakCount { block: None }
    }

    pub(crate) fn from_strong(other: &StrongCount) -> Self {
        if let Some(block) = other.block {
            unsafe { block::weak_add_ref(block) };
        }

        WeakCount { block: other.block }
    }

    /// Strong count of the shared block; 0 once the payload is disposed (or
    /// for an empty count).
    pub(crate) fn use_count(&self) -> usize {
        match self.block {
            Some(block) => unsafe { block::use_count(block) },
            None => 0,
        }
    }

    pub(crate) fn owner_addr(&self) -> usize {
        match self.block {
            Some(block) => block.cast::<u8>().as_ptr() as usize,
            None => 0,
        }
    }
}

impl Clone for WeakCount {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block::weak_add_ref(block) };
        }

        WeakCount { block: self.block }
    }
}

impl Drop for WeakCount {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block::weak_release(block) };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        ptr,
        sync::atomic::{AtomicUsize, Ordering::SeqCst},
        sync::Arc,
    };

    use super::*;

    #[test]
    fn null_pointer_is_empty() {
        let count = unsafe { StrongCount::from_ptr::<i32>(ptr::null_mut()) };

        assert!(count.is_empty());
        assert_eq!(count.use_count(), 0);
    }

    #[test]
    fn null_pointer_discards_cleanup_uninvoked() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(());

        let count = {
            let invoked = Arc::clone(&invoked);
            let held = Arc::clone(&held);
            unsafe {
                StrongCount::from_ptr_with::<i32, _>(ptr::null_mut(), move |_| {
                    let _held = &held;
                    invoked.fetch_add(1, SeqCst);
                })
            }
        };

        assert!(count.is_empty());
        assert_eq!(invoked.load(SeqCst), 0);
        // the action itself was dropped, not leaked
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn copy_and_drop_track_the_count() {
        let payload = Arc::new(5);
        let count = unsafe { StrongCount::from_ptr(Box::into_raw(Box::new(Arc::clone(&payload)))) };
        assert_eq!(count.use_count(), 1);

        let copy = count.clone();
        assert_eq!(count.use_count(), 2);
        assert!(count.same_block(&copy));

        drop(copy);
        assert_eq!(count.use_count(), 1);
        assert_eq!(Arc::strong_count(&payload), 2);

        drop(count);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn cleanup_runs_exactly_once_with_the_pointer() {
        let invoked = Arc::new(AtomicUsize::new(0));

        let payload = Box::into_raw(Box::new(7_i32));
        let cleanup = {
            let invoked = Arc::clone(&invoked);
            move |ptr: NonNull<i32>| {
                let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
                assert_eq!(*boxed, 7);
                invoked.fetch_add(1, SeqCst);
            }
        };
        let count = unsafe { StrongCount::from_ptr_with(payload, cleanup) };

        let copy = count.clone();
        drop(count);
        assert_eq!(invoked.load(SeqCst), 0);

        drop(copy);
        assert_eq!(invoked.load(SeqCst), 1);
    }

    #[test]
    fn promotion_succeeds_while_strong_alive() {
        let count = StrongCount::new_inline(9_i32);
        let weak = WeakCount::from_strong(&count);

        let promoted = StrongCount::from_weak(&weak);
        assert!(!promoted.is_empty());
        assert_eq!(promoted.use_count(), 2);
        assert!(promoted.same_block(&count));
    }

    #[test]
    fn promotion_fails_after_release() {
        let count = StrongCount::new_inline(9_i32);
        let weak = WeakCount::from_strong(&count);
        drop(count);

        assert_eq!(weak.use_count(), 0);
        assert!(StrongCount::from_weak(&weak).is_empty());
    }

    #[test]
    fn promotion_from_empty_weak_is_empty() {
        let weak = WeakCount::new();
        assert!(StrongCount::from_weak(&weak).is_empty());
    }

    #[test]
    fn inline_payload_disposed_while_block_outlives_it() {
        let payload = Arc::new(());

        let count = StrongCount::new_inline(Arc::clone(&payload));
        let ptr = unsafe { count.inline_ptr::<Arc<()>>() };
        assert!(Arc::ptr_eq(unsafe { ptr.as_ref() }, &payload));

        let weak = WeakCount::from_strong(&count);
        drop(count);

        // payload dropped immediately, block still addressable through `weak`
        assert_eq!(Arc::strong_count(&payload), 1);
        assert_eq!(weak.use_count(), 0);
        drop(weak);
    }
}
