//! Reference counted [`Shared`] and [`Weak`] ownership handles.
//!
//! The provided `Shared` and `Weak` types are very similar to
//! [`std::sync::Arc`] and [`std::sync::Weak`]. Every handle is backed by a
//! type-erased control block holding two atomic counts: the strong count
//! tracks handles that keep the payload alive, the weak count tracks
//! observers plus one baseline reference held on behalf of the strong side
//! as a whole. The payload's lifetime and the block's are decoupled: the
//! payload is disposed the moment the last `Shared` drops, while the block's
//! memory is reclaimed only once the last `Weak` is gone too.
//!
//! Three construction strategies feed the same block contract:
//! [`Shared::new`] places the payload inside the block itself (one
//! allocation total), [`Shared::from_box`] adopts an existing allocation
//! with default cleanup, and [`Shared::from_raw_with`] adopts an externally
//! managed payload together with a caller-supplied cleanup action. Whichever
//! variant produced a block, the handles manage it through one non-generic
//! pointer, which is what lets a `Shared<dyn Trait>` and the handle it was
//! created from share a count.
//!
//! Cyclic strong ownership is a user error, not something this crate
//! detects: two allocations holding `Shared` handles to each other leak
//! permanently. Point one direction of the cycle at a [`Weak`] instead.

mod block;
mod count;
mod shared;
mod weak;

pub use crate::{shared::Shared, weak::Weak};
