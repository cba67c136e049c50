//! The root registry: every memory block known to this node, behind one
//! recursive mutex.
//!
//! Grounded on the concurrency note that a single lock serialises all
//! fabric-wide state (connections may run on separate tasks, but memory
//! block access and device-number/mblk-id assignment is never split across
//! two locks). `parking_lot::ReentrantMutex` lets a task that is already
//! holding the lock (e.g. a driver calling back into the root from within
//! a callback fired while the lock is held) re-enter without deadlocking;
//! unlike `std::sync::Mutex` it only hands back a shared reference, so the
//! guarded state is itself a `RefCell`.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use iocom_core::auth::Authenticator;
use iocom_core::mblk_info::MblkRegistry;

/// Identifies one connection for the lifetime of the process.
pub type ConnectionId = u64;

struct RootState {
    mblk_registry: MblkRegistry,
    next_connection_id: ConnectionId,
}

/// Owns every memory block and hands out connection identifiers for one
/// fabric node.
pub struct Root {
    authenticator: Arc<dyn Authenticator>,
    state: ReentrantMutex<RefCell<RootState>>,
}

impl Root {
    /// Creates an empty root, authenticating inbound connections with
    /// `authenticator`.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            state: ReentrantMutex::new(RefCell::new(RootState {
                mblk_registry: MblkRegistry::new(),
                next_connection_id: 0,
            })),
        }
    }

    /// The authenticator configured for this root.
    #[must_use]
    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    /// Assigns the next unique connection id.
    #[must_use]
    pub fn next_connection_id(&self) -> ConnectionId {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = state.next_connection_id;
        state.next_connection_id += 1;
        id
    }

    /// Runs `f` against the shared memory block registry, holding the root
    /// lock for the duration. Callers must not `.await` while `f` runs —
    /// `f` is a plain synchronous closure so that can't happen accidentally.
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut MblkRegistry) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state.mblk_registry)
    }
}
