//! Memory block info exchange: matching an incoming advertisement against
//! locally known blocks, assigning device numbers, and creating dynamic
//! blocks on demand.
//!
//! Grounded on `ioc_process_received_mbinfo_frame`'s lookup: blocks are
//! identified by `(network_name, device_name, device_nr, mblk_name)`. A
//! dynamic device number request (`device_nr == AUTO_DEVICE_NR`) is resolved
//! to a locally-unique number above the reserved range before any lookup.

use std::collections::HashMap;

use iocom_proto::payload::mblk_info::MblkInfo;
use iocom_proto::AUTO_DEVICE_NR;
use tracing::debug;

use crate::env::Environment;
use crate::mblk::{MblkFlags, MemoryBlock};

/// Identifies one memory block within a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MblkKey {
    /// Network name.
    pub network_name: String,
    /// Owning device name.
    pub device_name: String,
    /// Owning device number.
    pub device_nr: u32,
    /// Block name.
    pub mblk_name: String,
}

/// Holds every memory block known to this node, keyed for lookup by the
/// identification tuple carried on the wire.
#[derive(Default)]
pub struct MblkRegistry {
    blocks: HashMap<MblkKey, MemoryBlock>,
    next_auto_device_nr: u32,
}

/// Outcome of matching an incoming advertisement against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// An existing block was matched (and possibly grown).
    Matched(MblkKey),
    /// No matching block existed; a dynamic one was created.
    Created(MblkKey),
    /// No matching block existed and dynamic creation is not permitted.
    Rejected,
}

impl MblkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { blocks: HashMap::new(), next_auto_device_nr: AUTO_DEVICE_NR + 1 }
    }

    /// Inserts a statically configured block, keyed by its own identity.
    pub fn insert(&mut self, key: MblkKey, block: MemoryBlock) {
        self.blocks.insert(key, block);
    }

    /// Looks up a block by key.
    #[must_use]
    pub fn get(&self, key: &MblkKey) -> Option<&MemoryBlock> {
        self.blocks.get(key)
    }

    /// Looks up a block by key, mutably.
    pub fn get_mut(&mut self, key: &MblkKey) -> Option<&mut MemoryBlock> {
        self.blocks.get_mut(key)
    }

    /// Blocks owned by `(network_name, device_name)`, for advertising to a
    /// peer once its connection opens.
    pub fn owned_by<'a>(
        &'a self,
        network_name: &'a str,
        device_name: &'a str,
    ) -> impl Iterator<Item = (&'a MblkKey, &'a MemoryBlock)> + 'a {
        self.blocks
            .iter()
            .filter(move |(k, _)| k.network_name == network_name && k.device_name == device_name)
    }

    /// Resolves a peer-advertised device number: if it is the reserved
    /// auto-assignment sentinel, hands out the next locally-unique number
    /// above the reserved range (seeded from `env` so repeated runs with the
    /// same seed produce the same assignment). Otherwise passes it through.
    pub fn resolve_device_nr<E: Environment>(&mut self, peer_device_nr: u32, env: &E) -> u32 {
        if peer_device_nr != AUTO_DEVICE_NR {
            return peer_device_nr;
        }
        let candidate = AUTO_DEVICE_NR + 1 + (env.random_u32() % 1_000_000);
        let nr = if self.device_nr_in_use(candidate) { self.next_auto_device_nr } else { candidate };
        self.next_auto_device_nr = self.next_auto_device_nr.max(nr) + 1;
        nr
    }

    fn device_nr_in_use(&self, device_nr: u32) -> bool {
        self.blocks.keys().any(|k| k.device_nr == device_nr)
    }

    /// Matches an incoming [`MblkInfo`] against this registry, growing an
    /// existing block if it is smaller and `ALLOW_RESIZE` is set, or creating
    /// a dynamic block (direction flipped, as the peer's UP is our DOWN and
    /// vice versa) when `allow_dynamic` permits it.
    pub fn bind<E: Environment>(
        &mut self,
        info: &MblkInfo,
        network_name: &str,
        device_name: &str,
        allow_dynamic: bool,
        env: &E,
    ) -> BindOutcome {
        let device_nr = self.resolve_device_nr(info.device_nr, env);
        let mblk_name = info.mblk_name.clone().unwrap_or_default();
        let key = MblkKey {
            network_name: network_name.to_string(),
            device_name: device_name.to_string(),
            device_nr,
            mblk_name: mblk_name.clone(),
        };

        if let Some(block) = self.blocks.get_mut(&key) {
            if (info.nbytes as usize) > block.len() {
                block.try_grow(info.nbytes as usize);
            }
            return BindOutcome::Matched(key);
        }

        if !allow_dynamic {
            return BindOutcome::Rejected;
        }

        let mut flags = MblkFlags::from_bits_truncate(info.mblk_flags) | MblkFlags::DYNAMIC;
        flags = flip_direction(flags);
        let block = MemoryBlock::new(
            mblk_name,
            network_name,
            device_name,
            device_nr,
            info.nbytes as usize,
            flags,
        );
        self.blocks.insert(key.clone(), block);
        debug!(name = %key.mblk_name, device_nr = key.device_nr, "created dynamic memory block");
        BindOutcome::Created(key)
    }
}

/// Swaps `UP`/`DOWN` so a dynamically created mirror block replicates in the
/// opposite direction from the peer's advertised block.
#[must_use]
pub fn flip_direction(flags: MblkFlags) -> MblkFlags {
    let mut out = flags & !(MblkFlags::UP | MblkFlags::DOWN);
    if flags.contains(MblkFlags::UP) {
        out |= MblkFlags::DOWN;
    }
    if flags.contains(MblkFlags::DOWN) {
        out |= MblkFlags::UP;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    #[derive(Clone)]
    struct FakeEnv(Arc<Mutex<u32>>);

    impl Environment for FakeEnv {
        type Instant = Instant;

        fn now(&self) -> Self::Instant {
            Instant::now()
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut seed = self.0.lock().unwrap();
            for b in buffer {
                *seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                *b = (*seed >> 16) as u8;
            }
        }
    }

    fn env() -> FakeEnv {
        FakeEnv(Arc::new(Mutex::new(42)))
    }

    fn info(device_nr: u32, nbytes: u32, mblk_flags: u16, mblk_name: &str) -> MblkInfo {
        MblkInfo {
            device_nr,
            nbytes,
            mblk_flags,
            device_name: None,
            network_name: None,
            mblk_name: Some(mblk_name.to_string()),
        }
    }

    #[test]
    fn auto_device_nr_is_resolved_above_the_reserved_range() {
        let mut registry = MblkRegistry::new();
        let nr = registry.resolve_device_nr(AUTO_DEVICE_NR, &env());
        assert!(nr > AUTO_DEVICE_NR);
    }

    #[test]
    fn explicit_device_nr_passes_through_unchanged() {
        let mut registry = MblkRegistry::new();
        assert_eq!(registry.resolve_device_nr(7, &env()), 7);
    }

    #[test]
    fn dynamic_bind_creates_block_with_flipped_direction() {
        let mut registry = MblkRegistry::new();
        let info = info(1, 64, MblkFlags::DOWN.bits(), "temp");
        let outcome = registry.bind(&info, "net", "dev", true, &env());
        let BindOutcome::Created(key) = outcome else { panic!("expected Created") };
        let block = registry.get(&key).unwrap();
        assert!(block.flags().contains(MblkFlags::UP));
        assert!(!block.flags().contains(MblkFlags::DOWN));
        assert!(block.flags().contains(MblkFlags::DYNAMIC));
    }

    #[test]
    fn bind_without_dynamic_permission_is_rejected() {
        let mut registry = MblkRegistry::new();
        let info = info(1, 64, MblkFlags::DOWN.bits(), "temp");
        assert_eq!(registry.bind(&info, "net", "dev", false, &env()), BindOutcome::Rejected);
    }

    #[test]
    fn existing_block_grows_on_rebind_with_larger_size() {
        let mut registry = MblkRegistry::new();
        let key = MblkKey {
            network_name: "net".into(),
            device_name: "dev".into(),
            device_nr: 1,
            mblk_name: "exp".into(),
        };
        registry.insert(
            key.clone(),
            MemoryBlock::new("exp", "net", "dev", 1, 8, MblkFlags::DOWN | MblkFlags::ALLOW_RESIZE),
        );
        let info = info(1, 32, MblkFlags::DOWN.bits(), "exp");
        let outcome = registry.bind(&info, "net", "dev", true, &env());
        assert_eq!(outcome, BindOutcome::Matched(key.clone()));
        assert_eq!(registry.get(&key).unwrap().len(), 32);
    }
}
