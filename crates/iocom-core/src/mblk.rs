//! Memory block: the named byte buffer replicated across a link.
//!
//! Addresses `>= 0` index ordinary data memory; negative addresses index a
//! small fixed-size status region (connected-stream count, connection-drop
//! count, …), mirrored in `ioc_status_write`/`ioc_status_read`: the negative
//! address is rebased onto the status array and clipped at both ends rather
//! than rejected.

use std::time::Duration;

bitflags::bitflags! {
    /// Direction and replication-mode flags for a memory block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MblkFlags: u16 {
        /// Data flows from this end up toward the controller.
        const UP = 1;
        /// Data flows from the controller down to this end.
        const DOWN = 2;
        /// Both directions are replicated on the same block (SBUF + TBUF pair).
        const BIDIRECTIONAL = 4;
        /// Commit publishes a change-callback automatically, without an
        /// explicit application-level sync call.
        const AUTO_SYNC = 8;
        /// The peer may grow this block to match a larger advertised size.
        const ALLOW_RESIZE = 16;
        /// Created on demand when a peer advertises an unknown block.
        const DYNAMIC = 32;
        /// Block is backed by a fixed-size allocation; cannot grow or be freed.
        const STATIC = 64;
    }
}

/// Negative-addressed status fields every memory block carries, mirroring
/// `ioc_com_status.c`'s layout.
pub const STATUS_MEMORY_SZ: usize = 8;
/// Count of currently connected streams touching this block, as a 2-byte field.
pub const NRO_CONNECTED_STREAMS: isize = -8;
/// Cumulative count of dropped connections, as a 4-byte field.
pub const CONNECTION_DROP_COUNT: isize = -4;

/// Reason a memory block's contents changed, passed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Local application code wrote to the block.
    Write,
    /// A frame from a peer was committed into the block.
    Receive,
}

/// `(start, end)` inclusive byte range touched by a change, plus its kind.
pub type ChangeCallback = Box<dyn Fn(isize, isize, ChangeKind) + Send + Sync>;

/// Named, byte-addressable store replicated across a connection.
///
/// Reads and writes are clipped to the valid address range; every
/// registered callback fires with the touched range after a write commits.
/// Callers are expected to hold the fabric-wide lock while mutating a block
/// (see the concurrency model: a single recursive mutex serialises all
/// state, this type performs no locking of its own).
pub struct MemoryBlock {
    name: String,
    network_name: String,
    device_name: String,
    device_nr: u32,
    flags: MblkFlags,
    data: Vec<u8>,
    status: [u8; STATUS_MEMORY_SZ],
    callbacks: Vec<ChangeCallback>,
}

impl MemoryBlock {
    /// Creates a block of `nbytes` zeroed data bytes.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        network_name: impl Into<String>,
        device_name: impl Into<String>,
        device_nr: u32,
        nbytes: usize,
        flags: MblkFlags,
    ) -> Self {
        Self {
            name: name.into(),
            network_name: network_name.into(),
            device_name: device_name.into(),
            device_nr,
            flags,
            data: vec![0u8; nbytes],
            status: [0u8; STATUS_MEMORY_SZ],
            callbacks: Vec::new(),
        }
    }

    /// Block name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network name this block belongs to.
    #[must_use]
    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    /// Owning device name.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Owning device number.
    #[must_use]
    pub fn device_nr(&self) -> u32 {
        self.device_nr
    }

    /// Block flags.
    #[must_use]
    pub fn flags(&self) -> MblkFlags {
        self.flags
    }

    /// Data byte count (not counting the status region).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the block holds no data bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of the data region.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Registers a callback invoked with `(start, end, kind)` after every
    /// committed write to this block, data or status.
    pub fn add_callback(&mut self, cb: ChangeCallback) {
        self.callbacks.push(cb);
    }

    /// Writes `src` at `addr`, clipped to `[0, len())`. Fires callbacks with
    /// the actually-written range (empty writes fire nothing).
    pub fn write(&mut self, addr: usize, src: &[u8], kind: ChangeKind) {
        let end = (addr + src.len()).min(self.data.len());
        if addr >= end {
            return;
        }
        let n = end - addr;
        self.data[addr..end].copy_from_slice(&src[..n]);
        self.fire(addr as isize, end as isize - 1, kind);
    }

    /// Reads up to `dst.len()` bytes from `addr`, clipped to `[0, len())`;
    /// bytes beyond the block's extent are left as-is (zeroed by the
    /// caller's buffer, per the original's `os_memclear`-then-copy pattern).
    #[must_use]
    pub fn read(&self, addr: usize, dst: &mut [u8]) -> usize {
        if addr >= self.data.len() {
            return 0;
        }
        let n = dst.len().min(self.data.len() - addr);
        dst[..n].copy_from_slice(&self.data[addr..addr + n]);
        n
    }

    /// Writes into the negative-addressed status region. `addr` must be
    /// negative; it is rebased onto `status` and clipped at both ends,
    /// mirroring `ioc_status_write`.
    pub fn write_status(&mut self, addr: isize, src: &[u8]) {
        let mut base = STATUS_MEMORY_SZ as isize + addr;
        let mut src = src;
        if base < 0 {
            let skip = (-base) as usize;
            if skip >= src.len() {
                return;
            }
            src = &src[skip..];
            base = 0;
        }
        let base = base as usize;
        if base >= STATUS_MEMORY_SZ {
            return;
        }
        let n = src.len().min(STATUS_MEMORY_SZ - base);
        if n == 0 || self.status[base..base + n] == src[..n] {
            return;
        }
        self.status[base..base + n].copy_from_slice(&src[..n]);
        self.fire(addr, addr + n as isize - 1, ChangeKind::Write);
    }

    /// Reads from the negative-addressed status region, clipped the same
    /// way as [`Self::write_status`]. Out-of-range bytes of `dst` are left
    /// zeroed.
    pub fn read_status(&self, addr: isize, dst: &mut [u8]) {
        dst.fill(0);
        let mut base = STATUS_MEMORY_SZ as isize + addr;
        let mut dst = dst;
        if base < 0 {
            let skip = (-base) as usize;
            if skip >= dst.len() {
                return;
            }
            dst = &mut dst[skip..];
            base = 0;
        }
        let base = base as usize;
        if base >= STATUS_MEMORY_SZ {
            return;
        }
        let n = dst.len().min(STATUS_MEMORY_SZ - base);
        dst[..n].copy_from_slice(&self.status[base..base + n]);
    }

    /// Sets the 2-byte connected-stream count status field.
    pub fn set_connected_streams(&mut self, count: u16) {
        self.write_status(NRO_CONNECTED_STREAMS, &count.to_le_bytes());
    }

    /// Sets the 4-byte cumulative connection-drop-count status field.
    pub fn set_connection_drop_count(&mut self, count: u32) {
        self.write_status(CONNECTION_DROP_COUNT, &count.to_le_bytes());
    }

    /// Grows the block to `nbytes` if `ALLOW_RESIZE` is set and the block is
    /// not `STATIC`; returns `false` (no-op) otherwise. Never shrinks.
    pub fn try_grow(&mut self, nbytes: usize) -> bool {
        if self.flags.contains(MblkFlags::STATIC) || !self.flags.contains(MblkFlags::ALLOW_RESIZE)
        {
            return false;
        }
        if nbytes > self.data.len() {
            self.data.resize(nbytes, 0);
        }
        true
    }

    fn fire(&self, start: isize, end: isize, kind: ChangeKind) {
        for cb in &self.callbacks {
            cb(start, end, kind);
        }
    }
}

/// Keep-alive and silence thresholds, which differ by transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    /// Emit a keep-alive ACK after this much send-idle time.
    pub keepalive: Duration,
    /// Declare the link broken after this much receive-idle time.
    pub silence: Duration,
}

impl LinkTimings {
    /// Timings for a raw serial link: 150 ms keep-alive, 250 ms silence.
    pub const SERIAL: Self =
        Self { keepalive: Duration::from_millis(150), silence: Duration::from_millis(250) };

    /// Timings for a TCP/TLS link: 10 s keep-alive, 20 s silence.
    pub const TCP: Self =
        Self { keepalive: Duration::from_secs(10), silence: Duration::from_secs(20) };
}
