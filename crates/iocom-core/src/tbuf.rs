//! Target buffer: applies inbound frame payloads to a memory block.
//!
//! Grounded on `ioc_target_buffer.c`'s accept/commit split: `accept` lands
//! decompressed bytes into a private working copy (`newdata`) and records
//! the touched range; `commit`, run when a frame carries `SYNC_COMPLETE`,
//! shrinks each recorded range against the last-synchronised copy (unless
//! bidirectional force-marked) before publishing it to the memory block.

use iocom_proto::compress;

use crate::mblk::{ChangeKind, MemoryBlock};

/// Receives and applies inbound frame payloads for one (memory block,
/// connection) pair.
pub struct TargetBuffer {
    newdata: Vec<u8>,
    synced: Vec<u8>,
    pending: Option<(usize, usize)>,
    force_send: Vec<bool>,
    bidirectional: bool,
}

impl TargetBuffer {
    /// Creates a target buffer over a block of `nbytes` bytes.
    #[must_use]
    pub fn new(nbytes: usize, bidirectional: bool) -> Self {
        Self {
            newdata: vec![0u8; nbytes],
            synced: vec![0u8; nbytes],
            pending: None,
            force_send: vec![false; if bidirectional { nbytes } else { 0 }],
            bidirectional,
        }
    }

    /// Decompresses/undeltas `data` into `newdata[addr..]`, bounded by the
    /// block's extent, and records the affected range.
    ///
    /// `is_keyframe` (the frame's `!DELTA_ENCODED`) selects absolute copy
    /// vs. wrapping-add; `compressed` selects RLE decoding vs. raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`iocom_proto::ProtocolError::CorruptCompression`] if `data`
    /// is a malformed RLE stream.
    pub fn accept(
        &mut self,
        addr: usize,
        data: &[u8],
        is_keyframe: bool,
        compressed: bool,
    ) -> iocom_proto::Result<()> {
        if addr >= self.newdata.len() {
            return Ok(());
        }
        let delta = !is_keyframe;
        let dst = &mut self.newdata[addr..];
        let n = if compressed {
            compress::decompress(data, dst, delta)?
        } else {
            compress::apply_raw(data, dst, delta)
        };
        if n == 0 {
            return Ok(());
        }
        let hi = addr + n - 1;
        self.pending = Some(match self.pending {
            Some((lo, phi)) => (lo.min(addr), phi.max(hi)),
            None => (addr, hi),
        });
        if self.bidirectional {
            for b in &mut self.force_send[addr..=hi.min(self.force_send.len().saturating_sub(1))]
            {
                *b = true;
            }
        }
        Ok(())
    }

    /// Publishes every range accumulated since the last commit: shrinks
    /// each against the synchronised copy (unless force-marked), writes the
    /// final bytes into `mblk` (which fires its own change callbacks), and
    /// updates the synchronised copy.
    pub fn commit(&mut self, mblk: &mut MemoryBlock) {
        let Some((mut lo, mut hi)) = self.pending.take() else {
            return;
        };

        let suppressible = |newdata: &[u8], synced: &[u8], force: &[bool], i: usize| {
            newdata[i] == synced[i] && !force.get(i).copied().unwrap_or(false)
        };

        while lo <= hi && suppressible(&self.newdata, &self.synced, &self.force_send, lo) {
            if lo == hi {
                lo += 1;
                break;
            }
            lo += 1;
        }
        if lo <= hi {
            while suppressible(&self.newdata, &self.synced, &self.force_send, hi) {
                if hi == lo {
                    break;
                }
                hi -= 1;
            }
        }
        if lo > hi {
            return;
        }

        self.synced[lo..=hi].copy_from_slice(&self.newdata[lo..=hi]);
        if self.bidirectional {
            for b in &mut self.force_send[lo..=hi] {
                *b = false;
            }
        }
        mblk.write(lo, &self.newdata[lo..=hi], ChangeKind::Receive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mblk::MblkFlags;

    #[test]
    fn keyframe_accept_then_commit_overwrites_block() {
        let mut mblk = MemoryBlock::new("b", "net", "dev", 1, 4, MblkFlags::DOWN);
        let mut tbuf = TargetBuffer::new(4, false);
        tbuf.accept(0, &[1, 2, 3, 4], true, false).unwrap();
        tbuf.commit(&mut mblk);
        assert_eq!(mblk.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn delta_accept_adds_onto_existing_committed_bytes() {
        let mut mblk = MemoryBlock::new("b", "net", "dev", 1, 4, MblkFlags::DOWN);
        let mut tbuf = TargetBuffer::new(4, false);
        tbuf.accept(0, &[10, 10, 10, 10], true, false).unwrap();
        tbuf.commit(&mut mblk);

        tbuf.accept(0, &[1, 0, 0, 0], false, false).unwrap();
        tbuf.commit(&mut mblk);
        assert_eq!(mblk.data(), &[11, 10, 10, 10]);
    }

    #[test]
    fn unchanged_bytes_are_not_rewritten_to_block() {
        let mut mblk = MemoryBlock::new("b", "net", "dev", 1, 4, MblkFlags::DOWN);
        let mut tbuf = TargetBuffer::new(4, false);
        tbuf.accept(0, &[5, 5, 5, 5], true, false).unwrap();
        tbuf.commit(&mut mblk);

        // Delta of all zeros changes nothing; commit should be a no-op on the block.
        tbuf.accept(0, &[0, 0, 0, 0], false, false).unwrap();
        tbuf.commit(&mut mblk);
        assert_eq!(mblk.data(), &[5, 5, 5, 5]);
    }

    #[test]
    fn rle_compressed_keyframe_decodes_through_accept() {
        let mut mblk = MemoryBlock::new("b", "net", "dev", 1, 64, MblkFlags::DOWN);
        let mut tbuf = TargetBuffer::new(64, false);
        // Empty literal run, 64-byte zero run.
        tbuf.accept(0, &[0, 64], true, true).unwrap();
        tbuf.commit(&mut mblk);
        assert_eq!(mblk.data(), &[0u8; 64]);
    }
}
