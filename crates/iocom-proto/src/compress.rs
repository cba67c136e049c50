//! Run-length compression and delta/zero-run decompression.
//!
//! Grounded on `ioc_compress.c` / `ioc_uncompress.c`: the encoder alternates
//! a literal run and a zero run, each prefixed by a 1-byte count (0..255),
//! starting with a literal run. The decoder inverts this; under delta
//! encoding, decoded literal bytes are *added* to the destination, and zero
//! runs merely advance the destination pointer without writing (because the
//! "no change" is already correct in the destination).

/// Result of a compression attempt over part of a source range.
pub struct CompressResult {
    /// Bytes written to `dst`.
    pub written: usize,
    /// Index one past the last source byte actually compressed. Equals
    /// `src.len()` if everything was compressed.
    pub src_consumed: usize,
}

/// Compresses `src` into `dst`, alternating literal-run/zero-run pairs.
///
/// Returns `None` if fewer than 3 bytes are given (not worth compressing) or
/// if the encoded form would not be shorter than `src_consumed` source bytes
/// — in both cases the caller should fall back to transmitting `src` raw.
///
/// Mirrors `ioc_compress()`: encoding stops as soon as `dst` would be
/// filled, reporting how much of `src` was actually consumed so the caller
/// can split across frames if needed.
#[must_use]
pub fn compress(src: &[u8], dst: &mut [u8]) -> Option<CompressResult> {
    if src.len() < 3 {
        return None;
    }

    let mut si = 0usize;
    let mut di = 0usize;
    let dst_end = dst.len();

    while si < src.len() {
        // Literal run: bytes until we see two zeros in a row (matching the
        // original's one-byte-lookahead rule), capped at 255.
        let run_start = si;
        let max_count = (src.len() - si).min(255);
        let mut count = 0usize;
        while count < max_count {
            let this_zero = src[si] == 0;
            let next_is_boundary = count + 1 >= max_count;
            let next_zero = if next_is_boundary { this_zero } else { src[si + 1] == 0 };
            if this_zero && next_zero {
                break;
            }
            count += 1;
            si += 1;
        }

        if di + 1 + count >= dst_end {
            si = run_start;
            break;
        }
        dst[di] = count as u8;
        di += 1;
        dst[di..di + count].copy_from_slice(&src[run_start..run_start + count]);
        di += count;

        if si >= src.len() {
            break;
        }

        // Zero run.
        let zrun_start = si;
        let zmax = (src.len() - si).min(255);
        let mut zcount = 0usize;
        while zcount < zmax && src[si] == 0 {
            zcount += 1;
            si += 1;
        }
        let _ = zrun_start;

        if di >= dst_end {
            si -= zcount;
            break;
        }
        dst[di] = zcount as u8;
        di += 1;
    }

    if si < 3 || di >= si {
        return None;
    }
    Some(CompressResult { written: di, src_consumed: si })
}

/// Decompresses `src` (produced by [`compress`]) into `dst`, optionally
/// delta-applying onto the existing contents of `dst`.
///
/// When `delta`, each decoded literal byte is added (wrapping) to the
/// current destination byte rather than overwriting it, and zero runs
/// advance the destination pointer without modifying it — the destination
/// already holds the last-synchronised value for those bytes.
///
/// # Errors
///
/// Returns [`crate::errors::ProtocolError::CorruptCompression`] if a count
/// byte would read past the end of `src`.
pub fn decompress(
    src: &[u8],
    dst: &mut [u8],
    delta: bool,
) -> crate::errors::Result<usize> {
    let mut si = 0usize;
    let mut di = 0usize;
    let dst_len = dst.len();

    while si < src.len() && di < dst_len {
        let mut n = usize::from(src[si]);
        si += 1;
        if si + n > src.len() {
            return Err(crate::errors::ProtocolError::CorruptCompression(
                "literal run overruns source buffer",
            ));
        }
        if di + n > dst_len {
            n = dst_len - di;
        }
        if delta {
            for k in 0..n {
                dst[di + k] = dst[di + k].wrapping_add(src[si + k]);
            }
        } else {
            dst[di..di + n].copy_from_slice(&src[si..si + n]);
        }
        si += n;
        di += n;

        if si >= src.len() || di >= dst_len {
            break;
        }

        let mut zn = usize::from(src[si]);
        si += 1;
        if di + zn > dst_len {
            zn = dst_len - di;
        }
        if !delta {
            for b in &mut dst[di..di + zn] {
                *b = 0;
            }
        }
        di += zn;
    }

    Ok(di)
}

/// Decompresses a raw (not RLE-compressed) payload, honoring `delta`.
///
/// Equivalent to the `IOC_COMPRESESSED`-unset branch of `ioc_uncompress()`:
/// a straight copy or a byte-wise add.
#[must_use]
pub fn apply_raw(src: &[u8], dst: &mut [u8], delta: bool) -> usize {
    let n = src.len().min(dst.len());
    if delta {
        for i in 0..n {
            dst[i] = dst[i].wrapping_add(src[i]);
        }
    } else {
        dst[..n].copy_from_slice(&src[..n]);
    }
    n
}
