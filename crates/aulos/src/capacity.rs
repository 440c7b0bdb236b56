//! Adaptive ring-buffer sizing.
//!
//! When the caller does not pin a ring size, the capacity is derived from
//! the true stream parameters once the demux probe is done: enough seconds
//! of PCM for the source type and track length, stepped to 64 KiB and kept
//! inside fixed bounds.

use aulos_codec::StreamInfo;

const STEP: usize = 64 * 1024;
const MIN_BYTES: usize = 128 * 1024;
const MAX_BYTES: usize = 1024 * 1024;
/// Hi-res streams (> 1 MB/s of PCM) get a larger ceiling.
const MAX_BYTES_HIRES: usize = 2 * 1024 * 1024;

pub(crate) fn adaptive_ring_bytes(info: &StreamInfo, is_http: bool) -> usize {
    // 4 bytes per sample for anything at or above 24-bit.
    let bps: u64 = if info.sample_format.code() >= 3 { 4 } else { 2 };
    let bytes_per_second = u64::from(info.sample_rate) * u64::from(info.channel_count) * bps;

    let max_limit = if bytes_per_second > 1_000_000 {
        MAX_BYTES_HIRES
    } else {
        MAX_BYTES
    };

    let mut target_sec = if info.duration_ms > 0 {
        if info.duration_ms < 30_000 {
            0.30 // short clips stay responsive
        } else if info.duration_ms < 600_000 {
            0.60
        } else {
            0.80 // long tracks favour stability
        }
    } else if is_http {
        1.20 // live/unknown-length network stream
    } else {
        0.60
    };
    if is_http {
        target_sec += 0.30;
    }

    let desired = (bytes_per_second as f64 * target_sec) as usize;
    let stepped = desired.clamp(MIN_BYTES, max_limit).div_ceil(STEP) * STEP;
    stepped.clamp(MIN_BYTES, max_limit)
}
