//! # Channel Packing Module
//!
//! Stateless conversions between interleaved stereo frames and per-channel
//! buffers. Stereo audio is interleaved as `[L, R, L, R, ...]`; the
//! preprocessing units work on one channel at a time, so the bridges split
//! before preprocessing and merge afterwards. Mono streams bypass both
//! operations and use their single channel buffer directly.
//!
//! Buffer lengths are a caller contract: `interleaved` must hold exactly
//! `2 * frame_count` samples and each channel buffer exactly `frame_count`.
//! Violations are programming errors, checked with debug assertions rather
//! than surfaced as recoverable errors.

/// Deinterleave a stereo frame into left and right channel buffers.
pub fn split_stereo(interleaved: &[f32], frame_count: usize, left: &mut [f32], right: &mut [f32]) {
    debug_assert_eq!(interleaved.len(), frame_count * 2);
    debug_assert!(left.len() >= frame_count && right.len() >= frame_count);

    for i in 0..frame_count {
        left[i] = interleaved[i * 2];
        right[i] = interleaved[i * 2 + 1];
    }
}

/// Interleave left and right channel buffers back into a stereo frame.
pub fn merge_stereo(left: &[f32], right: &[f32], interleaved: &mut [f32], frame_count: usize) {
    debug_assert!(left.len() >= frame_count && right.len() >= frame_count);
    debug_assert_eq!(interleaved.len(), frame_count * 2);

    for i in 0..frame_count {
        interleaved[i * 2] = left[i];
        interleaved[i * 2 + 1] = right[i];
    }
}
