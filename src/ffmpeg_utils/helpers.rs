//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every `unsafe` block in the crate lives here, with an explicit safety
//! argument. Code outside this module never writes `unsafe` for routine
//! FFmpeg access.

use ffmpeg_next as ffmpeg;

// ── Timestamp conversion ────────────────────────────────────────────────────

/// Microsecond timebase used for all presentation timestamps at module
/// boundaries.
pub const MICROS_TIMEBASE: (i32, i32) = (1, 1_000_000);

/// Convert a timestamp from one timebase to another.
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    // SAFETY: `av_rescale_q` is a pure integer computation on plain values.
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// Convert a stream-timebase timestamp to microseconds.
pub fn ts_to_micros(ts: i64, tb: ffmpeg::Rational) -> i64 {
    rescale_ts(ts, tb, ffmpeg::Rational::new(MICROS_TIMEBASE.0, MICROS_TIMEBASE.1))
}

/// Convert a microsecond timestamp into the given timebase.
pub fn micros_to_ts(us: i64, tb: ffmpeg::Rational) -> i64 {
    rescale_ts(us, ffmpeg::Rational::new(MICROS_TIMEBASE.0, MICROS_TIMEBASE.1), tb)
}

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
///
/// `ffmpeg-next` does not expose this field through a safe accessor.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is valid and non-null for the lifetime of
    // `params`; `sample_rate` is a plain i32 field with no ownership
    // semantics.
    unsafe { (*params.as_ptr()).sample_rate.max(0) as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
}

/// Read `bit_rate` from an `AVCodecParameters` struct.
pub fn codec_params_bit_rate(params: &ffmpeg::codec::parameters::Parameters) -> u64 {
    // SAFETY: same as `codec_params_sample_rate`.
    unsafe { (*params.as_ptr()).bit_rate.max(0) as u64 }
}

/// Read the best available bits-per-sample figure, or 0 when unknown.
pub fn codec_params_bits_per_sample(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    // SAFETY: same as `codec_params_sample_rate`; both fields are plain ints.
    unsafe {
        let p = params.as_ptr();
        let raw = (*p).bits_per_raw_sample;
        let coded = (*p).bits_per_coded_sample;
        if raw > 0 { raw as u16 } else { coded.max(0) as u16 }
    }
}

/// Whether the parameters carry codec-specific data (e.g. the
/// AudioSpecificConfig an MP4 muxer needs for AAC).
pub fn codec_params_has_extradata(params: &ffmpeg::codec::parameters::Parameters) -> bool {
    // SAFETY: `extradata` is a nullable pointer field; we only null-check it.
    unsafe { !(*params.as_ptr()).extradata.is_null() && (*params.as_ptr()).extradata_size > 0 }
}

/// Zero out `codec_tag` on the parameters attached to an output stream so
/// the muxer picks the correct tag for the target container.
///
/// Must run after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the stream's lifetime;
    // `codecpar` is set by `set_parameters` and non-null. Writing 0 to
    // `codec_tag` is a plain u32 store.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Allocate a fresh `AVCodecParameters`, copy the opened encoder context
/// into it, and return it as a safe `Parameters`.
///
/// This is the output track format descriptor the muxer registers.
pub fn encoder_codec_parameters(
    encoder: &ffmpeg::codec::encoder::Audio,
) -> ffmpeg::codec::Parameters {
    use std::ops::Deref;
    use std::rc::Rc;
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `avcodec_parameters_from_context` copies fields out of a
    // valid, open encoder context. Allocation failure only happens under
    // OOM, where the wrap below aborts.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

// ── Audio plane access ──────────────────────────────────────────────────────

/// Extract an audio plane slice from an `AVFrame`.
///
/// Works around `ffmpeg-next`'s `Audio::data(index)` stopping early when
/// `linesize[1] == 0`: planar audio frames often populate only
/// `linesize[0]` to describe the size of every plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    // SAFETY: all pointers are read from a live AVFrame and null-checked;
    // `linesize[0]` is the byte length FFmpeg guarantees for each plane.
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of [`audio_plane_data`].
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    // SAFETY: see `audio_plane_data`; the mutable borrow of `frame`
    // guarantees exclusive access to the underlying buffer.
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

/// Reinterpret the data plane of an FLTP (planar float32) frame as `&[f32]`.
///
/// Returns `None` if the pointer is not 4-byte aligned or the plane is
/// shorter than `sample_count * 4` bytes.
pub fn fltp_plane_as_f32(byte_slice: &[u8], sample_count: usize) -> Option<&[f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length verified above; FLTP planes hold
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts(ptr as *const f32, sample_count) })
}

/// Mutable variant of [`fltp_plane_as_f32`].
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: see `fltp_plane_as_f32`.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Reinterpret the single data plane of a packed S16 frame as `&[i16]`.
///
/// `value_count` is `samples * channels` for interleaved layouts.
pub fn packed_plane_as_i16(byte_slice: &[u8], value_count: usize) -> Option<&[i16]> {
    let expected_bytes = value_count.checked_mul(2)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_ptr();
    if (ptr as usize) % std::mem::align_of::<i16>() != 0 {
        return None;
    }
    // SAFETY: alignment and length verified above; packed S16 planes hold
    // native-endian i16 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts(ptr as *const i16, value_count) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_micros_roundtrip() {
        let tb = ffmpeg::Rational::new(1, 44100);
        let ts = 44100; // one second
        assert_eq!(ts_to_micros(ts, tb), 1_000_000);
        assert_eq!(micros_to_ts(1_000_000, tb), 44100);
    }

    #[test]
    fn test_fltp_plane_reinterpret() {
        let floats: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0];
        let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_ne_bytes()).collect();
        let view = fltp_plane_as_f32(&bytes, 4).expect("aligned Vec<u8> from f32s");
        assert_eq!(view, floats.as_slice());
        // Short plane is rejected
        assert!(fltp_plane_as_f32(&bytes[..8], 4).is_none());
    }

    #[test]
    fn test_packed_plane_reinterpret() {
        let samples: Vec<i16> = vec![0, 100, -100, i16::MAX];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        let view = packed_plane_as_i16(&bytes, 4).expect("aligned Vec<u8> from i16s");
        assert_eq!(view, samples.as_slice());
        assert!(packed_plane_as_i16(&bytes[..2], 4).is_none());
    }
}
