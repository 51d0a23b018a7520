//! File inspection.
//!
//! Opens a file with the demuxer only (no codec), classifies its format,
//! and reports codec facts, metadata and capability flags. Unreadable
//! audio yields `AudioInfo::Invalid` rather than an error; only
//! filesystem-level failures surface as `Io`.

use std::fmt::Write as _;
use std::path::Path;

use ffmpeg_next as ffmpeg;

use crate::demux::Demuxer;
use crate::error::{AudioError, Result};
use crate::types::{AudioFacts, AudioInfo, CapabilityFlags, InfoErrorKind, TrackFormat, TrackKind};

/// Classify the audio track into a MIME family from the container name
/// and codec id.
pub(crate) fn classify_mime(container: &str, codec: ffmpeg::codec::Id) -> &'static str {
    // Container short names can be comma-separated alias lists, e.g.
    // "mov,mp4,m4a,3gp,3g2,mj2"
    let has = |needle: &str| container.split(',').any(|part| part == needle);

    if has("mp3") || codec == ffmpeg::codec::Id::MP3 {
        return "audio/mpeg";
    }
    if has("aac") {
        // Raw ADTS stream
        return "audio/aac";
    }
    if has("loas") || codec == ffmpeg::codec::Id::AAC_LATM {
        // LATM-wrapped AAC (LOAS transport)
        return "audio/mp4a-latm";
    }
    if has("mp4") || has("m4a") || has("mov") || has("3gp") {
        return match codec {
            ffmpeg::codec::Id::AAC => "audio/mp4",
            _ => "application/octet-stream",
        };
    }
    if has("wav") {
        return "audio/wav";
    }
    if has("ogg") {
        return match codec {
            ffmpeg::codec::Id::VORBIS => "audio/vorbis",
            _ => "audio/ogg",
        };
    }
    "application/octet-stream"
}

/// The fixed MIME → capability map.
///
/// Lossless trim only works where the elementary stream already is
/// MP4-muxable AAC; everything else must transcode.
pub(crate) fn capabilities_for_mime(mime: &str) -> CapabilityFlags {
    match mime {
        "audio/mpeg" | "audio/wav" | "audio/x-wav" | "audio/ogg" | "audio/vorbis" => {
            CapabilityFlags {
                convertible: true,
                trimmable: true,
                lossless_trimmable: false,
                waveform_supported: true,
            }
        }
        "audio/mp4" | "audio/mp4a-latm" | "audio/aac" => CapabilityFlags {
            convertible: true,
            trimmable: true,
            lossless_trimmable: true,
            waveform_supported: true,
        },
        _ => CapabilityFlags::default(),
    }
}

/// Inspect a file and build its diagnostic report.
pub(crate) fn inspect(path: &Path) -> Result<AudioInfo> {
    crate::ffmpeg_utils::init()?;

    let file_size = std::fs::metadata(path)
        .map_err(|e| AudioError::io(path, e))?
        .len();

    let mut demuxer = match Demuxer::open(path) {
        Ok(demuxer) => demuxer,
        Err(AudioError::UnsupportedFormat { detail, .. }) => {
            return Ok(AudioInfo::Invalid {
                kind: InfoErrorKind::UnreadableContainer,
                details: detail,
            })
        }
        Err(e) => return Err(e),
    };

    let tracks = demuxer.tracks();
    let audio = match tracks.iter().find(|t| t.kind == TrackKind::Audio) {
        Some(track) => track.clone(),
        None => {
            return Ok(AudioInfo::Invalid {
                kind: InfoErrorKind::NoAudioTrack,
                details: format!(
                    "container {} holds {} track(s), none of them audio",
                    demuxer.container_name(),
                    tracks.len()
                ),
            })
        }
    };

    demuxer.select(audio.index)?;
    let duration_us = demuxer.duration_us()?;
    let duration_ms = (duration_us.max(0) / 1000) as u64;

    let container = demuxer.container_name();
    let codec_id = demuxer.codec_id()?;
    let mime = classify_mime(&container, codec_id);
    let capabilities = capabilities_for_mime(mime);

    // Estimate the bitrate from the file size when the container is silent
    let bit_rate_kbps = if audio.bit_rate_bps > 0 {
        (audio.bit_rate_bps / 1000) as u32
    } else if duration_ms > 0 {
        (file_size * 8 / duration_ms.max(1)) as u32
    } else {
        0
    };

    let channels = if audio.channels == 0 { 2 } else { audio.channels };
    let bit_depth = bit_depth_of(&demuxer, codec_id)?;
    let metadata = demuxer.metadata();
    let found_tracks: Vec<String> = tracks.iter().map(describe_track).collect();

    let diagnostics_text = build_diagnostics(
        &container,
        mime,
        file_size,
        duration_ms,
        bit_rate_kbps,
        &audio,
        channels,
        bit_depth,
        &found_tracks,
    );

    Ok(AudioInfo::Valid(AudioFacts {
        file_size,
        duration_ms,
        mime: mime.to_string(),
        codec: audio.codec.clone(),
        bit_rate_kbps,
        sample_rate_hz: audio.sample_rate,
        channels,
        bit_depth,
        metadata,
        capabilities,
        diagnostics_text,
        found_tracks,
    }))
}

fn bit_depth_of(demuxer: &Demuxer, codec_id: ffmpeg::codec::Id) -> Result<Option<u16>> {
    if !codec_id.name().starts_with("pcm_") {
        return Ok(None);
    }
    let params = demuxer.parameters()?;
    let bits = crate::ffmpeg_utils::helpers::codec_params_bits_per_sample(&params);
    Ok(if bits > 0 { Some(bits) } else { None })
}

fn describe_track(track: &TrackFormat) -> String {
    let kind = match track.kind {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
        TrackKind::Subtitle => "subtitle",
        TrackKind::Other => "data",
    };
    match track.kind {
        TrackKind::Audio => format!(
            "#{} {}: {} {}Hz {}ch{}",
            track.index,
            kind,
            track.codec,
            track.sample_rate,
            track.channels,
            track
                .language
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default()
        ),
        _ => format!("#{} {}: {}", track.index, kind, track.codec),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_diagnostics(
    container: &str,
    mime: &str,
    file_size: u64,
    duration_ms: u64,
    bit_rate_kbps: u32,
    audio: &TrackFormat,
    channels: u16,
    bit_depth: Option<u16>,
    found_tracks: &[String],
) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "container: {} ({})", container, mime);
    let _ = writeln!(text, "size: {} bytes, duration: {} ms", file_size, duration_ms);
    let _ = writeln!(
        text,
        "audio: {} {}Hz {}ch {}kbps{}",
        audio.codec,
        audio.sample_rate,
        channels,
        bit_rate_kbps,
        bit_depth
            .map(|b| format!(" {}bit", b))
            .unwrap_or_default()
    );
    let _ = writeln!(text, "tracks:");
    for line in found_tracks {
        let _ = writeln!(text, "  {}", line);
    }
    text
}
