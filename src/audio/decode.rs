use anyhow::{Context, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decode an encoded audio buffer to mono i16 PCM at the target rate.
///
/// The buffer is expected to start with container framing (the header chunk
/// captured at recording start). A truncated tail is tolerated: a growing
/// buffer is always a prefix of a valid stream, so decode stops at the first
/// incomplete packet and returns what it has.
pub fn decode_to_pcm(bytes: &[u8], target_sample_rate: u32) -> Result<Vec<i16>> {
    let mss = MediaSourceStream::new(
        Box::new(Cursor::new(bytes.to_vec())),
        Default::default(),
    );

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Failed to probe audio container")?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .context("No default audio track in container")?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);
    let source_rate = track.codec_params.sample_rate.unwrap_or(target_sample_rate);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut samples: Vec<i16> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<i16>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of the (possibly truncated) buffer
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(e).context("Failed to read audio packet");
                }
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Skip undecodable packets (e.g. the last, partially written one)
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(e).context("Failed to decode audio packet");
                }
                break;
            }
        }
    }

    let mono = interleaved_to_mono(samples, channels);
    let pcm = downsample(mono, source_rate, target_sample_rate);

    debug!(
        "Decoded {} bytes to {} PCM samples ({}Hz mono)",
        bytes.len(),
        pcm.len(),
        target_sample_rate
    );

    Ok(pcm)
}

/// Encode mono i16 PCM as an in-memory 16-bit WAV file.
///
/// Used by the request/response engine mode, whose wire contract takes a
/// self-contained WAV per submission.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in pcm {
            writer.write_sample(sample).context("Failed to write WAV sample")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }

    Ok(cursor.into_inner())
}

/// Convert interleaved multi-channel samples to mono by summing channels
/// (no division, to preserve volume) with clipping.
fn interleaved_to_mono(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }

    let channels = channels as usize;
    let mut mono = Vec::with_capacity(samples.len() / channels);
    for frame in samples.chunks_exact(channels) {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        mono.push(sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
    }
    mono
}

/// Downsample by decimation: take every Nth sample.
fn downsample(samples: Vec<i16>, source_rate: u32, target_rate: u32) -> Vec<i16> {
    if source_rate == target_rate {
        return samples;
    }

    let ratio = source_rate / target_rate;
    if ratio <= 1 {
        return samples; // Can't upsample
    }

    samples.into_iter().step_by(ratio as usize).collect()
}
