//! Inbound media normalization.
//!
//! Images arrive as data-URL-prefixed or bare base64 strings and are
//! decoded to a fixed 3-channel RGB representation re-encoded as PNG for
//! model transport. Audio arrives either as a multipart upload (mime
//! derived from the filename extension) or as a base64/data-URL payload.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::ImageEncoder as _;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};

use crate::error::MediaError;

/// Default mime for bare-base64 audio payloads (browser MediaRecorder).
pub const GENERIC_AUDIO_MIME: &str = "audio/webm";

const GENERIC_BINARY_MIME: &str = "application/octet-stream";

/// Canonical 3-channel image derived from an inbound payload.
#[derive(Debug, Clone)]
pub struct CanonicalImage {
    /// RGB8 pixels re-encoded as PNG, regardless of source encoding
    /// (palette, grayscale, alpha).
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CanonicalImage {
    pub const MIME: &'static str = "image/png";
}

/// Audio bytes with a resolved mime type.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Decodes a data-URL or bare base64 image payload into a canonical
/// 3-channel image.
pub fn normalize_image(payload: &str) -> Result<CanonicalImage, MediaError> {
    let bytes = decode_base64_payload(payload)
        .map_err(MediaError::BadImageData)?;

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MediaError::BadImageData(format!("format detection: {e}")))?;
    let decoded = reader
        .decode()
        .map_err(|e| MediaError::BadImageData(format!("decode: {e}")))?;

    // Fixed 3-channel representation regardless of source color model.
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    let png_bytes = encode_png(&rgb)?;

    Ok(CanonicalImage {
        png_bytes,
        width,
        height,
    })
}

/// Normalizes a multipart audio upload. Mime resolution order: filename
/// extension table, uploader-declared mime, content sniff, generic binary.
pub fn normalize_audio_upload(
    bytes: Vec<u8>,
    filename: &str,
    declared_mime: Option<&str>,
) -> Result<NormalizedAudio, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::BadAudioData("empty audio upload".to_string()));
    }

    let mime_type = mime_for_audio_extension(filename)
        .map(str::to_string)
        .or_else(|| {
            declared_mime
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
        .or_else(|| infer::get(&bytes).map(|kind| kind.mime_type().to_string()))
        .unwrap_or_else(|| GENERIC_BINARY_MIME.to_string());

    Ok(NormalizedAudio { bytes, mime_type })
}

/// Normalizes a JSON audio payload carrying a data-URL or bare base64
/// string. Data-URL headers supply the mime type; bare base64 defaults to
/// [`GENERIC_AUDIO_MIME`].
pub fn normalize_audio_payload(payload: &str) -> Result<NormalizedAudio, MediaError> {
    let mime_type = data_url_mime(payload).unwrap_or(GENERIC_AUDIO_MIME).to_string();
    let bytes = decode_base64_payload(payload).map_err(MediaError::BadAudioData)?;
    Ok(NormalizedAudio { bytes, mime_type })
}

/// Strips a `data:*;base64,` prefix when present and decodes the base64
/// body. Errors are returned as plain strings for the caller to wrap.
fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, String> {
    let data = match payload.split_once(',') {
        Some((header, rest)) if header.starts_with("data:") => rest,
        _ => payload,
    };
    let data = data.trim();
    if data.is_empty() {
        return Err("empty payload".to_string());
    }
    let bytes = BASE64.decode(data).map_err(|e| format!("base64: {e}"))?;
    if bytes.is_empty() {
        return Err("decoded to zero bytes".to_string());
    }
    Ok(bytes)
}

/// Reads the mime type from a data-URL header, between `:` and the first
/// `;` (or `,` when no parameters are present).
fn data_url_mime(payload: &str) -> Option<&str> {
    let rest = payload.strip_prefix("data:")?;
    let header = rest.split(',').next()?;
    let mime = header.split(';').next()?.trim();
    if mime.is_empty() { None } else { Some(mime) }
}

/// Fixed extension→mime table for audio uploads.
fn mime_for_audio_extension(filename: &str) -> Option<&'static str> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?;

    match ext.to_ascii_lowercase().as_str() {
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "aac" => Some("audio/aac"),
        "ogg" | "oga" => Some("audio/ogg"),
        "opus" => Some("audio/opus"),
        "flac" => Some("audio/flac"),
        "webm" => Some("audio/webm"),
        _ => None,
    }
}

fn encode_png(rgb: &image::RgbImage) -> Result<Vec<u8>, MediaError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive);
    let (w, h) = rgb.dimensions();
    encoder
        .write_image(rgb.as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| MediaError::BadImageData(format!("encode: {e}")))?;
    Ok(buf)
}
