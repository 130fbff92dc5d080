use crate::decoder::SymbolDecoder;
use crate::error::CaptureError;
use crate::frame::Frame;
use base64::{engine::general_purpose::STANDARD, Engine};

const DATA_URL_PREFIX: &[u8] = b"data:";

/// Strip a `data:<mime>;base64,` wrapper if present.
fn unwrap_data_url(bytes: &[u8]) -> Result<Vec<u8>, CaptureError> {
    if !bytes.starts_with(DATA_URL_PREFIX) {
        return Ok(bytes.to_vec());
    }
    let comma = bytes
        .iter()
        .position(|b| *b == b',')
        .ok_or_else(|| CaptureError::ImageUnreadable("data URL without payload".to_string()))?;
    let header = &bytes[..comma];
    if !header.ends_with(b";base64") {
        return Err(CaptureError::ImageUnreadable(
            "only base64 data URLs are supported".to_string(),
        ));
    }
    let payload: Vec<u8> = bytes[comma + 1..]
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(payload)
        .map_err(|e| CaptureError::ImageUnreadable(e.to_string()))
}

/// Decode an encoded picture (or data URL) into a luma frame.
fn rasterize(bytes: &[u8]) -> Result<Frame, CaptureError> {
    let raw = unwrap_data_url(bytes)?;
    let img = image::load_from_memory(&raw)
        .map_err(|e| CaptureError::ImageUnreadable(e.to_string()))?
        .to_luma8();
    Ok(Frame::from_luma(&img))
}

/// Run the decoder once over a still picture.
pub fn decode_still_image(
    decoder: &dyn SymbolDecoder,
    bytes: &[u8],
) -> Result<Option<String>, CaptureError> {
    let frame = rasterize(bytes)?;
    let token = decoder.decode(&frame);
    match &token {
        Some(_) => tracing::info!(width = frame.width(), height = frame.height(), "symbol decoded from image"),
        None => tracing::info!("no symbol found in image"),
    }
    Ok(token)
}
