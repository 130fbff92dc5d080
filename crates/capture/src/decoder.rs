use crate::frame::Frame;

/// Optical symbol decoder: one frame in, the encoded text out when a symbol is found.
///
/// `None` is a decode miss, not an error.
pub trait SymbolDecoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> Option<String>;
}

impl<F> SymbolDecoder for F
where
    F: Fn(&Frame) -> Option<String> + Send + Sync,
{
    fn decode(&self, frame: &Frame) -> Option<String> {
        self(frame)
    }
}

/// QR decoder backed by `rqrr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDecoder;

impl SymbolDecoder for QrDecoder {
    fn decode(&self, frame: &Frame) -> Option<String> {
        if frame.is_empty() {
            return None;
        }
        let width = frame.width() as usize;
        let luma = frame.luma();
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, frame.height() as usize, |x, y| {
                luma[y * width + x]
            });
        prepared
            .detect_grids()
            .into_iter()
            .find_map(|grid| match grid.decode() {
                Ok((_meta, content)) if !content.is_empty() => Some(content),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "qr grid found but not decodable");
                    None
                }
            })
    }
}
