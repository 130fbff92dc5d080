use image::GrayImage;

/// 8-bit luma raster, reused across sampling ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl Frame {
    pub fn from_luma(img: &GrayImage) -> Self {
        let mut frame = Frame::default();
        frame.copy_from_luma(img);
        frame
    }

    /// Resize in place, keeping the allocation when it is large enough.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.luma.resize(width as usize * height as usize, 0);
    }

    pub fn copy_from_luma(&mut self, img: &GrayImage) {
        self.resize(img.width(), img.height());
        self.luma.copy_from_slice(img.as_raw());
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn luma(&self) -> &[u8] {
        &self.luma
    }

    pub fn luma_mut(&mut self) -> &mut [u8] {
        &mut self.luma
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_reuses_buffer() {
        let mut frame = Frame::default();
        frame.resize(4, 4);
        let cap = frame.luma.capacity();
        frame.resize(2, 2);
        assert_eq!(frame.luma().len(), 4);
        assert_eq!(frame.luma.capacity(), cap);
    }

    #[test]
    fn copies_luma_image() {
        let img = GrayImage::from_pixel(3, 2, image::Luma([7]));
        let frame = Frame::from_luma(&img);
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert!(frame.luma().iter().all(|p| *p == 7));
    }
}
