//! Grayscale frame type: decoding, cropping and bilinear resampling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image has zero width or height")]
    Empty,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Axis-aligned pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// An 8-bit grayscale image, row-major, one byte per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an existing grayscale buffer of `width * height` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame where every pixel has the same value.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
        }
    }

    /// Decode any format supported by the `image` crate and convert it to
    /// 8-bit luma. Multi-channel inputs are collapsed with Rec. 601 weights.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let luma = image::load_from_memory(bytes)?.to_luma8();
        let (width, height) = luma.dimensions();
        tracing::trace!(width, height, "decoded image to grayscale");
        Self::new(luma.into_raw(), width, height)
    }

    /// Copy out the part of `rect` that lies inside the frame.
    ///
    /// The rectangle is clamped to the frame bounds first; a rectangle that
    /// misses the frame entirely yields `FrameError::Empty`.
    pub fn crop(&self, rect: Rect) -> Result<Frame, FrameError> {
        let x0 = rect.x.min(self.width);
        let y0 = rect.y.min(self.height);
        let x1 = rect.x.saturating_add(rect.width).min(self.width);
        let y1 = rect.y.saturating_add(rect.height).min(self.height);
        let (w, h) = (x1 - x0, y1 - y0);
        if w == 0 || h == 0 {
            return Err(FrameError::Empty);
        }

        let stride = self.width as usize;
        let mut data = Vec::with_capacity(w as usize * h as usize);
        for y in y0..y1 {
            let start = y as usize * stride + x0 as usize;
            data.extend_from_slice(&self.data[start..start + w as usize]);
        }
        Ok(Frame {
            data,
            width: w,
            height: h,
        })
    }

    /// Resample to `new_width × new_height` with bilinear interpolation
    /// (pixel-center aligned). Same-size requests return a copy; an empty
    /// source yields a black frame of the requested size.
    pub fn resize_bilinear(&self, new_width: u32, new_height: u32) -> Frame {
        if new_width == self.width && new_height == self.height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Frame::filled(new_width, new_height, 0);
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let (nw, nh) = (new_width as usize, new_height as usize);
        let scale_x = w as f32 / nw as f32;
        let scale_y = h as f32 / nh as f32;

        let mut out = vec![0u8; nw * nh];
        for y in 0..nh {
            let src_y = (y as f32 + 0.5) * scale_y - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, h as i32 - 1) as usize;
            let y1 = (y0 + 1).min(h - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..nw {
                let src_x = (x as f32 + 0.5) * scale_x - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, w as i32 - 1) as usize;
                let x1 = (x0 + 1).min(w - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let tl = self.data[y0 * w + x0] as f32;
                let tr = self.data[y0 * w + x1] as f32;
                let bl = self.data[y1 * w + x0] as f32;
                let br = self.data[y1 * w + x1] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                out[y * nw + x] = val.round().clamp(0.0, 255.0) as u8;
            }
        }

        Frame {
            data: out,
            width: new_width,
            height: new_height,
        }
    }
}
