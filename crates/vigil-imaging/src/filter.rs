//! Local filters: CLAHE, 3×3 Gaussian blur and Sobel gradients.
//!
//! Border handling follows the reflect-101 convention (`dcb|abcd|cba`) so that
//! small kernels see plausible neighbours at the frame edge.

use crate::frame::Frame;

/// Apply Contrast-Limited Adaptive Histogram Equalization in place.
///
/// The frame is divided into a `tiles × tiles` grid. Each tile histogram is
/// clipped at `clip_limit` times the height of a uniform histogram, the excess
/// is redistributed evenly, and pixels are mapped through a bilinear blend of
/// the four nearest tile CDFs.
pub fn clahe_enhance(frame: &mut Frame, tiles: u32, clip_limit: f32) {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let t = tiles.max(1) as usize;
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        tracing::debug!(w, h, tiles, "frame smaller than CLAHE grid; skipping");
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                let line = &frame.data[y * w + col * tile_w..y * w + (col + 1) * tile_w];
                for &p in line {
                    hist[p as usize] += 1;
                }
            }

            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist + u32::from(i < leftover);
            }

            let mut cdf = [0f32; 256];
            let mut running = 0f32;
            for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
                running += count as f32;
                *slot = running;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    let last = (t - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, last);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, last);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let pixel = frame.data[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            frame.data[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Separable 3×3 Gaussian blur with the binomial kernel `[1, 2, 1] / 4`.
///
/// Integer arithmetic throughout, so the result is bit-exact across platforms.
pub fn gaussian_blur_3x3(frame: &Frame) -> Frame {
    let w = frame.width as usize;
    let h = frame.height as usize;

    let mut horizontal = vec![0u16; w * h];
    for y in 0..h {
        let row = &frame.data[y * w..(y + 1) * w];
        for x in 0..w {
            let l = row[reflect_101(x as isize - 1, w)] as u16;
            let c = row[x] as u16;
            let r = row[reflect_101(x as isize + 1, w)] as u16;
            horizontal[y * w + x] = l + 2 * c + r;
        }
    }

    let mut data = vec![0u8; w * h];
    for y in 0..h {
        let up = reflect_101(y as isize - 1, h);
        let down = reflect_101(y as isize + 1, h);
        for x in 0..w {
            let sum = horizontal[up * w + x] as u32
                + 2 * horizontal[y * w + x] as u32
                + horizontal[down * w + x] as u32;
            data[y * w + x] = ((sum + 8) / 16) as u8;
        }
    }

    Frame {
        data,
        width: frame.width,
        height: frame.height,
    }
}

/// Horizontal and vertical Sobel responses, one `f32` per pixel.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub gx: Vec<f32>,
    pub gy: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl Gradients {
    /// L1 gradient magnitude `|gx| + |gy|` at pixel index `i`.
    #[inline]
    pub fn l1_magnitude(&self, i: usize) -> f32 {
        self.gx[i].abs() + self.gy[i].abs()
    }

    /// Gradient orientation `atan2(gy, gx)` at pixel index `i`, in [-π, π].
    #[inline]
    pub fn orientation(&self, i: usize) -> f32 {
        self.gy[i].atan2(self.gx[i])
    }
}

/// 3×3 Sobel operator.
pub fn sobel(frame: &Frame) -> Gradients {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let px = |x: isize, y: isize| -> f32 {
        frame.data[reflect_101(y, h) * w + reflect_101(x, w)] as f32
    };

    let mut gx = vec![0f32; w * h];
    let mut gy = vec![0f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let i = y as usize * w + x as usize;
            gx[i] = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            gy[i] = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
        }
    }

    Gradients {
        gx,
        gy,
        width: frame.width,
        height: frame.height,
    }
}

/// Reflect an out-of-range index by one step (`-1 → 1`, `n → n - 2`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let i = if i < 0 { -i } else { i };
    let i = if i >= n { 2 * (n - 1) - i } else { i };
    i as usize
}
