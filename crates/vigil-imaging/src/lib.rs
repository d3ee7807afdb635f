//! vigil-imaging: Grayscale image handling for the face-matching engine.
//!
//! Decodes encoded photos into 8-bit grayscale frames and provides the
//! resampling and local filters the descriptor extractor is built on.

pub mod filter;
pub mod frame;

pub use filter::{clahe_enhance, gaussian_blur_3x3, sobel, Gradients};
pub use frame::{Frame, FrameError, Rect};
