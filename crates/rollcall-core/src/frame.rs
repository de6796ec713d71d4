//! Grayscale frame type: decoding, cropping, resampling and conversion to
//! OpenCV matrices.

use crate::types::BoundingBox;
use image::{ColorType, GrayImage, ImageFormat};
use opencv::core::{Mat, Scalar, Size, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;
use std::io::Cursor;
use std::path::Path;

/// An 8-bit grayscale image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("empty image payload")]
    EmptyPayload,
    #[error("region {0:?} lies outside the frame")]
    EmptyRegion(BoundingBox),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("expected an 8-bit single-channel matrix, got type {0}")]
    UnsupportedMat(i32),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Decode an encoded image (PNG, JPEG, ...) and convert it to grayscale.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::EmptyPayload);
        }
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img.to_luma8()))
    }

    /// Read an image file from disk as grayscale.
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path)?;
        Ok(Self::from_image(img.to_luma8()))
    }

    pub fn from_image(img: GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: img.into_raw(),
            width,
            height,
        }
    }

    /// Write the frame to `path`; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<(), FrameError> {
        image::save_buffer(path, &self.data, self.width, self.height, ColorType::L8)?;
        Ok(())
    }

    /// Encode the frame as PNG bytes.
    pub fn encode_png(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut buf,
            &self.data,
            self.width,
            self.height,
            ColorType::L8,
            ImageFormat::Png,
        )?;
        Ok(buf.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Copy out the part of `region` that overlaps the frame.
    pub fn crop(&self, region: &BoundingBox) -> Result<GrayFrame, FrameError> {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return Err(FrameError::EmptyRegion(*region));
        }

        let w = (x1 - x0) as usize;
        let mut data = Vec::with_capacity(w * (y1 - y0) as usize);
        for y in y0..y1 {
            let start = y as usize * self.width as usize + x0 as usize;
            data.extend_from_slice(&self.data[start..start + w]);
        }

        Ok(GrayFrame {
            data,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    /// Resize with OpenCV's bilinear interpolation (`INTER_LINEAR`).
    ///
    /// Training and recognition both go through here, so a face is resampled
    /// identically on either side. Resizing to the current dimensions returns
    /// an identical copy.
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<GrayFrame, FrameError> {
        if (new_width, new_height) == (self.width, self.height) {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Err(FrameError::EmptyRegion(BoundingBox::new(0, 0, self.width, self.height)));
        }

        let src = self.to_mat()?;
        let mut dst = Mat::default();
        imgproc::resize(
            &src,
            &mut dst,
            Size::new(new_width as i32, new_height as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
        Self::from_mat(&dst)
    }

    /// Copy into a single-channel 8-bit OpenCV matrix.
    pub fn to_mat(&self) -> Result<Mat, FrameError> {
        let mut mat = Mat::new_rows_cols_with_default(
            self.height as i32,
            self.width as i32,
            CV_8UC1,
            Scalar::all(0.0),
        )?;
        if !self.data.is_empty() {
            mat.data_bytes_mut()?.copy_from_slice(&self.data);
        }
        Ok(mat)
    }

    /// Copy out of a single-channel 8-bit OpenCV matrix.
    pub fn from_mat(mat: &Mat) -> Result<Self, FrameError> {
        if mat.typ() != CV_8UC1 {
            return Err(FrameError::UnsupportedMat(mat.typ()));
        }
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;
        if mat.empty() {
            return Self::new(Vec::new(), width, height);
        }
        let data = if mat.is_continuous() {
            mat.data_bytes()?.to_vec()
        } else {
            mat.try_clone()?.data_bytes()?.to_vec()
        };
        Self::new(data, width, height)
    }
}
