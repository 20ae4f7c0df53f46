//! Removal of the dark-blue sidebar the charting site renders along the right
//! edge of some chart images.
//!
//! Detection is a cheap single-row check: sample the right-edge pixel at the
//! vertical midpoint, and if it is sidebar-coloured walk left until the colour
//! changes. Per-channel tolerance absorbs anti-aliasing and compression noise
//! at the sidebar's edge.

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::{debug, info};

pub const SIDEBAR_COLOR: [u8; 3] = [14, 38, 62];
pub const COLOR_TOLERANCE: u8 = 5;
pub const MAX_SCAN_PX: u32 = 200;

#[derive(Debug, Clone)]
pub struct SidebarCropper {
    pub color: [u8; 3],
    /// Maximum absolute difference allowed on each channel, inclusive.
    pub tolerance: u8,
    /// How far left of the right edge the boundary search may go. Sidebars
    /// wider than this are left alone rather than cropped unboundedly.
    pub max_scan_px: u32,
}

impl Default for SidebarCropper {
    fn default() -> Self {
        Self {
            color: SIDEBAR_COLOR,
            tolerance: COLOR_TOLERANCE,
            max_scan_px: MAX_SCAN_PX,
        }
    }
}

impl SidebarCropper {
    /// Crop the sidebar from the image at `path`, overwriting it in place.
    /// Returns `true` only when the file was rewritten.
    pub fn process(&self, path: &Path) -> Result<bool> {
        let img = image::open(path)
            .with_context(|| format!("failed to decode image {}", path.display()))?;

        let Some(crop_width) = self.detect(&img) else {
            return Ok(false);
        };

        let (width, height) = img.dimensions();
        info!(
            "Cropping sidebar from {}: width {} -> {}",
            path.display(),
            width,
            crop_width
        );

        let cropped = img.crop_imm(0, 0, crop_width, height);
        let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Png);
        cropped
            .save_with_format(path, format)
            .with_context(|| format!("failed to write cropped image {}", path.display()))?;

        Ok(true)
    }

    /// Width the image should be cropped to, or `None` when no sidebar is
    /// present or no boundary was found within `max_scan_px`.
    pub fn detect(&self, img: &DynamicImage) -> Option<u32> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let mid_y = height / 2;
        if !self.matches(img, width - 1, mid_y) {
            return None;
        }

        let scan = self.max_scan_px.min(width);
        for offset in 0..scan {
            let x = width - 1 - offset;
            if !self.matches(img, x, mid_y) {
                return Some(x + 1);
            }
        }

        debug!(
            "sidebar colour spans the full {}px scan window; leaving image untouched",
            scan
        );
        None
    }

    fn matches(&self, img: &DynamicImage, x: u32, y: u32) -> bool {
        let pixel = img.get_pixel(x, y);
        pixel.0[..3]
            .iter()
            .zip(self.color.iter())
            .all(|(&actual, &expected)| actual.abs_diff(expected) <= self.tolerance)
    }
}
