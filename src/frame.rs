//! Per-device frame buffer.
//!
//! The frame is the single RGBA surface a device displays. Renderer layers
//! are blended onto it in z-order, the result is converted to hardware RGB
//! bytes, split into per-row wire segments, and latched with the
//! custom-frame effect. Exactly one frame exists per live device driver.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::blend::BlendMode;
use crate::color::Color;
use crate::layer::Layer;

/// One contiguous run of columns within a row, as sent on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowSegment {
    pub row: u8,
    pub start_col: u8,
    pub end_col: u8,
    pub rgb: Vec<u8>,
}

/// Snapshot of the last committed frame for preview consumers.
#[derive(Clone, Debug, Default)]
pub struct FrameSnapshot {
    pub width: usize,
    pub height: usize,
    pub rgb: Vec<u8>,
    pub seq: u64,
    pub timestamp_ms: u64,
}

pub struct Frame {
    width: usize,
    height: usize,
    rgba: Vec<Color>,
    background: Color,
    /// False until the first blit after a clear; the first layer becomes the
    /// composition base rather than being blended onto emptiness.
    has_base: bool,
    snapshot: FrameSnapshot,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "frame dimensions must be nonzero");
        Frame {
            width,
            height,
            rgba: vec![Color::TRANSPARENT; width * height],
            background: Color::BLACK,
            has_base: false,
            snapshot: FrameSnapshot {
                width,
                height,
                rgb: vec![0; width * height * 3],
                seq: 0,
                timestamp_ms: 0,
            },
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Clear the surface and set the background for the next composition.
    pub fn clear(&mut self, background: Option<Color>) {
        self.rgba.fill(Color::TRANSPARENT);
        self.background = background.unwrap_or(Color::BLACK);
        self.has_base = false;
    }

    /// Blend a layer onto the frame.
    ///
    /// The first layer after a clear is copied in as the composition base;
    /// its background color, if any, replaces the frame background.
    /// Subsequent layers are blended channel-wise with the layer's blend
    /// mode, with alpha composed as `min(base_a, layer_a) * opacity`.
    pub fn blit(&mut self, layer: &Layer, mode: BlendMode, opacity: f32) {
        debug_assert_eq!(layer.width(), self.width);
        debug_assert_eq!(layer.height(), self.height);

        if !self.has_base {
            self.rgba.copy_from_slice(layer.pixels());
            if let Some(bg) = layer.background_color {
                self.background = bg;
            }
            self.has_base = true;
            return;
        }

        let opacity = opacity.clamp(0.0, 1.0);
        for (dst, src) in self.rgba.iter_mut().zip(layer.pixels()) {
            let comp_alpha = dst.a.min(src.a) * opacity;
            let new_alpha = dst.a + (1.0 - dst.a) * comp_alpha;
            let ratio = if new_alpha > 0.0 {
                comp_alpha / new_alpha
            } else {
                0.0
            };

            let mix = |base: f32, layer_c: f32| {
                let blended = mode.apply(base, layer_c);
                let blended = if blended.is_nan() { 0.0 } else { blended };
                blended * ratio + base * (1.0 - ratio)
            };

            *dst = Color::new(
                mix(dst.r, src.r),
                mix(dst.g, src.g),
                mix(dst.b, src.b),
                dst.a,
            );
        }
    }

    /// Convert the composed surface to hardware RGB bytes: gamut clamp,
    /// alpha-over the background, scale with round-to-nearest.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height * 3);
        for px in &self.rgba {
            let inv = 1.0 - px.a;
            let composited = Color::rgb(
                inv * self.background.r + px.a * px.r,
                inv * self.background.g + px.a * px.g,
                inv * self.background.b + px.a * px.b,
            );
            out.extend_from_slice(&composited.to_rgb8());
        }
        out
    }

    /// Split the frame into per-row wire segments.
    ///
    /// Rows wider than `max_cols` are emitted as contiguous left-to-right
    /// segments sharing the row index. `row_offsets` shifts the hardware
    /// start column of each row where the physical matrix is indented.
    pub fn wire_rows(&self, max_cols: usize, row_offsets: &[u8]) -> Vec<RowSegment> {
        let rgb = self.to_rgb_bytes();
        let mut segments = Vec::new();

        for row in 0..self.height {
            let offset = row_offsets.get(row).copied().unwrap_or(0) as usize;
            let row_base = row * self.width * 3;

            let mut col = 0;
            while col < self.width {
                let seg_width = max_cols.min(self.width - col);
                let start = offset + col;
                let end = start + seg_width - 1;
                let data_start = row_base + col * 3;
                segments.push(RowSegment {
                    row: row as u8,
                    start_col: start as u8,
                    end_col: end as u8,
                    rgb: rgb[data_start..data_start + seg_width * 3].to_vec(),
                });
                col += seg_width;
            }
        }
        segments
    }

    /// Record the composed image as the latest committed frame.
    pub fn mark_committed(&mut self) {
        self.snapshot.rgb = self.to_rgb_bytes();
        self.snapshot.seq += 1;
        self.snapshot.timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_blit_is_the_base() {
        let mut frame = Frame::new(4, 2);
        let mut layer = Layer::new(4, 2);
        layer.put(0, 0, Color::RED);

        frame.clear(None);
        frame.blit(&layer, BlendMode::Screen, 1.0);

        let rgb = frame.to_rgb_bytes();
        assert_eq!(&rgb[0..3], &[255, 0, 0]);
        // untouched pixels composite to the black background
        assert_eq!(&rgb[3..6], &[0, 0, 0]);
    }

    #[test]
    fn screen_blend_lightens() {
        let mut frame = Frame::new(1, 1);
        let mut base = Layer::new(1, 1);
        base.put(0, 0, Color::new(0.5, 0.5, 0.5, 1.0));
        let mut top = Layer::new(1, 1);
        top.put(0, 0, Color::new(0.5, 0.5, 0.5, 1.0));

        frame.clear(None);
        frame.blit(&base, BlendMode::Screen, 1.0);
        frame.blit(&top, BlendMode::Screen, 1.0);

        let rgb = frame.to_rgb_bytes();
        // screen(0.5, 0.5) = 0.75
        assert_eq!(rgb[0], 191);
    }

    #[test]
    fn zero_opacity_layer_is_invisible() {
        let mut frame = Frame::new(1, 1);
        let mut base = Layer::new(1, 1);
        base.put(0, 0, Color::RED);
        let mut top = Layer::new(1, 1);
        top.put(0, 0, Color::GREEN);

        frame.clear(None);
        frame.blit(&base, BlendMode::Screen, 1.0);
        frame.blit(&top, BlendMode::Normal, 0.0);

        assert_eq!(&frame.to_rgb_bytes()[0..3], &[255, 0, 0]);
    }

    #[test]
    fn narrow_matrix_is_one_segment_per_row() {
        let frame = Frame::new(22, 6);
        let rows = frame.wire_rows(24, &[]);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].row, 0);
        assert_eq!(rows[0].start_col, 0);
        assert_eq!(rows[0].end_col, 21);
        assert_eq!(rows[0].rgb.len(), 22 * 3);
    }

    #[test]
    fn wide_matrix_splits_left_to_right() {
        let frame = Frame::new(25, 6);
        let rows = frame.wire_rows(24, &[]);
        assert_eq!(rows.len(), 12);

        assert_eq!(rows[0].row, 0);
        assert_eq!(rows[0].start_col, 0);
        assert_eq!(rows[0].end_col, 23);
        assert_eq!(rows[1].row, 0);
        assert_eq!(rows[1].start_col, 24);
        assert_eq!(rows[1].end_col, 24);
        assert_eq!(rows[1].rgb.len(), 3);
    }

    #[test]
    fn row_offsets_shift_start_columns() {
        let frame = Frame::new(10, 2);
        let rows = frame.wire_rows(24, &[1, 2]);
        assert_eq!(rows[0].start_col, 1);
        assert_eq!(rows[0].end_col, 10);
        assert_eq!(rows[1].start_col, 2);
        assert_eq!(rows[1].end_col, 11);
    }

    #[test]
    fn commit_snapshot_advances_seq() {
        let mut frame = Frame::new(2, 2);
        assert_eq!(frame.snapshot().seq, 0);
        frame.mark_committed();
        let snap = frame.snapshot();
        assert_eq!(snap.seq, 1);
        assert_eq!(snap.rgb.len(), 2 * 2 * 3);
        assert!(snap.timestamp_ms > 0);
    }

    #[test]
    fn per_layer_background_shows_through() {
        let mut frame = Frame::new(1, 1);
        let mut base = Layer::new(1, 1);
        base.background_color = Some(Color::BLUE);
        // fully transparent layer: the background is all that shows
        frame.clear(None);
        frame.blit(&base, BlendMode::Screen, 1.0);
        assert_eq!(&frame.to_rgb_bytes()[0..3], &[0, 0, 255]);
    }
}
