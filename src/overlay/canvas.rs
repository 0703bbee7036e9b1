//! CPU overlay canvas
//!
//! An RGBA surface the compositor draws the active mask into. It starts
//! transparent each frame and is uploaded to the GPU as the overlay
//! texture, alpha-blended over the mirrored video quad.

use crate::mask::MaskImage;
use crate::overlay::placement::PlacementRect;

/// RGBA8 drawing surface sized to the video's native dimensions
pub struct Canvas {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0u8; (width * height * 4) as usize],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Resize to match the video's native size. Contents are cleared.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            self.pixels = vec![0u8; (width * height * 4) as usize];
        }
    }

    /// Reset every pixel to transparent
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Draw `image` scaled into `rect`, alpha-over, clipped to the
    /// canvas bounds. Off-surface portions of the rectangle are simply
    /// not drawn.
    pub fn draw_image(&mut self, image: &MaskImage, rect: PlacementRect) {
        if rect.width <= 0.0 || rect.height <= 0.0 || image.width == 0 || image.height == 0 {
            return;
        }

        let x0 = rect.x.floor().max(0.0) as i64;
        let y0 = rect.y.floor().max(0.0) as i64;
        let x1 = ((rect.x + rect.width).ceil() as i64).min(self.width as i64);
        let y1 = ((rect.y + rect.height).ceil() as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        for dy in y0..y1 {
            for dx in x0..x1 {
                // Map the destination pixel back into source space
                let u = (dx as f32 - rect.x) / rect.width;
                let v = (dy as f32 - rect.y) / rect.height;
                let sx = ((u * image.width as f32) as u32).min(image.width - 1);
                let sy = ((v * image.height as f32) as u32).min(image.height - 1);
                let src_idx = ((sy * image.width + sx) * 4) as usize;
                let dst_idx = ((dy as u32 * self.width + dx as u32) * 4) as usize;

                let sa = image.pixels[src_idx + 3] as u32;
                if sa == 0 {
                    continue;
                }
                for c in 0..3 {
                    let s = image.pixels[src_idx + c] as u32;
                    let d = self.pixels[dst_idx + c] as u32;
                    self.pixels[dst_idx + c] = ((s * sa + d * (255 - sa)) / 255) as u8;
                }
                let da = self.pixels[dst_idx + 3] as u32;
                self.pixels[dst_idx + 3] = (sa + da * (255 - sa) / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> MaskImage {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        MaskImage {
            pixels,
            width,
            height,
        }
    }

    fn pixel(canvas: &Canvas, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * canvas.width() + x) * 4) as usize;
        canvas.pixels()[i..i + 4].try_into().unwrap()
    }

    #[test]
    fn clear_resets_to_transparent() {
        let mut canvas = Canvas::new(8, 8);
        let img = solid_image(2, 2, [255, 0, 0, 255]);
        canvas.draw_image(
            &img,
            PlacementRect {
                x: 0.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
            },
        );
        assert_eq!(pixel(&canvas, 4, 4), [255, 0, 0, 255]);
        canvas.clear();
        assert_eq!(pixel(&canvas, 4, 4), [0, 0, 0, 0]);
    }

    #[test]
    fn blit_is_clipped_to_the_surface() {
        let mut canvas = Canvas::new(10, 10);
        let img = solid_image(4, 4, [0, 255, 0, 255]);
        // Rectangle hangs off the left and top edges
        canvas.draw_image(
            &img,
            PlacementRect {
                x: -5.0,
                y: -5.0,
                width: 10.0,
                height: 10.0,
            },
        );
        assert_eq!(pixel(&canvas, 0, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&canvas, 4, 4), [0, 255, 0, 255]);
        assert_eq!(pixel(&canvas, 5, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn fully_off_surface_rect_draws_nothing() {
        let mut canvas = Canvas::new(10, 10);
        let img = solid_image(4, 4, [0, 255, 0, 255]);
        canvas.draw_image(
            &img,
            PlacementRect {
                x: 50.0,
                y: 50.0,
                width: 10.0,
                height: 10.0,
            },
        );
        assert!(canvas.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn transparent_source_pixels_leave_the_destination_alone() {
        let mut canvas = Canvas::new(4, 4);
        let opaque = solid_image(4, 4, [10, 20, 30, 255]);
        canvas.draw_image(
            &opaque,
            PlacementRect {
                x: 0.0,
                y: 0.0,
                width: 4.0,
                height: 4.0,
            },
        );
        let clear = solid_image(4, 4, [200, 200, 200, 0]);
        canvas.draw_image(
            &clear,
            PlacementRect {
                x: 0.0,
                y: 0.0,
                width: 4.0,
                height: 4.0,
            },
        );
        assert_eq!(pixel(&canvas, 1, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn resize_changes_dimensions_and_clears() {
        let mut canvas = Canvas::new(4, 4);
        let img = solid_image(2, 2, [255, 255, 255, 255]);
        canvas.draw_image(
            &img,
            PlacementRect {
                x: 0.0,
                y: 0.0,
                width: 4.0,
                height: 4.0,
            },
        );
        canvas.resize(6, 8);
        assert_eq!(canvas.width(), 6);
        assert_eq!(canvas.height(), 8);
        assert!(canvas.pixels().iter().all(|&b| b == 0));
    }
}
