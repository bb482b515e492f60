use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::RgbaImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn from_rgb(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as u8,
            g: ((rgb >> 8) & 0xff) as u8,
            b: (rgb & 0xff) as u8,
        }
    }

    pub const fn from_array([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }

    /// softbuffer expects `0x00RRGGBB`.
    pub const fn pack(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    fn unpack(px: u32) -> Self {
        Self::from_rgb(px)
    }

    fn blend(self, over: Color, alpha: f32) -> Self {
        let a = alpha.clamp(0.0, 1.0);
        let mix = |dst: u8, src: u8| -> u8 {
            (dst as f32 + (src as f32 - dst as f32) * a).round() as u8
        };
        Self {
            r: mix(self.r, over.r),
            g: mix(self.g, over.g),
            b: mix(self.b, over.b),
        }
    }
}

/// Mutable view over a softbuffer frame.
pub struct Canvas<'a> {
    pixels: &'a mut [u32],
    width: u32,
    height: u32,
}

impl<'a> Canvas<'a> {
    pub fn new(pixels: &'a mut [u32], width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self {
            pixels,
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

    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color.pack());
    }

    /// Copies `image` with its top-left corner at `(x, y)`, clipped to the canvas.
    /// Translucent pixels are blended over what is already there.
    pub fn blit(&mut self, image: &RgbaImage, x: i64, y: i64) {
        let (iw, ih) = image.dimensions();
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + iw as i64).min(self.width as i64);
        let y1 = (y + ih as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.width as usize;
        for cy in y0..y1 {
            let sy = (cy - y) as u32;
            let row = cy as usize * stride;
            for cx in x0..x1 {
                let sx = (cx - x) as u32;
                let [r, g, b, a] = image.get_pixel(sx, sy).0;
                let idx = row + cx as usize;
                let src = Color { r, g, b };
                self.pixels[idx] = match a {
                    255 => src.pack(),
                    0 => continue,
                    _ => Color::unpack(self.pixels[idx])
                        .blend(src, a as f32 / 255.0)
                        .pack(),
                };
            }
        }
    }

    pub fn fill_rect(&mut self, x: i64, y: i64, w: u32, h: u32, color: Color, alpha: f32) {
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + w as i64).min(self.width as i64);
        let y1 = (y + h as i64).min(self.height as i64);
        let stride = self.width as usize;
        for cy in y0..y1 {
            for cx in x0..x1 {
                let idx = cy as usize * stride + cx as usize;
                self.pixels[idx] = Color::unpack(self.pixels[idx]).blend(color, alpha).pack();
            }
        }
    }

    /// Draws one line of text with its baseline-origin box at `(x, y)` (top-left).
    pub fn draw_text(&mut self, font: &FontArc, text: &str, px: f32, x: f32, y: f32, color: Color) {
        let scale = PxScale::from(px);
        let scaled = font.as_scaled(scale);
        let mut caret = point(x, y + scaled.ascent());
        let mut previous = None;
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                caret.x += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, caret);
            caret.x += scaled.h_advance(id);
            previous = Some(id);
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px_x = bounds.min.x as i64 + gx as i64;
                let px_y = bounds.min.y as i64 + gy as i64;
                if px_x < 0 || px_y < 0 || px_x >= self.width as i64 || px_y >= self.height as i64 {
                    return;
                }
                let idx = px_y as usize * self.width as usize + px_x as usize;
                self.pixels[idx] = Color::unpack(self.pixels[idx]).blend(color, coverage).pack();
            });
        }
    }
}

pub fn text_width(font: &FontArc, text: &str, px: f32) -> f32 {
    let scaled = font.as_scaled(PxScale::from(px));
    let mut width = 0.0;
    let mut previous = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

pub fn ease_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

/// Horizontal offsets of the outgoing and incoming page during a slide.
///
/// Moving forward the outgoing page leaves to the left and the incoming one
/// enters from the right; backward is mirrored.
pub fn slide_offsets(progress: f32, width: u32, forward: bool) -> (i64, i64) {
    let shift = (ease_out_cubic(progress) * width as f32).round() as i64;
    let w = width as i64;
    if forward {
        (-shift, w - shift)
    } else {
        (shift, shift - w)
    }
}
