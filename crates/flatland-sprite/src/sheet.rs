//! Grid sprite sheets and atlas frame rectangles.

/// A frame rectangle in normalised atlas coordinates.
///
/// `(x, y)` is the top-left corner, `(w, h)` the extent. Negative extents
/// sample the frame mirrored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

impl UvRect {
    /// The whole texture.
    pub const FULL: UvRect = UvRect::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Build a rectangle from a pixel region of a `texture_width` x
    /// `texture_height` texture.
    pub fn from_pixels(x: u32, y: u32, w: u32, h: u32, texture_width: u32, texture_height: u32) -> Self {
        let tw = texture_width.max(1) as f32;
        let th = texture_height.max(1) as f32;
        Self {
            x: x as f32 / tw,
            y: y as f32 / th,
            w: w as f32 / tw,
            h: h as f32 / th,
        }
    }

    /// Mirror the frame horizontally.
    pub fn flip_horizontal(&self) -> Self {
        Self {
            x: self.x + self.w,
            w: -self.w,
            ..*self
        }
    }

    /// Mirror the frame vertically.
    pub fn flip_vertical(&self) -> Self {
        Self {
            y: self.y + self.h,
            h: -self.h,
            ..*self
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

impl From<[f32; 4]> for UvRect {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Layout of uniformly sized frames in a grid.
///
/// Frames are indexed left-to-right, top-to-bottom, starting from 0.
///
/// ```
/// use flatland_sprite::{SpriteSheet, UvRect};
///
/// let sheet = SpriteSheet::new(32, 32, 4, 2);
/// assert_eq!(sheet.frame_count(), 8);
/// assert_eq!(sheet.frame(5), UvRect::new(0.25, 0.5, 0.25, 0.5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteSheet {
    /// Width of each frame in pixels
    pub sprite_width: u32,
    /// Height of each frame in pixels
    pub sprite_height: u32,
    pub columns: u32,
    pub rows: u32,
    /// Padding between frames in pixels
    pub padding: u32,
    /// Margin around the whole sheet in pixels
    pub margin: u32,
    pub texture_width: u32,
    pub texture_height: u32,
}

impl SpriteSheet {
    /// A tightly packed sheet; the texture size is derived from the grid.
    pub fn new(sprite_width: u32, sprite_height: u32, columns: u32, rows: u32) -> Self {
        Self {
            sprite_width,
            sprite_height,
            columns,
            rows,
            padding: 0,
            margin: 0,
            texture_width: sprite_width * columns,
            texture_height: sprite_height * rows,
        }
    }

    /// Set padding and margin, growing the texture size to fit.
    pub fn with_spacing(mut self, padding: u32, margin: u32) -> Self {
        self.padding = padding;
        self.margin = margin;
        self.texture_width = margin * 2
            + self.columns * self.sprite_width
            + self.columns.saturating_sub(1) * padding;
        self.texture_height =
            margin * 2 + self.rows * self.sprite_height + self.rows.saturating_sub(1) * padding;
        self
    }

    /// Override the texture size when the atlas has extra space.
    pub fn with_texture_size(mut self, width: u32, height: u32) -> Self {
        self.texture_width = width;
        self.texture_height = height;
        self
    }

    pub fn frame_count(&self) -> u32 {
        self.columns * self.rows
    }

    /// Frame rectangle by linear index. Indices past the end wrap around.
    pub fn frame(&self, index: u32) -> UvRect {
        let index = index % self.frame_count().max(1);
        let col = index % self.columns.max(1);
        let row = index / self.columns.max(1);
        self.frame_at(row, col)
    }

    pub fn frame_at(&self, row: u32, col: u32) -> UvRect {
        let x = self.margin + col * (self.sprite_width + self.padding);
        let y = self.margin + row * (self.sprite_height + self.padding);
        UvRect::from_pixels(
            x,
            y,
            self.sprite_width,
            self.sprite_height,
            self.texture_width,
            self.texture_height,
        )
    }

    /// Every frame in index order.
    pub fn frames(&self) -> impl Iterator<Item = UvRect> + '_ {
        (0..self.frame_count()).map(|i| self.frame(i))
    }
}
