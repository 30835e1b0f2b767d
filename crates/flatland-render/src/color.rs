use std::ops::Mul;

/// Linear RGBA tint, one `vec4` per instance in the color attribute.
///
/// ```
/// use flatland_render::Color;
///
/// let ember = Color::from_hex(0xFF8800FF);
/// let faded = ember.with_alpha(0.5);
/// assert_eq!(faded.to_array()[3], 0.5);
/// assert_eq!(Color::WHITE * ember, ember);
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a packed `0xRRGGBBAA` value.
    pub fn from_hex(rgba: u32) -> Self {
        let channel = |shift: u32| ((rgba >> shift) & 0xFF) as f32 / 255.0;
        Self::rgba(channel(24), channel(16), channel(8), channel(0))
    }

    pub const fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    /// Fully transparent tints draw nothing; freed batch slots use this.
    pub fn is_invisible(self) -> bool {
        self.a <= 0.0
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Component-wise modulation, the way a tint combines with a texel.
impl Mul for Color {
    type Output = Color;

    fn mul(self, rhs: Color) -> Color {
        Color::rgba(self.r * rhs.r, self.g * rhs.g, self.b * rhs.b, self.a * rhs.a)
    }
}

impl From<[f32; 4]> for Color {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self::rgba(r, g, b, a)
    }
}
