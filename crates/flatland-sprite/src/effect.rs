//! Shader effect classes and their per-sprite instances.
//!
//! An [`EffectClass`] is declared once with a list of named fields. Every
//! field accessor goes through the class's name lookup table, built by the
//! builder, so instances stay a flat `Vec<f32>`.
//!
//! ```
//! use flatland_sprite::EffectClass;
//!
//! let flash = EffectClass::builder("flash")
//!     .float("amount", 0.0)
//!     .vec3("tint", [1.0, 1.0, 1.0])
//!     .color_node(|args| {
//!         format!(
//!             "vec4<f32>(mix({c}.rgb, {t}, {a}), {c}.a)",
//!             c = args.color,
//!             t = args.field("tint"),
//!             a = args.field("amount"),
//!         )
//!     })
//!     .build();
//!
//! let mut instance = flash.instance();
//! instance.set_float("amount", 0.75);
//! assert_eq!(instance.get_float("amount"), Some(0.75));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flatland_core::alloc::HashMap;

/// Process-unique identifier of an [`EffectClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectClassId(u32);

impl EffectClassId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shape of one effect field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectFieldKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl EffectFieldKind {
    /// Number of packed floats the field occupies.
    pub const fn size(self) -> usize {
        match self {
            EffectFieldKind::Float => 1,
            EffectFieldKind::Vec2 => 2,
            EffectFieldKind::Vec3 => 3,
            EffectFieldKind::Vec4 => 4,
        }
    }

    pub const fn wgsl_type(self) -> &'static str {
        match self {
            EffectFieldKind::Float => "f32",
            EffectFieldKind::Vec2 => "vec2<f32>",
            EffectFieldKind::Vec3 => "vec3<f32>",
            EffectFieldKind::Vec4 => "vec4<f32>",
        }
    }
}

/// One declared field of an effect class.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectField {
    pub name: String,
    pub kind: EffectFieldKind,
    /// Offset of the field inside the effect's own data block.
    pub offset: usize,
    default: [f32; 4],
}

impl EffectField {
    pub fn default_value(&self) -> &[f32] {
        &self.default[..self.kind.size()]
    }
}

/// Inputs handed to a color node when the material shader is generated.
///
/// Every value is a WGSL expression.
pub struct ColorNodeArgs<'a> {
    /// The color computed so far.
    pub color: &'a str,
    /// The sprite's texture coordinate.
    pub uv: &'a str,
    pub(crate) fields: &'a [(String, String)],
}

impl ColorNodeArgs<'_> {
    /// Expression reading `name` from the packed effect buffer, or `0.0` for
    /// an unknown field.
    pub fn field(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, expr)| expr.as_str())
            .unwrap_or("0.0")
    }
}

type ColorNodeFn = dyn Fn(&ColorNodeArgs<'_>) -> String + Send + Sync;

/// A named, reusable sprite effect.
pub struct EffectClass {
    id: EffectClassId,
    name: String,
    fields: Vec<EffectField>,
    lookup: HashMap<String, usize>,
    data_size: usize,
    color_node: Option<Box<ColorNodeFn>>,
}

impl fmt::Debug for EffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("has_color_node", &self.color_node.is_some())
            .finish()
    }
}

impl EffectClass {
    pub fn builder(name: impl Into<String>) -> EffectClassBuilder {
        EffectClassBuilder {
            name: name.into(),
            fields: Vec::new(),
            color_node: None,
        }
    }

    pub fn id(&self) -> EffectClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[EffectField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&EffectField> {
        self.lookup.get(name).map(|&i| &self.fields[i])
    }

    /// Total floats across all fields.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// The class's default data block.
    pub fn defaults(&self) -> Vec<f32> {
        let mut data = Vec::with_capacity(self.data_size);
        for field in &self.fields {
            data.extend_from_slice(field.default_value());
        }
        data
    }

    /// Produce the WGSL color expression for this effect, if it has a color node.
    pub fn color_expr(&self, args: &ColorNodeArgs<'_>) -> Option<String> {
        self.color_node.as_ref().map(|node| node(args))
    }

    /// A fresh instance holding the default values.
    pub fn instance(self: &Arc<Self>) -> EffectInstance {
        EffectInstance {
            class: Arc::clone(self),
            values: self.defaults(),
        }
    }
}

/// Builder for [`EffectClass`].
pub struct EffectClassBuilder {
    name: String,
    fields: Vec<(String, EffectFieldKind, [f32; 4])>,
    color_node: Option<Box<ColorNodeFn>>,
}

impl EffectClassBuilder {
    fn field(mut self, name: &str, kind: EffectFieldKind, default: [f32; 4]) -> Self {
        if self.fields.iter().any(|(existing, ..)| existing == name) {
            tracing::warn!("Effect '{}' declares field '{}' twice; keeping the first", self.name, name);
            return self;
        }
        self.fields.push((name.to_string(), kind, default));
        self
    }

    pub fn float(self, name: &str, default: f32) -> Self {
        self.field(name, EffectFieldKind::Float, [default, 0.0, 0.0, 0.0])
    }

    pub fn vec2(self, name: &str, default: [f32; 2]) -> Self {
        self.field(name, EffectFieldKind::Vec2, [default[0], default[1], 0.0, 0.0])
    }

    pub fn vec3(self, name: &str, default: [f32; 3]) -> Self {
        self.field(
            name,
            EffectFieldKind::Vec3,
            [default[0], default[1], default[2], 0.0],
        )
    }

    pub fn vec4(self, name: &str, default: [f32; 4]) -> Self {
        self.field(name, EffectFieldKind::Vec4, default)
    }

    /// The function that turns the incoming color into the effect's output.
    pub fn color_node(
        mut self,
        node: impl Fn(&ColorNodeArgs<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.color_node = Some(Box::new(node));
        self
    }

    pub fn build(self) -> Arc<EffectClass> {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut lookup = HashMap::new();
        let mut offset = 0;
        for (i, (name, kind, default)) in self.fields.into_iter().enumerate() {
            lookup.insert(name.clone(), i);
            fields.push(EffectField {
                name,
                kind,
                offset,
                default,
            });
            offset += kind.size();
        }
        Arc::new(EffectClass {
            id: EffectClassId::next(),
            name: self.name,
            fields,
            lookup,
            data_size: offset,
            color_node: self.color_node,
        })
    }
}

/// One sprite's use of an [`EffectClass`], holding its current field values.
#[derive(Debug, Clone)]
pub struct EffectInstance {
    class: Arc<EffectClass>,
    values: Vec<f32>,
}

impl PartialEq for EffectInstance {
    fn eq(&self, other: &Self) -> bool {
        self.class.id == other.class.id && self.values == other.values
    }
}

impl EffectInstance {
    pub fn class(&self) -> &Arc<EffectClass> {
        &self.class
    }

    pub fn class_id(&self) -> EffectClassId {
        self.class.id
    }

    /// The instance's data block, laid out like [`EffectClass::defaults`].
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Write `value` into the named field. Extra components are ignored and
    /// missing ones keep their current value. Returns `false` for an unknown
    /// field.
    pub fn set(&mut self, name: &str, value: &[f32]) -> bool {
        let Some(field) = self.class.field(name) else {
            tracing::trace!("Effect '{}' has no field '{}'", self.class.name, name);
            return false;
        };
        let len = value.len().min(field.kind.size());
        self.values[field.offset..field.offset + len].copy_from_slice(&value[..len]);
        true
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        let field = self.class.field(name)?;
        Some(&self.values[field.offset..field.offset + field.kind.size()])
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> bool {
        self.set(name, &[value])
    }

    pub fn get_float(&self, name: &str) -> Option<f32> {
        self.get(name).map(|v| v[0])
    }

    /// Restore every field to its default.
    pub fn reset(&mut self) {
        self.values = self.class.defaults();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline() -> Arc<EffectClass> {
        EffectClass::builder("outline")
            .float("width", 1.0)
            .vec4("color", [0.0, 0.0, 0.0, 1.0])
            .vec2("offset", [0.5, -0.5])
            .build()
    }

    #[test]
    fn test_field_offsets_are_contiguous() {
        let class = outline();
        assert_eq!(class.field("width").unwrap().offset, 0);
        assert_eq!(class.field("color").unwrap().offset, 1);
        assert_eq!(class.field("offset").unwrap().offset, 5);
        assert_eq!(class.data_size(), 7);
        assert_eq!(class.defaults(), vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.5, -0.5]);
    }

    #[test]
    fn test_class_ids_are_unique() {
        assert_ne!(outline().id(), outline().id());
    }

    #[test]
    fn test_instance_set_get() {
        let class = outline();
        let mut fx = class.instance();
        assert!(fx.set("offset", &[2.0, 3.0]));
        assert_eq!(fx.get("offset"), Some(&[2.0, 3.0][..]));
        assert!(!fx.set("missing", &[1.0]));
        assert_eq!(fx.get("missing"), None);
        fx.reset();
        assert_eq!(fx.get_float("width"), Some(1.0));
    }

    #[test]
    fn test_duplicate_field_keeps_first() {
        let class = EffectClass::builder("dup")
            .float("a", 1.0)
            .float("a", 2.0)
            .build();
        assert_eq!(class.data_size(), 1);
        assert_eq!(class.defaults(), vec![1.0]);
    }

    #[test]
    fn test_color_node_receives_field_exprs() {
        let class = EffectClass::builder("fade")
            .float("amount", 0.0)
            .color_node(|args| format!("{} * {}", args.color, args.field("amount")))
            .build();
        let fields = vec![("amount".to_string(), "fx0.y".to_string())];
        let args = ColorNodeArgs {
            color: "color",
            uv: "uv",
            fields: &fields,
        };
        assert_eq!(class.color_expr(&args).as_deref(), Some("color * fx0.y"));
    }
}
