//! Sprite materials and their packed effect layout.
//!
//! Every material owns an [`EffectSchema`]. Slot 0 of the packed effect
//! buffer is the enable bitmask; registered effects follow contiguously in
//! registration order. The buffer size (tier) only ever grows, and every
//! growth bumps the schema version so batches built for the old layout can
//! tell they are stale.

use std::cell::{Ref, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::effect::{ColorNodeArgs, EffectClass, EffectClassId, EffectFieldKind, EffectInstance};

/// Number of mask bits an `f32` holds exactly. A material registers at most
/// this many effects.
pub const MAX_EXACT_EFFECT_BITS: usize = 24;

/// Unique identity of a material instance. Sprites with equal ids may share
/// a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u32);

impl MaterialId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Packed buffer size, in floats, needed to hold `floats` values.
///
/// Tiers are 0, 4, 8, 16 and then the next multiple of 4.
pub const fn tier_for(floats: usize) -> usize {
    match floats {
        0 => 0,
        1..=4 => 4,
        5..=8 => 8,
        9..=16 => 16,
        n => n.div_ceil(4) * 4,
    }
}

/// Layout of one registered effect inside the packed buffer.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub class: Arc<EffectClass>,
    /// Bit in the enable mask.
    pub bit: u32,
    /// First packed float of the effect's data block.
    pub offset: usize,
}

impl SchemaEntry {
    pub fn mask(&self) -> u32 {
        1u32.checked_shl(self.bit).unwrap_or(0)
    }
}

/// Outcome of [`EffectSchema::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaChange {
    /// The class was not registered before.
    pub added: bool,
    /// The tier grew and the version was bumped.
    pub tier_changed: bool,
}

/// Per-material registry of effect classes.
#[derive(Debug, Clone)]
pub struct EffectSchema {
    entries: Vec<SchemaEntry>,
    min_tier: usize,
    tier: usize,
    version: u32,
}

impl EffectSchema {
    pub fn new(min_tier: usize) -> Self {
        Self {
            entries: Vec::new(),
            min_tier,
            tier: 0,
            version: 0,
        }
    }

    /// Register `class`. Registering the same class again changes nothing.
    pub fn register(&mut self, class: &Arc<EffectClass>) -> SchemaChange {
        if self.entry(class.id()).is_some() {
            return SchemaChange {
                added: false,
                tier_changed: false,
            };
        }

        if self.entries.len() >= MAX_EXACT_EFFECT_BITS {
            tracing::warn!(
                "Effect '{}' not registered: all {} mask bits are in use",
                class.name(),
                MAX_EXACT_EFFECT_BITS
            );
            return SchemaChange {
                added: false,
                tier_changed: false,
            };
        }

        let bit = self.entries.len() as u32;
        self.entries.push(SchemaEntry {
            class: Arc::clone(class),
            bit,
            offset: 0,
        });

        let mut offset = 1;
        for entry in &mut self.entries {
            entry.offset = offset;
            offset += entry.class.data_size();
        }

        let tier = tier_for(offset).max(self.min_tier).max(self.tier);
        let tier_changed = tier > self.tier;
        if tier_changed {
            self.tier = tier;
            self.version += 1;
        }
        SchemaChange {
            added: true,
            tier_changed,
        }
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn entry(&self, class: EffectClassId) -> Option<&SchemaEntry> {
        self.entries.iter().find(|entry| entry.class.id() == class)
    }

    /// Packed float offset of a field, or `None` if the class or field was
    /// never registered.
    pub fn field_offset(&self, class: EffectClassId, field: &str) -> Option<usize> {
        let entry = self.entry(class)?;
        Some(entry.offset + entry.class.field(field)?.offset)
    }

    /// Floats in use: the mask plus every registered field.
    pub fn required_floats(&self) -> usize {
        1 + self
            .entries
            .iter()
            .map(|entry| entry.class.data_size())
            .sum::<usize>()
    }

    pub fn tier(&self) -> usize {
        self.tier
    }

    /// Number of vec4 attributes the packed buffer occupies.
    pub fn vec4_count(&self) -> usize {
        self.tier / 4
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Fill `out` with the packed effect data for a sprite whose active
    /// effects are `active`.
    ///
    /// Registered effects that are not active are written with their
    /// defaults so a removed effect leaves nothing behind. Active effects
    /// whose class is not registered are skipped.
    pub fn pack(&self, active: &[EffectInstance], out: &mut [f32]) {
        out.fill(0.0);
        if out.is_empty() {
            return;
        }
        let mut mask = 0u32;
        for entry in &self.entries {
            let end = entry.offset + entry.class.data_size();
            if end > out.len() {
                tracing::warn!(
                    "Packed effect buffer too small for '{}' ({} < {})",
                    entry.class.name(),
                    out.len(),
                    end
                );
                continue;
            }
            match active.iter().find(|fx| fx.class_id() == entry.class.id()) {
                Some(fx) => {
                    mask |= entry.mask();
                    out[entry.offset..end].copy_from_slice(fx.values());
                }
                None => {
                    let mut cursor = entry.offset;
                    for field in entry.class.fields() {
                        let value = field.default_value();
                        out[cursor..cursor + value.len()].copy_from_slice(value);
                        cursor += value.len();
                    }
                }
            }
        }
        out[0] = mask as f32;
    }

    /// WGSL expression reading `size` packed floats starting at `offset`
    /// from vec4 arguments named `fx0`, `fx1`, ...
    fn read_expr(offset: usize, kind: EffectFieldKind) -> String {
        const LANES: [char; 4] = ['x', 'y', 'z', 'w'];
        let lanes: Vec<String> = (offset..offset + kind.size())
            .map(|i| format!("fx{}.{}", i / 4, LANES[i % 4]))
            .collect();
        match kind {
            EffectFieldKind::Float => lanes[0].clone(),
            _ => format!("{}({})", kind.wgsl_type(), lanes.join(", ")),
        }
    }

    /// Generate the WGSL function combining every registered effect's color
    /// node, gated per instance by the enable mask:
    ///
    /// ```text
    /// fn sprite_effects(color_in: vec4<f32>, uv: vec2<f32>, fx0: vec4<f32>, ...) -> vec4<f32>
    /// ```
    ///
    /// Each effect is applied with `select()`, so instances never branch.
    pub fn color_function(&self) -> String {
        let mut src = String::from("fn sprite_effects(color_in: vec4<f32>, uv: vec2<f32>");
        for k in 0..self.vec4_count() {
            let _ = write!(src, ", fx{k}: vec4<f32>");
        }
        src.push_str(") -> vec4<f32> {\n    var color = color_in;\n");
        if self.tier > 0 {
            src.push_str("    let mask = u32(fx0.x);\n");
        }
        for entry in &self.entries {
            let fields: Vec<(String, String)> = entry
                .class
                .fields()
                .iter()
                .map(|field| {
                    (
                        field.name.clone(),
                        Self::read_expr(entry.offset + field.offset, field.kind),
                    )
                })
                .collect();
            let args = ColorNodeArgs {
                color: "color",
                uv: "uv",
                fields: &fields,
            };
            if let Some(expr) = entry.class.color_expr(&args) {
                let _ = writeln!(src, "    // {}", entry.class.name());
                let _ = writeln!(
                    src,
                    "    color = select(color, {}, (mask & {}u) != 0u);",
                    expr,
                    entry.mask()
                );
            }
        }
        src.push_str("    return color;\n}\n");
        src
    }
}

/// A material shared by every sprite drawn with it.
///
/// Ownership stays with the caller; batches only remember the material id
/// and schema version they were built for.
#[derive(Debug)]
pub struct SpriteMaterial {
    id: MaterialId,
    name: String,
    schema: EffectSchema,
    color_function: String,
}

impl SpriteMaterial {
    pub fn new(name: impl Into<String>, min_effect_tier: usize) -> Self {
        let schema = EffectSchema::new(min_effect_tier);
        let color_function = schema.color_function();
        Self {
            id: MaterialId::next(),
            name: name.into(),
            schema,
            color_function,
        }
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &EffectSchema {
        &self.schema
    }

    /// Register an effect class and regenerate the color function.
    pub fn register_effect(&mut self, class: &Arc<EffectClass>) -> SchemaChange {
        let change = self.schema.register(class);
        if change.added {
            if change.tier_changed {
                tracing::debug!(
                    "Material '{}' effect tier grew to {} (schema v{})",
                    self.name,
                    self.schema.tier(),
                    self.schema.version()
                );
            }
            self.color_function = self.schema.color_function();
        }
        change
    }

    /// Generated WGSL `sprite_effects` function.
    pub fn color_function(&self) -> &str {
        &self.color_function
    }
}

/// Shared, single-threaded handle to a [`SpriteMaterial`].
#[derive(Debug, Clone)]
pub struct MaterialHandle(Rc<RefCell<SpriteMaterial>>);

impl MaterialHandle {
    /// A material with the default minimum effect tier of 8.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_min_tier(name, 8)
    }

    pub fn with_min_tier(name: impl Into<String>, min_effect_tier: usize) -> Self {
        Self(Rc::new(RefCell::new(SpriteMaterial::new(name, min_effect_tier))))
    }

    pub fn id(&self) -> MaterialId {
        self.0.borrow().id
    }

    pub fn get(&self) -> Ref<'_, SpriteMaterial> {
        self.0.borrow()
    }

    pub fn register_effect(&self, class: &Arc<EffectClass>) -> SchemaChange {
        self.0.borrow_mut().register_effect(class)
    }

    pub fn tier(&self) -> usize {
        self.0.borrow().schema.tier()
    }

    pub fn schema_version(&self) -> u32 {
        self.0.borrow().schema.version()
    }

    pub fn ptr_eq(&self, other: &MaterialHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(name: &str, floats: usize) -> Arc<EffectClass> {
        let mut builder = EffectClass::builder(name);
        for i in 0..floats {
            builder = builder.float(&format!("f{i}"), i as f32);
        }
        builder.build()
    }

    #[test]
    fn test_tier_for() {
        assert_eq!(tier_for(0), 0);
        assert_eq!(tier_for(1), 4);
        assert_eq!(tier_for(4), 4);
        assert_eq!(tier_for(5), 8);
        assert_eq!(tier_for(9), 16);
        assert_eq!(tier_for(16), 16);
        assert_eq!(tier_for(17), 20);
        assert_eq!(tier_for(23), 24);
    }

    #[test]
    fn test_register_assigns_bits_and_offsets() {
        let mut schema = EffectSchema::new(8);
        let a = effect("a", 2);
        let b = effect("b", 3);
        assert!(schema.register(&a).added);
        assert!(schema.register(&b).added);
        assert_eq!(schema.entry(a.id()).unwrap().bit, 0);
        assert_eq!(schema.entry(b.id()).unwrap().bit, 1);
        assert_eq!(schema.field_offset(a.id(), "f1"), Some(2));
        assert_eq!(schema.field_offset(b.id(), "f0"), Some(3));
        assert_eq!(schema.required_floats(), 6);
        assert_eq!(schema.tier(), 8);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut schema = EffectSchema::new(8);
        let a = effect("a", 1);
        schema.register(&a);
        let version = schema.version();
        let change = schema.register(&a);
        assert!(!change.added);
        assert_eq!(schema.entries().len(), 1);
        assert_eq!(schema.version(), version);
    }

    #[test]
    fn test_tier_grows_monotonically_and_bumps_version() {
        let mut schema = EffectSchema::new(8);
        assert_eq!(schema.tier(), 0);

        let change = schema.register(&effect("small", 2));
        assert!(change.tier_changed);
        assert_eq!((schema.tier(), schema.version()), (8, 1));

        let change = schema.register(&effect("big", 10));
        assert!(change.tier_changed);
        assert_eq!((schema.tier(), schema.version()), (16, 2));

        let change = schema.register(&effect("tiny", 1));
        assert!(!change.tier_changed);
        assert_eq!((schema.tier(), schema.version()), (16, 2));
    }

    #[test]
    fn test_register_stops_when_mask_is_full() {
        let mut schema = EffectSchema::new(8);
        for i in 0..MAX_EXACT_EFFECT_BITS {
            assert!(schema.register(&effect(&format!("fx{i}"), 1)).added);
        }
        let version = schema.version();
        let overflow = effect("overflow", 1);
        let change = schema.register(&overflow);

        assert!(!change.added);
        assert!(!change.tier_changed);
        assert!(schema.entry(overflow.id()).is_none());
        assert_eq!(schema.entries().len(), MAX_EXACT_EFFECT_BITS);
        assert_eq!(schema.version(), version);

        let last = &schema.entries()[MAX_EXACT_EFFECT_BITS - 1];
        assert_eq!(last.mask(), 1 << 23);
    }

    #[test]
    fn test_mask_of_out_of_range_bit_is_empty() {
        let entry = SchemaEntry {
            class: effect("far", 1),
            bit: 40,
            offset: 1,
        };
        assert_eq!(entry.mask(), 0);
    }

    #[test]
    fn test_pack_writes_mask_and_defaults() {
        let mut schema = EffectSchema::new(8);
        let a = effect("a", 1);
        let b = effect("b", 2);
        schema.register(&a);
        schema.register(&b);

        let mut fx_b = b.instance();
        fx_b.set_float("f1", 9.0);
        let mut out = vec![0.0; schema.tier()];
        schema.pack(&[fx_b], &mut out);

        assert_eq!(out[0], 2.0);
        // a is inactive and keeps its default
        assert_eq!(out[1], 0.0);
        assert_eq!(&out[2..4], &[0.0, 9.0]);
    }

    #[test]
    fn test_color_function_selects_by_mask() {
        let mut material = SpriteMaterial::new("m", 8);
        let flash = EffectClass::builder("flash")
            .float("amount", 0.0)
            .color_node(|args| format!("mix({}, vec4<f32>(1.0), {})", args.color, args.field("amount")))
            .build();
        material.register_effect(&flash);
        let src = material.color_function();
        assert!(src.contains("fx1: vec4<f32>"));
        assert!(src.contains("let mask = u32(fx0.x);"));
        assert!(src.contains("select(color, mix(color, vec4<f32>(1.0), fx0.y), (mask & 1u) != 0u)"));
    }

    #[test]
    fn test_vector_fields_straddle_vec4_boundaries() {
        assert_eq!(
            EffectSchema::read_expr(3, EffectFieldKind::Vec2),
            "vec2<f32>(fx0.w, fx1.x)"
        );
    }

    #[test]
    fn test_material_ids_are_unique() {
        let a = MaterialHandle::new("a");
        let b = MaterialHandle::new("b");
        assert_ne!(a.id(), b.id());
        assert!(a.ptr_eq(&a.clone()));
    }
}
