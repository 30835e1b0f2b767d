//! Error types for the sprite batcher.

use std::fmt;

/// Contract violations raised by [`SpriteWorld`](crate::SpriteWorld) and
/// [`Sprite2D`](crate::Sprite2D).
///
/// Transient states (a full batch, a sprite missing its layer, a stale batch
/// binding) are not errors; the sync passes skip them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpriteError {
    /// The sprite is already enrolled in a different world.
    AlreadyEnrolled,

    /// The entity is not alive in the world.
    UnknownEntity {
        /// Raw bits of the entity handle.
        entity: u64,
    },

    /// Unenroll was called on a standalone sprite.
    NotEnrolled,

    /// A configuration value is out of range.
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for SpriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpriteError::AlreadyEnrolled => {
                write!(f, "Sprite is already enrolled in a different world")
            }
            SpriteError::UnknownEntity { entity } => {
                write!(f, "Entity {:#x} is not alive in this world", entity)
            }
            SpriteError::NotEnrolled => write!(f, "Sprite is not enrolled in any world"),
            SpriteError::InvalidConfig { field, reason } => {
                write!(f, "Invalid sprite config `{}`: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for SpriteError {}

/// Result type alias for sprite operations.
pub type SpriteResult<T> = Result<T, SpriteError>;
