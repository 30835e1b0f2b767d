use crate::instanced::MeshId;

/// An ordered list of meshes that belong to one scene.
///
/// The group only holds ids; meshes are owned elsewhere. Adding a mesh that
/// is already a child is a no-op, so the child list never holds duplicates.
#[derive(Debug, Default, Clone)]
pub struct RenderGroup {
    children: Vec<MeshId>,
}

impl RenderGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `mesh`. Returns `false` if it was already a child.
    pub fn add(&mut self, mesh: MeshId) -> bool {
        if self.contains(mesh) {
            return false;
        }
        self.children.push(mesh);
        true
    }

    /// Detach `mesh`. Returns `false` if it was not a child.
    pub fn remove(&mut self, mesh: MeshId) -> bool {
        match self.children.iter().position(|&child| child == mesh) {
            Some(pos) => {
                self.children.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, mesh: MeshId) -> bool {
        self.children.contains(&mesh)
    }

    pub fn retain(&mut self, f: impl FnMut(&MeshId) -> bool) {
        self.children.retain(f);
    }

    pub fn children(&self) -> &[MeshId] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut group = RenderGroup::new();
        let a = MeshId::next();
        let b = MeshId::next();
        assert!(group.add(a));
        assert!(!group.add(a));
        assert!(group.add(b));
        assert_eq!(group.children(), &[a, b]);
    }

    #[test]
    fn test_remove() {
        let mut group = RenderGroup::new();
        let a = MeshId::next();
        group.add(a);
        assert!(group.remove(a));
        assert!(!group.remove(a));
        assert!(group.is_empty());
    }
}
