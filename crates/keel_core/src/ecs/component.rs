// component.rs - runtime component registry
//
// Components are identified by a stable hash of their name so identifiers
// survive across processes and module boundaries. A component with size and
// alignment both zero is a tag: it participates in archetype membership but
// owns no per-entity storage.

use dashmap::DashMap;
use once_cell::sync::Lazy;

pub type ComponentId = u64;

/// Layout metadata for a registered component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: String,
    pub size: u32,
    pub align: u32,
}

impl ComponentMeta {
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

/// Stable FNV-1a hash of a component name.
pub const fn component_id(name: &str) -> ComponentId {
    let bytes = name.as_bytes();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// The entity handle column present in every archetype.
pub const ENTITY_COMPONENT: ComponentId = component_id("keel.entity");

static REGISTRY: Lazy<DashMap<ComponentId, ComponentMeta>> = Lazy::new(|| {
    let registry = DashMap::new();
    registry.insert(
        ENTITY_COMPONENT,
        ComponentMeta {
            id: ENTITY_COMPONENT,
            name: "keel.entity".to_string(),
            size: 8,
            align: 8,
        },
    );
    registry
});

/// Register a component layout, or verify it against a prior registration.
pub fn register_component(name: &str, size: u32, align: u32) -> ComponentId {
    // Tags are size 0, align 0 by definition.
    let align = if size == 0 { 0 } else { align };
    assert!(
        align == 0 || align.is_power_of_two(),
        "component '{name}' alignment must be a power of two"
    );

    let id = component_id(name);
    match REGISTRY.entry(id) {
        dashmap::mapref::entry::Entry::Occupied(existing) => {
            let meta = existing.get();
            assert_eq!(
                meta.size, size,
                "component '{name}' size changed ({} -> {size})",
                meta.size
            );
            assert_eq!(
                meta.align, align,
                "component '{name}' align changed ({} -> {align})",
                meta.align
            );
        }
        dashmap::mapref::entry::Entry::Vacant(slot) => {
            slot.insert(ComponentMeta {
                id,
                name: name.to_string(),
                size,
                align,
            });
        }
    }
    id
}

/// Register a tag component (archetype membership only, no storage).
pub fn register_tag(name: &str) -> ComponentId {
    register_component(name, 0, 0)
}

pub fn meta_of(id: ComponentId) -> Option<ComponentMeta> {
    REGISTRY.get(&id).map(|meta| meta.clone())
}

/// Trait for Rust-defined components. Components must be trivially copyable
/// so chunk storage can move them byte-wise.
pub trait Component: bytemuck::Pod + Send + Sync + 'static {
    const NAME: &'static str;

    /// Register (or verify) this component's layout and return its id.
    fn register() -> ComponentId {
        register_component(
            Self::NAME,
            std::mem::size_of::<Self>() as u32,
            std::mem::align_of::<Self>() as u32,
        )
    }

    #[inline]
    fn id() -> ComponentId {
        component_id(Self::NAME)
    }
}

/// Implement `Component` for a POD struct.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// #[repr(C)]
/// struct Position { x: f32, y: f32 }
/// define_component!(Position, "game.position");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty, $name:expr) => {
        impl $crate::ecs::Component for $ty {
            const NAME: &'static str = $name;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_id_is_stable() {
        assert_eq!(component_id("demo.position"), component_id("demo.position"));
        assert_ne!(component_id("demo.position"), component_id("demo.velocity"));
    }

    #[test]
    fn test_registration_and_lookup() {
        let id = register_component("test.reg_lookup", 12, 4);
        let meta = meta_of(id).unwrap();
        assert_eq!(meta.size, 12);
        assert_eq!(meta.align, 4);
        assert!(!meta.is_tag());

        // Re-registration with the same layout is fine.
        assert_eq!(register_component("test.reg_lookup", 12, 4), id);
    }

    #[test]
    fn test_tag_components_have_no_layout() {
        let id = register_tag("test.is_frozen");
        let meta = meta_of(id).unwrap();
        assert_eq!(meta.size, 0);
        assert_eq!(meta.align, 0);
        assert!(meta.is_tag());
    }

    #[test]
    fn test_entity_component_is_registered() {
        let meta = meta_of(ENTITY_COMPONENT).unwrap();
        assert_eq!(meta.size, 8);
        assert_eq!(meta.align, 8);
    }
}
