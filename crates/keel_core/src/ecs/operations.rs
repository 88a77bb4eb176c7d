// operations.rs - batched structural operation buffer
//
// Structural changes never touch storage directly; they are queued here and
// applied in submission order by the storage executor.

use super::archetype::Archetype;
use super::component::{Component, ComponentId};
use super::entity::Entity;

/// One provided component column: `rows` values of `size` bytes each.
#[derive(Clone, Debug)]
pub(crate) struct ProvidedColumn {
    pub component: ComponentId,
    pub size: u32,
    pub bytes: Vec<u8>,
}

/// Component payload attached to an operation. Columns are kept sorted by
/// component id so the executor can merge them against archetype layouts.
#[derive(Clone, Debug, Default)]
pub struct ComponentData {
    pub(crate) columns: Vec<ProvidedColumn>,
    rows: usize,
}

impl ComponentData {
    pub fn builder() -> ComponentDataBuilder {
        ComponentDataBuilder::default()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn find(&self, component: ComponentId) -> Option<&ProvidedColumn> {
        self.columns
            .iter()
            .find(|column| column.component == component)
    }
}

#[derive(Default)]
pub struct ComponentDataBuilder {
    columns: Vec<ProvidedColumn>,
    rows: Option<usize>,
}

impl ComponentDataBuilder {
    pub fn column<T: Component>(self, values: &[T]) -> ComponentDataBuilder {
        T::register();
        self.column_bytes(
            T::id(),
            std::mem::size_of::<T>() as u32,
            bytemuck::cast_slice(values),
        )
    }

    pub fn column_bytes(
        mut self,
        component: ComponentId,
        size: u32,
        bytes: &[u8],
    ) -> ComponentDataBuilder {
        assert!(size > 0, "tag components carry no data");
        assert_eq!(bytes.len() % size as usize, 0, "column byte length mismatch");

        let rows = bytes.len() / size as usize;
        match self.rows {
            None => self.rows = Some(rows),
            Some(expected) => assert_eq!(expected, rows, "column row counts differ"),
        }

        self.columns.push(ProvidedColumn {
            component,
            size,
            bytes: bytes.to_vec(),
        });
        self
    }

    pub fn build(mut self) -> ComponentData {
        self.columns.sort_by_key(|column| column.component);
        ComponentData {
            columns: self.columns,
            rows: self.rows.unwrap_or(0),
        }
    }
}

/// One structural operation. The meaning follows from its shape:
/// archetype + fresh entities = add, archetype + stored entity = move,
/// data only = in-place update, neither = remove.
pub struct EntityOperation {
    pub entities: Vec<Entity>,
    pub archetype: Option<Archetype>,
    pub data: Option<ComponentData>,
}

/// Ordered buffer of structural operations.
#[derive(Default)]
pub struct EntityOperations {
    ops: Vec<EntityOperation>,
}

impl EntityOperations {
    pub fn new() -> EntityOperations {
        EntityOperations::default()
    }

    /// Place entities into `archetype`, zero-filling every column.
    pub fn set_archetype(&mut self, entities: &[Entity], archetype: Archetype) {
        self.ops.push(EntityOperation {
            entities: entities.to_vec(),
            archetype: Some(archetype),
            data: None,
        });
    }

    /// Place entities into `archetype` with provided column data.
    pub fn set_archetype_with_data(
        &mut self,
        entities: &[Entity],
        archetype: Archetype,
        data: ComponentData,
    ) {
        assert_eq!(
            data.rows(),
            entities.len(),
            "provided data rows must match entity count"
        );
        self.ops.push(EntityOperation {
            entities: entities.to_vec(),
            archetype: Some(archetype),
            data: Some(data),
        });
    }

    /// Overwrite components of a single entity in place.
    pub fn update_components(&mut self, entity: Entity, data: ComponentData) {
        assert_eq!(data.rows(), 1, "updates carry exactly one row");
        self.ops.push(EntityOperation {
            entities: vec![entity],
            archetype: None,
            data: Some(data),
        });
    }

    /// Remove entities from storage.
    pub fn remove(&mut self, entities: &[Entity]) {
        self.ops.push(EntityOperation {
            entities: entities.to_vec(),
            archetype: None,
            data: None,
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityOperation> {
        self.ops.iter()
    }
}
