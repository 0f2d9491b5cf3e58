//! In-memory directory of registered components.
//!
//! Holds each component's description plus one inverted index per
//! [`ElementKind`], which is what queries evaluate against.

use std::collections::{BTreeMap, HashMap};

use ctx_common::{
    ComponentDescription, ComponentIndex, DataModel, ElementKind, IndexTable, MatchArray,
    Registration,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("a component with id '{0}' is already registered")]
    DuplicateId(String),
}

#[derive(Debug)]
pub struct Directory {
    components: BTreeMap<ComponentIndex, ComponentDescription>,
    tables: HashMap<ElementKind, IndexTable>,
    ids: HashMap<String, ComponentIndex>,
    next_index: u32,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        Self {
            components: BTreeMap::new(),
            tables: HashMap::new(),
            ids: HashMap::new(),
            next_index: 1,
        }
    }

    /// Stores the component under a fresh index and indexes its elements.
    pub fn insert(&mut self, registration: Registration) -> Result<ComponentIndex, DirectoryError> {
        if self.ids.contains_key(&registration.id) {
            return Err(DirectoryError::DuplicateId(registration.id));
        }

        let index = ComponentIndex(self.next_index);
        self.next_index += 1;

        let description = registration.into_description(index);
        for element in description.elements() {
            self.tables
                .entry(element.kind)
                .or_default()
                .entry(element.value)
                .or_default()
                .insert(index);
        }
        self.ids.insert(description.id.clone(), index);
        self.components.insert(index, description);
        Ok(index)
    }

    pub fn remove(&mut self, index: ComponentIndex) -> Option<ComponentDescription> {
        let description = self.components.remove(&index)?;
        for element in description.elements() {
            let Some(table) = self.tables.get_mut(&element.kind) else {
                continue;
            };
            if let Some(indexes) = table.get_mut(&element.value) {
                indexes.remove(&index);
                if indexes.is_empty() {
                    table.remove(&element.value);
                }
            }
        }
        self.ids.remove(&description.id);
        Some(description)
    }

    pub fn get(&self, index: ComponentIndex) -> Option<&ComponentDescription> {
        self.components.get(&index)
    }

    pub fn index_of(&self, id: &str) -> Option<ComponentIndex> {
        self.ids.get(id).copied()
    }

    pub fn contains(&self, index: ComponentIndex) -> bool {
        self.components.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentDescription> {
        self.components.values()
    }
}

impl DataModel for Directory {
    fn empty_match_array(&self) -> MatchArray {
        MatchArray::new(self.components.keys().copied())
    }

    fn index_table_for(&self, kind: ElementKind) -> Option<&IndexTable> {
        self.tables.get(&kind)
    }
}
