//! Cursors over containers.

use crate::container::{Container, ContainerBody, ContainerKind, Element, MapKey};
use crate::error::{ContainerError, ContainerErrorKind};
use indexmap::IndexMap;

/// What a container cursor yields: a bare element for lists and sets, an
/// entry for maps.
#[derive(Debug, Clone, PartialEq)]
pub enum IteratorResult {
    Element(Element),
    Entry(MapKey, Element),
}

impl IteratorResult {
    pub fn into_element(self) -> Element {
        match self {
            IteratorResult::Element(element) | IteratorResult::Entry(_, element) => element,
        }
    }

    pub fn key(&self) -> Option<&MapKey> {
        match self {
            IteratorResult::Entry(key, _) => Some(key),
            IteratorResult::Element(_) => None,
        }
    }
}

/// Read-only cursor returned by `iterator_for`.
#[derive(Debug)]
pub struct ContainerCursor<'a> {
    container: &'a Container,
    position: usize,
}

impl<'a> ContainerCursor<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self {
            container,
            position: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.position < self.container.len()
    }

    /// Next element, dropping the key of map entries.
    pub fn next_element(&mut self) -> Option<&'a Element> {
        self.next_entry().map(|(_, element)| element)
    }

    /// Next entry; the key is `None` for sequences.
    pub fn next_entry(&mut self) -> Option<(Option<&'a MapKey>, &'a Element)> {
        let container: &'a Container = self.container;
        let entry = match container.body() {
            ContainerBody::Sequence(items) => items.get(self.position).map(|e| (None, e)),
            ContainerBody::Keyed(entries) => entries
                .get_index(self.position)
                .map(|(k, e)| (Some(k), e)),
        };
        if entry.is_some() {
            self.position += 1;
        }
        entry
    }
}

impl Iterator for ContainerCursor<'_> {
    type Item = IteratorResult;

    fn next(&mut self) -> Option<IteratorResult> {
        let is_map = self.container.class().kind() == ContainerKind::Map;
        let (key, element) = self.next_entry()?;
        match key {
            Some(key) if is_map => Some(IteratorResult::Entry(key.clone(), element.clone())),
            _ => Some(IteratorResult::Element(element.clone())),
        }
    }
}

/// Cursor over map entries that can remove the current entry.
#[derive(Debug)]
pub struct MapContainerPolicyIterator<'a> {
    entries: &'a mut IndexMap<MapKey, Element>,
    read_only: bool,
    next: usize,
    current: Option<usize>,
}

impl<'a> MapContainerPolicyIterator<'a> {
    pub(crate) fn new(entries: &'a mut IndexMap<MapKey, Element>, read_only: bool) -> Self {
        Self {
            entries,
            read_only,
            next: 0,
            current: None,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next < self.entries.len()
    }

    /// Move to the next entry. Returns false when exhausted.
    pub fn advance(&mut self) -> bool {
        if !self.has_next() {
            self.current = None;
            return false;
        }
        self.current = Some(self.next);
        self.next += 1;
        true
    }

    pub fn current_key(&self) -> Option<&MapKey> {
        self.current
            .and_then(|i| self.entries.get_index(i))
            .map(|(k, _)| k)
    }

    pub fn current_value(&self) -> Option<&Element> {
        self.current
            .and_then(|i| self.entries.get_index(i))
            .map(|(_, v)| v)
    }

    /// Remove the current entry; the cursor then points before the next one.
    pub fn remove(&mut self) -> crate::Result<Option<(MapKey, Element)>> {
        if self.read_only {
            return Err(ContainerError::new(
                ContainerErrorKind::UnsupportedOperation,
                "cannot remove from a read-only map",
            )
            .into());
        }
        let Some(index) = self.current.take() else {
            return Ok(None);
        };
        let removed = self.entries.shift_remove_index(index);
        if removed.is_some() {
            self.next -= 1;
        }
        Ok(removed)
    }
}
