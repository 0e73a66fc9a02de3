//! The staging area: a LIFO stack of pending input
//!
//! Each top-level `process_input` call brackets its work with a marker. A
//! drain pops items until its own marker surfaces; anything staged while an
//! item is processed lands above the marker and is therefore handled before
//! older items resume. Markers are identified by position, the id only makes
//! corruption diagnosable.

use crate::error::{InputError, Result};
use crate::event::InputEventArgs;

/// Identifier of one marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarkerId(u64);

/// Where a drain must stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MarkerPosition {
    pub id: MarkerId,
    pub index: usize,
}

pub(crate) enum StagingItem {
    Marker(MarkerId),
    Item(Box<InputEventArgs>),
}

#[derive(Default)]
pub(crate) struct StagingArea {
    items: Vec<StagingItem>,
    next_marker: u64,
}

impl StagingArea {
    pub fn push_marker(&mut self) -> MarkerPosition {
        let id = MarkerId(self.next_marker);
        self.next_marker += 1;
        let index = self.items.len();
        self.items.push(StagingItem::Marker(id));
        MarkerPosition { id, index }
    }

    pub fn push(&mut self, item: InputEventArgs) {
        self.items.push(StagingItem::Item(Box::new(item)));
    }

    /// Stage a batch so that it pops in submission order
    pub fn push_batch(&mut self, batch: Vec<InputEventArgs>) {
        for item in batch.into_iter().rev() {
            self.push(item);
        }
    }

    /// Pop the next item above `marker`, or consume the marker itself
    ///
    /// `Ok(None)` means the marker was reached and removed.
    pub fn pop_to(&mut self, marker: MarkerPosition) -> Result<Option<Box<InputEventArgs>>> {
        if self.items.len() <= marker.index {
            return Err(InputError::StagingUnderflow(marker.id));
        }
        let top = self.items.len() - 1;
        match self.items.last() {
            Some(StagingItem::Marker(found)) if top == marker.index => {
                if *found != marker.id {
                    return Err(InputError::MismatchedMarker {
                        expected: marker.id,
                        found: *found,
                    });
                }
                self.items.pop();
                Ok(None)
            }
            Some(StagingItem::Marker(found)) => Err(InputError::MismatchedMarker {
                expected: marker.id,
                found: *found,
            }),
            Some(StagingItem::Item(_)) => match self.items.pop() {
                Some(StagingItem::Item(item)) => Ok(Some(item)),
                _ => Err(InputError::StagingUnderflow(marker.id)),
            },
            None => Err(InputError::StagingUnderflow(marker.id)),
        }
    }

    /// Pop the top item if it is not a marker (continuation drain)
    pub fn pop_item(&mut self) -> Option<Box<InputEventArgs>> {
        match self.items.last() {
            Some(StagingItem::Item(_)) => match self.items.pop() {
                Some(StagingItem::Item(item)) => Some(item),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether any non-marker item is staged
    pub fn has_items(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, StagingItem::Item(_)))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}
