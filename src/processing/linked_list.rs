//! In-memory window of timeline items for one processing pass.
//!
//! The window is an arena keyed by item id; neighbour lookups always go
//! through the items' *current* link fields, so traversal survives a
//! freshly reassigned neighbour mid-pass.

use std::collections::{HashMap, VecDeque};

use crate::error::Result;
use crate::models::TimelineItem;
use crate::store::{queries, Database};

/// Cap on the number of items hydrated into one processing window.
pub const MAX_PROCESSING_LIST_SIZE: usize = 21;

/// Keepers collected in each direction before the outward walk stops.
const KEEPERS_PER_DIRECTION: usize = 2;

pub struct TimelineLinkedList {
    items: HashMap<String, TimelineItem>,
}

impl TimelineLinkedList {
    /// Build a window centred on `seed_id`, walking the linked list
    /// outward until two keepers have been collected in each direction or
    /// the size cap is reached. Every collected item is hydrated.
    pub fn load(db: &Database, seed_id: &str) -> Result<Option<Self>> {
        let Some(mut seed) = db.read(|conn| queries::get_item(conn, seed_id))? else {
            return Ok(None);
        };
        if seed.base.deleted {
            return Ok(None);
        }
        queries::hydrate_item(db, &mut seed)?;

        let seed_previous = seed.base.previous_item_id.clone();
        let seed_next = seed.base.next_item_id.clone();
        let mut window: VecDeque<TimelineItem> = VecDeque::new();
        window.push_back(seed);

        for backwards in [true, false] {
            let mut keepers = 0usize;
            let mut cursor = if backwards {
                seed_previous.clone()
            } else {
                seed_next.clone()
            };
            while window.len() < MAX_PROCESSING_LIST_SIZE && keepers < KEEPERS_PER_DIRECTION {
                let Some(id) = cursor else { break };
                let Some(mut item) = db.read(|conn| queries::get_item(conn, &id))? else {
                    break;
                };
                if item.base.deleted {
                    break;
                }
                queries::hydrate_item(db, &mut item)?;
                if item.is_worth_keeping()? {
                    keepers += 1;
                }
                if backwards {
                    cursor = item.base.previous_item_id.clone();
                    window.push_front(item);
                } else {
                    cursor = item.base.next_item_id.clone();
                    window.push_back(item);
                }
            }
        }

        Ok(Some(Self::from_items(window.into_iter().collect())))
    }

    /// Build a window from already-hydrated items (segment reprocessing).
    pub fn from_items(items: Vec<TimelineItem>) -> Self {
        let items = items
            .into_iter()
            .filter(|item| !item.base.deleted)
            .map(|item| (item.base.id.clone(), item))
            .collect();
        Self { items }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TimelineItem> {
        self.items.get(id).filter(|item| !item.base.deleted)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TimelineItem> {
        self.items.get_mut(id).filter(|item| !item.base.deleted)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Neighbour on the previous side, resolved through the item's
    /// current link field.
    pub fn previous_item(&self, id: &str) -> Option<&TimelineItem> {
        let item = self.get(id)?;
        let previous_id = item.base.previous_item_id.as_deref()?;
        self.get(previous_id)
    }

    /// Neighbour on the next side, resolved through the item's current
    /// link field.
    pub fn next_item(&self, id: &str) -> Option<&TimelineItem> {
        let item = self.get(id)?;
        let next_id = item.base.next_item_id.as_deref()?;
        self.get(next_id)
    }

    /// Item ids in temporal order (by end date).
    pub fn item_ids_ordered(&self) -> Vec<String> {
        let mut ids: Vec<(&str, chrono::DateTime<chrono::Utc>)> = self
            .items
            .values()
            .filter(|item| !item.base.deleted)
            .map(|item| (item.base.id.as_str(), item.base.end_date))
            .collect();
        ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ids.into_iter().map(|(id, _)| id.to_string()).collect()
    }

    pub fn items_ordered(&self) -> Vec<&TimelineItem> {
        self.item_ids_ordered()
            .into_iter()
            .filter_map(|id| self.items.get(&id))
            .collect()
    }
}
