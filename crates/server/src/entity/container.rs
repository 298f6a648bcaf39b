//! Slot containers: inventories, equipment and item containers.

use super::item;
use crate::content::{Content, EquipSlot};
use crate::persistence::ContainerRecord;
use protocol::{ContainerId, ContainerKind, ContainerView, Item};

/// Slots in a freshly made player inventory.
pub const INVENTORY_SIZE: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub items: Vec<Option<Item>>,
}

impl Container {
    pub fn new(id: ContainerId, kind: ContainerKind, size: usize) -> Self {
        Self {
            id,
            kind,
            items: vec![None; size],
        }
    }

    /// One slot per [`EquipSlot`], indexed by [`EquipSlot::index`].
    pub fn equipment(id: ContainerId) -> Self {
        Self::new(id, ContainerKind::Equipment, EquipSlot::COUNT)
    }

    pub fn from_record(id: ContainerId, record: ContainerRecord) -> Self {
        Self {
            id,
            kind: record.kind,
            items: record.items,
        }
    }

    pub fn to_record(&self) -> ContainerRecord {
        ContainerRecord {
            kind: self.kind,
            items: self.items.clone(),
        }
    }

    pub fn view(&self) -> ContainerView {
        ContainerView {
            id: self.id,
            kind: self.kind,
            items: self.items.clone(),
        }
    }

    pub fn has_slot(&self, index: usize) -> bool {
        index < self.items.len()
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index).and_then(Option::as_ref)
    }

    pub fn has_item(&self, kind: u32) -> bool {
        self.items.iter().flatten().any(|item| item.kind == kind)
    }

    pub fn first_open_slot(&self) -> Option<usize> {
        self.items.iter().position(Option::is_none)
    }

    /// Whether `item` may occupy slot `index`. Equipment slots only take
    /// items whose equip slot matches.
    pub fn accepts(&self, index: usize, item: &Item, content: &Content) -> bool {
        if !self.has_slot(index) {
            return false;
        }
        match self.kind {
            ContainerKind::Normal => true,
            ContainerKind::Equipment => content
                .item(item.kind)
                .equip_slot
                .is_some_and(|slot| slot.index() == index),
        }
    }

    /// Where `item` would land when no slot is given: the first stack it can
    /// join, else the first open slot it is accepted in.
    pub fn slot_for(&self, item: &Item, content: &Content) -> Option<usize> {
        let stack = self.items.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|existing| item::can_stack(existing, item, content))
        });
        stack.or_else(|| {
            (0..self.items.len())
                .find(|&index| self.items[index].is_none() && self.accepts(index, item, content))
        })
    }

    /// Add `item` to the best slot. Gives the item back if nothing fits.
    pub fn add(&mut self, item: Item, content: &Content) -> Result<usize, Item> {
        match self.slot_for(&item, content) {
            Some(index) => {
                item::place(&mut self.items[index], item);
                Ok(index)
            }
            None => Err(item),
        }
    }

    /// Highest light level among the contained items.
    pub fn light(&self, content: &Content) -> u32 {
        self.items
            .iter()
            .flatten()
            .map(|item| content.item(item.kind).light)
            .max()
            .unwrap_or(0)
    }
}
