//! Item quantity helpers.

use crate::content::{Content, MAX_STACK};
use protocol::Item;

/// Remove `quantity` from the item in `slot`. The slot empties when nothing
/// remains, so a zero-quantity stack never exists.
pub fn consume(slot: &mut Option<Item>, quantity: u32) {
    if quantity == 0 {
        return;
    }
    if let Some(item) = slot {
        if item.quantity > quantity {
            item.quantity -= quantity;
        } else {
            *slot = None;
        }
    }
}

/// Whether `incoming` can be merged into `existing` without passing [`MAX_STACK`].
pub fn can_stack(existing: &Item, incoming: &Item, content: &Content) -> bool {
    existing.kind == incoming.kind
        && content.item(existing.kind).stackable
        && existing.quantity.saturating_add(incoming.quantity) <= MAX_STACK
}

/// Placement predicate for dropping `incoming` on a slot: empty, or a
/// stack it can join.
pub fn fits(slot: Option<&Item>, incoming: &Item, content: &Content) -> bool {
    match slot {
        None => true,
        Some(existing) => can_stack(existing, incoming, content),
    }
}

/// Put `incoming` into `slot`, merging with a compatible stack.
/// Callers check [`fits`] first.
pub fn place(slot: &mut Option<Item>, incoming: Item) {
    match slot {
        Some(existing) if existing.kind == incoming.kind => existing.quantity += incoming.quantity,
        _ => *slot = Some(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_empties_slot() {
        let mut slot = Some(Item::new(4, 3));
        consume(&mut slot, 2);
        assert_eq!(slot, Some(Item::new(4, 1)));
        consume(&mut slot, 1);
        assert_eq!(slot, None);
        consume(&mut slot, 1);
        assert_eq!(slot, None);
    }

    #[test]
    fn test_stack_rules() {
        let content = Content::builtin().unwrap();
        let log = content.item_by_name("Log").unwrap().id;
        let axe = content.item_by_name("Wood Axe").unwrap().id;

        assert!(can_stack(&Item::new(log, 5), &Item::new(log, 5), &content));
        assert!(!can_stack(&Item::new(log, MAX_STACK), &Item::new(log, 1), &content));
        assert!(!can_stack(&Item::new(axe, 1), &Item::new(axe, 1), &content));
        assert!(fits(None, &Item::new(axe, 1), &content));

        let mut slot = Some(Item::new(log, 2));
        place(&mut slot, Item::new(log, 3));
        assert_eq!(slot, Some(Item::new(log, 5)));
    }
}
