// Drop-off slot allocation
//
// Each color has a fixed, ordered set of drop-off coordinates. Occupancy is
// never stored: a slot is taken iff some sorted object references it.

use crate::config::{BLACK_SLOTS, GREY_SLOTS, SLOT_MATCH_TOLERANCE};
use crate::vision::detect::BlobColor;
use crate::vision::tracker::{ObjectState, TrackedObject};

/// Ordered slot coordinates per color
#[derive(Debug, Clone)]
pub struct SlotMap {
    grey: Vec<(f64, f64)>,
    black: Vec<(f64, f64)>,
}

impl SlotMap {
    pub fn new(grey: Vec<(f64, f64)>, black: Vec<(f64, f64)>) -> Self {
        Self { grey, black }
    }

    /// Slot tables for the reference deployment
    pub fn deployed() -> Self {
        Self::new(GREY_SLOTS.to_vec(), BLACK_SLOTS.to_vec())
    }

    pub fn slots_for(&self, color: BlobColor) -> &[(f64, f64)] {
        match color {
            BlobColor::Grey => &self.grey,
            BlobColor::Black => &self.black,
        }
    }

    /// Lowest-index slot of `color` not referenced by any sorted object.
    pub fn first_free(
        &self,
        color: BlobColor,
        objects: &[TrackedObject],
    ) -> Option<(usize, (f64, f64))> {
        let taken: Vec<usize> = objects
            .iter()
            .filter(|o| o.state == ObjectState::Sorted && o.color == color)
            .filter_map(|o| o.assigned_slot)
            .collect();

        self.slots_for(color)
            .iter()
            .enumerate()
            .find(|(i, _)| !taken.contains(i))
            .map(|(i, &coord)| (i, coord))
    }

    /// Which slot of `color`, if any, the position rests on (within the
    /// sorted-match tolerance).
    pub fn match_slot(&self, color: BlobColor, world_x: f64, world_y: f64) -> Option<usize> {
        self.slots_for(color).iter().position(|&(sx, sy)| {
            (world_x - sx).abs() < SLOT_MATCH_TOLERANCE && (world_y - sy).abs() < SLOT_MATCH_TOLERANCE
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_object(color: BlobColor, slot: usize) -> TrackedObject {
        let coord = SlotMap::deployed().slots_for(color)[slot];
        TrackedObject {
            color,
            world_x: coord.0,
            world_y: coord.1,
            bbox: (0, 0, 10, 10),
            state: ObjectState::Sorted,
            assigned_slot: Some(slot),
            visible: true,
            seen_streak: 3,
            missed_streak: 0,
        }
    }

    #[test]
    fn allocation_is_ordered() {
        let slots = SlotMap::deployed();
        let (idx, coord) = slots.first_free(BlobColor::Black, &[]).unwrap();
        assert_eq!(idx, 0);
        assert_eq!(coord, BLACK_SLOTS[0]);
    }

    #[test]
    fn occupancy_derived_from_sorted_objects() {
        let slots = SlotMap::deployed();
        let objects = vec![
            sorted_object(BlobColor::Black, 0),
            sorted_object(BlobColor::Black, 1),
        ];
        let (idx, _) = slots.first_free(BlobColor::Black, &objects).unwrap();
        assert_eq!(idx, 2);

        // Other color unaffected
        let (idx, _) = slots.first_free(BlobColor::Grey, &objects).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn all_slots_taken_returns_none() {
        let slots = SlotMap::deployed();
        let objects: Vec<_> = (0..3).map(|i| sorted_object(BlobColor::Grey, i)).collect();
        assert!(slots.first_free(BlobColor::Grey, &objects).is_none());
    }

    #[test]
    fn slot_match_uses_tolerance() {
        let slots = SlotMap::deployed();
        let (sx, sy) = GREY_SLOTS[1];
        assert_eq!(slots.match_slot(BlobColor::Grey, sx + 1.0, sy - 1.0), Some(1));
        assert_eq!(slots.match_slot(BlobColor::Grey, sx + 2.0, sy), None);
        // A black object on a grey slot does not match
        assert_eq!(slots.match_slot(BlobColor::Black, sx, sy), None);
    }
}
