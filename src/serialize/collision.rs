use rstar::{RTree, RTreeObject, AABB};

#[derive(Debug, Clone, Copy)]
struct PlacedLabel {
    bbox: [f64; 4],
}

impl RTreeObject for PlacedLabel {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.bbox[0], self.bbox[1]], [self.bbox[2], self.bbox[3]])
    }
}

/// Boxes of labels already placed in a tile
#[derive(Default)]
pub struct CollisionIndex {
    tree: RTree<PlacedLabel>,
}

impl CollisionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `bbox` (`[min_x, min_y, max_x, max_y]`) unless it overlaps a
    /// box already placed. Returns whether it was placed.
    pub fn try_insert(&mut self, bbox: [f64; 4]) -> bool {
        let envelope = AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]);
        if self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .next()
            .is_some()
        {
            return false;
        }
        self.tree.insert(PlacedLabel { bbox });
        true
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
