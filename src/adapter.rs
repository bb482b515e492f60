use std::collections::HashSet;

use crate::events::ImageRef;

/// Position-indexed binding between the pager and the pages the viewer draws.
///
/// `update` replaces everything at once; the bumped generation tells the
/// viewer to throw away every rendered page and start over.
#[derive(Debug, Default)]
pub struct CarouselAdapter {
    items: Vec<ImageRef>,
    generation: u64,
}

impl CarouselAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, items: Vec<ImageRef>) -> u64 {
        self.items = items;
        self.generation += 1;
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn bind(&self, position: usize) -> Option<&ImageRef> {
        self.items.get(position)
    }

    /// References bound within `radius` of each anchor, each once.
    ///
    /// Ordered by distance: every anchor first, then the pages after it, then
    /// the pages before it, so the page on screen is always scheduled first.
    pub fn images_near(&self, anchors: &[usize], radius: usize) -> Vec<ImageRef> {
        let mut seen = HashSet::new();
        let mut near = Vec::new();
        for distance in 0..=radius {
            for &anchor in anchors {
                let candidates = [anchor.checked_add(distance), anchor.checked_sub(distance)];
                for image in candidates.into_iter().flatten().filter_map(|p| self.bind(p)) {
                    if seen.insert(image) {
                        near.push(image.clone());
                    }
                }
            }
        }
        near
    }
}
