use crate::events::ImageRef;

/// Display list padded with a copy of the last image in front and a copy of
/// the first image at the back.
///
/// For `n` real images the sequence has `n + 2` positions. Positions `1..=n`
/// are the real pages; `0` and `n + 1` are sentinels that the pager swaps for
/// their real counterparts without animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopedSequence {
    items: Vec<ImageRef>,
}

impl LoopedSequence {
    /// Returns `None` for an empty input; there is nothing to loop.
    pub fn new(images: Vec<ImageRef>) -> Option<Self> {
        let first = images.first()?.clone();
        let last = images.last()?.clone();
        let mut items = Vec::with_capacity(images.len() + 2);
        items.push(last);
        items.extend(images);
        items.push(first);
        Some(Self { items })
    }

    pub fn items(&self) -> &[ImageRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of real (non-sentinel) pages.
    pub fn real_len(&self) -> usize {
        self.items.len() - 2
    }

    pub fn get(&self, position: usize) -> Option<&ImageRef> {
        self.items.get(position)
    }

    pub const fn first_real(&self) -> usize {
        1
    }

    pub fn last_real(&self) -> usize {
        self.real_len()
    }

    /// Where a sentinel position jumps to, or `None` for a real page.
    pub fn boundary_target(&self, position: usize) -> Option<usize> {
        if position == 0 {
            Some(self.last_real())
        } else if position == self.len() - 1 {
            Some(self.first_real())
        } else {
            None
        }
    }
}

/// Tracks the settled page and decides on boundary jumps and advances.
#[derive(Debug, Clone)]
pub struct Pager {
    sequence: LoopedSequence,
    current: usize,
    pending_jump: Option<usize>,
}

impl Pager {
    pub fn new(sequence: LoopedSequence) -> Self {
        let current = sequence.first_real();
        Self {
            sequence,
            current,
            pending_jump: None,
        }
    }

    pub fn sequence(&self) -> &LoopedSequence {
        &self.sequence
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Target of a jump that was requested but has not settled yet.
    pub fn pending_jump(&self) -> Option<usize> {
        self.pending_jump
    }

    /// Record that `position` settled on screen.
    ///
    /// Returns the non-animated jump to perform when a sentinel was reached.
    /// A sentinel reported again while its jump is still outstanding yields
    /// nothing, so jumps never pile up.
    pub fn on_page_selected(&mut self, position: usize) -> Option<usize> {
        if position >= self.sequence.len() {
            return None;
        }
        self.current = position;
        match self.sequence.boundary_target(position) {
            Some(target) => {
                if self.pending_jump == Some(target) {
                    return None;
                }
                self.pending_jump = Some(target);
                Some(target)
            }
            None => {
                self.pending_jump = None;
                None
            }
        }
    }

    /// Next page for an auto-advance tick, if one should be requested now.
    pub fn advance_target(&self) -> Option<usize> {
        if self.pending_jump.is_some() {
            return None;
        }
        let next = self.current + 1;
        (next < self.sequence.len()).then_some(next)
    }
}
