//! Packet RAM allocation
//!
//! Hands out regions of a controller's dedicated packet memory, as byte
//! offsets. Allocation runs downward from the top of the region, and
//! memory only comes back all at once, when every endpoint closes.

/// Packet RAM allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocator {
    start: usize,
    end: usize,
    next: usize,
}

impl Allocator {
    /// Manage offsets `start..end`
    pub const fn new(start: usize, end: usize) -> Self {
        Allocator {
            start,
            end,
            next: end,
        }
    }

    /// Allocates `size` bytes, aligned to `align`
    ///
    /// Returns the offset of the allocation, or `None` if it doesn't fit.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<usize> {
        let offset = self.next.checked_sub(size)?;
        let offset = offset - offset % align.max(1);
        if offset < self.start {
            None
        } else {
            self.next = offset;
            Some(offset)
        }
    }

    /// Release every allocation
    pub fn reset(&mut self) {
        self.next = self.end;
    }
}
