//! [`Page`]: a row batch made up of aligned column [`Block`]s (§3, §4.1).

use crate::block::Block;

/// A batch of rows: `channel_count` columns, each a [`Block`] with the
/// same `position_count` — the unit operators pull from and push to (§3).
#[derive(Debug, Clone)]
pub struct Page {
    blocks: Vec<Block>,
    position_count: usize,
}

impl Page {
    /// Construct a page from its channel blocks. All blocks must report
    /// the same `position_count`; an empty `blocks` vec produces a
    /// zero-channel, zero-position page (used as e.g. an exchange
    /// end-of-data marker's payload shape).
    pub fn new(blocks: Vec<Block>) -> Self {
        let position_count = blocks.first().map(|b| b.position_count()).unwrap_or(0);
        debug_assert!(
            blocks.iter().all(|b| b.position_count() == position_count),
            "all channels in a page must share the same position count"
        );
        Self {
            blocks,
            position_count,
        }
    }

    /// Number of rows.
    pub fn position_count(&self) -> usize {
        self.position_count
    }

    /// Number of columns.
    pub fn channel_count(&self) -> usize {
        self.blocks.len()
    }

    /// The block backing channel `i`.
    pub fn channel(&self, i: usize) -> &Block {
        &self.blocks[i]
    }

    /// All channel blocks.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// O(1) region over every channel, sharing backing storage (§4.1).
    pub fn get_region(&self, offset: usize, len: usize) -> Self {
        Self {
            blocks: self
                .blocks
                .iter()
                .map(|b| b.get_region(offset, len))
                .collect(),
            position_count: len,
        }
    }

    /// This page with every [`crate::block::Block::Lazy`] channel forced —
    /// what a consumer calls before handing the page to code that does not
    /// understand lazy blocks (e.g. the wire codec).
    pub fn get_loaded_page(&self) -> Self {
        Self {
            blocks: self
                .blocks
                .iter()
                .map(|b| match b {
                    Block::Lazy(l) => l.load().clone(),
                    other => other.clone(),
                })
                .collect(),
            position_count: self.position_count,
        }
    }

    /// Total encoded payload size across all channels.
    pub fn size_in_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.size_in_bytes()).sum()
    }

    /// Total retained size across all channels (may double-count storage
    /// shared with sibling pages, see [`Block::retained_size_in_bytes`]).
    pub fn retained_size_in_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| b.retained_size_in_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FixedWidthBlock;
    use crate::null_mask::NullMask;

    fn int_block(values: &[i32]) -> Block {
        Block::IntArray(FixedWidthBlock::new(values.to_vec(), None).unwrap())
    }

    #[test]
    fn region_slices_every_channel_in_lockstep() {
        let page = Page::new(vec![int_block(&[1, 2, 3, 4]), int_block(&[10, 20, 30, 40])]);
        let region = page.get_region(1, 2);
        assert_eq!(region.position_count(), 2);
        assert_eq!(region.channel(0).get_long(0).unwrap(), 2);
        assert_eq!(region.channel(1).get_long(1).unwrap(), 30);
    }

    #[test]
    fn get_loaded_page_forces_lazy_channels() {
        use std::sync::Arc;
        let lazy = Block::Lazy(crate::block::LazyBlock::new(
            2,
            Arc::new(|| int_block(&[7, 8])),
        ));
        let page = Page::new(vec![lazy, int_block(&[1, 2])]);
        let loaded = page.get_loaded_page();
        assert!(!matches!(loaded.channel(0), Block::Lazy(_)));
        assert_eq!(loaded.channel(0).get_long(0).unwrap(), 7);
    }

    #[test]
    fn empty_page_has_zero_position_count() {
        let page = Page::new(vec![]);
        assert_eq!(page.position_count(), 0);
        assert_eq!(page.channel_count(), 0);
        let _ = NullMask::all_valid(0);
    }
}
