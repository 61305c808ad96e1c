//! Small page-level helpers shared by the buffering operator variants
//! (Sort, TopN, Aggregation, Window, HashBuild) that need to see an entire
//! upstream stream rather than one [`Page`] at a time. `meridian_page`
//! itself only exposes per-page slicing (`get_region`/`copy_positions`);
//! concatenating many pages into one is an operator-level concern.

use meridian_page::block::Block;
use meridian_page::builder::BlockBuilder;
use meridian_page::page::Page;

/// Concatenate `pages` channel-by-channel into a single page. All pages
/// must share the same channel count and per-channel leaf encoding
/// (guaranteed for pages flowing through one pipeline). Returns an
/// empty (zero-channel) page if `pages` is empty.
pub fn concat_pages(pages: &[Page]) -> Page {
    let Some(first) = pages.first() else {
        return Page::new(vec![]);
    };
    let channel_count = first.channel_count();
    let total_positions: usize = pages.iter().map(Page::position_count).sum();

    let mut builders: Vec<BlockBuilder> = (0..channel_count)
        .map(|c| BlockBuilder::new_like(first.channel(c), total_positions))
        .collect();

    for page in pages {
        for c in 0..channel_count {
            let block = page.channel(c);
            for pos in 0..block.position_count() {
                if block.is_null(pos) {
                    builders[c].append_null();
                } else {
                    let (leaf, li) = block.resolve_public(pos);
                    builders[c].append_value_from(leaf, li);
                }
            }
        }
    }

    Page::new(builders.into_iter().map(BlockBuilder::build).collect::<Vec<Block>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_page::block::FixedWidthBlock;

    fn int_page(values: &[i32]) -> Page {
        Page::new(vec![Block::IntArray(FixedWidthBlock::new(values.to_vec(), None).unwrap())])
    }

    #[test]
    fn concatenates_pages_in_order() {
        let a = int_page(&[1, 2]);
        let b = int_page(&[3, 4, 5]);
        let combined = concat_pages(&[a, b]);
        assert_eq!(combined.position_count(), 5);
        for (i, expected) in [1, 2, 3, 4, 5].into_iter().enumerate() {
            assert_eq!(combined.channel(0).get_long(i).unwrap(), expected);
        }
    }

    #[test]
    fn empty_input_yields_empty_page() {
        let combined = concat_pages(&[]);
        assert_eq!(combined.channel_count(), 0);
        assert_eq!(combined.position_count(), 0);
    }
}
