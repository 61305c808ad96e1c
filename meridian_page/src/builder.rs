//! Block builders: per §3, blocks are immutable and "appending" produces a
//! new block through a builder. [`BlockBuilder`] mirrors the *leaf*
//! encodings of [`crate::block::Block`] — `Dictionary`/`RunLength`/`Lazy`
//! are wrapper encodings that are never built incrementally, only
//! constructed directly from an already-materialized value.

use crate::block::{ArrayBlock, Block, FixedWidthBlock, RowBlock, VariableWidthBlock};
use crate::null_mask::NullMask;

/// A single fixed-width column under construction.
#[derive(Debug)]
pub struct FixedWidthBuilder<T> {
    values: Vec<T>,
    nulls: Vec<bool>,
    has_null: bool,
}

impl<T: Copy + Default> FixedWidthBuilder<T> {
    fn with_capacity(cap: usize) -> Self {
        Self {
            values: Vec::with_capacity(cap),
            nulls: Vec::with_capacity(cap),
            has_null: false,
        }
    }

    fn append_value(&mut self, v: T) {
        self.values.push(v);
        self.nulls.push(false);
    }

    fn append_null(&mut self) {
        self.values.push(T::default());
        self.nulls.push(true);
        self.has_null = true;
    }

    fn build(self) -> FixedWidthBlock<T> {
        let nulls = self.has_null.then(|| NullMask::new(self.nulls));
        FixedWidthBlock::new(self.values, nulls).expect("builder-constructed block is well-formed")
    }
}

/// A variable-width byte column under construction.
#[derive(Debug)]
pub struct VariableWidthBuilder {
    data: Vec<u8>,
    offsets: Vec<i32>,
    nulls: Vec<bool>,
    has_null: bool,
}

impl VariableWidthBuilder {
    fn with_capacity(cap: usize) -> Self {
        let mut offsets = Vec::with_capacity(cap + 1);
        offsets.push(0);
        Self {
            data: Vec::new(),
            offsets,
            nulls: Vec::with_capacity(cap),
            has_null: false,
        }
    }

    fn append_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.offsets.push(self.data.len() as i32);
        self.nulls.push(false);
    }

    fn append_null(&mut self) {
        self.offsets.push(self.data.len() as i32);
        self.nulls.push(true);
        self.has_null = true;
    }

    fn build(self) -> VariableWidthBlock {
        let nulls = self.has_null.then(|| NullMask::new(self.nulls));
        VariableWidthBlock::from_parts(self.data, self.offsets, nulls)
            .expect("builder-constructed block is well-formed")
    }
}

/// A nested-array column under construction; the child builder is boxed
/// since `Array` nests arbitrarily deep.
pub struct ArrayBuilder {
    offsets: Vec<i32>,
    child: Box<BlockBuilder>,
    nulls: Vec<bool>,
    has_null: bool,
}

impl std::fmt::Debug for ArrayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayBuilder")
            .field("offsets", &self.offsets)
            .finish()
    }
}

impl ArrayBuilder {
    fn new(child_seed: &Block, cap: usize) -> Self {
        let mut offsets = Vec::with_capacity(cap + 1);
        offsets.push(0);
        Self {
            offsets,
            child: Box::new(BlockBuilder::new_like(child_seed, 0)),
            nulls: Vec::with_capacity(cap),
            has_null: false,
        }
    }

    fn append_array(&mut self, array: Block) {
        for i in 0..array.position_count() {
            let (leaf, li) = array.resolve_public(i);
            if array.is_null(i) {
                self.child.append_null();
            } else {
                self.child.append_value_from(leaf, li);
            }
        }
        self.offsets.push((self.offsets.last().unwrap() + array.position_count() as i32) as i32);
        self.nulls.push(false);
    }

    fn append_null(&mut self) {
        self.offsets.push(*self.offsets.last().unwrap());
        self.nulls.push(true);
        self.has_null = true;
    }

    fn build(self) -> ArrayBlock {
        let nulls = self.has_null.then(|| NullMask::new(self.nulls));
        ArrayBlock::from_parts(self.offsets, self.child.build(), nulls)
            .expect("builder-constructed block is well-formed")
    }
}

/// A struct-of-columns column under construction.
pub struct RowBuilder {
    fields: Vec<BlockBuilder>,
    nulls: Vec<bool>,
    has_null: bool,
    len: usize,
}

impl std::fmt::Debug for RowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowBuilder").field("len", &self.len).finish()
    }
}

impl RowBuilder {
    fn new(seed: &RowBlock, cap: usize) -> Self {
        let fields = (0..seed.field_count())
            .map(|i| BlockBuilder::new_like(&seed.field(i), cap))
            .collect();
        Self {
            fields,
            nulls: Vec::with_capacity(cap),
            has_null: false,
            len: 0,
        }
    }

    fn append_row(&mut self, source: &RowBlock, pos: usize) {
        for (i, field) in self.fields.iter_mut().enumerate() {
            let f = source.field(i);
            if f.is_null(pos) {
                field.append_null();
            } else {
                let (leaf, li) = f.resolve_public(pos);
                field.append_value_from(leaf, li);
            }
        }
        self.nulls.push(false);
        self.len += 1;
    }

    fn append_null(&mut self) {
        for field in &mut self.fields {
            field.append_null();
        }
        self.nulls.push(true);
        self.has_null = true;
        self.len += 1;
    }

    fn build(self) -> RowBlock {
        let nulls = self.has_null.then(|| NullMask::new(self.nulls));
        let len = self.len;
        let fields = self.fields.into_iter().map(BlockBuilder::build).collect();
        RowBlock::from_parts(fields, len, nulls).expect("builder-constructed block is well-formed")
    }
}

/// A map column under construction, built on top of an inner [`ArrayBuilder`]
/// over a two-field `(keys, values)` row.
#[derive(Debug)]
pub struct MapBuilder {
    inner: ArrayBuilder,
}

/// Incrementally constructs a new, immutable [`Block`] of a fixed leaf
/// encoding. See the module docs for why `Dictionary`/`RunLength`/`Lazy`
/// are excluded.
pub enum BlockBuilder {
    ByteArray(FixedWidthBuilder<i8>),
    ShortArray(FixedWidthBuilder<i16>),
    IntArray(FixedWidthBuilder<i32>),
    LongArray(FixedWidthBuilder<i64>),
    Int128Array(FixedWidthBuilder<i128>),
    VariableWidth(VariableWidthBuilder),
    Array(ArrayBuilder),
    Row(RowBuilder),
    Map(MapBuilder),
}

impl std::fmt::Debug for BlockBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByteArray(b) => f.debug_tuple("ByteArray").field(b).finish(),
            Self::ShortArray(b) => f.debug_tuple("ShortArray").field(b).finish(),
            Self::IntArray(b) => f.debug_tuple("IntArray").field(b).finish(),
            Self::LongArray(b) => f.debug_tuple("LongArray").field(b).finish(),
            Self::Int128Array(b) => f.debug_tuple("Int128Array").field(b).finish(),
            Self::VariableWidth(b) => f.debug_tuple("VariableWidth").field(b).finish(),
            Self::Array(b) => f.debug_tuple("Array").field(b).finish(),
            Self::Row(b) => f.debug_tuple("Row").field(b).finish(),
            Self::Map(b) => f.debug_tuple("Map").field(&b.inner).finish(),
        }
    }
}

impl BlockBuilder {
    /// Start a new builder matching `seed`'s leaf encoding, unwrapping
    /// `Dictionary`/`RunLength`/`Lazy` down to the leaf first.
    pub fn new_like(seed: &Block, cap: usize) -> Self {
        let leaf = seed.leaf_type_seed();
        match &leaf {
            Block::ByteArray(_) => Self::ByteArray(FixedWidthBuilder::with_capacity(cap)),
            Block::ShortArray(_) => Self::ShortArray(FixedWidthBuilder::with_capacity(cap)),
            Block::IntArray(_) => Self::IntArray(FixedWidthBuilder::with_capacity(cap)),
            Block::LongArray(_) => Self::LongArray(FixedWidthBuilder::with_capacity(cap)),
            Block::Int128Array(_) => Self::Int128Array(FixedWidthBuilder::with_capacity(cap)),
            Block::VariableWidth(_) => Self::VariableWidth(VariableWidthBuilder::with_capacity(cap)),
            Block::Array(a) => Self::Array(ArrayBuilder::new(&a.child_seed(), cap)),
            Block::Row(r) => Self::Row(RowBuilder::new(r, cap)),
            Block::Map(m) => {
                let seed_row = if m.position_count() > 0 {
                    let (keys, values) = m.get_entries(0);
                    RowBlock::type_seed(vec![keys, values])
                } else {
                    let dummy_keys = Block::VariableWidth(VariableWidthBlock::from_values(vec![]));
                    let dummy_values = Block::IntArray(FixedWidthBlock::new(vec![], None).unwrap());
                    RowBlock::type_seed(vec![dummy_keys, dummy_values])
                };
                Self::Map(MapBuilder {
                    inner: ArrayBuilder {
                        offsets: {
                            let mut v = Vec::with_capacity(cap + 1);
                            v.push(0);
                            v
                        },
                        child: Box::new(Self::Row(RowBuilder::new(&seed_row, cap))),
                        nulls: Vec::with_capacity(cap),
                        has_null: false,
                    },
                })
            }
            Block::Dictionary(_) | Block::RunLength(_) | Block::Lazy(_) => {
                unreachable!("leaf_type_seed always peels down to a leaf encoding")
            }
        }
    }

    /// Append a null at the next position.
    pub fn append_null(&mut self) {
        match self {
            Self::ByteArray(b) => b.append_null(),
            Self::ShortArray(b) => b.append_null(),
            Self::IntArray(b) => b.append_null(),
            Self::LongArray(b) => b.append_null(),
            Self::Int128Array(b) => b.append_null(),
            Self::VariableWidth(b) => b.append_null(),
            Self::Array(b) => b.append_null(),
            Self::Row(b) => b.append_null(),
            Self::Map(b) => b.inner.append_null(),
        }
    }

    /// Append the non-null value at position `pos` of the already-resolved
    /// leaf block `leaf` (i.e. one returned by [`Block::resolve_public`]).
    pub fn append_value_from(&mut self, leaf: &Block, pos: usize) {
        match (self, leaf) {
            (Self::ByteArray(b), Block::ByteArray(s)) => b.append_value(s.get(pos)),
            (Self::ShortArray(b), Block::ShortArray(s)) => b.append_value(s.get(pos)),
            (Self::IntArray(b), Block::IntArray(s)) => b.append_value(s.get(pos)),
            (Self::LongArray(b), Block::LongArray(s)) => b.append_value(s.get(pos)),
            (Self::Int128Array(b), Block::Int128Array(s)) => b.append_value(s.get(pos)),
            (Self::VariableWidth(b), Block::VariableWidth(s)) => b.append_slice(s.get_slice(pos)),
            (Self::Array(b), Block::Array(s)) => b.append_array(s.get_array(pos)),
            (Self::Row(b), Block::Row(s)) => b.append_row(s, pos),
            (Self::Map(b), Block::Map(s)) => b.inner.append_array(s.entry_rows(pos)),
            (builder, leaf) => panic!(
                "builder/source block kind mismatch: builder is {:?}, source is {:?}",
                builder, leaf.encoding()
            ),
        }
    }

    /// Finish construction, producing the new immutable [`Block`].
    pub fn build(self) -> Block {
        match self {
            Self::ByteArray(b) => Block::ByteArray(b.build()),
            Self::ShortArray(b) => Block::ShortArray(b.build()),
            Self::IntArray(b) => Block::IntArray(b.build()),
            Self::LongArray(b) => Block::LongArray(b.build()),
            Self::Int128Array(b) => Block::Int128Array(b.build()),
            Self::VariableWidth(b) => Block::VariableWidth(b.build()),
            Self::Array(b) => Block::Array(b.build()),
            Self::Row(b) => Block::Row(b.build()),
            Self::Map(b) => Block::Map(crate::block::MapBlock::from_array_unchecked(b.inner.build())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FixedWidthBlock;

    #[test]
    fn fixed_width_builder_roundtrips_values_and_nulls() {
        let seed = Block::IntArray(FixedWidthBlock::new(vec![0], None).unwrap());
        let mut b = BlockBuilder::new_like(&seed, 4);
        b.append_value_from(&Block::IntArray(FixedWidthBlock::new(vec![7], None).unwrap()), 0);
        b.append_null();
        let built = b.build();
        assert_eq!(built.position_count(), 2);
        assert_eq!(built.get_long(0).unwrap(), 7);
        assert!(built.is_null(1));
    }

    #[test]
    fn variable_width_builder_roundtrips() {
        let seed = Block::VariableWidth(VariableWidthBlock::from_values(vec![Some(vec![])]));
        let mut b = BlockBuilder::new_like(&seed, 2);
        let src = Block::VariableWidth(VariableWidthBlock::from_values(vec![Some(b"hello".to_vec())]));
        b.append_value_from(&src, 0);
        b.append_null();
        let built = b.build();
        assert_eq!(built.get_slice(0).unwrap(), b"hello");
        assert!(built.is_null(1));
    }
}
