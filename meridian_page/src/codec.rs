//! The wire format for a [`Page`] (§4.2): a small fixed header followed by
//! an optionally LZ4-compressed, optionally spill-encrypted payload.
//!
//! Header layout, all integers little-endian:
//!
//! ```text
//! positionCount:  i32
//! codecMark:      u8   (bit 0: compressed, bit 1: encrypted)
//! uncompressedSize: i32   (payload size before compression)
//! serializedSize:   i32   (bytes of `payload` that actually follow)
//! payload:        [u8; serializedSize]
//! ```

use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use observability_deps::tracing::debug;

use crate::block::{
    ArrayBlock, Block, BlockEncoding, DictionaryBlock, FixedWidthBlock, MapBlock, RowBlock,
    RunLengthBlock, VariableWidthBlock,
};
use crate::cipher::SpillCipher;
use crate::error::MalformedPage;
use crate::null_mask::NullMask;
use crate::page::Page;

const FLAG_COMPRESSED: u8 = 0b01;
const FLAG_ENCRYPTED: u8 = 0b10;

/// Serialize `page` to its wire form. Forces any lazy channels first
/// ([`Page::get_loaded_page`]) since laziness is an in-memory-only concept.
/// When `cipher` is `Some`, the payload is encrypted after compression —
/// used when a page is about to be written to a spill file.
pub fn serialize(page: &Page, cipher: Option<&dyn SpillCipher>) -> Vec<u8> {
    let loaded = page.get_loaded_page();
    let body = encode_page_body(&loaded);
    let uncompressed_size = body.len();

    let compressed = lz4_flex::block::compress(&body);
    let worth_compressing = compressed.len()
        < uncompressed_size.saturating_sub(128.min(uncompressed_size / 8));
    let (mut payload, compressed_flag) = if worth_compressing {
        (compressed, FLAG_COMPRESSED)
    } else {
        (body, 0u8)
    };

    let mut flags = compressed_flag;
    if let Some(cipher) = cipher {
        payload = cipher.encrypt(&payload);
        flags |= FLAG_ENCRYPTED;
    }

    let mut out = Vec::with_capacity(13 + payload.len());
    out.write_i32::<LittleEndian>(page.position_count() as i32)
        .expect("writing to a Vec never fails");
    out.write_u8(flags).expect("writing to a Vec never fails");
    out.write_i32::<LittleEndian>(uncompressed_size as i32)
        .expect("writing to a Vec never fails");
    out.write_i32::<LittleEndian>(payload.len() as i32)
        .expect("writing to a Vec never fails");
    out.extend_from_slice(&payload);
    debug!(
        position_count = page.position_count(),
        uncompressed_size,
        wire_size = out.len(),
        compressed = compressed_flag != 0,
        encrypted = cipher.is_some(),
        "serialized page"
    );
    out
}

/// Deserialize a page produced by [`serialize`]. `cipher` must match what
/// was passed to `serialize`, or decryption will produce garbage that then
/// fails decompression/decoding.
pub fn deserialize(bytes: &[u8], cipher: Option<&dyn SpillCipher>) -> Result<Page, MalformedPage> {
    let mut cur = Cursor::new(bytes);
    let position_count = read_i32(&mut cur)? as usize;
    let flags = cur
        .read_u8()
        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?;
    let uncompressed_size = read_i32(&mut cur)? as usize;
    let serialized_size = read_i32(&mut cur)? as usize;

    let mut payload = vec![0u8; serialized_size];
    cur.read_exact(&mut payload)
        .map_err(|_| MalformedPage::header_mismatch("serializedSize exceeds remaining bytes"))?;

    if flags & FLAG_ENCRYPTED != 0 {
        let cipher = cipher.ok_or_else(|| {
            MalformedPage::decryption_failed("page is encrypted but no cipher was supplied")
        })?;
        payload = cipher.decrypt(&payload)?;
    }

    let body = if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::block::decompress(&payload, uncompressed_size)
            .map_err(|e| MalformedPage::decompression_failed(e.to_string()))?
    } else {
        payload
    };
    if body.len() != uncompressed_size {
        return Err(MalformedPage::header_mismatch(format!(
            "decoded body is {} bytes, header declared {uncompressed_size}",
            body.len()
        )));
    }

    decode_page_body(&body, position_count)
}

fn encode_page_body(page: &Page) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_i32::<LittleEndian>(page.channel_count() as i32)
        .expect("writing to a Vec never fails");
    for block in page.blocks() {
        encode_block(block, &mut out);
    }
    out
}

fn decode_page_body(buf: &[u8], expected_position_count: usize) -> Result<Page, MalformedPage> {
    let mut cur = Cursor::new(buf);
    let channel_count = read_i32(&mut cur)? as usize;
    let mut blocks = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        blocks.push(decode_block(&mut cur)?);
    }
    let page = Page::new(blocks);
    if page.position_count() != expected_position_count {
        return Err(MalformedPage::header_mismatch(format!(
            "page declared {expected_position_count} positions but channels carry {}",
            page.position_count()
        )));
    }
    Ok(page)
}

fn read_i32(cur: &mut Cursor<&[u8]>) -> Result<i32, MalformedPage> {
    cur.read_i32::<LittleEndian>()
        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))
}

fn write_nulls_by(out: &mut Vec<u8>, position_count: usize, is_null: impl Fn(usize) -> bool) {
    let has_null = (0..position_count).any(&is_null);
    out.write_u8(has_null as u8).expect("writing to a Vec never fails");
    if has_null {
        for i in 0..position_count {
            out.write_u8(is_null(i) as u8).expect("writing to a Vec never fails");
        }
    }
}

fn read_nulls(cur: &mut Cursor<&[u8]>, position_count: usize) -> Result<Option<NullMask>, MalformedPage> {
    let has_null = cur
        .read_u8()
        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?;
    if has_null == 0 {
        return Ok(None);
    }
    let mut bits = Vec::with_capacity(position_count);
    for _ in 0..position_count {
        let b = cur
            .read_u8()
            .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?;
        bits.push(b != 0);
    }
    Ok(Some(NullMask::new(bits)))
}

fn encode_block(block: &Block, out: &mut Vec<u8>) {
    match block {
        Block::ByteArray(b) => {
            out.write_u8(BlockEncoding::ByteArray.wire_tag()).unwrap();
            out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
            write_nulls_by(out, b.position_count(), |i| b.is_null(i));
            for i in 0..b.position_count() {
                out.write_i8(b.get(i)).unwrap();
            }
        }
        Block::ShortArray(b) => {
            out.write_u8(BlockEncoding::ShortArray.wire_tag()).unwrap();
            out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
            write_nulls_by(out, b.position_count(), |i| b.is_null(i));
            for i in 0..b.position_count() {
                out.write_i16::<LittleEndian>(b.get(i)).unwrap();
            }
        }
        Block::IntArray(b) => {
            out.write_u8(BlockEncoding::IntArray.wire_tag()).unwrap();
            out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
            write_nulls_by(out, b.position_count(), |i| b.is_null(i));
            for i in 0..b.position_count() {
                out.write_i32::<LittleEndian>(b.get(i)).unwrap();
            }
        }
        Block::LongArray(b) => {
            out.write_u8(BlockEncoding::LongArray.wire_tag()).unwrap();
            out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
            write_nulls_by(out, b.position_count(), |i| b.is_null(i));
            for i in 0..b.position_count() {
                out.write_i64::<LittleEndian>(b.get(i)).unwrap();
            }
        }
        Block::Int128Array(b) => {
            out.write_u8(BlockEncoding::Int128Array.wire_tag()).unwrap();
            out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
            write_nulls_by(out, b.position_count(), |i| b.is_null(i));
            for i in 0..b.position_count() {
                out.write_i128::<LittleEndian>(b.get(i)).unwrap();
            }
        }
        Block::VariableWidth(b) => {
            out.write_u8(BlockEncoding::VariableWidth.wire_tag()).unwrap();
            encode_variable_width_body(b, out);
        }
        Block::Array(b) => {
            out.write_u8(BlockEncoding::Array.wire_tag()).unwrap();
            encode_array_body(b, out);
        }
        Block::Row(b) => {
            out.write_u8(BlockEncoding::Row.wire_tag()).unwrap();
            encode_row_body(b, out);
        }
        Block::Map(b) => {
            out.write_u8(BlockEncoding::Map.wire_tag()).unwrap();
            encode_array_body(b.as_array(), out);
        }
        Block::Dictionary(b) => {
            out.write_u8(BlockEncoding::Dictionary.wire_tag()).unwrap();
            encode_dictionary_body(b, out);
        }
        Block::RunLength(b) => {
            out.write_u8(BlockEncoding::RunLength.wire_tag()).unwrap();
            encode_run_length_body(b, out);
        }
        // Laziness never reaches the wire; encode what it resolves to.
        Block::Lazy(l) => encode_block(l.load(), out),
    }
}

fn decode_block(cur: &mut Cursor<&[u8]>) -> Result<Block, MalformedPage> {
    let tag = cur
        .read_u8()
        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?;
    let encoding = BlockEncoding::from_wire_tag(tag)
        .ok_or_else(|| MalformedPage::unknown_encoding(format!("unknown block tag {tag}")))?;

    match encoding {
        BlockEncoding::ByteArray => {
            let position_count = read_i32(cur)? as usize;
            let nulls = read_nulls(cur, position_count)?;
            let mut values = Vec::with_capacity(position_count);
            for _ in 0..position_count {
                values.push(
                    cur.read_i8()
                        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?,
                );
            }
            FixedWidthBlock::new(values, nulls)
                .map(Block::ByteArray)
                .map_err(|source| MalformedPage::Block { source })
        }
        BlockEncoding::ShortArray => {
            let position_count = read_i32(cur)? as usize;
            let nulls = read_nulls(cur, position_count)?;
            let mut values = Vec::with_capacity(position_count);
            for _ in 0..position_count {
                values.push(
                    cur.read_i16::<LittleEndian>()
                        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?,
                );
            }
            FixedWidthBlock::new(values, nulls)
                .map(Block::ShortArray)
                .map_err(|source| MalformedPage::Block { source })
        }
        BlockEncoding::IntArray => {
            let position_count = read_i32(cur)? as usize;
            let nulls = read_nulls(cur, position_count)?;
            let mut values = Vec::with_capacity(position_count);
            for _ in 0..position_count {
                values.push(
                    cur.read_i32::<LittleEndian>()
                        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?,
                );
            }
            FixedWidthBlock::new(values, nulls)
                .map(Block::IntArray)
                .map_err(|source| MalformedPage::Block { source })
        }
        BlockEncoding::LongArray => {
            let position_count = read_i32(cur)? as usize;
            let nulls = read_nulls(cur, position_count)?;
            let mut values = Vec::with_capacity(position_count);
            for _ in 0..position_count {
                values.push(
                    cur.read_i64::<LittleEndian>()
                        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?,
                );
            }
            FixedWidthBlock::new(values, nulls)
                .map(Block::LongArray)
                .map_err(|source| MalformedPage::Block { source })
        }
        BlockEncoding::Int128Array => {
            let position_count = read_i32(cur)? as usize;
            let nulls = read_nulls(cur, position_count)?;
            let mut values = Vec::with_capacity(position_count);
            for _ in 0..position_count {
                values.push(
                    cur.read_i128::<LittleEndian>()
                        .map_err(|e| MalformedPage::header_mismatch(e.to_string()))?,
                );
            }
            FixedWidthBlock::new(values, nulls)
                .map(Block::Int128Array)
                .map_err(|source| MalformedPage::Block { source })
        }
        BlockEncoding::VariableWidth => decode_variable_width_body(cur).map(Block::VariableWidth),
        BlockEncoding::Array => decode_array_body(cur).map(Block::Array),
        BlockEncoding::Row => decode_row_body(cur).map(Block::Row),
        BlockEncoding::Map => {
            decode_array_body(cur).map(|a| Block::Map(MapBlock::from_array_unchecked(a)))
        }
        BlockEncoding::Dictionary => decode_dictionary_body(cur).map(Block::Dictionary),
        BlockEncoding::RunLength => decode_run_length_body(cur).map(Block::RunLength),
        BlockEncoding::LazyBlock => {
            Err(MalformedPage::unknown_encoding("lazy blocks do not appear on the wire"))
        }
    }
}

fn encode_variable_width_body(b: &VariableWidthBlock, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
    write_nulls_by(out, b.position_count(), |i| b.is_null(i));
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(b.position_count() + 1);
    offsets.push(0i32);
    for i in 0..b.position_count() {
        data.extend_from_slice(b.get_slice(i));
        offsets.push(data.len() as i32);
    }
    for o in &offsets {
        out.write_i32::<LittleEndian>(*o).unwrap();
    }
    out.write_i32::<LittleEndian>(data.len() as i32).unwrap();
    out.extend_from_slice(&data);
}

fn decode_variable_width_body(cur: &mut Cursor<&[u8]>) -> Result<VariableWidthBlock, MalformedPage> {
    let position_count = read_i32(cur)? as usize;
    let nulls = read_nulls(cur, position_count)?;
    let mut offsets = Vec::with_capacity(position_count + 1);
    for _ in 0..=position_count {
        offsets.push(read_i32(cur)?);
    }
    let data_len = read_i32(cur)? as usize;
    let mut data = vec![0u8; data_len];
    cur.read_exact(&mut data)
        .map_err(|_| MalformedPage::header_mismatch("variable-width data shorter than declared"))?;
    VariableWidthBlock::from_parts(data, offsets, nulls).map_err(|source| MalformedPage::Block { source })
}

fn encode_array_body(b: &ArrayBlock, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
    write_nulls_by(out, b.position_count(), |i| b.is_null(i));
    let (offsets, child) = b.flatten_for_encode();
    for o in &offsets {
        out.write_i32::<LittleEndian>(*o).unwrap();
    }
    encode_block(&child, out);
}

fn decode_array_body(cur: &mut Cursor<&[u8]>) -> Result<ArrayBlock, MalformedPage> {
    let position_count = read_i32(cur)? as usize;
    let nulls = read_nulls(cur, position_count)?;
    let mut offsets = Vec::with_capacity(position_count + 1);
    for _ in 0..=position_count {
        offsets.push(read_i32(cur)?);
    }
    let child = decode_block(cur)?;
    ArrayBlock::from_parts(offsets, child, nulls).map_err(|source| MalformedPage::Block { source })
}

fn encode_row_body(b: &RowBlock, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
    write_nulls_by(out, b.position_count(), |i| b.is_null(i));
    out.write_i32::<LittleEndian>(b.field_count() as i32).unwrap();
    for i in 0..b.field_count() {
        encode_block(&b.field(i), out);
    }
}

fn decode_row_body(cur: &mut Cursor<&[u8]>) -> Result<RowBlock, MalformedPage> {
    let position_count = read_i32(cur)? as usize;
    let nulls = read_nulls(cur, position_count)?;
    let field_count = read_i32(cur)? as usize;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        fields.push(decode_block(cur)?);
    }
    RowBlock::from_parts(fields, position_count, nulls).map_err(|source| MalformedPage::Block { source })
}

fn encode_dictionary_body(b: &DictionaryBlock, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
    write_nulls_by(out, b.position_count(), |i| b.is_null(i));
    for i in 0..b.position_count() {
        out.write_i32::<LittleEndian>(b.get_id(i)).unwrap();
    }
    encode_block(b.dictionary(), out);
}

fn decode_dictionary_body(cur: &mut Cursor<&[u8]>) -> Result<DictionaryBlock, MalformedPage> {
    let position_count = read_i32(cur)? as usize;
    let nulls = read_nulls(cur, position_count)?;
    let mut ids = Vec::with_capacity(position_count);
    for _ in 0..position_count {
        ids.push(read_i32(cur)?);
    }
    let dictionary = decode_block(cur)?;
    DictionaryBlock::from_parts(ids, Arc::new(dictionary), nulls)
        .map_err(|source| MalformedPage::Block { source })
}

fn encode_run_length_body(b: &RunLengthBlock, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(b.position_count() as i32).unwrap();
    encode_block(b.value(), out);
}

fn decode_run_length_body(cur: &mut Cursor<&[u8]>) -> Result<RunLengthBlock, MalformedPage> {
    let run_length = read_i32(cur)? as usize;
    let value = decode_block(cur)?;
    RunLengthBlock::new(value, run_length).map_err(|source| MalformedPage::Block { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FixedWidthBlock;
    use crate::cipher::Aes256CtrCipher;
    use crate::null_mask::NullMask;

    fn int_page(values: &[i32], nulls: &[bool]) -> Page {
        let block = Block::IntArray(
            FixedWidthBlock::new(values.to_vec(), Some(NullMask::new(nulls.to_vec()))).unwrap(),
        );
        Page::new(vec![block])
    }

    #[test]
    fn scenario_a_int_column_with_null_round_trips() {
        let page = int_page(&[1, 2, 3, 0, 5], &[false, false, false, true, false]);
        let bytes = serialize(&page, None);
        let decoded = deserialize(&bytes, None).unwrap();
        assert_eq!(decoded.position_count(), 5);
        assert!(decoded.channel(0).is_null(3));
        assert_eq!(decoded.channel(0).get_long(4).unwrap(), 5);
        assert!(page.channel(0).values_equal(decoded.channel(0)));
    }

    #[test]
    fn round_trips_with_spill_encryption() {
        let page = int_page(&[10, 20, 30], &[false, false, false]);
        let cipher = Aes256CtrCipher::new([9u8; 32]);
        let bytes = serialize(&page, Some(&cipher));
        let decoded = deserialize(&bytes, Some(&cipher)).unwrap();
        assert!(page.channel(0).values_equal(decoded.channel(0)));
    }

    #[test]
    fn decrypting_without_a_cipher_fails_closed() {
        let page = int_page(&[1], &[false]);
        let cipher = Aes256CtrCipher::new([1u8; 32]);
        let bytes = serialize(&page, Some(&cipher));
        let err = deserialize(&bytes, None).unwrap_err();
        assert!(matches!(err, MalformedPage::Malformed { .. }));
    }

    #[test]
    fn rejects_truncated_wire_bytes() {
        let page = int_page(&[1, 2, 3], &[false, false, false]);
        let bytes = serialize(&page, None);
        let err = deserialize(&bytes[..bytes.len() - 2], None).unwrap_err();
        assert!(matches!(err, MalformedPage::Malformed { .. }));
    }

    #[test]
    fn nested_array_and_dictionary_blocks_round_trip() {
        let dict = Arc::new(Block::VariableWidth(VariableWidthBlock::from_values(vec![
            Some(b"red".to_vec()),
            Some(b"green".to_vec()),
            Some(b"blue".to_vec()),
        ])));
        let dictionary_block = Block::Dictionary(
            crate::block::DictionaryBlock::from_parts(vec![2, 0, 1, 0], dict, None).unwrap(),
        );
        let array = Block::Array(
            ArrayBlock::from_parts(
                vec![0, 2, 4],
                Block::IntArray(FixedWidthBlock::new(vec![1, 2, 3, 4], None).unwrap()),
                None,
            )
            .unwrap(),
        );
        let page = Page::new(vec![dictionary_block, array]);
        let bytes = serialize(&page, None);
        let decoded = deserialize(&bytes, None).unwrap();
        assert!(page.channel(0).values_equal(decoded.channel(0)));
        assert_eq!(decoded.channel(1).position_count(), 2);
    }
}
