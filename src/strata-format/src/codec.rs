//! Columnar page codec.
//!
//! A page holds one column's values for a bounded row range. Layouts:
//!
//! - Fixed-width (`Int32`, `Int64`, `Float32`, `Float64`):
//!   `[validity bitmap][rows * width little-endian value bytes]`
//! - `Boolean`: `[validity bitmap][value bitmap]`
//! - Variable-length (`Utf8`, `Binary`):
//!   `[validity bitmap][(rows + 1) * 4 offset bytes][value bytes]`
//!
//! Validity bitmaps are LSB-first, one bit per row, 1 = non-null. Offsets are
//! little-endian `i32`, rebased so `offset[0] == 0`; `offset[i + 1] -
//! offset[i]` is row i's byte length. Null slots still occupy value space in
//! fixed-width pages and contribute zero length in variable-length pages.
//!
//! Decoding takes a `(start, len)` row range and materializes only those
//! rows. Numeric values round-trip bit-for-bit; float NaN/Inf payloads are
//! copied as raw bytes, never re-parsed.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray,
};
use arrow::datatypes::DataType;

use common_error::{StrataError, StrataResult};

/// Number of bytes in a validity (or boolean value) bitmap for `rows` rows.
pub const fn bitmap_len(rows: usize) -> usize {
    rows.div_ceil(8)
}

/// Byte width of a fixed-width logical type, if it has one.
pub const fn fixed_width(data_type: &DataType) -> Option<usize> {
    match data_type {
        DataType::Int32 | DataType::Float32 => Some(4),
        DataType::Int64 | DataType::Float64 => Some(8),
        _ => None,
    }
}

/// Whether the codec has a page layout for the given logical type.
pub const fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean
            | DataType::Utf8
            | DataType::Binary
    )
}

#[inline]
fn bit_is_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap[idx / 8] & (1 << (idx % 8)) != 0
}

#[inline]
fn set_bit(bitmap: &mut [u8], idx: usize) {
    bitmap[idx / 8] |= 1 << (idx % 8);
}

fn encode_validity(array: &dyn Array) -> Vec<u8> {
    let mut bitmap = vec![0u8; bitmap_len(array.len())];
    for i in 0..array.len() {
        if array.is_valid(i) {
            set_bit(&mut bitmap, i);
        }
    }
    bitmap
}

// ============================================================================
// Encode
// ============================================================================

/// Encode one column chunk into page bytes.
///
/// Fails with `UnsupportedType` when the array's logical type has no page
/// layout.
pub fn encode_page(array: &dyn Array) -> StrataResult<Vec<u8>> {
    let mut buf = encode_validity(array);

    match array.data_type() {
        DataType::Int32 => {
            let arr = downcast::<Int32Array>(array)?;
            for i in 0..arr.len() {
                buf.extend_from_slice(&arr.value(i).to_le_bytes());
            }
        }
        DataType::Int64 => {
            let arr = downcast::<Int64Array>(array)?;
            for i in 0..arr.len() {
                buf.extend_from_slice(&arr.value(i).to_le_bytes());
            }
        }
        DataType::Float32 => {
            let arr = downcast::<Float32Array>(array)?;
            for i in 0..arr.len() {
                buf.extend_from_slice(&arr.value(i).to_le_bytes());
            }
        }
        DataType::Float64 => {
            let arr = downcast::<Float64Array>(array)?;
            for i in 0..arr.len() {
                buf.extend_from_slice(&arr.value(i).to_le_bytes());
            }
        }
        DataType::Boolean => {
            let arr = downcast::<BooleanArray>(array)?;
            let mut values = vec![0u8; bitmap_len(arr.len())];
            for i in 0..arr.len() {
                if arr.is_valid(i) && arr.value(i) {
                    set_bit(&mut values, i);
                }
            }
            buf.extend_from_slice(&values);
        }
        DataType::Utf8 => {
            let arr = downcast::<StringArray>(array)?;
            encode_varlen(&mut buf, arr.len(), |i| {
                if arr.is_valid(i) {
                    arr.value(i).as_bytes()
                } else {
                    &[]
                }
            });
        }
        DataType::Binary => {
            let arr = downcast::<BinaryArray>(array)?;
            encode_varlen(&mut buf, arr.len(), |i| {
                if arr.is_valid(i) {
                    arr.value(i)
                } else {
                    &[]
                }
            });
        }
        other => {
            return Err(StrataError::unsupported_type(format!(
                "no page layout for type {other}"
            )));
        }
    }

    Ok(buf)
}

fn encode_varlen<'a>(buf: &mut Vec<u8>, rows: usize, value: impl Fn(usize) -> &'a [u8]) {
    let mut offsets = Vec::with_capacity(rows + 1);
    let mut data = Vec::new();
    offsets.push(0i32);
    for i in 0..rows {
        data.extend_from_slice(value(i));
        offsets.push(data.len() as i32);
    }
    for off in offsets {
        buf.extend_from_slice(&off.to_le_bytes());
    }
    buf.extend_from_slice(&data);
}

fn downcast<'a, T: Array + 'static>(array: &'a dyn Array) -> StrataResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        StrataError::internal(format!(
            "array downcast failed for type {}",
            array.data_type()
        ))
    })
}

// ============================================================================
// Decode
// ============================================================================

/// Decode rows `[start, start + len)` from page bytes.
///
/// `rows` is the page's declared row count. Only the requested range is
/// materialized; the rest of the page is never reconstructed.
pub fn decode_page(
    bytes: &[u8],
    data_type: &DataType,
    rows: usize,
    start: usize,
    len: usize,
) -> StrataResult<ArrayRef> {
    if start + len > rows {
        return Err(StrataError::internal(format!(
            "decode range [{start}, {}) exceeds page rows {rows}",
            start + len
        )));
    }
    let validity_len = bitmap_len(rows);
    if bytes.len() < validity_len {
        return Err(StrataError::corrupt_page(format!(
            "page of {} bytes too short for validity bitmap of {validity_len} bytes ({rows} rows)",
            bytes.len()
        )));
    }
    let (validity, rest) = bytes.split_at(validity_len);

    match data_type {
        DataType::Int32 => decode_fixed(rest, validity, rows, start, len, i32::from_le_bytes)
            .map(|v| Arc::new(Int32Array::from(v)) as ArrayRef),
        DataType::Int64 => decode_fixed(rest, validity, rows, start, len, i64::from_le_bytes)
            .map(|v| Arc::new(Int64Array::from(v)) as ArrayRef),
        DataType::Float32 => decode_fixed(rest, validity, rows, start, len, f32::from_le_bytes)
            .map(|v| Arc::new(Float32Array::from(v)) as ArrayRef),
        DataType::Float64 => decode_fixed(rest, validity, rows, start, len, f64::from_le_bytes)
            .map(|v| Arc::new(Float64Array::from(v)) as ArrayRef),
        DataType::Boolean => {
            if rest.len() != bitmap_len(rows) {
                return Err(StrataError::corrupt_page(format!(
                    "boolean page has {} value bytes, expected {} for {rows} rows",
                    rest.len(),
                    bitmap_len(rows)
                )));
            }
            let values: Vec<Option<bool>> = (start..start + len)
                .map(|row| {
                    if bit_is_set(validity, row) {
                        Some(bit_is_set(rest, row))
                    } else {
                        None
                    }
                })
                .collect();
            Ok(Arc::new(BooleanArray::from(values)))
        }
        DataType::Utf8 => {
            let (offsets, data) = split_varlen(rest, rows)?;
            let values = varlen_values(&offsets, data, validity, start, len)?;
            let strings: Vec<Option<&str>> = values
                .into_iter()
                .map(|v| {
                    v.map(|bytes| {
                        std::str::from_utf8(bytes).map_err(|e| {
                            StrataError::corrupt_page(format!("invalid utf-8 in page: {e}"))
                        })
                    })
                    .transpose()
                })
                .collect::<StrataResult<_>>()?;
            Ok(Arc::new(StringArray::from(strings)))
        }
        DataType::Binary => {
            let (offsets, data) = split_varlen(rest, rows)?;
            let values = varlen_values(&offsets, data, validity, start, len)?;
            Ok(Arc::new(BinaryArray::from_opt_vec(values)))
        }
        other => Err(StrataError::unsupported_type(format!(
            "no page layout for type {other}"
        ))),
    }
}

fn decode_fixed<T, const W: usize>(
    data: &[u8],
    validity: &[u8],
    rows: usize,
    start: usize,
    len: usize,
    from_bytes: impl Fn([u8; W]) -> T,
) -> StrataResult<Vec<Option<T>>> {
    if data.len() != rows * W {
        return Err(StrataError::corrupt_page(format!(
            "fixed-width page has {} value bytes, expected {} for {rows} rows of width {W}",
            data.len(),
            rows * W
        )));
    }
    Ok((start..start + len)
        .map(|row| {
            if bit_is_set(validity, row) {
                let mut raw = [0u8; W];
                raw.copy_from_slice(&data[row * W..row * W + W]);
                Some(from_bytes(raw))
            } else {
                None
            }
        })
        .collect())
}

/// Split a variable-length page body into its offsets array and value bytes,
/// validating the offsets against the declared row count.
fn split_varlen(rest: &[u8], rows: usize) -> StrataResult<(Vec<i32>, &[u8])> {
    let offsets_len = (rows + 1) * 4;
    if rest.len() < offsets_len {
        return Err(StrataError::corrupt_page(format!(
            "varlen page has {} bytes after validity, expected at least {offsets_len} offset bytes \
             for {rows} rows",
            rest.len()
        )));
    }
    let (offset_bytes, data) = rest.split_at(offsets_len);
    let mut offsets = Vec::with_capacity(rows + 1);
    for chunk in offset_bytes.chunks_exact(4) {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(chunk);
        offsets.push(i32::from_le_bytes(raw));
    }

    if offsets[0] != 0 {
        return Err(StrataError::corrupt_page(format!(
            "varlen offsets start at {}, expected 0",
            offsets[0]
        )));
    }
    for pair in offsets.windows(2) {
        if pair[1] < pair[0] {
            return Err(StrataError::corrupt_page(format!(
                "varlen offsets not monotonic: {} followed by {}",
                pair[0], pair[1]
            )));
        }
    }
    let declared = offsets[rows] as usize;
    if declared != data.len() {
        return Err(StrataError::corrupt_page(format!(
            "varlen offsets declare {declared} value bytes, page holds {}",
            data.len()
        )));
    }
    Ok((offsets, data))
}

fn varlen_values<'a>(
    offsets: &[i32],
    data: &'a [u8],
    validity: &[u8],
    start: usize,
    len: usize,
) -> StrataResult<Vec<Option<&'a [u8]>>> {
    Ok((start..start + len)
        .map(|row| {
            if bit_is_set(validity, row) {
                Some(&data[offsets[row] as usize..offsets[row + 1] as usize])
            } else {
                None
            }
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Date32Array, Float64Array, Int64Array};
    use proptest::prelude::*;

    fn roundtrip(array: &dyn Array) -> ArrayRef {
        let bytes = encode_page(array).unwrap();
        decode_page(&bytes, array.data_type(), array.len(), 0, array.len()).unwrap()
    }

    #[test]
    fn test_int64_roundtrip_with_nulls() {
        let arr = Int64Array::from(vec![Some(1), None, Some(i64::MIN), Some(i64::MAX), None]);
        let decoded = roundtrip(&arr);
        assert_eq!(decoded.as_ref(), &arr as &dyn Array);
    }

    #[test]
    fn test_int32_partial_decode() {
        let arr = Int32Array::from((0..100).map(Some).collect::<Vec<_>>());
        let bytes = encode_page(&arr).unwrap();

        let decoded = decode_page(&bytes, &DataType::Int32, 100, 37, 5).unwrap();
        let expected = Int32Array::from(vec![37, 38, 39, 40, 41]);
        assert_eq!(decoded.as_ref(), &expected as &dyn Array);
    }

    #[test]
    fn test_float_preserves_nan_and_inf_bits() {
        let quiet_nan = f64::from_bits(0x7ff8_0000_0000_0001);
        let arr = Float64Array::from(vec![
            Some(quiet_nan),
            Some(f64::INFINITY),
            Some(f64::NEG_INFINITY),
            Some(-0.0),
            None,
        ]);
        let bytes = encode_page(&arr).unwrap();
        let decoded = decode_page(&bytes, &DataType::Float64, 5, 0, 5).unwrap();
        let decoded = decoded.as_any().downcast_ref::<Float64Array>().unwrap();

        assert_eq!(decoded.value(0).to_bits(), quiet_nan.to_bits());
        assert_eq!(decoded.value(1), f64::INFINITY);
        assert_eq!(decoded.value(2), f64::NEG_INFINITY);
        assert_eq!(decoded.value(3).to_bits(), (-0.0f64).to_bits());
        assert!(decoded.is_null(4));
    }

    #[test]
    fn test_boolean_roundtrip() {
        let arr = BooleanArray::from(vec![Some(true), Some(false), None, Some(true)]);
        let decoded = roundtrip(&arr);
        assert_eq!(decoded.as_ref(), &arr as &dyn Array);
    }

    #[test]
    fn test_utf8_roundtrip_with_empty_and_null() {
        let arr = StringArray::from(vec![Some("alpha"), Some(""), None, Some("βeta")]);
        let decoded = roundtrip(&arr);
        assert_eq!(decoded.as_ref(), &arr as &dyn Array);
    }

    #[test]
    fn test_utf8_partial_decode() {
        let arr = StringArray::from(vec![Some("a"), Some("bb"), Some("ccc"), None, Some("eeeee")]);
        let bytes = encode_page(&arr).unwrap();

        let decoded = decode_page(&bytes, &DataType::Utf8, 5, 1, 3).unwrap();
        let expected = StringArray::from(vec![Some("bb"), Some("ccc"), None]);
        assert_eq!(decoded.as_ref(), &expected as &dyn Array);
    }

    #[test]
    fn test_binary_roundtrip() {
        let arr = BinaryArray::from_opt_vec(vec![Some(b"\x00\xff".as_ref()), None, Some(b"")]);
        let decoded = roundtrip(&arr);
        assert_eq!(decoded.as_ref(), &arr as &dyn Array);
    }

    #[test]
    fn test_unsupported_type() {
        let arr = Date32Array::from(vec![1, 2, 3]);
        let err = encode_page(&arr).unwrap_err();
        assert!(matches!(err, StrataError::UnsupportedType(_)));
    }

    #[test]
    fn test_corrupt_short_page() {
        let arr = Int64Array::from(vec![1, 2, 3, 4]);
        let mut bytes = encode_page(&arr).unwrap();
        bytes.truncate(bytes.len() - 3);

        let err = decode_page(&bytes, &DataType::Int64, 4, 0, 4).unwrap_err();
        assert!(matches!(err, StrataError::CorruptPage(_)));
    }

    #[test]
    fn test_corrupt_varlen_offsets() {
        let arr = StringArray::from(vec!["ab", "cd"]);
        let mut bytes = encode_page(&arr).unwrap();
        // Second offset lives right after the 1-byte validity bitmap.
        bytes[5] = 200;

        let err = decode_page(&bytes, &DataType::Utf8, 2, 0, 2).unwrap_err();
        assert!(matches!(err, StrataError::CorruptPage(_)));
    }

    proptest! {
        #[test]
        fn prop_int64_roundtrip(values in prop::collection::vec(prop::option::of(any::<i64>()), 1..200)) {
            let arr = Int64Array::from(values);
            let bytes = encode_page(&arr).unwrap();
            let decoded = decode_page(&bytes, &DataType::Int64, arr.len(), 0, arr.len()).unwrap();
            prop_assert_eq!(decoded.as_ref(), &arr as &dyn Array);
        }
    }
}
