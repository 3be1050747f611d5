//! Encoded polyline codec (Google polyline algorithm, 1e-5 precision).
//!
//! Routes travel the wire in this compact string form; decode/encode
//! round-trips losslessly at five decimal places.

use thiserror::Error;

use super::Coordinate;

const PRECISION: f64 = 1e5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolylineError {
    /// A byte outside the `?`..=`~` range appeared at the given offset.
    #[error("invalid polyline byte {byte:#04x} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },
    /// Input ended in the middle of a varint chunk.
    #[error("truncated polyline: unterminated chunk at offset {offset}")]
    Truncated { offset: usize },
    /// A value carried more continuation chunks than any coordinate delta
    /// can need.
    #[error("overflowing polyline chunk starting at offset {offset}")]
    Overflow { offset: usize },
}

/// Decode an encoded polyline into coordinates.
pub fn decode(encoded: &str) -> Result<Vec<Coordinate>, PolylineError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut offset = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while offset < bytes.len() {
        lat += decode_value(bytes, &mut offset)?;
        lng += decode_value(bytes, &mut offset)?;
        points.push(Coordinate::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
    }
    Ok(points)
}

/// Encode coordinates into the compact polyline form.
pub fn encode(path: &[Coordinate]) -> String {
    let mut out = String::new();
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;
    for point in path {
        let lat = (point.lat * PRECISION).round() as i64;
        let lng = (point.lng * PRECISION).round() as i64;
        encode_value(lat - prev_lat, &mut out);
        encode_value(lng - prev_lng, &mut out);
        prev_lat = lat;
        prev_lng = lng;
    }
    out
}

fn decode_value(bytes: &[u8], offset: &mut usize) -> Result<i64, PolylineError> {
    let start = *offset;
    let mut result: i64 = 0;
    let mut shift = 0u32;
    loop {
        let Some(&byte) = bytes.get(*offset) else {
            return Err(PolylineError::Truncated { offset: start });
        };
        if !(b'?'..=b'~').contains(&byte) {
            return Err(PolylineError::InvalidByte {
                byte,
                offset: *offset,
            });
        }
        *offset += 1;
        if shift >= i64::BITS {
            return Err(PolylineError::Overflow { offset: start });
        }
        let chunk = (byte - 63) as i64;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    // Zig-zag back to a signed delta.
    if result & 1 == 1 {
        Ok(!(result >> 1))
    } else {
        Ok(result >> 1)
    }
}

fn encode_value(value: i64, out: &mut String) {
    let mut v = if value < 0 { !(value << 1) } else { value << 1 };
    while v >= 0x20 {
        out.push((((v & 0x1f) | 0x20) as u8 + 63) as char);
        v >>= 5;
    }
    out.push((v as u8 + 63) as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_reference_example() {
        // Worked example from the polyline format documentation.
        let points = decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@").expect("decode");
        assert_eq!(points.len(), 3);
        assert!((points[0].lat - 38.5).abs() < 1e-9);
        assert!((points[0].lng - -120.2).abs() < 1e-9);
        assert!((points[2].lat - 43.252).abs() < 1e-9);
        assert!((points[2].lng - -126.453).abs() < 1e-9);
    }

    #[test]
    fn round_trips_at_five_decimals() {
        let path = vec![
            Coordinate::new(52.52437, 13.41053),
            Coordinate::new(52.52459, 13.41091),
            Coordinate::new(52.52581, 13.41203),
        ];
        let decoded = decode(&encode(&path)).expect("decode");
        assert_eq!(decoded.len(), path.len());
        for (a, b) in path.iter().zip(&decoded) {
            assert!((a.lat - b.lat).abs() < 1e-5);
            assert!((a.lng - b.lng).abs() < 1e-5);
        }
    }

    #[test]
    fn empty_input_decodes_to_empty_path() {
        assert_eq!(decode("").expect("decode"), Vec::new());
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn malformed_input_is_an_error_not_a_panic() {
        assert!(matches!(
            decode("_p~iF~ps|U_"),
            Err(PolylineError::Truncated { .. })
        ));
        assert!(matches!(
            decode("ab\u{7f}"),
            Err(PolylineError::InvalidByte { .. })
        ));
    }

    #[test]
    fn runaway_continuation_chunks_are_an_error() {
        // Every byte flags continuation, so the value never terminates.
        assert!(matches!(
            decode("~~~~~~~~~~~~~~"),
            Err(PolylineError::Overflow { .. })
        ));
    }
}
