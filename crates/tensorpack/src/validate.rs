//! Structural validation of decoded headers.

use tensorpack_core::{Error, OffsetRange, Result};

use crate::header::Header;

/// Checks that the tensor byte ranges tile `[0, data_len)` exactly.
///
/// Every byte of the data segment must belong to exactly one tensor: ranges
/// sorted by start must begin at 0, end at `data_len`, and touch with no gap
/// or overlap. A header without tensors is rejected.
pub fn validate(header: &Header, data_len: usize) -> Result<()> {
    let mut ranges: Vec<(&str, OffsetRange)> = header
        .tensors()
        .map(|(name, descriptor)| (name, descriptor.data_offsets))
        .collect();
    ranges.sort_by_key(|(_, range)| (range.start(), range.end()));

    let (Some((_, first)), Some((_, last))) = (ranges.first(), ranges.last()) else {
        return Err(Error::incomplete("header contains no tensors"));
    };

    if first.start() != 0 {
        return Err(Error::incomplete(format!(
            "data segment starts at offset {}, expected 0",
            first.start()
        )));
    }

    for pair in ranges.windows(2) {
        let (prev_name, prev) = pair[0];
        let (next_name, next) = pair[1];
        if prev.end() != next.start() {
            let kind = if prev.end() < next.start() { "gap" } else { "overlap" };
            return Err(Error::incomplete(format!(
                "{kind} between '{prev_name}' (ends at {}) and '{next_name}' (starts at {})",
                prev.end(),
                next.start()
            )));
        }
    }

    if last.end() != data_len {
        return Err(Error::incomplete(format!(
            "tensors cover {} bytes, data segment has {data_len}",
            last.end()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorpack_core::{DType, TensorDescriptor};

    fn header(ranges: &[(usize, usize)]) -> Header {
        let mut header = Header::new();
        for (i, &(start, end)) in ranges.iter().enumerate() {
            header
                .insert_tensor(
                    format!("t{i}"),
                    TensorDescriptor::new(
                        DType::U8,
                        vec![end - start],
                        OffsetRange::new(start, end).unwrap(),
                    ),
                )
                .unwrap();
        }
        header
    }

    #[test]
    fn test_contiguous_ranges_pass() {
        validate(&header(&[(0, 10), (10, 20)]), 20).unwrap();
        validate(&header(&[(10, 20), (0, 10)]), 20).unwrap();
    }

    #[test]
    fn test_gap_rejected() {
        let err = validate(&header(&[(0, 10), (12, 20)]), 20).unwrap_err();
        assert!(matches!(err, Error::IncompleteBuffer(ref msg) if msg.contains("gap")));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = validate(&header(&[(0, 10), (5, 20)]), 20).unwrap_err();
        assert!(matches!(err, Error::IncompleteBuffer(ref msg) if msg.contains("overlap")));
    }

    #[test]
    fn test_must_start_at_zero() {
        assert!(matches!(
            validate(&header(&[(2, 10)]), 10),
            Err(Error::IncompleteBuffer(_))
        ));
    }

    #[test]
    fn test_must_cover_whole_segment() {
        assert!(matches!(
            validate(&header(&[(0, 10)]), 12),
            Err(Error::IncompleteBuffer(_))
        ));
        assert!(matches!(
            validate(&header(&[(0, 10)]), 8),
            Err(Error::IncompleteBuffer(_))
        ));
    }

    #[test]
    fn test_no_tensors_rejected() {
        let mut only_metadata = Header::new();
        only_metadata.set_metadata(None);
        assert!(matches!(
            validate(&only_metadata, 0),
            Err(Error::IncompleteBuffer(_))
        ));
        assert!(matches!(
            validate(&Header::new(), 0),
            Err(Error::IncompleteBuffer(_))
        ));
    }

    #[test]
    fn test_zero_length_ranges() {
        validate(&header(&[(0, 0)]), 0).unwrap();
        validate(&header(&[(0, 0), (0, 4), (4, 4)]), 4).unwrap();
    }
}
