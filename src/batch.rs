use crate::error::PipelineError;
use std::ops::Range;

/// Split `items` into contiguous, order-preserving batches of at most `size`.
pub fn batches<T>(items: &[T], size: usize) -> Result<Vec<&[T]>, PipelineError> {
    Ok(batch_ranges(items.len(), size)?
        .into_iter()
        .map(|range| &items[range])
        .collect())
}

/// Index ranges of the batches `batches` would produce for `len` items.
pub fn batch_ranges(len: usize, size: usize) -> Result<Vec<Range<usize>>, PipelineError> {
    if size == 0 {
        return Err(PipelineError::InvalidBatchSize);
    }
    Ok((0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_batch_size_one_yields_one_batch_per_item() {
        let items = [1, 2, 3, 4];
        let out = batches(&items, 1).expect("size 1 is valid");
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn unit_batch_size_at_least_len_yields_single_batch() {
        let items = [1, 2, 3];
        assert_eq!(batches(&items, 3).expect("valid").len(), 1);
        assert_eq!(batches(&items, 50).expect("valid"), vec![&items[..]]);
    }

    #[test]
    fn unit_batches_cover_input_in_order() {
        let items: Vec<u32> = (0..120).collect();
        let out = batches(&items, 50).expect("valid");
        assert_eq!(out.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![50, 50, 20]);
        let flattened: Vec<u32> = out.concat();
        assert_eq!(flattened, items);
    }

    #[test]
    fn unit_empty_input_yields_no_batches() {
        let items: [u8; 0] = [];
        assert!(batches(&items, 10).expect("valid").is_empty());
    }

    #[test]
    fn unit_zero_batch_size_is_rejected() {
        let err = batches(&[1], 0).expect_err("zero is invalid");
        assert!(matches!(err, PipelineError::InvalidBatchSize));
    }

    #[test]
    fn unit_batch_ranges_match_batches() {
        assert_eq!(batch_ranges(120, 50).expect("valid"), vec![0..50, 50..100, 100..120]);
        assert!(batch_ranges(0, 50).expect("valid").is_empty());
        assert!(matches!(batch_ranges(3, 0), Err(PipelineError::InvalidBatchSize)));
    }
}
