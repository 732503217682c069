//! Splitting an input sequence into fixed-size batches.

use crate::error::ConfigError;

/// Split `items` into batches of `batch_size`, preserving order.
///
/// Every batch except possibly the last holds exactly `batch_size` items.
/// An empty input yields no batches.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Result<Vec<Vec<T>>, ConfigError> {
    if batch_size < 1 {
        return Err(ConfigError::invalid("batch_size must be at least 1"));
    }

    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_preserves_order_and_sizes() {
        let items: Vec<u32> = (1..=23).collect();
        let batches = partition(items.clone(), 5).unwrap();

        assert_eq!(batches.len(), 5);
        for batch in &batches[..4] {
            assert_eq!(batch.len(), 5);
        }
        assert_eq!(batches[4].len(), 3);
        assert_eq!(batches.concat(), items);
    }

    #[test]
    fn test_partition_exact_multiple() {
        let batches = partition(vec!['a', 'b', 'c', 'd'], 2).unwrap();
        assert_eq!(batches, vec![vec!['a', 'b'], vec!['c', 'd']]);
    }

    #[test]
    fn test_partition_batch_larger_than_input() {
        let batches = partition(vec![1, 2, 3], 10).unwrap();
        assert_eq!(batches, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_partition_many_sizes() {
        let items: Vec<usize> = (0..97).collect();
        for size in 1..=20 {
            let batches = partition(items.clone(), size).unwrap();
            let (last, rest) = batches.split_last().unwrap();
            assert!(rest.iter().all(|b| b.len() == size));
            assert!(!last.is_empty() && last.len() <= size);
            assert_eq!(batches.concat(), items);
        }
    }

    #[test]
    fn test_partition_empty_input() {
        let batches = partition(Vec::<i32>::new(), 3).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_partition_rejects_zero_batch_size() {
        assert!(partition(vec![1], 0).is_err());
    }
}
