//! Splitting a sample order into mini-batches.

use anyhow::{bail, Result};

/// Chunk `order` into batches of `batch_size`; the final batch keeps whatever is left over.
pub fn plan_batches(order: &[usize], batch_size: usize) -> Result<Vec<Vec<usize>>> {
    if batch_size == 0 {
        bail!("batch size must be positive");
    }
    Ok(order.chunks(batch_size).map(<[usize]>::to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_partial_final_batch() {
        let order: Vec<usize> = (0..7).collect();
        let batches = plan_batches(&order, 3).unwrap();

        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn empty_order_has_no_batches() {
        assert!(plan_batches(&[], 4).unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(plan_batches(&[0, 1], 0).is_err());
    }
}
