//! Fee estimation and transaction size calculation.
//!
//! `fee = (FEE_PER_BYTE * size + FEE_PER_OUTPUT * outputs) * multiplier`,
//! with the multiplier taken from the priority tier.

use crate::TxError;
use beldex_types::constants::{DEFAULT_RING_SIZE, FEE_PER_BYTE, FEE_PER_OUTPUT};

/// Fee priority levels. `Default` resolves to `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePriority {
    Default,
    Unimportant,
    Normal,
    Elevated,
    Priority,
    /// Flash transfers, confirmed by the service-node quorum.
    Flash,
}

impl FeePriority {
    pub fn from_u32(priority: u32) -> Result<Self, TxError> {
        match priority {
            0 => Ok(FeePriority::Default),
            1 => Ok(FeePriority::Unimportant),
            2 => Ok(FeePriority::Normal),
            3 => Ok(FeePriority::Elevated),
            4 => Ok(FeePriority::Priority),
            5 => Ok(FeePriority::Flash),
            other => Err(TxError::InvalidPriority(other)),
        }
    }

    /// Priority multiplier applied to the base fee.
    pub fn multiplier(&self) -> u64 {
        match self {
            FeePriority::Unimportant => 1,
            FeePriority::Default | FeePriority::Normal => 4,
            FeePriority::Elevated => 20,
            FeePriority::Priority => 166,
            FeePriority::Flash => 5,
        }
    }
}

/// Estimate the serialized size of a transaction.
pub fn estimate_tx_size(num_inputs: usize, num_outputs: usize, ring_size: usize, extra_bytes: usize) -> usize {
    let mut size = 0usize;
    size += 1; // version
    size += 1; // tx type
    size += 1; // unlock_time
    size += 1; // input count
    size += 1; // output count

    // key image + offset count + offsets (~4 bytes each)
    let per_input = 32 + 1 + ring_size * 4;
    size += num_inputs * per_input;

    // key + amount tag + encrypted amount
    let per_output = 32 + 1 + 8;
    size += num_outputs * per_output;

    // Extra: tx pub key, one additional key per output at most, payload.
    size += 40 + extra_bytes;

    // fee varint
    size += 4;

    // LSAG: c0 + one response per ring member.
    size += num_inputs * (32 + ring_size * 32);
    size
}

pub fn estimate_tx_fee(
    num_inputs: usize,
    num_outputs: usize,
    ring_size: usize,
    extra_bytes: usize,
    priority: FeePriority,
) -> u64 {
    let size = estimate_tx_size(num_inputs, num_outputs, ring_size, extra_bytes) as u64;
    (FEE_PER_BYTE * size + FEE_PER_OUTPUT * num_outputs as u64) * priority.multiplier()
}

/// Fee for a one-input transfer to `recipients` plus change, at the default
/// ring size. Pure; never touches the network.
pub fn estimate_fee_for_recipients(recipients: usize, priority: FeePriority) -> u64 {
    estimate_tx_fee(1, recipients + 1, DEFAULT_RING_SIZE, 0, priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_priority_multipliers() {
        assert_eq!(FeePriority::Unimportant.multiplier(), 1);
        assert_eq!(FeePriority::Default.multiplier(), FeePriority::Normal.multiplier());
        assert_eq!(FeePriority::Elevated.multiplier(), 20);
        assert_eq!(FeePriority::Priority.multiplier(), 166);
        assert_eq!(FeePriority::Flash.multiplier(), 5);
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(FeePriority::from_u32(1).unwrap(), FeePriority::Unimportant);
        assert_eq!(FeePriority::from_u32(5).unwrap(), FeePriority::Flash);
        assert!(matches!(FeePriority::from_u32(6), Err(TxError::InvalidPriority(6))));
    }

    #[test]
    fn test_more_inputs_larger() {
        assert!(estimate_tx_size(4, 2, 10, 0) > estimate_tx_size(1, 2, 10, 0));
    }

    #[test]
    fn test_more_outputs_cost_more() {
        let p = FeePriority::Normal;
        assert!(estimate_tx_fee(1, 3, 10, 0, p) > estimate_tx_fee(1, 2, 10, 0, p));
    }

    #[test]
    fn test_recipient_estimate_scales_with_priority() {
        let low = estimate_fee_for_recipients(1, FeePriority::Unimportant);
        let high = estimate_fee_for_recipients(1, FeePriority::Priority);
        assert_eq!(high, low * 166);
        assert_eq!(low, estimate_tx_fee(1, 2, DEFAULT_RING_SIZE, 0, FeePriority::Unimportant));
    }
}
