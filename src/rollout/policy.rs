// ABOUTME: Batch policies that split a rollout's hosts into sequential batches.
// ABOUTME: Parsed from "all", "N", or "P%" and serialized back to the same form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid batch policy '{input}': {reason}")]
pub struct BatchPolicyError {
    input: String,
    reason: &'static str,
}

/// How many hosts deploy at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BatchPolicy {
    /// Every selected host in one batch.
    #[default]
    AllAtOnce,
    /// Batches of at most `n` hosts.
    FixedBatchSize(usize),
    /// Batches of `ceil(len * p / 100)` hosts, at least one.
    PercentagePerBatch(u8),
}

impl BatchPolicy {
    pub fn parse(input: &str) -> Result<Self, BatchPolicyError> {
        let trimmed = input.trim();
        let err = |reason| BatchPolicyError {
            input: input.to_string(),
            reason,
        };

        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(BatchPolicy::AllAtOnce);
        }

        if let Some(percent) = trimmed.strip_suffix('%') {
            let p: u8 = percent
                .trim()
                .parse()
                .map_err(|_| err("percentage must be a whole number"))?;
            if p == 0 || p > 100 {
                return Err(err("percentage must be between 1 and 100"));
            }
            return Ok(BatchPolicy::PercentagePerBatch(p));
        }

        let n: usize = trimmed
            .parse()
            .map_err(|_| err("expected 'all', a batch size, or a percentage"))?;
        if n == 0 {
            return Err(err("batch size must be at least 1"));
        }
        Ok(BatchPolicy::FixedBatchSize(n))
    }

    /// Hosts per batch for a selection of `total` hosts.
    pub fn batch_size(&self, total: usize) -> usize {
        let size = match *self {
            BatchPolicy::AllAtOnce => total,
            BatchPolicy::FixedBatchSize(n) => n,
            BatchPolicy::PercentagePerBatch(p) => (total * p as usize).div_ceil(100),
        };
        size.max(1)
    }

    /// Split `items` into ordered batches covering each item exactly once.
    pub fn partition<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        items
            .chunks(self.batch_size(items.len()))
            .map(<[T]>::to_vec)
            .collect()
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchPolicy::AllAtOnce => f.write_str("all"),
            BatchPolicy::FixedBatchSize(n) => write!(f, "{n}"),
            BatchPolicy::PercentagePerBatch(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for BatchPolicy {
    type Err = BatchPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BatchPolicy {
    type Error = BatchPolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BatchPolicy> for String {
    fn from(policy: BatchPolicy) -> Self {
        policy.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        assert_eq!(BatchPolicy::parse("all").unwrap(), BatchPolicy::AllAtOnce);
        assert_eq!(BatchPolicy::parse("ALL").unwrap(), BatchPolicy::AllAtOnce);
        assert_eq!(
            BatchPolicy::parse("2").unwrap(),
            BatchPolicy::FixedBatchSize(2)
        );
        assert_eq!(
            BatchPolicy::parse("25%").unwrap(),
            BatchPolicy::PercentagePerBatch(25)
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        for input in ["0", "0%", "101%", "-1", "half", "", "1.5%"] {
            assert!(BatchPolicy::parse(input).is_err(), "{input} should fail");
        }
    }

    #[test]
    fn percentage_rounds_up_with_minimum_of_one() {
        assert_eq!(BatchPolicy::PercentagePerBatch(25).batch_size(10), 3);
        assert_eq!(BatchPolicy::PercentagePerBatch(1).batch_size(10), 1);
        assert_eq!(BatchPolicy::PercentagePerBatch(100).batch_size(7), 7);
    }

    #[test]
    fn fixed_size_partitions_in_order() {
        let batches = BatchPolicy::FixedBatchSize(2).partition(&["a", "b", "c", "d", "e"]);
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);
    }

    #[test]
    fn empty_selection_has_no_batches() {
        let empty: [&str; 0] = [];
        assert!(BatchPolicy::AllAtOnce.partition(&empty).is_empty());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for policy in [
            BatchPolicy::AllAtOnce,
            BatchPolicy::FixedBatchSize(3),
            BatchPolicy::PercentagePerBatch(50),
        ] {
            assert_eq!(BatchPolicy::parse(&policy.to_string()).unwrap(), policy);
        }
    }
}
