use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{FeeError, FeeResult};
use super::heads::{FeeHead, FeeHeads};

/// Portion of a payment credited to one fee head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationLine {
    pub fee_head: FeeHead,
    pub amount: Decimal,
}

/// How a single payment is spread over the record's heads. Lines are kept in
/// priority order and never hold a zero amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation {
    lines: Vec<AllocationLine>,
}

impl Allocation {
    /// Allocate `amount` against `dues`, either head by head in priority order
    /// or exactly as the caller's `hint` says.
    pub fn allocate(
        amount: Decimal,
        dues: &FeeHeads,
        hint: Option<&[AllocationLine]>,
    ) -> FeeResult<Self> {
        if amount <= Decimal::ZERO {
            return Err(FeeError::validation("Amount paid must be greater than zero"));
        }
        if amount.normalize().scale() > 2 {
            return Err(FeeError::validation(
                "Amount paid supports at most two decimal places",
            ));
        }

        let outstanding = dues.total();
        if amount > outstanding {
            return Err(FeeError::validation(format!(
                "Amount paid {} exceeds outstanding dues {}",
                amount, outstanding
            )));
        }

        match hint {
            Some(lines) if !lines.is_empty() => Self::explicit(amount, dues, lines),
            _ => Ok(Self::fifo(amount, dues)),
        }
    }

    fn fifo(amount: Decimal, dues: &FeeHeads) -> Self {
        let mut remaining = amount;
        let mut lines = Vec::new();

        for (head, due) in dues.iter() {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(due);
            if take > Decimal::ZERO {
                lines.push(AllocationLine { fee_head: head, amount: take });
                remaining -= take;
            }
        }

        Self { lines }
    }

    fn explicit(amount: Decimal, dues: &FeeHeads, hint: &[AllocationLine]) -> FeeResult<Self> {
        let mut seen = HashSet::new();
        for line in hint {
            if !seen.insert(line.fee_head) {
                return Err(FeeError::validation(format!(
                    "Fee head '{}' appears more than once in allocation",
                    line.fee_head
                )));
            }
            if line.amount <= Decimal::ZERO {
                return Err(FeeError::validation(format!(
                    "Allocation for '{}' must be greater than zero",
                    line.fee_head
                )));
            }
            let due = dues.get(line.fee_head);
            if line.amount > due {
                return Err(FeeError::validation(format!(
                    "Allocation {} for '{}' exceeds its outstanding due {}",
                    line.amount, line.fee_head, due
                )));
            }
        }

        let hinted: Decimal = hint.iter().map(|line| line.amount).sum();
        if hinted != amount {
            return Err(FeeError::validation(format!(
                "Allocation total {} does not match amount paid {}",
                hinted, amount
            )));
        }

        let mut lines = hint.to_vec();
        lines.sort_by_key(|line| line.fee_head);
        Ok(Self { lines })
    }

    pub fn lines(&self) -> &[AllocationLine] {
        &self.lines
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }

    pub fn as_heads(&self) -> FeeHeads {
        heads_from_lines(&self.lines)
    }

    pub fn into_lines(self) -> Vec<AllocationLine> {
        self.lines
    }
}

/// Collapse allocation lines into per-head amounts
pub fn heads_from_lines(lines: &[AllocationLine]) -> FeeHeads {
    let mut heads = FeeHeads::default();
    for line in lines {
        heads.set(line.fee_head, heads.get(line.fee_head) + line.amount);
    }
    heads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn dues() -> FeeHeads {
        FeeHeads {
            admission_fee: d(5000),
            first_term_amt: d(3000),
            second_term_amt: d(3000),
            ..Default::default()
        }
    }

    #[test]
    fn fifo_pays_earlier_heads_first() {
        let allocation = Allocation::allocate(d(6000), &dues(), None).unwrap();
        assert_eq!(
            allocation.lines(),
            &[
                AllocationLine { fee_head: FeeHead::AdmissionFee, amount: d(5000) },
                AllocationLine { fee_head: FeeHead::FirstTermAmt, amount: d(1000) },
            ]
        );
        assert_eq!(allocation.total(), d(6000));
    }

    #[test]
    fn fifo_skips_settled_heads() {
        let mut partly_paid = dues();
        partly_paid.admission_fee = Decimal::ZERO;
        let allocation = Allocation::allocate(d(3500), &partly_paid, None).unwrap();
        let heads = allocation.as_heads();
        assert_eq!(heads.admission_fee, Decimal::ZERO);
        assert_eq!(heads.first_term_amt, d(3000));
        assert_eq!(heads.second_term_amt, d(500));
    }

    #[test]
    fn allocation_sum_always_matches_amount() {
        for amount in [1, 999, 5000, 5001, 8000, 10999, 11000] {
            let allocation = Allocation::allocate(d(amount), &dues(), None).unwrap();
            assert_eq!(allocation.total(), d(amount), "amount {}", amount);
            let per_head = allocation.as_heads();
            for (head, due) in dues().iter() {
                assert!(per_head.get(head) <= due);
            }
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(
            Allocation::allocate(Decimal::ZERO, &dues(), None),
            Err(FeeError::Validation(_))
        ));
        assert!(matches!(
            Allocation::allocate(d(-5), &dues(), None),
            Err(FeeError::Validation(_))
        ));
    }

    #[test]
    fn rejects_payment_above_outstanding() {
        let err = Allocation::allocate(d(11001), &dues(), None).unwrap_err();
        assert!(err.to_string().contains("exceeds outstanding dues"));
    }

    #[test]
    fn honours_explicit_hint() {
        let hint = [
            AllocationLine { fee_head: FeeHead::SecondTermAmt, amount: d(2000) },
            AllocationLine { fee_head: FeeHead::AdmissionFee, amount: d(1000) },
        ];
        let allocation = Allocation::allocate(d(3000), &dues(), Some(&hint)).unwrap();
        assert_eq!(allocation.lines()[0].fee_head, FeeHead::AdmissionFee);
        assert_eq!(allocation.as_heads().second_term_amt, d(2000));
    }

    #[test]
    fn rejects_bad_hints() {
        let over = [AllocationLine { fee_head: FeeHead::FirstTermAmt, amount: d(3001) }];
        assert!(Allocation::allocate(d(3001), &dues(), Some(&over)).is_err());

        let mismatch = [AllocationLine { fee_head: FeeHead::FirstTermAmt, amount: d(100) }];
        assert!(Allocation::allocate(d(200), &dues(), Some(&mismatch)).is_err());

        let duplicate = [
            AllocationLine { fee_head: FeeHead::FirstTermAmt, amount: d(100) },
            AllocationLine { fee_head: FeeHead::FirstTermAmt, amount: d(100) },
        ];
        assert!(Allocation::allocate(d(200), &dues(), Some(&duplicate)).is_err());
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        let amount = Decimal::from_str_exact("100.500").unwrap();
        let allocation = Allocation::allocate(amount, &dues(), None).unwrap();
        assert_eq!(allocation.total(), Decimal::new(10050, 2));

        let err = Allocation::allocate(Decimal::from_str_exact("100.505").unwrap(), &dues(), None)
            .unwrap_err();
        assert!(err.to_string().contains("two decimal places"));
    }
}
