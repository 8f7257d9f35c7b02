use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{FeeError, FeeResult};
use super::heads::{FeeHead, FeeHeads};
use super::record::StudentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcessionType {
    Percentage,
    Amount,
}

/// Discount state carried on an enrollment record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Concession {
    pub is_applied: bool,
    #[serde(rename = "type")]
    pub concession_type: Option<ConcessionType>,
    pub value: Decimal,
    /// Absolute discount granted
    pub in_amount: Decimal,
    /// How `in_amount` was spread over the heads
    pub distribution: FeeHeads,
    pub remark: Option<String>,
    pub proof_ref: Option<String>,
    pub approved_by: Option<Uuid>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ConcessionTerms {
    pub concession_type: ConcessionType,
    pub value: Decimal,
    pub remark: String,
    pub approved_by: Uuid,
    /// Heads the discount may reduce; all heads when absent
    pub target_heads: Option<Vec<FeeHead>>,
}

impl ConcessionTerms {
    fn validate(&self) -> FeeResult<()> {
        if self.value <= Decimal::ZERO {
            return Err(FeeError::validation("Concession value must be greater than zero"));
        }
        if self.concession_type == ConcessionType::Percentage && self.value > Decimal::ONE_HUNDRED {
            return Err(FeeError::validation("Concession percentage cannot exceed 100"));
        }
        if self.remark.trim().is_empty() {
            return Err(FeeError::validation("Concession remark is required"));
        }
        if self.approved_by.is_nil() {
            return Err(FeeError::validation("Concession approver is required"));
        }
        if matches!(&self.target_heads, Some(heads) if heads.is_empty()) {
            return Err(FeeError::validation("Concession target heads cannot be empty"));
        }
        Ok(())
    }

    fn targets(&self, head: FeeHead) -> bool {
        match &self.target_heads {
            Some(heads) => heads.contains(&head),
            None => true,
        }
    }
}

/// Work out the concession a record would receive. Nothing is mutated.
pub fn compute_concession(record: &StudentRecord, terms: &ConcessionTerms) -> FeeResult<Concession> {
    terms.validate()?;

    if record.concession.is_applied {
        return Err(FeeError::conflict(
            "A concession is already applied to this record; revoke it before applying another",
        ));
    }

    let in_amount = match terms.concession_type {
        ConcessionType::Percentage => {
            let base = record.fee_structure.total() - record.paid_total();
            (base * terms.value / Decimal::ONE_HUNDRED).round_dp(2)
        }
        ConcessionType::Amount => terms.value,
    };

    if in_amount <= Decimal::ZERO {
        return Err(FeeError::validation("Concession amounts to nothing on this record"));
    }

    let targeted_dues: Decimal = record
        .dues
        .iter()
        .filter(|(head, _)| terms.targets(*head))
        .map(|(_, due)| due)
        .sum();

    if in_amount > targeted_dues {
        return Err(FeeError::validation(format!(
            "Concession of {} exceeds outstanding dues {}",
            in_amount, targeted_dues
        )));
    }

    let mut remaining = in_amount;
    let mut distribution = FeeHeads::default();
    for (head, due) in record.dues.iter() {
        if remaining.is_zero() {
            break;
        }
        if !terms.targets(head) {
            continue;
        }
        let take = remaining.min(due);
        distribution.set(head, take);
        remaining -= take;
    }

    if !remaining.is_zero() || distribution.total() != in_amount {
        return Err(FeeError::invariant("Concession distribution does not add up"));
    }

    Ok(Concession {
        is_applied: true,
        concession_type: Some(terms.concession_type),
        value: terms.value,
        in_amount,
        distribution,
        remark: Some(terms.remark.trim().to_string()),
        proof_ref: None,
        approved_by: Some(terms.approved_by),
        applied_at: Some(Utc::now()),
    })
}

impl StudentRecord {
    /// Install a computed concession and reduce dues by its distribution
    pub fn apply_concession(&mut self, concession: Concession) -> FeeResult<()> {
        if self.concession.is_applied {
            return Err(FeeError::conflict("A concession is already applied to this record"));
        }
        let mut next = self.clone();
        next.concession = concession;
        next.dues = next.expected_dues();
        next.check_invariants()?;
        *self = next;
        Ok(())
    }

    /// Remove the active concession and return its amount to dues
    pub fn revoke_concession(&mut self) -> FeeResult<Concession> {
        if !self.concession.is_applied {
            return Err(FeeError::conflict("No concession is applied to this record"));
        }
        let mut next = self.clone();
        let revoked = std::mem::take(&mut next.concession);
        next.dues = next.expected_dues();
        next.check_invariants()?;
        *self = next;
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::allocation::Allocation;
    use crate::fees::record::{EnrollmentKind, Placement};
    use crate::fees::structure::FeeStructure;

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn record() -> StudentRecord {
        let structure = FeeStructure::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            FeeHeads {
                admission_fee: d(5000),
                first_term_amt: d(3000),
                second_term_amt: d(2000),
                ..Default::default()
            },
        )
        .unwrap();
        StudentRecord::seed(
            Placement {
                school_id: structure.school_id,
                student_id: Uuid::new_v4(),
                academic_year: "2025-2026".to_string(),
                class_id: structure.class_id,
                section_id: Uuid::new_v4(),
                class_name: "Grade 1".to_string(),
                section_name: "B".to_string(),
                new_old: EnrollmentKind::Old,
                roll_number: Some("12".to_string()),
                is_bus_applicable: false,
            },
            &structure,
        )
    }

    fn terms(concession_type: ConcessionType, value: i64) -> ConcessionTerms {
        ConcessionTerms {
            concession_type,
            value: d(value),
            remark: "Sibling discount".to_string(),
            approved_by: Uuid::new_v4(),
            target_heads: None,
        }
    }

    #[test]
    fn percentage_is_computed_on_unpaid_structure() {
        let mut record = record();
        let allocation = Allocation::allocate(d(2000), &record.dues, None).unwrap();
        record.apply_allocation(&allocation).unwrap();

        let concession = compute_concession(&record, &terms(ConcessionType::Percentage, 10)).unwrap();
        assert_eq!(concession.in_amount, d(800));
        assert_eq!(concession.distribution.total(), d(800));
    }

    #[test]
    fn applying_reduces_dues_by_exactly_in_amount() {
        let mut record = record();
        let before = record.outstanding();
        let concession = compute_concession(&record, &terms(ConcessionType::Amount, 6000)).unwrap();
        record.apply_concession(concession.clone()).unwrap();

        assert_eq!(before - record.outstanding(), concession.in_amount);
        assert_eq!(record.dues.admission_fee, d(0));
        assert_eq!(record.dues.first_term_amt, d(2000));
        record.check_invariants().unwrap();
    }

    #[test]
    fn respects_target_heads() {
        let record = record();
        let mut targeted = terms(ConcessionType::Amount, 2500);
        targeted.target_heads = Some(vec![FeeHead::SecondTermAmt]);
        assert!(compute_concession(&record, &targeted).is_err());

        targeted.value = d(1500);
        let concession = compute_concession(&record, &targeted).unwrap();
        assert_eq!(concession.distribution.second_term_amt, d(1500));
        assert!(concession.distribution.admission_fee.is_zero());
    }

    #[test]
    fn rejects_discount_above_outstanding() {
        let record = record();
        let err = compute_concession(&record, &terms(ConcessionType::Amount, 10001)).unwrap_err();
        assert!(matches!(err, FeeError::Validation(_)));
    }

    #[test]
    fn rejects_reapplication_until_revoked() {
        let mut record = record();
        let first = compute_concession(&record, &terms(ConcessionType::Amount, 1000)).unwrap();
        record.apply_concession(first).unwrap();

        let err = compute_concession(&record, &terms(ConcessionType::Amount, 500)).unwrap_err();
        assert!(matches!(err, FeeError::Conflict(_)));

        let revoked = record.revoke_concession().unwrap();
        assert_eq!(revoked.in_amount, d(1000));
        assert_eq!(record.outstanding(), d(10000));
        assert!(compute_concession(&record, &terms(ConcessionType::Amount, 500)).is_ok());
    }

    #[test]
    fn validates_terms() {
        let record = record();
        assert!(compute_concession(&record, &terms(ConcessionType::Percentage, 101)).is_err());
        assert!(compute_concession(&record, &terms(ConcessionType::Amount, 0)).is_err());
        let mut no_remark = terms(ConcessionType::Amount, 10);
        no_remark.remark = "  ".to_string();
        assert!(compute_concession(&record, &no_remark).is_err());
    }
}
