use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::allocation::{heads_from_lines, Allocation, AllocationLine};
use super::concession::Concession;
use super::error::{FeeError, FeeResult};
use super::heads::FeeHeads;
use super::structure::FeeStructure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentKind {
    #[default]
    New,
    Old,
}

impl EnrollmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentKind::New => "new",
            EnrollmentKind::Old => "old",
        }
    }
}

impl std::str::FromStr for EnrollmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(EnrollmentKind::New),
            "old" => Ok(EnrollmentKind::Old),
            other => Err(format!("Unknown enrollment kind '{}'", other)),
        }
    }
}

/// A student's enrollment and fee position for one academic year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: Uuid,
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub academic_year: String,
    pub class_id: Uuid,
    pub section_id: Uuid,
    pub class_name_snapshot: String,
    pub section_name_snapshot: String,
    pub new_old: EnrollmentKind,
    pub roll_number: Option<String>,
    pub fee_structure: FeeHeads,
    pub fee_paid: FeeHeads,
    pub dues: FeeHeads,
    pub concession: Concession,
    pub is_active: bool,
    pub is_bus_applicable: bool,
    /// Bumped by every persisted write; writes are conditioned on it
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where and how a student is being placed for a year.
#[derive(Debug, Clone)]
pub struct Placement {
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub academic_year: String,
    pub class_id: Uuid,
    pub section_id: Uuid,
    pub class_name: String,
    pub section_name: String,
    pub new_old: EnrollmentKind,
    pub roll_number: Option<String>,
    pub is_bus_applicable: bool,
}

impl StudentRecord {
    /// Fresh record with dues equal to the structure and no concession
    pub fn seed(placement: Placement, structure: &FeeStructure) -> Self {
        let now = Utc::now();
        let heads = structure.heads_for(placement.is_bus_applicable);
        Self {
            id: Uuid::new_v4(),
            school_id: placement.school_id,
            student_id: placement.student_id,
            academic_year: placement.academic_year,
            class_id: placement.class_id,
            section_id: placement.section_id,
            class_name_snapshot: placement.class_name,
            section_name_snapshot: placement.section_name,
            new_old: placement.new_old,
            roll_number: placement.roll_number,
            fee_structure: heads,
            fee_paid: FeeHeads::default(),
            dues: heads,
            concession: Concession::default(),
            is_active: true,
            is_bus_applicable: placement.is_bus_applicable,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-seat an unpaid record onto a new placement, keeping its identity
    pub fn reseat(&self, placement: Placement, structure: &FeeStructure) -> FeeResult<Self> {
        self.ensure_unlocked()?;
        let mut next = Self::seed(placement, structure);
        next.id = self.id;
        next.created_at = self.created_at;
        next.version = self.version;
        Ok(next)
    }

    pub fn paid_total(&self) -> Decimal {
        self.fee_paid.total()
    }

    pub fn outstanding(&self) -> Decimal {
        self.dues.total()
    }

    pub fn has_payments(&self) -> bool {
        self.paid_total() > Decimal::ZERO
    }

    /// Financial safety lock: no placement change or removal once money exists
    pub fn ensure_unlocked(&self) -> FeeResult<()> {
        if self.has_payments() {
            return Err(FeeError::conflict(format!(
                "Cannot change class/section or remove enrollment: fees of {} already paid for {}",
                self.paid_total(),
                self.academic_year
            )));
        }
        Ok(())
    }

    /// Dues implied by structure, payments and concession
    pub fn expected_dues(&self) -> FeeHeads {
        self.fee_structure - self.fee_paid - self.concession.distribution
    }

    pub fn check_invariants(&self) -> FeeResult<()> {
        if let Some(head) = self.fee_paid.first_negative() {
            return Err(FeeError::invariant(format!("Paid amount for '{}' is negative", head)));
        }
        let expected = self.expected_dues();
        if let Some(head) = expected.first_negative() {
            return Err(FeeError::invariant(format!(
                "Paid amount for '{}' exceeds its net due",
                head
            )));
        }
        if expected != self.dues {
            return Err(FeeError::invariant(
                "Dues do not match structure minus payments and concession",
            ));
        }
        if !self.is_bus_applicable && self.fee_structure.has_bus() {
            return Err(FeeError::invariant(
                "Bus fees present on a record without bus service",
            ));
        }
        Ok(())
    }

    /// Credit an allocation to the record. Leaves `self` untouched on error.
    pub fn apply_allocation(&mut self, allocation: &Allocation) -> FeeResult<()> {
        let credited = allocation.as_heads();
        let mut next = self.clone();
        next.fee_paid = self.fee_paid + credited;
        next.dues = next.expected_dues();
        next.check_invariants()?;
        *self = next;
        Ok(())
    }

    /// Undo a previously credited allocation (cancelled or bounced receipt)
    pub fn reverse_allocation(&mut self, lines: &[AllocationLine]) -> FeeResult<()> {
        let debited = heads_from_lines(lines);
        let mut next = self.clone();
        next.fee_paid = self.fee_paid - debited;
        next.dues = next.expected_dues();
        next.check_invariants()?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::heads::FeeHead;

    fn d(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn structure() -> FeeStructure {
        FeeStructure::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            FeeHeads {
                admission_fee: d(5000),
                first_term_amt: d(3000),
                bus_first_term_amt: d(800),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn placement(bus: bool) -> Placement {
        Placement {
            school_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            academic_year: "2025-2026".to_string(),
            class_id: Uuid::new_v4(),
            section_id: Uuid::new_v4(),
            class_name: "Grade 5".to_string(),
            section_name: "A".to_string(),
            new_old: EnrollmentKind::New,
            roll_number: None,
            is_bus_applicable: bus,
        }
    }

    #[test]
    fn seed_without_bus_zeroes_bus_heads() {
        let record = StudentRecord::seed(placement(false), &structure());
        assert!(record.fee_structure.bus_first_term_amt.is_zero());
        assert!(record.dues.bus_first_term_amt.is_zero());
        assert_eq!(record.outstanding(), d(8000));
        record.check_invariants().unwrap();
    }

    #[test]
    fn seed_with_bus_keeps_bus_heads() {
        let record = StudentRecord::seed(placement(true), &structure());
        assert_eq!(record.dues.bus_first_term_amt, d(800));
        assert!(record.is_active);
        assert!(!record.concession.is_applied);
    }

    #[test]
    fn allocation_moves_money_from_dues_to_paid() {
        let mut record = StudentRecord::seed(placement(false), &structure());
        let allocation = Allocation::allocate(d(6000), &record.dues, None).unwrap();
        record.apply_allocation(&allocation).unwrap();

        assert_eq!(record.fee_paid.admission_fee, d(5000));
        assert_eq!(record.fee_paid.first_term_amt, d(1000));
        assert_eq!(record.dues.admission_fee, d(0));
        assert_eq!(record.dues.first_term_amt, d(2000));
        record.check_invariants().unwrap();
    }

    #[test]
    fn paid_record_is_locked() {
        let mut record = StudentRecord::seed(placement(false), &structure());
        let allocation = Allocation::allocate(d(5000), &record.dues, None).unwrap();
        record.apply_allocation(&allocation).unwrap();

        let err = record.ensure_unlocked().unwrap_err();
        assert!(matches!(err, FeeError::Conflict(ref msg) if msg.contains("5000")));
        assert!(record.reseat(placement(false), &structure()).is_err());
    }

    #[test]
    fn reversal_restores_dues() {
        let mut record = StudentRecord::seed(placement(false), &structure());
        let before = record.clone();
        let allocation = Allocation::allocate(d(6000), &record.dues, None).unwrap();
        record.apply_allocation(&allocation).unwrap();
        record.reverse_allocation(allocation.lines()).unwrap();

        assert_eq!(record.fee_paid, before.fee_paid);
        assert_eq!(record.dues, before.dues);
    }

    #[test]
    fn overpayment_is_an_invariant_violation() {
        let mut record = StudentRecord::seed(placement(false), &structure());
        let bogus = Allocation::allocate(d(100), &FeeHeads {
            second_term_amt: d(100),
            ..Default::default()
        }, None)
        .unwrap();
        let before = record.clone();
        let err = record.apply_allocation(&bogus).unwrap_err();
        assert!(matches!(err, FeeError::InvariantViolation(_)));
        assert_eq!(record, before);
        assert_eq!(before.dues.get(FeeHead::SecondTermAmt), d(0));
    }

    #[test]
    fn reseat_keeps_identity() {
        let record = StudentRecord::seed(placement(false), &structure());
        let moved = record.reseat(placement(true), &structure()).unwrap();
        assert_eq!(moved.id, record.id);
        assert_eq!(moved.version, record.version);
        assert_eq!(moved.dues.bus_first_term_amt, d(800));
    }
}
