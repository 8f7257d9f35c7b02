use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{FeeError, FeeResult};
use super::heads::FeeHeads;

/// The fee menu of one class within one school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStructure {
    pub id: Uuid,
    pub school_id: Uuid,
    pub class_id: Uuid,
    pub fee_head: FeeHeads,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeStructure {
    pub fn new(school_id: Uuid, class_id: Uuid, fee_head: FeeHeads) -> FeeResult<Self> {
        validate_fee_head(&fee_head)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            school_id,
            class_id,
            total_amount: fee_head.total(),
            fee_head,
            created_at: now,
            updated_at: now,
        })
    }

    /// Structure amounts as seeded onto an enrollment record
    pub fn heads_for(&self, is_bus_applicable: bool) -> FeeHeads {
        if is_bus_applicable {
            self.fee_head
        } else {
            self.fee_head.without_bus()
        }
    }
}

pub fn validate_fee_head(fee_head: &FeeHeads) -> FeeResult<()> {
    if let Some(head) = fee_head.first_negative() {
        return Err(FeeError::validation(format!(
            "Fee head '{}' cannot be negative",
            head
        )));
    }
    if fee_head.iter().any(|(_, amount)| amount.normalize().scale() > 2) {
        return Err(FeeError::validation(
            "Fee amounts support at most two decimal places",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_sum_of_heads() {
        let heads = FeeHeads {
            admission_fee: Decimal::from(5000),
            first_term_amt: Decimal::from(3000),
            bus_first_term_amt: Decimal::from(700),
            ..Default::default()
        };
        let structure = FeeStructure::new(Uuid::new_v4(), Uuid::new_v4(), heads).unwrap();
        assert_eq!(structure.total_amount, Decimal::from(8700));
        assert_eq!(structure.heads_for(false).total(), Decimal::from(8000));
        assert_eq!(structure.heads_for(true).total(), Decimal::from(8700));
    }

    #[test]
    fn rejects_negative_heads() {
        let heads = FeeHeads {
            second_term_amt: Decimal::from(-1),
            ..Default::default()
        };
        let err = FeeStructure::new(Uuid::new_v4(), Uuid::new_v4(), heads).unwrap_err();
        assert!(matches!(err, FeeError::Validation(msg) if msg.contains("secondTermAmt")));
    }

    #[test]
    fn accepts_padded_two_place_amounts() {
        let heads = FeeHeads {
            admission_fee: Decimal::from_str_exact("5000.500").unwrap(),
            ..Default::default()
        };
        assert!(FeeStructure::new(Uuid::new_v4(), Uuid::new_v4(), heads).is_ok());

        let heads = FeeHeads {
            admission_fee: Decimal::from_str_exact("5000.555").unwrap(),
            ..Default::default()
        };
        assert!(FeeStructure::new(Uuid::new_v4(), Uuid::new_v4(), heads).is_err());
    }
}
