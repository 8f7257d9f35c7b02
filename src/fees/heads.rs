use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Named fee categories, declared in allocation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeHead {
    AdmissionFee,
    FirstTermAmt,
    SecondTermAmt,
    BusFirstTermAmt,
    BusSecondTermAmt,
}

impl FeeHead {
    /// Order in which payments and concessions are spread over heads.
    /// Fixed for every school; a per-school priority would hook in here.
    pub const PRIORITY: [FeeHead; 5] = [
        FeeHead::AdmissionFee,
        FeeHead::FirstTermAmt,
        FeeHead::SecondTermAmt,
        FeeHead::BusFirstTermAmt,
        FeeHead::BusSecondTermAmt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeHead::AdmissionFee => "admissionFee",
            FeeHead::FirstTermAmt => "firstTermAmt",
            FeeHead::SecondTermAmt => "secondTermAmt",
            FeeHead::BusFirstTermAmt => "busFirstTermAmt",
            FeeHead::BusSecondTermAmt => "busSecondTermAmt",
        }
    }

    pub fn is_bus(&self) -> bool {
        matches!(self, FeeHead::BusFirstTermAmt | FeeHead::BusSecondTermAmt)
    }
}

impl fmt::Display for FeeHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeHead {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeeHead::PRIORITY
            .iter()
            .copied()
            .find(|head| head.as_str() == s)
            .ok_or_else(|| format!("Unknown fee head '{}'", s))
    }
}

/// One amount per fee head. Used for structures, payments, dues and
/// concession distributions alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeeHeads {
    pub admission_fee: Decimal,
    pub first_term_amt: Decimal,
    pub second_term_amt: Decimal,
    pub bus_first_term_amt: Decimal,
    pub bus_second_term_amt: Decimal,
}

impl FeeHeads {
    pub fn get(&self, head: FeeHead) -> Decimal {
        match head {
            FeeHead::AdmissionFee => self.admission_fee,
            FeeHead::FirstTermAmt => self.first_term_amt,
            FeeHead::SecondTermAmt => self.second_term_amt,
            FeeHead::BusFirstTermAmt => self.bus_first_term_amt,
            FeeHead::BusSecondTermAmt => self.bus_second_term_amt,
        }
    }

    pub fn set(&mut self, head: FeeHead, amount: Decimal) {
        match head {
            FeeHead::AdmissionFee => self.admission_fee = amount,
            FeeHead::FirstTermAmt => self.first_term_amt = amount,
            FeeHead::SecondTermAmt => self.second_term_amt = amount,
            FeeHead::BusFirstTermAmt => self.bus_first_term_amt = amount,
            FeeHead::BusSecondTermAmt => self.bus_second_term_amt = amount,
        }
    }

    pub fn total(&self) -> Decimal {
        self.iter().map(|(_, amount)| amount).sum()
    }

    /// Heads paired with their amounts, in priority order
    pub fn iter(&self) -> impl Iterator<Item = (FeeHead, Decimal)> + '_ {
        FeeHead::PRIORITY.iter().map(move |&head| (head, self.get(head)))
    }

    pub fn is_zero(&self) -> bool {
        self.iter().all(|(_, amount)| amount.is_zero())
    }

    /// First head holding a negative amount, if any
    pub fn first_negative(&self) -> Option<FeeHead> {
        self.iter()
            .find(|(_, amount)| amount.is_sign_negative() && !amount.is_zero())
            .map(|(head, _)| head)
    }

    /// Copy with both bus heads forced to zero
    pub fn without_bus(mut self) -> Self {
        for head in FeeHead::PRIORITY.into_iter().filter(FeeHead::is_bus) {
            self.set(head, Decimal::ZERO);
        }
        self
    }

    /// True when any bus head carries a non-zero amount
    pub fn has_bus(&self) -> bool {
        self.iter().any(|(head, amount)| head.is_bus() && !amount.is_zero())
    }
}

impl Add for FeeHeads {
    type Output = FeeHeads;

    fn add(self, rhs: FeeHeads) -> FeeHeads {
        let mut out = self;
        for head in FeeHead::PRIORITY {
            out.set(head, self.get(head) + rhs.get(head));
        }
        out
    }
}

impl Sub for FeeHeads {
    type Output = FeeHeads;

    fn sub(self, rhs: FeeHeads) -> FeeHeads {
        let mut out = self;
        for head in FeeHead::PRIORITY {
            out.set(head, self.get(head) - rhs.get(head));
        }
        out
    }
}
