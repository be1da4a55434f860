//! Donation record model.
//!
//! One document per donation, stored in either the member or the guest
//! ledger collection. `receipt_id` is assigned exactly once, at the moment
//! the record transitions to `COMPLETED`, and is never regenerated.

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::LineItem;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DonationRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Reference to the paying entity (member or guest user). The ledger
    /// record does not own the payer, it only points at it.
    pub payer_id: Uuid,
    pub line_items: Vec<LineItem>,
    /// Sum of declared line amounts plus any courier surcharge.
    pub total_amount: f64,
    pub courier_charge: f64,
    pub method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Write-once receipt identifier, `SDP/<code><seq>/<fy>`.
    pub receipt_id: Option<String>,
    /// Free-text delivery address; used to infer local pickup vs courier.
    pub postal_address: Option<String>,
    /// Gateway order id for online payments (e.g., Razorpay order ID).
    pub provider_order_id: Option<String>,
    /// Derived prasad aggregates, recomputed by the allocator at report time.
    pub prasad_packet_count: f64,
    pub total_weight_in_grams: f64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Online,
    QrCode,
}

impl PaymentMethod {
    /// Single-letter code embedded in receipt identifiers.
    pub fn code(&self) -> char {
        match self {
            PaymentMethod::Cash => 'C',
            PaymentMethod::Online => 'O',
            PaymentMethod::QrCode => 'Q',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Online => "ONLINE",
            PaymentMethod::QrCode => "QR_CODE",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// The two independent donation ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    Member,
    Guest,
}

impl Ledger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ledger::Member => "member",
            Ledger::Guest => "guest",
        }
    }

    /// The guest ledger only accepts in-person methods.
    pub fn accepts(&self, method: PaymentMethod) -> bool {
        match self {
            Ledger::Member => true,
            Ledger::Guest => method != PaymentMethod::Online,
        }
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown ledger: {0}")]
pub struct UnknownLedger(pub String);

impl FromStr for Ledger {
    type Err = UnknownLedger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Ledger::Member),
            "guest" => Ok(Ledger::Guest),
            other => Err(UnknownLedger(other.to_string())),
        }
    }
}
