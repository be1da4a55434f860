use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{DonationRecord, Ledger, LineItem, PaymentMethod, PaymentStatus};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDonationRequest {
    pub payer_id: Uuid,
    #[validate(length(min = 1, message = "at least one line item is required"), nested)]
    pub line_items: Vec<LineItemRequest>,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub courier_charge: f64,
    pub method: PaymentMethod,
    pub postal_address: Option<String>,
    /// Gateway order id, required later to verify online payments.
    pub provider_order_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    #[serde(default)]
    pub category: String,
    pub declared_unit_count: u32,
    #[validate(range(min = 0.0))]
    pub declared_amount: f64,
}

impl From<LineItemRequest> for LineItem {
    fn from(req: LineItemRequest) -> Self {
        LineItem {
            category: req.category,
            declared_unit_count: req.declared_unit_count,
            declared_amount: req.declared_amount,
            is_packet: false,
            quantity: 0.0,
        }
    }
}

/// Verified-payment callback for online/QR donations.
#[derive(Debug, Deserialize)]
pub struct VerifyDonationRequest {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub gateway_signature: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyDonationResponse {
    pub donation_id: Uuid,
    pub payment_status: PaymentStatus,
    pub receipt_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DonationResponse {
    pub id: Uuid,
    pub ledger: Ledger,
    pub payer_id: Uuid,
    pub line_items: Vec<LineItem>,
    pub total_amount: f64,
    pub courier_charge: f64,
    pub method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub receipt_id: Option<String>,
    pub postal_address: Option<String>,
    pub prasad_packet_count: f64,
    pub total_weight_in_grams: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl DonationResponse {
    pub fn from_record(ledger: Ledger, record: DonationRecord) -> Self {
        Self {
            id: record.id,
            ledger,
            payer_id: record.payer_id,
            line_items: record.line_items,
            total_amount: record.total_amount,
            courier_charge: record.courier_charge,
            method: record.method,
            payment_status: record.payment_status,
            receipt_id: record.receipt_id,
            postal_address: record.postal_address,
            prasad_packet_count: record.prasad_packet_count,
            total_weight_in_grams: record.total_weight_in_grams,
            created_at: record.created_at.to_string(),
            updated_at: record.updated_at.to_string(),
        }
    }
}

/// Prasad report over the completed donations of one ledger.
#[derive(Debug, Serialize)]
pub struct PrasadReportResponse {
    pub ledger: Ledger,
    pub donation_count: usize,
    pub total_packets: f64,
    pub total_weight_in_grams: f64,
    pub donations: Vec<DonationResponse>,
}
