//! Domain models for donation-service.

mod donation;
mod line_item;
mod receipt;

pub use donation::{DonationRecord, Ledger, PaymentMethod, PaymentStatus, UnknownLedger};
pub use line_item::{ItemCategory, LineItem};
pub use receipt::{
    financial_year, ParseReceiptIdError, ReceiptCounter, ReceiptId, RECEIPT_PREFIX,
    RECEIPT_SEQ_WIDTH,
};
