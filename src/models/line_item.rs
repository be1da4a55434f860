//! Donation line item model.

use serde::{Deserialize, Serialize};

/// One line of a donation: what was declared, and how the allocator decided
/// to fulfil it. `is_packet` and `quantity` are allocator outputs, not
/// caller-supplied truth; they are overwritten on every allocation run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LineItem {
    #[serde(default)]
    pub category: String,
    pub declared_unit_count: u32,
    pub declared_amount: f64,
    #[serde(default)]
    pub is_packet: bool,
    /// Packet count for packet items, grams for weight items.
    #[serde(default)]
    pub quantity: f64,
}

/// Category of a line item, decided once per item instead of re-matching
/// strings throughout the allocator. Matching rules mirror the historical
/// data: "service" is a case-insensitive substring test, the voluntary
/// categories are exact matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCategory {
    Service,
    Voluntary,
    Other,
}

impl ItemCategory {
    pub fn of(raw: &str) -> Self {
        if raw.to_lowercase().contains("service") {
            ItemCategory::Service
        } else if raw == "Voluntary Donations" || raw == "Voluntary Donation" {
            ItemCategory::Voluntary
        } else {
            ItemCategory::Other
        }
    }
}
