//! Prasad allocation.
//!
//! Classifies each line item of a completed donation as a discrete packet or
//! as bulk weight, then rolls the per-item quantities up into per-donation
//! totals. Pure and idempotent: `is_packet` and `quantity` are overwritten
//! on every run, never accumulated, so re-running over the same batch yields
//! the same result. Donations that are not completed pass through untouched.

use crate::models::{DonationRecord, ItemCategory, PaymentStatus};

/// Minimum declared amount at which a courier-shipped item becomes a packet.
const COURIER_PACKET_THRESHOLD: f64 = 1100.0;
/// Base prasad weight in grams for local-pickup non-service items.
const LOCAL_BASE_WEIGHT_GRAMS: f64 = 300.0;

/// Allocate prasad for a batch of donations, returning the same records with
/// per-item flags and per-donation aggregates refreshed.
pub fn allocate_prasad(mut donations: Vec<DonationRecord>) -> Vec<DonationRecord> {
    for donation in &mut donations {
        allocate_donation(donation);
    }
    donations
}

fn allocate_donation(donation: &mut DonationRecord) {
    if donation.payment_status != PaymentStatus::Completed {
        return;
    }

    let local_pickup = is_local_pickup(donation.postal_address.as_deref());
    let has_service = donation
        .line_items
        .iter()
        .any(|item| ItemCategory::of(&item.category) == ItemCategory::Service);

    for item in &mut donation.line_items {
        let category = ItemCategory::of(&item.category);

        if local_pickup {
            match category {
                ItemCategory::Service => {
                    item.is_packet = true;
                    item.quantity = item.declared_unit_count as f64;
                }
                ItemCategory::Voluntary => {
                    item.is_packet = false;
                    item.quantity = LOCAL_BASE_WEIGHT_GRAMS * item.declared_unit_count as f64;
                }
                ItemCategory::Other => {
                    item.is_packet = false;
                    item.quantity = item.declared_amount.max(LOCAL_BASE_WEIGHT_GRAMS);
                }
            }
        } else if has_service && category != ItemCategory::Service {
            // Service items crowd out prasad allocation for the rest of a
            // couriered donation.
            item.is_packet = false;
            item.quantity = 0.0;
        } else {
            item.is_packet = item.declared_amount >= COURIER_PACKET_THRESHOLD;
            item.quantity = if item.is_packet { 1.0 } else { 0.0 };
        }
    }

    donation.prasad_packet_count = donation
        .line_items
        .iter()
        .filter(|item| item.is_packet)
        .map(|item| item.quantity)
        .sum();
    donation.total_weight_in_grams = donation
        .line_items
        .iter()
        .filter(|item| !item.is_packet)
        .map(|item| item.quantity)
        .sum();

    if donation.prasad_packet_count > 1.0 {
        tracing::warn!(
            donation_id = %donation.id,
            packet_count = donation.prasad_packet_count,
            "Donation allocated more than one prasad packet"
        );
    }
}

/// Whether the donor collects prasad in person. Empty or missing addresses
/// default to local pickup; addresses placing the donor in Gaya, Bihar count
/// as local regardless of the rest of the text.
pub fn is_local_pickup(postal_address: Option<&str>) -> bool {
    let address = postal_address.unwrap_or("").trim().to_lowercase();
    if address.is_empty() {
        return true;
    }
    if address == "will collect from durga sthan" {
        return true;
    }
    address.contains("gaya") && address.contains("bihar")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, PaymentMethod};
    use mongodb::bson::DateTime;
    use uuid::Uuid;

    fn item(category: &str, declared_amount: f64, declared_unit_count: u32) -> LineItem {
        LineItem {
            category: category.to_string(),
            declared_unit_count,
            declared_amount,
            is_packet: false,
            quantity: 0.0,
        }
    }

    fn donation(
        status: PaymentStatus,
        postal_address: Option<&str>,
        line_items: Vec<LineItem>,
    ) -> DonationRecord {
        let now = DateTime::now();
        let total: f64 = line_items.iter().map(|i| i.declared_amount).sum();
        DonationRecord {
            id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            line_items,
            total_amount: total,
            courier_charge: 0.0,
            method: PaymentMethod::Cash,
            payment_status: status,
            receipt_id: None,
            postal_address: postal_address.map(|s| s.to_string()),
            provider_order_id: None,
            prasad_packet_count: 0.0,
            total_weight_in_grams: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_address_defaults_to_local_pickup() {
        assert!(is_local_pickup(None));
        assert!(is_local_pickup(Some("")));
        assert!(is_local_pickup(Some("   ")));
    }

    #[test]
    fn test_collect_from_durga_sthan_is_local() {
        assert!(is_local_pickup(Some("Will Collect From Durga Sthan")));
    }

    #[test]
    fn test_gaya_bihar_addresses_are_local() {
        assert!(is_local_pickup(Some("Manpur, Gaya, Bihar 823003")));
        assert!(is_local_pickup(Some("Station Road, Gaya, Bihar")));
        assert!(!is_local_pickup(Some("Gaya Street, Delhi")));
        assert!(!is_local_pickup(Some("Patna, Bihar")));
        assert!(!is_local_pickup(Some("Delhi, India")));
    }

    #[test]
    fn test_local_service_item_is_packet_with_unit_count() {
        let d = donation(
            PaymentStatus::Completed,
            None,
            vec![item("Pooja Service", 500.0, 3)],
        );
        let out = &allocate_prasad(vec![d])[0];
        assert!(out.line_items[0].is_packet);
        assert_eq!(out.line_items[0].quantity, 3.0);
        assert_eq!(out.prasad_packet_count, 3.0);
        assert_eq!(out.total_weight_in_grams, 0.0);
    }

    #[test]
    fn test_local_voluntary_weight_is_300_per_unit() {
        let d = donation(
            PaymentStatus::Completed,
            None,
            vec![item("Voluntary Donations", 5000.0, 4)],
        );
        let out = &allocate_prasad(vec![d])[0];
        assert!(!out.line_items[0].is_packet);
        assert_eq!(out.line_items[0].quantity, 1200.0);
        assert_eq!(out.total_weight_in_grams, 1200.0);
    }

    #[test]
    fn test_local_other_weight_is_amount_with_300_floor() {
        let d = donation(
            PaymentStatus::Completed,
            None,
            vec![item("Sweets", 150.0, 1), item("Dry Fruits", 800.0, 1)],
        );
        let out = &allocate_prasad(vec![d])[0];
        assert_eq!(out.line_items[0].quantity, 300.0);
        assert_eq!(out.line_items[1].quantity, 800.0);
        assert_eq!(out.total_weight_in_grams, 1100.0);
        assert_eq!(out.prasad_packet_count, 0.0);
    }

    #[test]
    fn test_courier_threshold() {
        let d = donation(
            PaymentStatus::Completed,
            Some("Delhi, India"),
            vec![item("Sweets", 1100.0, 1), item("Fruits", 1099.0, 1)],
        );
        let out = &allocate_prasad(vec![d])[0];
        assert!(out.line_items[0].is_packet);
        assert_eq!(out.line_items[0].quantity, 1.0);
        assert!(!out.line_items[1].is_packet);
        assert_eq!(out.line_items[1].quantity, 0.0);
        assert_eq!(out.prasad_packet_count, 1.0);
        assert_eq!(out.total_weight_in_grams, 0.0);
    }

    #[test]
    fn test_service_crowds_out_couriered_prasad() {
        let d = donation(
            PaymentStatus::Completed,
            Some("Delhi, India"),
            vec![item("Service X", 500.0, 2), item("Sweets", 1500.0, 1)],
        );
        let out = &allocate_prasad(vec![d])[0];
        // The sweets line would qualify as a packet on amount alone, but the
        // service line forces it out.
        assert!(!out.line_items[1].is_packet);
        assert_eq!(out.line_items[1].quantity, 0.0);
        // The service line itself still follows the courier amount rule.
        assert!(!out.line_items[0].is_packet);
        assert_eq!(out.prasad_packet_count, 0.0);
    }

    #[test]
    fn test_pending_donation_passes_through_unchanged() {
        let mut d = donation(
            PaymentStatus::Pending,
            None,
            vec![item("Sweets", 1500.0, 1)],
        );
        d.line_items[0].is_packet = true;
        d.line_items[0].quantity = 7.0;
        d.prasad_packet_count = 7.0;

        let out = &allocate_prasad(vec![d.clone()])[0];
        assert_eq!(out.line_items, d.line_items);
        assert_eq!(out.prasad_packet_count, 7.0);
        assert_eq!(out.total_weight_in_grams, 0.0);
    }

    #[test]
    fn test_allocation_is_idempotent() {
        let d = donation(
            PaymentStatus::Completed,
            Some("Manpur, Gaya, Bihar"),
            vec![
                item("Pooja Service", 500.0, 2),
                item("Voluntary Donation", 2000.0, 1),
                item("Sweets", 250.0, 1),
            ],
        );
        let once = allocate_prasad(vec![d]);
        let twice = allocate_prasad(once.clone());

        assert_eq!(once[0].line_items, twice[0].line_items);
        assert_eq!(once[0].prasad_packet_count, twice[0].prasad_packet_count);
        assert_eq!(once[0].total_weight_in_grams, twice[0].total_weight_in_grams);
    }

    #[test]
    fn test_stale_flags_are_overwritten_not_accumulated() {
        let mut d = donation(
            PaymentStatus::Completed,
            Some("Delhi, India"),
            vec![item("Sweets", 500.0, 1)],
        );
        // Stale state from an earlier run under different rules.
        d.line_items[0].is_packet = true;
        d.line_items[0].quantity = 9.0;
        d.prasad_packet_count = 9.0;
        d.total_weight_in_grams = 400.0;

        let out = &allocate_prasad(vec![d])[0];
        assert!(!out.line_items[0].is_packet);
        assert_eq!(out.line_items[0].quantity, 0.0);
        assert_eq!(out.prasad_packet_count, 0.0);
        assert_eq!(out.total_weight_in_grams, 0.0);
    }
}
