//! Donation handlers: creation, verified-payment finalization, and the
//! prasad report.
//!
//! Cash donations are finalized inline: the record is created and the
//! sequencer attaches its receipt id in the same request. Online and QR
//! donations land pending and are finalized by the verify callback once the
//! gateway signature checks out.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::DateTime;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        CreateDonationRequest, DonationResponse, PrasadReportResponse, VerifyDonationRequest,
        VerifyDonationResponse,
    },
    error::AppError,
    models::{DonationRecord, Ledger, LineItem, PaymentMethod, PaymentStatus},
    services::{allocator, gateway::PaymentVerification, metrics, sequencer::SequencerError},
    AppState,
};

/// Acknowledgement for a donation that already carries its receipt.
/// Callbacks and finalization retries are acknowledged, never re-sequenced.
fn already_verified_ack(donation: &DonationRecord) -> Option<VerifyDonationResponse> {
    if donation.payment_status == PaymentStatus::Completed && donation.receipt_id.is_some() {
        return Some(VerifyDonationResponse {
            donation_id: donation.id,
            payment_status: donation.payment_status,
            receipt_id: donation.receipt_id.clone(),
            message: "Payment already verified".to_string(),
        });
    }
    None
}

/// Create a donation in the given ledger.
pub async fn create_donation(
    State(state): State<AppState>,
    Path(ledger): Path<String>,
    Json(payload): Json<CreateDonationRequest>,
) -> Result<(StatusCode, Json<DonationResponse>), AppError> {
    payload.validate()?;
    let ledger: Ledger = ledger.parse()?;

    if !ledger.accepts(payload.method) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "guest donations accept cash or QR payments only"
        )));
    }

    let line_items: Vec<LineItem> = payload.line_items.into_iter().map(Into::into).collect();
    let total_amount: f64 =
        line_items.iter().map(|i| i.declared_amount).sum::<f64>() + payload.courier_charge;

    let now = DateTime::now();
    let mut donation = DonationRecord {
        id: Uuid::new_v4(),
        payer_id: payload.payer_id,
        line_items,
        total_amount,
        courier_charge: payload.courier_charge,
        method: payload.method,
        payment_status: PaymentStatus::Pending,
        receipt_id: None,
        postal_address: payload.postal_address,
        provider_order_id: payload.provider_order_id,
        prasad_packet_count: 0.0,
        total_weight_in_grams: 0.0,
        created_at: now,
        updated_at: now,
    };

    tracing::info!(
        donation_id = %donation.id,
        ledger = %ledger,
        method = donation.method.as_str(),
        total_amount = donation.total_amount,
        "Creating donation"
    );

    state.repository.create_donation(ledger, &donation).await?;

    // Cash is recorded and receipted in one step; online/QR wait for the
    // verified-payment callback.
    if donation.method == PaymentMethod::Cash {
        let receipt = state
            .sequencer
            .issue_and_finalize(ledger, donation.method, donation.id)
            .await?;
        donation.payment_status = PaymentStatus::Completed;
        donation.receipt_id = Some(receipt.to_string());

        metrics::record_receipt(ledger.as_str(), donation.method.as_str());
        metrics::record_amount(ledger.as_str(), donation.method.as_str(), total_amount);
    }

    Ok((
        StatusCode::CREATED,
        Json(DonationResponse::from_record(ledger, donation)),
    ))
}

/// Verified-payment callback: check the gateway signature, then finalize.
pub async fn verify_donation(
    State(state): State<AppState>,
    Path((ledger, donation_id)): Path<(String, Uuid)>,
    Json(payload): Json<VerifyDonationRequest>,
) -> Result<Json<VerifyDonationResponse>, AppError> {
    let ledger: Ledger = ledger.parse()?;

    tracing::info!(
        donation_id = %donation_id,
        ledger = %ledger,
        gateway_order_id = %payload.gateway_order_id,
        gateway_payment_id = %payload.gateway_payment_id,
        "Verifying donation payment"
    );

    let donation = state
        .repository
        .get_donation(ledger, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Donation not found")))?;

    if let Some(ack) = already_verified_ack(&donation) {
        return Ok(Json(ack));
    }

    if !state.gateway.is_configured() {
        return Err(AppError::InternalError(anyhow::anyhow!(
            "Payment gateway is not configured for this environment"
        )));
    }

    if let Some(ref expected) = donation.provider_order_id {
        if expected != &payload.gateway_order_id {
            tracing::warn!(
                donation_id = %donation_id,
                expected_order_id = %expected,
                received_order_id = %payload.gateway_order_id,
                "Order ID mismatch"
            );
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Order ID does not match donation"
            )));
        }
    }

    let verification = PaymentVerification {
        order_id: payload.gateway_order_id,
        payment_id: payload.gateway_payment_id,
        signature: payload.gateway_signature,
    };

    let is_valid = state
        .gateway
        .verify_payment_signature(&verification)
        .map_err(|e| {
            tracing::error!(error = %e, "Signature verification error");
            AppError::InternalError(anyhow::anyhow!("Signature verification failed"))
        })?;

    if !is_valid {
        state.repository.mark_failed(ledger, donation_id).await?;
        return Ok(Json(VerifyDonationResponse {
            donation_id,
            payment_status: PaymentStatus::Failed,
            receipt_id: None,
            message: "Payment verification failed - invalid signature".to_string(),
        }));
    }

    // Signature is good: issue the receipt and complete the donation as one
    // atomic step. On sequencing failure the donation stays pending and the
    // callback can be retried.
    let receipt = match state
        .sequencer
        .issue_and_finalize(ledger, donation.method, donation_id)
        .await
    {
        Ok(receipt) => receipt,
        // A concurrent callback finalized the donation between our fetch and
        // the conditional update; acknowledge its receipt instead of failing.
        Err(SequencerError::AlreadyFinalized(_)) => {
            let current = state
                .repository
                .get_donation(ledger, donation_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Donation not found")))?;
            return match already_verified_ack(&current) {
                Some(ack) => Ok(Json(ack)),
                None => Err(SequencerError::AlreadyFinalized(donation_id).into()),
            };
        }
        Err(e) => return Err(e.into()),
    };

    metrics::record_receipt(ledger.as_str(), donation.method.as_str());
    metrics::record_amount(
        ledger.as_str(),
        donation.method.as_str(),
        donation.total_amount,
    );

    Ok(Json(VerifyDonationResponse {
        donation_id,
        payment_status: PaymentStatus::Completed,
        receipt_id: Some(receipt.to_string()),
        message: "Payment verified successfully".to_string(),
    }))
}

/// Re-finalize a pending cash donation whose receipt issuance failed.
///
/// Cash donations are normally receipted inline at creation; when sequencing
/// fails there the record stays pending, and this is the retry path. Online
/// and QR donations must go through the verify callback instead.
pub async fn finalize_cash_donation(
    State(state): State<AppState>,
    Path((ledger, donation_id)): Path<(String, Uuid)>,
) -> Result<Json<DonationResponse>, AppError> {
    let ledger: Ledger = ledger.parse()?;

    let mut donation = state
        .repository
        .get_donation(ledger, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Donation not found")))?;

    if already_verified_ack(&donation).is_some() {
        return Ok(Json(DonationResponse::from_record(ledger, donation)));
    }

    if donation.method != PaymentMethod::Cash {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "only cash donations can be finalized without payment verification"
        )));
    }

    tracing::info!(
        donation_id = %donation_id,
        ledger = %ledger,
        "Retrying receipt issuance for pending cash donation"
    );

    match state
        .sequencer
        .issue_and_finalize(ledger, donation.method, donation_id)
        .await
    {
        Ok(receipt) => {
            donation.payment_status = PaymentStatus::Completed;
            donation.receipt_id = Some(receipt.to_string());

            metrics::record_receipt(ledger.as_str(), donation.method.as_str());
            metrics::record_amount(
                ledger.as_str(),
                donation.method.as_str(),
                donation.total_amount,
            );

            Ok(Json(DonationResponse::from_record(ledger, donation)))
        }
        // Lost a race against another retry of the same donation.
        Err(SequencerError::AlreadyFinalized(_)) => {
            let current = state
                .repository
                .get_donation(ledger, donation_id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Donation not found")))?;
            if already_verified_ack(&current).is_some() {
                Ok(Json(DonationResponse::from_record(ledger, current)))
            } else {
                Err(SequencerError::AlreadyFinalized(donation_id).into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Get a donation by ID.
pub async fn get_donation(
    State(state): State<AppState>,
    Path((ledger, donation_id)): Path<(String, Uuid)>,
) -> Result<Json<DonationResponse>, AppError> {
    let ledger: Ledger = ledger.parse()?;

    let donation = state
        .repository
        .get_donation(ledger, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Donation not found")))?;

    Ok(Json(DonationResponse::from_record(ledger, donation)))
}

/// Prasad report: every completed donation in the ledger, run through the
/// allocator, with batch totals. Aggregates are recomputed on every call.
pub async fn prasad_report(
    State(state): State<AppState>,
    Path(ledger): Path<String>,
) -> Result<Json<PrasadReportResponse>, AppError> {
    let ledger: Ledger = ledger.parse()?;

    let completed = state.repository.list_completed(ledger).await?;
    let enriched = allocator::allocate_prasad(completed);

    let total_packets: f64 = enriched.iter().map(|d| d.prasad_packet_count).sum();
    let total_weight_in_grams: f64 = enriched.iter().map(|d| d.total_weight_in_grams).sum();

    tracing::info!(
        ledger = %ledger,
        donation_count = enriched.len(),
        total_packets,
        total_weight_in_grams,
        "Prasad report generated"
    );

    Ok(Json(PrasadReportResponse {
        ledger,
        donation_count: enriched.len(),
        total_packets,
        total_weight_in_grams,
        donations: enriched
            .into_iter()
            .map(|d| DonationResponse::from_record(ledger, d))
            .collect(),
    }))
}
