//! MongoDB repository for the two donation ledgers and the receipt counters.

use futures::TryStreamExt;
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{
    bson::{doc, to_bson},
    Collection, Database, IndexModel,
};
use uuid::Uuid;

use crate::models::{DonationRecord, Ledger, PaymentStatus, ReceiptCounter, ReceiptId};
use crate::services::sequencer::SequencerStore;

pub type DbResult<T> = Result<T, mongodb::error::Error>;

/// Result of the conditional finalize update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The donation transitioned to completed with the given receipt id.
    Finalized,
    /// No record matched: the donation is already finalized or missing.
    NotMatched,
    /// The unique index rejected the receipt id; another writer got there
    /// first with the same sequence number.
    DuplicateReceipt,
}

#[derive(Clone)]
pub struct DonationRepository {
    member_donations: Collection<DonationRecord>,
    guest_donations: Collection<DonationRecord>,
    receipt_counters: Collection<ReceiptCounter>,
}

impl DonationRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            member_donations: db.collection("member_donations"),
            guest_donations: db.collection("guest_donations"),
            receipt_counters: db.collection("receipt_counters"),
        }
    }

    fn donations(&self, ledger: Ledger) -> &Collection<DonationRecord> {
        match ledger {
            Ledger::Member => &self.member_donations,
            Ledger::Guest => &self.guest_donations,
        }
    }

    /// Initialize database indexes.
    ///
    /// The partial unique index on `receipt_id` is the storage-level
    /// enforcement of the "no two receipts share a sequence number"
    /// invariant; it only covers documents where a receipt has actually
    /// been assigned.
    pub async fn init_indexes(&self) -> DbResult<()> {
        let receipt_idx = IndexModel::builder()
            .keys(doc! { "receipt_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("unique_receipt_idx".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! { "receipt_id": { "$type": "string" } })
                    .build(),
            )
            .build();

        let status_idx = IndexModel::builder()
            .keys(doc! { "payment_status": 1, "created_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_created_idx".to_string())
                    .build(),
            )
            .build();

        for collection in [&self.member_donations, &self.guest_donations] {
            collection
                .create_indexes([receipt_idx.clone(), status_idx.clone()], None)
                .await?;
        }

        tracing::info!("Donation service indexes initialized");
        Ok(())
    }

    pub async fn create_donation(&self, ledger: Ledger, donation: &DonationRecord) -> DbResult<()> {
        self.donations(ledger).insert_one(donation, None).await?;
        Ok(())
    }

    pub async fn get_donation(&self, ledger: Ledger, id: Uuid) -> DbResult<Option<DonationRecord>> {
        let filter = doc! { "_id": id.to_string() };
        self.donations(ledger).find_one(filter, None).await
    }

    /// All completed donations in a ledger, oldest first.
    pub async fn list_completed(&self, ledger: Ledger) -> DbResult<Vec<DonationRecord>> {
        let filter = doc! { "payment_status": to_bson(&PaymentStatus::Completed)? };
        let options = FindOptions::builder()
            .sort(doc! { "created_at": 1 })
            .build();

        let cursor = self.donations(ledger).find(filter, options).await?;
        cursor.try_collect().await
    }

    /// Highest sequence number already issued in a (ledger, method-code,
    /// financial-year) partition, derived from the stored receipt ids.
    ///
    /// Sorting the id strings descending yields the numeric maximum only
    /// because the sequence padding width is fixed; see `ReceiptId`.
    pub async fn max_receipt_sequence(
        &self,
        ledger: Ledger,
        method_code: char,
        financial_year: &str,
    ) -> DbResult<Option<i64>> {
        let pattern = ReceiptId::partition_pattern(method_code, financial_year);
        let filter = doc! { "receipt_id": { "$regex": pattern } };
        let options = FindOneOptions::builder()
            .sort(doc! { "receipt_id": -1 })
            .build();

        let latest = self.donations(ledger).find_one(filter, options).await?;

        Ok(latest
            .and_then(|d| d.receipt_id)
            .and_then(|id| id.parse::<ReceiptId>().ok())
            .map(|id| id.sequence))
    }

    /// Atomically increment an existing partition counter. Returns `None`
    /// when the counter document does not exist yet.
    pub async fn bump_counter(&self, key: &str) -> DbResult<Option<i64>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let counter = self
            .receipt_counters
            .find_one_and_update(doc! { "_id": key }, doc! { "$inc": { "seq": 1 } }, options)
            .await?;

        Ok(counter.map(|c| c.seq))
    }

    /// Create a partition counter starting at `seq`. Returns `false` when a
    /// concurrent writer created it first.
    pub async fn seed_counter(&self, key: &str, seq: i64) -> DbResult<bool> {
        let counter = ReceiptCounter {
            key: key.to_string(),
            seq,
        };
        match self.receipt_counters.insert_one(&counter, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key_error(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Attach a receipt id and mark the donation completed, as one
    /// conditional update. Matches only records that are not yet completed
    /// and carry no receipt, so a receipt id can never be reassigned.
    pub async fn finalize_donation(
        &self,
        ledger: Ledger,
        id: Uuid,
        receipt_id: &str,
    ) -> DbResult<FinalizeOutcome> {
        let filter = doc! {
            "_id": id.to_string(),
            "payment_status": { "$ne": to_bson(&PaymentStatus::Completed)? },
            "receipt_id": null,
        };
        let update = doc! {
            "$set": {
                "payment_status": to_bson(&PaymentStatus::Completed)?,
                "receipt_id": receipt_id,
                "updated_at": mongodb::bson::DateTime::now(),
            }
        };

        match self.donations(ledger).update_one(filter, update, None).await {
            Ok(result) if result.matched_count > 0 => Ok(FinalizeOutcome::Finalized),
            Ok(_) => Ok(FinalizeOutcome::NotMatched),
            Err(e) if is_duplicate_key_error(&e) => Ok(FinalizeOutcome::DuplicateReceipt),
            Err(e) => Err(e),
        }
    }

    /// Mark a non-completed donation failed (e.g. gateway signature
    /// rejection). Completed donations are never downgraded.
    pub async fn mark_failed(&self, ledger: Ledger, id: Uuid) -> DbResult<bool> {
        let filter = doc! {
            "_id": id.to_string(),
            "payment_status": { "$ne": to_bson(&PaymentStatus::Completed)? },
        };
        let update = doc! {
            "$set": {
                "payment_status": to_bson(&PaymentStatus::Failed)?,
                "updated_at": mongodb::bson::DateTime::now(),
            }
        };

        let result = self.donations(ledger).update_one(filter, update, None).await?;
        Ok(result.matched_count > 0)
    }
}

/// The sequencer drives the counters and the finalize update through this
/// seam; see `SequencerStore`.
#[async_trait::async_trait]
impl SequencerStore for DonationRepository {
    async fn bump_counter(&self, key: &str) -> DbResult<Option<i64>> {
        DonationRepository::bump_counter(self, key).await
    }

    async fn seed_counter(&self, key: &str, seq: i64) -> DbResult<bool> {
        DonationRepository::seed_counter(self, key, seq).await
    }

    async fn max_receipt_sequence(
        &self,
        ledger: Ledger,
        method_code: char,
        financial_year: &str,
    ) -> DbResult<Option<i64>> {
        DonationRepository::max_receipt_sequence(self, ledger, method_code, financial_year).await
    }

    async fn finalize_donation(
        &self,
        ledger: Ledger,
        id: Uuid,
        receipt_id: &str,
    ) -> DbResult<FinalizeOutcome> {
        DonationRepository::finalize_donation(self, ledger, id, receipt_id).await
    }
}

/// True when the error is a MongoDB duplicate-key violation (code 11000).
fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) => write_error.code == 11000,
        ErrorKind::Command(ref command_error) => command_error.code == 11000,
        _ => false,
    }
}
