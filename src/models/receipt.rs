//! Receipt identifier model.
//!
//! Receipt ids have the form `SDP/<method-code><sequence>/<financial-year>`,
//! e.g. `SDP/C00042/25-26`. The sequence is zero-padded to a fixed width;
//! that width must never change within a financial year because the legacy
//! max-scan relies on lexicographic order of the id strings matching numeric
//! order of the sequence numbers.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::models::Ledger;

pub const RECEIPT_PREFIX: &str = "SDP";
pub const RECEIPT_SEQ_WIDTH: usize = 5;

/// A parsed receipt identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptId {
    pub method_code: char,
    /// Kept as i64 end-to-end to match the counter documents; no narrowing
    /// casts anywhere in the issuance path.
    pub sequence: i64,
    /// `"YY-YY"`, e.g. `"25-26"`.
    pub financial_year: String,
}

impl ReceiptId {
    pub fn new(method_code: char, sequence: i64, financial_year: String) -> Self {
        Self {
            method_code,
            sequence,
            financial_year,
        }
    }

    /// Anchored pattern matching every id in one (method-code, financial-year)
    /// partition, for the legacy max-scan seed query.
    pub fn partition_pattern(method_code: char, financial_year: &str) -> String {
        format!(
            "^{}/{}[0-9]+/{}$",
            RECEIPT_PREFIX, method_code, financial_year
        )
    }

    /// Counter document key for one (ledger, method-code, financial-year)
    /// partition.
    pub fn partition_key(ledger: Ledger, method_code: char, financial_year: &str) -> String {
        format!("{}:{}:{}", ledger.as_str(), method_code, financial_year)
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{:0width$}/{}",
            RECEIPT_PREFIX,
            self.method_code,
            self.sequence,
            self.financial_year,
            width = RECEIPT_SEQ_WIDTH
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed receipt id: {0}")]
pub struct ParseReceiptIdError(pub String);

impl FromStr for ReceiptId {
    type Err = ParseReceiptIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseReceiptIdError(s.to_string());

        let mut parts = s.split('/');
        let prefix = parts.next().ok_or_else(malformed)?;
        let body = parts.next().ok_or_else(malformed)?;
        let financial_year = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() || prefix != RECEIPT_PREFIX {
            return Err(malformed());
        }

        let mut chars = body.chars();
        let method_code = chars.next().ok_or_else(malformed)?;
        if !method_code.is_ascii_uppercase() {
            return Err(malformed());
        }
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let sequence: i64 = digits.parse().map_err(|_| malformed())?;

        if financial_year.len() != 5 || financial_year.as_bytes()[2] != b'-' {
            return Err(malformed());
        }

        Ok(ReceiptId {
            method_code,
            sequence,
            financial_year: financial_year.to_string(),
        })
    }
}

/// Financial year for a date, Aug 1 through Jul 31, as `"YY-YY"`.
pub fn financial_year(date: NaiveDate) -> String {
    let (start, end) = if date.month() >= 8 {
        (date.year(), date.year() + 1)
    } else {
        (date.year() - 1, date.year())
    };
    format!("{:02}-{:02}", start.rem_euclid(100), end.rem_euclid(100))
}

/// Counter document: the highest sequence number issued so far for one
/// (ledger, method-code, financial-year) partition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReceiptCounter {
    #[serde(rename = "_id")]
    pub key: String,
    pub seq: i64,
}
