//! Data model for booking events and the hash-linked records that carry them.
//!
//! JSON field names match the browser demo's stored ledger, so chains written
//! there load and verify here unchanged.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// `previous_digest` of the first record.
pub const GENESIS_PREVIOUS_DIGEST: &str = "0";

/// Issuer of the first record.
pub const SYSTEM_ISSUER: &str = "SYSTEM_NODE";
/// Issuer of booking (creation) records.
pub const PATIENT_ISSUER: &str = "NODE_PATIENT_APP";
/// Issuer of fulfillment records.
pub const HOSPITAL_ISSUER: &str = "NODE_HOSPITAL_MAIN";

/// Exam catalogue offered by the booking form.
pub const EXAM_TYPES: [&str; 5] = [
    "Risonanza Magnetica Encefalo",
    "Ecografia Addome Completo",
    "Visita Cardiologica + ECG",
    "TAC Torace senza contrasto",
    "Esame Emocromocitometrico",
];

const MAX_NRE_LEN: usize = 15;
const MAX_FISCAL_CODE_LEN: usize = 16;

/// Booking priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Urgent, within 72 hours.
    U,
    /// Short, within 10 days.
    B,
    /// Deferrable, within 30/60 days.
    D,
    /// Programmable.
    P,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::U => "U",
            Priority::B => "B",
            Priority::D => "D",
            Priority::P => "P",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Creation,
    Update,
    Fulfillment,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Creation => "CREATION",
            Action::Update => "UPDATE",
            Action::Fulfillment => "FULFILLMENT",
        }
    }
}

/// Domain event carried by a record.
///
/// Field order is part of the digest input: do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Electronic prescription number.
    pub nre: String,
    pub fiscal_code: String,
    pub priority: Priority,
    pub exam_type: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Payload {
    /// Fixed payload of the first record.
    pub fn genesis() -> Self {
        Self {
            nre: "0000000000".into(),
            fiscal_code: "SYSTEM".into(),
            priority: Priority::P,
            exam_type: "GENESIS_BLOCK".into(),
            action: Action::Creation,
            notes: Some("MediChain system initialisation".into()),
        }
    }

    /// Build a booking (creation) payload from form input.
    pub fn booking(
        nre: &str,
        fiscal_code: &str,
        priority: Priority,
        exam_type: &str,
    ) -> Result<Self, LedgerError> {
        let nre = nre.trim();
        let fiscal_code = fiscal_code.trim().to_uppercase();
        let exam_type = exam_type.trim();

        if nre.is_empty() || nre.chars().count() > MAX_NRE_LEN {
            return Err(LedgerError::InvalidPayload(format!(
                "nre must be 1..={MAX_NRE_LEN} characters"
            )));
        }
        if fiscal_code.is_empty() || fiscal_code.chars().count() > MAX_FISCAL_CODE_LEN {
            return Err(LedgerError::InvalidPayload(format!(
                "fiscal code must be 1..={MAX_FISCAL_CODE_LEN} characters"
            )));
        }
        if exam_type.is_empty() {
            return Err(LedgerError::InvalidPayload("exam type is required".into()));
        }

        Ok(Self {
            nre: nre.to_string(),
            fiscal_code,
            priority,
            exam_type: exam_type.to_string(),
            action: Action::Creation,
            notes: None,
        })
    }

    /// Fulfillment of an existing booking: same request, new action and notes.
    pub fn fulfillment_of(creation: &Payload, notes: impl Into<String>) -> Self {
        Self {
            action: Action::Fulfillment,
            notes: Some(notes.into()),
            ..creation.clone()
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 0-indexed position in the chain.
    #[serde(rename = "index")]
    pub sequence_number: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    #[serde(rename = "data")]
    pub payload: Payload,
    /// Digest of the preceding record, or `"0"` for the first one.
    #[serde(rename = "previousHash")]
    pub previous_digest: String,
    /// SHA-256 hex over (sequence_number, previous_digest, created_at, payload).
    #[serde(rename = "hash")]
    pub digest: String,
    /// Node or actor that produced the record.
    #[serde(rename = "validator")]
    pub issuer: String,
}

impl Record {
    pub fn is_genesis(&self) -> bool {
        self.sequence_number == 0
    }
}
