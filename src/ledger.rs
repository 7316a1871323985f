//! Ledger engine: build the first record, append records, verify a chain.
//!
//! Every function here is a pure transform of its inputs. The caller owns the
//! chain and is responsible for serialising appends against the same prior.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::crypto::{digest_of, is_well_formed_digest};
use crate::error::LedgerError;
use crate::model::{Payload, Record, GENESIS_PREVIOUS_DIGEST, SYSTEM_ISSUER};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Genesis record stamped with the current time.
pub fn create_first_record() -> Record {
    create_first_record_at(now_millis())
}

pub fn create_first_record_at(created_at: i64) -> Record {
    let payload = Payload::genesis();
    let digest = digest_of(0, GENESIS_PREVIOUS_DIGEST, created_at, &payload);
    Record {
        sequence_number: 0,
        created_at,
        payload,
        previous_digest: GENESIS_PREVIOUS_DIGEST.to_string(),
        digest,
        issuer: SYSTEM_ISSUER.to_string(),
    }
}

/// Append `payload` after `prior`, stamped with the current time.
pub fn append(prior: &Record, payload: Payload, issuer: &str) -> Result<Record, LedgerError> {
    append_at(prior, payload, issuer, now_millis())
}

/// Append `payload` after `prior` with an explicit timestamp.
///
/// Only `prior` itself is checked (digest shape and recomputation); the rest
/// of the chain is not walked.
pub fn append_at(
    prior: &Record,
    payload: Payload,
    issuer: &str,
    created_at: i64,
) -> Result<Record, LedgerError> {
    let malformed = |reason: &str| LedgerError::MalformedPrior {
        seq: prior.sequence_number,
        reason: reason.to_string(),
    };

    if !is_well_formed_digest(&prior.digest) {
        return Err(malformed("digest is not 64 lowercase hex characters"));
    }
    let recomputed = digest_of(
        prior.sequence_number,
        &prior.previous_digest,
        prior.created_at,
        &prior.payload,
    );
    if recomputed != prior.digest {
        return Err(malformed("stored digest does not match content"));
    }
    let sequence_number = prior
        .sequence_number
        .checked_add(1)
        .ok_or_else(|| malformed("sequence number overflow"))?;

    let digest = digest_of(sequence_number, &prior.digest, created_at, &payload);
    tracing::debug!(seq = sequence_number, action = payload.action.as_str(), "record appended");

    Ok(Record {
        sequence_number,
        created_at,
        payload,
        previous_digest: prior.digest.clone(),
        digest,
        issuer: issuer.to_string(),
    })
}

/// A reason a chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// First record does not carry the `"0"` sentinel.
    GenesisLink { index: usize },
    /// `previous_digest` differs from the preceding record's digest.
    BrokenLink { index: usize },
    /// `sequence_number` differs from the record's position.
    SequenceGap { index: usize, found: u64 },
    /// Recomputed digest differs from the stored one.
    DigestMismatch { index: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::GenesisLink { index } => {
                write!(f, "record {index}: first record must link to \"0\"")
            }
            Violation::BrokenLink { index } => write!(f, "record {index}: previous hash mismatch"),
            Violation::SequenceGap { index, found } => {
                write!(f, "record {index}: sequence number is {found}")
            }
            Violation::DigestMismatch { index } => write!(f, "record {index}: hash mismatch"),
        }
    }
}

/// Non-fatal irregularity; does not affect validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    TimestampRegression { index: usize, previous: i64, current: i64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::TimestampRegression {
                index,
                previous,
                current,
            } => write!(
                f,
                "record {index}: timestamp {current} precedes previous {previous}"
            ),
        }
    }
}

/// Full verification result for a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub total_records: usize,
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
}

impl IntegrityReport {
    pub fn first_invalid(&self) -> Option<usize> {
        self.violations.iter().map(Violation::index).min()
    }
}

impl Violation {
    pub fn index(&self) -> usize {
        match self {
            Violation::GenesisLink { index }
            | Violation::BrokenLink { index }
            | Violation::SequenceGap { index, .. }
            | Violation::DigestMismatch { index } => *index,
        }
    }
}

fn violations_at(chain: &[Record], index: usize) -> Vec<Violation> {
    let current = &chain[index];
    let mut out = Vec::new();

    if index == 0 {
        if current.previous_digest != GENESIS_PREVIOUS_DIGEST {
            out.push(Violation::GenesisLink { index });
        }
    } else if current.previous_digest != chain[index - 1].digest {
        out.push(Violation::BrokenLink { index });
    }

    if current.sequence_number != index as u64 {
        out.push(Violation::SequenceGap {
            index,
            found: current.sequence_number,
        });
    }

    // Never trust the stored digest.
    let recomputed = digest_of(
        current.sequence_number,
        &current.previous_digest,
        current.created_at,
        &current.payload,
    );
    if recomputed != current.digest {
        out.push(Violation::DigestMismatch { index });
    }
    out
}

/// True when every record links to its predecessor, sits at its own position
/// and hashes to its stored digest. Empty and single-record chains are checked
/// the same way; an empty chain is valid.
pub fn verify(chain: &[Record]) -> bool {
    (0..chain.len()).all(|i| violations_at(chain, i).is_empty())
}

/// Like [`verify`], but collects every violation instead of stopping early.
pub fn audit(chain: &[Record]) -> IntegrityReport {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for i in 0..chain.len() {
        violations.extend(violations_at(chain, i));
        if i > 0 && chain[i].created_at < chain[i - 1].created_at {
            warnings.push(Warning::TimestampRegression {
                index: i,
                previous: chain[i - 1].created_at,
                current: chain[i].created_at,
            });
        }
    }

    IntegrityReport {
        total_records: chain.len(),
        valid: violations.is_empty(),
        violations,
        warnings,
    }
}
