//! Reconciliation view: which bookings are still waiting for fulfillment.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{Action, Record};

/// Summary counters for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub total_blocks: usize,
    pub last_update: Option<i64>,
    pub pending_count: usize,
    pub completed_count: usize,
}

fn fulfilled_nres(chain: &[Record]) -> HashSet<&str> {
    chain
        .iter()
        .filter(|r| r.payload.action == Action::Fulfillment)
        .map(|r| r.payload.nre.as_str())
        .collect()
}

fn creations(chain: &[Record]) -> impl Iterator<Item = &Record> {
    chain
        .iter()
        .filter(|r| !r.is_genesis() && r.payload.action == Action::Creation)
}

/// Non-genesis creation records with no fulfillment for the same `nre`
/// anywhere in the chain, in chain order.
///
/// Matching is global and ignores position; several fulfillments of one
/// `nre` are not treated as an anomaly here.
pub fn pending(chain: &[Record]) -> Vec<&Record> {
    let fulfilled = fulfilled_nres(chain);
    creations(chain)
        .filter(|r| !fulfilled.contains(r.payload.nre.as_str()))
        .collect()
}

/// The pending creation at `sequence_number`, if it is still pending.
pub fn find_pending(chain: &[Record], sequence_number: u64) -> Option<&Record> {
    pending(chain)
        .into_iter()
        .find(|r| r.sequence_number == sequence_number)
}

pub fn stats(chain: &[Record]) -> ChainStats {
    let fulfilled = fulfilled_nres(chain);
    let (mut pending_count, mut completed_count) = (0, 0);
    for r in creations(chain) {
        if fulfilled.contains(r.payload.nre.as_str()) {
            completed_count += 1;
        } else {
            pending_count += 1;
        }
    }
    ChainStats {
        total_blocks: chain.len(),
        last_update: chain.last().map(|r| r.created_at),
        pending_count,
        completed_count,
    }
}
