//! Per-identity ephemeral state: the outstanding candidate offer and the staged
//! import document. Nothing here survives a restart.
//!
//! Offer lifecycle per identity: `Idle -> Offered -> Idle` on commit or cancel. A new
//! offer replaces the previous one (last offer wins).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Nothing to confirm. Use /post to get new options.")]
    NothingPending,
    #[error("These options are outdated. Pick from the latest list.")]
    Stale,
    #[error("Invalid choice: option {index} does not exist (1-{available}).")]
    InvalidIndex { index: usize, available: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelection {
    pub offer_id: u64,
    pub candidates: Vec<String>,
}

/// A parsed button token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAction {
    /// 1-based candidate index.
    Pick { offer_id: u64, index: usize },
    Cancel { offer_id: u64 },
}

impl SelectionAction {
    pub fn pick_token(offer_id: u64, index: usize) -> String {
        format!("pick:{offer_id}:{index}")
    }

    pub fn cancel_token(offer_id: u64) -> String {
        format!("cancel:{offer_id}")
    }

    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.trim().split(':');
        match (parts.next()?, parts.next(), parts.next(), parts.next()) {
            ("pick", Some(offer), Some(index), None) => Some(SelectionAction::Pick {
                offer_id: offer.parse().ok()?,
                index: index.parse().ok()?,
            }),
            ("cancel", Some(offer), None, None) => Some(SelectionAction::Cancel {
                offer_id: offer.parse().ok()?,
            }),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    next_offer_id: AtomicU64,
    selections: Mutex<HashMap<i64, PendingSelection>>,
    imports: Mutex<HashMap<i64, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new offer for `identity`, replacing any earlier one.
    pub fn offer(&self, identity: i64, candidates: Vec<String>) -> PendingSelection {
        let offer_id = self.next_offer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = PendingSelection {
            offer_id,
            candidates,
        };
        let mut selections = self.selections.lock().expect("selections lock poisoned");
        selections.insert(identity, pending.clone());
        pending
    }

    pub fn pending(&self, identity: i64) -> Option<PendingSelection> {
        let selections = self.selections.lock().expect("selections lock poisoned");
        selections.get(&identity).cloned()
    }

    /// Check the pick and remove the offer in one step, so only one pick per offer can win.
    /// `offer_id` of `None` means "whatever is current". Rejections leave the offer in place.
    pub fn take(
        &self,
        identity: i64,
        offer_id: Option<u64>,
        index: usize,
    ) -> Result<(PendingSelection, String), SelectionError> {
        let mut selections = self.selections.lock().expect("selections lock poisoned");
        let pending = selections
            .get(&identity)
            .ok_or(SelectionError::NothingPending)?;
        if offer_id.is_some_and(|id| id != pending.offer_id) {
            return Err(SelectionError::Stale);
        }
        let chosen = index
            .checked_sub(1)
            .and_then(|i| pending.candidates.get(i))
            .cloned()
            .ok_or(SelectionError::InvalidIndex {
                index,
                available: pending.candidates.len(),
            })?;
        let pending = selections
            .remove(&identity)
            .ok_or(SelectionError::NothingPending)?;
        Ok((pending, chosen))
    }

    /// Put a taken offer back after a failed commit. A newer offer is left alone.
    pub fn restore(&self, identity: i64, pending: PendingSelection) -> bool {
        let mut selections = self.selections.lock().expect("selections lock poisoned");
        if selections.contains_key(&identity) {
            return false;
        }
        selections.insert(identity, pending);
        true
    }

    /// Drop the offer. Returns how many candidates were discarded.
    pub fn cancel(&self, identity: i64, offer_id: Option<u64>) -> Result<usize, SelectionError> {
        let mut selections = self.selections.lock().expect("selections lock poisoned");
        let pending = selections
            .get(&identity)
            .ok_or(SelectionError::NothingPending)?;
        if offer_id.is_some_and(|id| id != pending.offer_id) {
            return Err(SelectionError::Stale);
        }
        let discarded = pending.candidates.len();
        selections.remove(&identity);
        Ok(discarded)
    }

    /// Stage a received document for a later `/import`, replacing any earlier one.
    pub fn stage_import(&self, identity: i64, text: String) {
        let mut imports = self.imports.lock().expect("imports lock poisoned");
        imports.insert(identity, text);
    }

    pub fn take_import(&self, identity: i64) -> Option<String> {
        let mut imports = self.imports.lock().expect("imports lock poisoned");
        imports.remove(&identity)
    }
}
