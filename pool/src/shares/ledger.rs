/// Contribution ledger for the current settlement cycle.
///
/// Nonces are claimed up front by [`ContributionLedger::reserve`] so the
/// duplicate check and the claim happen under one lock; the contribution
/// itself is committed only once the share has passed validation. A drain
/// swaps the whole cycle out under the same lock, so a commit lands either
/// in the drained cycle or in the next one, never in both and never nowhere.
///
/// Every cycle carries an epoch. A reservation that outlived a drain has to
/// claim its nonce again in the new cycle, and loses to a share that
/// reserved the same nonce there first.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;

/// One accepted share.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contribution {
    pub address: String,
    pub miner_id: String,
    pub difficulty: f64,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Claim on a nonce, valid for the cycle it was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub nonce: u64,
    epoch: u64,
}

#[derive(Default)]
struct Cycle {
    epoch: u64,
    claimed: HashSet<u64>,
    accepted: Vec<Contribution>,
}

#[derive(Default)]
pub struct ContributionLedger {
    cycle: Mutex<Cycle>,
}

impl ContributionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `nonce` for this cycle. `None` if it was already claimed.
    pub fn reserve(&self, nonce: u64) -> Option<Reservation> {
        let mut cycle = self.cycle.lock();
        cycle.claimed.insert(nonce).then_some(Reservation {
            nonce,
            epoch: cycle.epoch,
        })
    }

    /// Record an accepted share under its reservation.
    ///
    /// Returns `false` when a drain ran since the reservation and the nonce
    /// has been claimed again in the new cycle; nothing is recorded then.
    pub fn commit(&self, reservation: Reservation, contribution: Contribution) -> bool {
        let mut cycle = self.cycle.lock();
        if reservation.epoch != cycle.epoch && !cycle.claimed.insert(reservation.nonce) {
            return false;
        }
        cycle.accepted.push(contribution);
        true
    }

    pub fn is_claimed(&self, nonce: u64) -> bool {
        self.cycle.lock().claimed.contains(&nonce)
    }

    /// Accepted contributions in the current cycle.
    pub fn len(&self) -> usize {
        self.cycle.lock().accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap the cycle for an empty one and hand back its contributions.
    pub fn drain(&self) -> Vec<Contribution> {
        let mut cycle = self.cycle.lock();
        let next = Cycle {
            epoch: cycle.epoch.wrapping_add(1),
            ..Cycle::default()
        };
        std::mem::replace(&mut *cycle, next).accepted
    }
}
