//! Formation aura bookkeeping.
//!
//! Each member carrying a [`FormationAura`](crate::components::FormationAura)
//! buffs every member of its formation, itself included. The ledger records
//! every granted `(holder, beneficiary)` pair so that joins, departures,
//! merges and disbands always revoke exactly what was granted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::components::{AuraBuffs, EntityId};
use crate::simulation::EntityStorage;

/// Granted `(holder, beneficiary)` pairs of one formation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuraLedger {
    grants: BTreeSet<(EntityId, EntityId)>,
}

impl AuraLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the aura of `holder` to `beneficiary`.
    ///
    /// Returns `false` if the holder carries no aura or the pair is already
    /// granted.
    pub fn grant(
        &mut self,
        units: &mut EntityStorage,
        holder: EntityId,
        beneficiary: EntityId,
    ) -> bool {
        let Some(aura) = units
            .get(holder)
            .and_then(|unit| unit.aura.as_ref())
            .map(|aura| aura.name.clone())
        else {
            return false;
        };

        if !self.grants.insert((holder, beneficiary)) {
            tracing::debug!(holder, beneficiary, "Aura already granted");
            return false;
        }

        if let Some(unit) = units.get_mut(beneficiary) {
            unit.aura_buffs
                .get_or_insert_with(AuraBuffs::default)
                .sources
                .insert(holder, aura);
        }
        true
    }

    /// Revoke the aura of `holder` from `beneficiary`.
    ///
    /// Returns `false` if the pair was not granted.
    pub fn revoke(
        &mut self,
        units: &mut EntityStorage,
        holder: EntityId,
        beneficiary: EntityId,
    ) -> bool {
        if !self.grants.remove(&(holder, beneficiary)) {
            tracing::debug!(holder, beneficiary, "Aura was not granted");
            return false;
        }

        if let Some(buffs) = units
            .get_mut(beneficiary)
            .and_then(|unit| unit.aura_buffs.as_mut())
        {
            buffs.sources.remove(&holder);
        }
        true
    }

    /// Grant the aura of `holder` to every listed unit. Returns the number of new grants.
    pub fn grant_to_all(
        &mut self,
        units: &mut EntityStorage,
        holder: EntityId,
        beneficiaries: &[EntityId],
    ) -> usize {
        beneficiaries
            .iter()
            .filter(|&&beneficiary| self.grant(units, holder, beneficiary))
            .count()
    }

    /// Revoke the aura of `holder` from every listed unit it was granted to.
    pub fn revoke_from_all(
        &mut self,
        units: &mut EntityStorage,
        holder: EntityId,
        beneficiaries: &[EntityId],
    ) -> usize {
        beneficiaries
            .iter()
            .filter(|&&beneficiary| {
                self.is_granted(holder, beneficiary) && self.revoke(units, holder, beneficiary)
            })
            .count()
    }

    /// Revoke every grant in the ledger.
    pub fn revoke_everything(&mut self, units: &mut EntityStorage) -> usize {
        let pairs: Vec<_> = self.grants.iter().copied().collect();
        pairs
            .into_iter()
            .filter(|&(holder, beneficiary)| self.revoke(units, holder, beneficiary))
            .count()
    }

    /// Check whether `holder` currently buffs `beneficiary`.
    #[must_use]
    pub fn is_granted(&self, holder: EntityId, beneficiary: EntityId) -> bool {
        self.grants.contains(&(holder, beneficiary))
    }

    /// Units currently buffed by `holder`.
    pub fn grants_by(&self, holder: EntityId) -> impl Iterator<Item = EntityId> + '_ {
        self.grants
            .range((holder, EntityId::MIN)..=(holder, EntityId::MAX))
            .map(|&(_, beneficiary)| beneficiary)
    }

    /// Number of granted pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Check if nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
