//! Referral graph facts.
//!
//! Each user has at most one direct referrer, so the ancestors of a user form
//! a single chain. The chain is precomputed at enrollment and stored as a
//! fixed-depth set rather than walked at cascade time.

use super::ids::UserId;
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Generation distance between a referrer and a referred user, 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ReferralLevel(u8);

impl ReferralLevel {
    pub const MAX: u8 = 5;
    /// The referrer who directly invited the user.
    pub const DIRECT: Self = Self(1);

    pub fn new(level: u8) -> Result<Self, LedgerError> {
        if (1..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(LedgerError::InvalidReferralLevel(level))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// All levels in ascending order.
    pub fn all() -> impl Iterator<Item = ReferralLevel> {
        (1..=Self::MAX).map(Self)
    }

    fn deeper(&self) -> Option<Self> {
        Self::new(self.0 + 1).ok()
    }
}

impl TryFrom<u8> for ReferralLevel {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ReferralLevel> for u8 {
    fn from(level: ReferralLevel) -> Self {
        level.0
    }
}

impl fmt::Display for ReferralLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Immutable fact: `referrer_id` is the level-`level` ancestor of `referred_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub referrer_id: UserId,
    pub referred_id: UserId,
    pub level: ReferralLevel,
}

/// The ancestors of one user, at most one per level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ancestors {
    by_level: BTreeMap<ReferralLevel, UserId>,
}

impl Ancestors {
    pub fn none() -> Self {
        Self::default()
    }

    /// Ancestors of a user enrolled under `referrer`: the referrer at level 1,
    /// then the referrer's own ancestors one level deeper, truncated at 5.
    pub fn under(referrer: UserId, referrer_ancestors: &Ancestors) -> Self {
        let mut by_level = BTreeMap::new();
        by_level.insert(ReferralLevel::DIRECT, referrer);
        for (level, ancestor) in &referrer_ancestors.by_level {
            if let Some(deeper) = level.deeper() {
                by_level.insert(deeper, *ancestor);
            }
        }
        Self { by_level }
    }

    /// Builds the set from stored edges, rejecting duplicate levels, edges
    /// for another user, and self-referral.
    pub fn from_edges(referred_id: UserId, edges: &[ReferralEdge]) -> Result<Self, LedgerError> {
        let mut by_level = BTreeMap::new();
        for edge in edges {
            if edge.referred_id != referred_id || edge.referrer_id == referred_id {
                return Err(LedgerError::InvalidReferral(format!(
                    "edge {} -> {} does not belong to user {referred_id}",
                    edge.referrer_id, edge.referred_id
                )));
            }
            if by_level.insert(edge.level, edge.referrer_id).is_some() {
                return Err(LedgerError::InvalidReferral(format!(
                    "user {referred_id} has more than one ancestor at {}",
                    edge.level
                )));
            }
        }
        Ok(Self { by_level })
    }

    pub fn at(&self, level: ReferralLevel) -> Option<UserId> {
        self.by_level.get(&level).copied()
    }

    /// Ancestors in ascending level order.
    pub fn iter(&self) -> impl Iterator<Item = (ReferralLevel, UserId)> + '_ {
        self.by_level.iter().map(|(level, user)| (*level, *user))
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.by_level.values().any(|ancestor| *ancestor == user)
    }

    pub fn len(&self) -> usize {
        self.by_level.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_level.is_empty()
    }

    pub fn edges(&self, referred_id: UserId) -> Vec<ReferralEdge> {
        self.iter()
            .map(|(level, referrer_id)| ReferralEdge {
                referrer_id,
                referred_id,
                level,
            })
            .collect()
    }
}

/// Rejects ancestor sets whose cascades could lock accounts in opposite
/// orders.
///
/// A cascade locks the depositor and then each ancestor in ascending level,
/// so every set contributes the ordering `user -> L1 -> L2 -> ...`. The
/// union of these orderings over all sets must be acyclic.
pub fn ensure_acyclic<'a, I>(sets: I) -> Result<(), LedgerError>
where
    I: IntoIterator<Item = (UserId, &'a Ancestors)>,
{
    let mut successors: HashMap<UserId, Vec<UserId>> = HashMap::new();
    let mut incoming: HashMap<UserId, usize> = HashMap::new();

    for (user_id, ancestors) in sets {
        incoming.entry(user_id).or_insert(0);
        let mut previous = user_id;
        for (_, ancestor) in ancestors.iter() {
            successors.entry(previous).or_default().push(ancestor);
            *incoming.entry(ancestor).or_insert(0) += 1;
            previous = ancestor;
        }
    }

    let mut ready: Vec<UserId> = incoming
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(user, _)| *user)
        .collect();
    let mut ordered = 0;
    while let Some(user) = ready.pop() {
        ordered += 1;
        for next in successors.get(&user).into_iter().flatten() {
            if let Some(count) = incoming.get_mut(next) {
                *count -= 1;
                if *count == 0 {
                    ready.push(*next);
                }
            }
        }
    }

    if ordered == incoming.len() {
        return Ok(());
    }
    let looped = incoming
        .iter()
        .find(|(_, count)| **count > 0)
        .map(|(user, _)| *user);
    Err(LedgerError::InvalidReferral(match looped {
        Some(user) => format!("user {user} is part of a referral cycle"),
        None => "referral cycle".to_string(),
    }))
}
