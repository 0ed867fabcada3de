//! Load-order resolution over Before/After rules

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use xxhash_rust::xxh3::Xxh3;

use crate::model::{LoadoutId, Mod, ModId, SortRule};
use crate::{Error, Result};

/// Topologically sort mods by their rules.
///
/// Mods without a constraint between them keep creation (id) order. Rules
/// naming a mod outside `mods` are ignored.
///
/// # Errors
///
/// [`Error::SortCycle`] naming every mod that could not be placed.
pub fn sort_mods<'a>(mods: impl IntoIterator<Item = &'a Mod>) -> Result<Vec<ModId>> {
    let mods: BTreeMap<ModId, &Mod> = mods.into_iter().map(|m| (m.id, m)).collect();

    let mut successors: BTreeMap<ModId, BTreeSet<ModId>> = BTreeMap::new();
    let mut indegree: BTreeMap<ModId, usize> = mods.keys().map(|id| (*id, 0)).collect();

    for m in mods.values() {
        for rule in &m.rules {
            let (from, to, target) = match *rule {
                SortRule::Before(target) => (m.id, target, target),
                SortRule::After(target) => (target, m.id, target),
            };
            if !mods.contains_key(&target) {
                tracing::warn!(mod_name = %m.name, %target, "sort rule references unknown mod");
                continue;
            }
            if from == to {
                tracing::warn!(mod_name = %m.name, "sort rule references its own mod");
                continue;
            }
            if successors.entry(from).or_default().insert(to) {
                *indegree.entry(to).or_default() += 1;
            }
        }
    }

    let mut ready: BTreeSet<ModId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(mods.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for succ in successors.get(&next).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(succ) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*succ);
                }
            }
        }
    }

    if order.len() < mods.len() {
        let placed: BTreeSet<ModId> = order.iter().copied().collect();
        let stuck = mods
            .values()
            .filter(|m| !placed.contains(&m.id))
            .map(|m| m.name.clone())
            .collect();
        return Err(Error::SortCycle { mods: stuck });
    }

    Ok(order)
}

/// Hash of everything that influences sorting: ids, enabled flags, rules.
pub fn fingerprint<'a>(mods: impl IntoIterator<Item = &'a Mod>) -> u64 {
    let mut hasher = Xxh3::new();
    let mut mods: Vec<&Mod> = mods.into_iter().collect();
    mods.sort_by_key(|m| m.id);
    for m in mods {
        hasher.update(&m.id.entity().0.to_le_bytes());
        hasher.update(&[m.enabled as u8]);
        for rule in &m.rules {
            let (tag, target) = match rule {
                SortRule::Before(t) => (b'b', t),
                SortRule::After(t) => (b'a', t),
            };
            hasher.update(&[tag]);
            hasher.update(&target.entity().0.to_le_bytes());
        }
        hasher.update(b";");
    }
    hasher.digest()
}

/// Sort results per loadout, reused while the fingerprint is unchanged.
#[derive(Debug, Default)]
pub struct SortCache {
    entries: Mutex<HashMap<LoadoutId, (u64, Vec<ModId>)>>,
    hits: AtomicU64,
}

impl SortCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sorted(&self, loadout: LoadoutId, mods: &[&Mod]) -> Result<Vec<ModId>> {
        let key = fingerprint(mods.iter().copied());
        {
            let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
            if let Some((cached_key, order)) = entries.get(&loadout)
                && *cached_key == key
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(order.clone());
            }
        }

        let order = sort_mods(mods.iter().copied())?;
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(loadout, (key, order.clone()));
        Ok(order)
    }

    /// Number of lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self, loadout: LoadoutId) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&loadout);
    }
}
