//! Abstract cache states.
//!
//! Two representations share one interface: the Must/May age maps of the
//! LRU and direct-mapped analyses, and the brute-force set of concrete FIFO
//! queues (FIFO has no compact Must/May lattice that is both sound and
//! precise). The DFA driver is generic over the tagged sum.

use crate::analyzer::config::ReplacementPolicy;
use crate::analyzer::error::{AnalysisError, Result};
use crate::analyzer::memory::params::CacheParams;
use std::collections::BTreeMap;

/// Classification of one memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheClassification {
    AlwaysHit,
    AlwaysMiss,
    NotClassified,
}

/// Must/May pair: cache line address → age. Only ages below the
/// associativity count as resident; stale entries keep aging past it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MustMayState {
    pub must: BTreeMap<u32, u32>,
    pub may: BTreeMap<u32, u32>,
}

/// Set of concrete FIFO queues; the queue front is the youngest line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConcreteQueueSet {
    pub queues: Vec<Vec<u32>>,
}

/// Abstract cache state, tagged by representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    MustMay(MustMayState),
    Concrete(ConcreteQueueSet),
}

impl CacheState {
    /// Number of concrete states this abstract state stands for (1 for the
    /// Must/May representation).
    pub fn concrete_count(&self) -> usize {
        match self {
            CacheState::MustMay(_) => 1,
            CacheState::Concrete(s) => s.queues.len(),
        }
    }

    /// Number of maintained line references.
    pub fn reference_count(&self) -> usize {
        match self {
            CacheState::MustMay(s) => s.must.len() + s.may.len(),
            CacheState::Concrete(s) => s.queues.iter().map(|q| q.len()).sum(),
        }
    }
}

/// Update, join and classification for one cache configuration.
pub struct CacheStateMaintainer {
    params: CacheParams,
    /// Cap on the concrete-state set size of the brute-force representation.
    pub state_cap: usize,
}

impl CacheStateMaintainer {
    pub fn new(params: CacheParams, state_cap: usize) -> Self {
        CacheStateMaintainer { params, state_cap }
    }

    pub fn params(&self) -> &CacheParams {
        &self.params
    }

    /// Cache line address containing `address`.
    pub fn line_of(&self, address: u32) -> u32 {
        address & !(self.params.line_size - 1)
    }

    fn set_of(&self, line: u32) -> u32 {
        (line / self.params.line_size) % self.params.sets
    }

    /// The empty cache.
    pub fn blank_state(&self) -> CacheState {
        match self.params.replacement {
            ReplacementPolicy::Lru | ReplacementPolicy::DirectMapped => {
                CacheState::MustMay(MustMayState::default())
            }
            ReplacementPolicy::Fifo => {
                CacheState::Concrete(ConcreteQueueSet { queues: vec![Vec::new()] })
            }
            ReplacementPolicy::Stack => unreachable!("STACK is a DISP policy"),
        }
    }

    /// State after accessing a sequence of cache lines.
    pub fn update(&self, state: &CacheState, lines: &[u32]) -> Result<CacheState> {
        let mut next = state.clone();
        for &line in lines {
            next = self.update_single(&next, line)?;
        }
        Ok(next)
    }

    /// State after accessing one cache line.
    pub fn update_single(&self, state: &CacheState, line: u32) -> Result<CacheState> {
        match state {
            CacheState::MustMay(s) => Ok(CacheState::MustMay(self.update_must_may(s, line))),
            CacheState::Concrete(s) => {
                let mut queues = s.queues.clone();
                for q in queues.iter_mut() {
                    fifo_access(q, line, self.params.line_count as usize);
                }
                dedup_queues(&mut queues);
                Ok(CacheState::Concrete(ConcreteQueueSet { queues }))
            }
        }
    }

    fn update_must_may(&self, state: &MustMayState, line: u32) -> MustMayState {
        let ways = self.params.ways;
        let set = self.set_of(line);
        let mut next = state.clone();
        for map in [&mut next.must, &mut next.may] {
            let previous_age = map.get(&line).copied();
            for (&other, age) in map.iter_mut() {
                if other != line && self.set_of(other) == set {
                    // age out everything younger than the accessed line
                    let aged = match previous_age {
                        Some(prev) => *age < prev,
                        None => true,
                    };
                    if aged {
                        *age += 1;
                    }
                }
            }
            map.insert(line, 0);
            if self.params.replacement == ReplacementPolicy::DirectMapped {
                // a direct-mapped set holds one line only
                map.retain(|&l, _| l == line || self.set_of(l) != set);
            } else {
                map.retain(|_, &mut age| age < ways.max(1) * 2);
            }
        }
        next
    }

    /// Join at a control-flow merge.
    pub fn join(&self, states: &[CacheState]) -> Result<CacheState> {
        let mut iter = states.iter();
        let first = match iter.next() {
            Some(s) => s.clone(),
            None => self.blank_state(),
        };
        match first {
            CacheState::MustMay(mut acc) => {
                for s in iter {
                    let CacheState::MustMay(other) = s else {
                        return Err(AnalysisError::Internal(
                            "mixed cache state representations in join".into(),
                        ));
                    };
                    // Must: intersection with the maximum age
                    acc.must = acc
                        .must
                        .iter()
                        .filter_map(|(&line, &age)| {
                            other.must.get(&line).map(|&o| (line, age.max(o)))
                        })
                        .collect();
                    // May: union with the minimum age
                    for (&line, &age) in &other.may {
                        acc.may
                            .entry(line)
                            .and_modify(|a| *a = (*a).min(age))
                            .or_insert(age);
                    }
                }
                Ok(CacheState::MustMay(acc))
            }
            CacheState::Concrete(mut acc) => {
                for s in iter {
                    let CacheState::Concrete(other) = s else {
                        return Err(AnalysisError::Internal(
                            "mixed cache state representations in join".into(),
                        ));
                    };
                    acc.queues.extend(other.queues.iter().cloned());
                }
                dedup_queues(&mut acc.queues);
                Ok(CacheState::Concrete(acc))
            }
        }
    }

    /// Check the concrete-state cap; `node` identifies the offender.
    pub fn check_state_cap(&self, state: &CacheState, node: u32) -> Result<()> {
        let count = state.concrete_count();
        if count > self.state_cap {
            return Err(AnalysisError::StateExplosion { node, count, cap: self.state_cap });
        }
        Ok(())
    }

    /// Whether the line is resident in every represented concrete cache.
    pub fn is_in_must(&self, state: &CacheState, line: u32) -> bool {
        match state {
            CacheState::MustMay(s) => {
                s.must.get(&line).map(|&age| age < self.params.ways).unwrap_or(false)
            }
            CacheState::Concrete(s) => {
                !s.queues.is_empty() && s.queues.iter().all(|q| q.contains(&line))
            }
        }
    }

    /// Whether the line may be resident in at least one concrete cache.
    pub fn is_in_may(&self, state: &CacheState, line: u32) -> bool {
        match state {
            CacheState::MustMay(s) => {
                s.may.get(&line).map(|&age| age < self.params.ways).unwrap_or(false)
            }
            CacheState::Concrete(s) => s.queues.iter().any(|q| q.contains(&line)),
        }
    }

    /// Classify an access against the state *before* it.
    pub fn classify(&self, state: &CacheState, line: u32) -> CacheClassification {
        if self.is_in_must(state, line) {
            CacheClassification::AlwaysHit
        } else if self.is_in_may(state, line) {
            CacheClassification::NotClassified
        } else {
            CacheClassification::AlwaysMiss
        }
    }
}

fn fifo_access(queue: &mut Vec<u32>, line: u32, capacity: usize) {
    if queue.contains(&line) {
        // FIFO does not reorder on a hit
        return;
    }
    queue.insert(0, line);
    while queue.len() > capacity {
        queue.pop();
    }
}

fn dedup_queues(queues: &mut Vec<Vec<u32>>) {
    let mut unique: Vec<Vec<u32>> = Vec::with_capacity(queues.len());
    for q in queues.drain(..) {
        if !unique.contains(&q) {
            unique.push(q);
        }
    }
    *queues = unique;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::arch::{ArchConfig, Architecture};
    use crate::analyzer::config::{Configuration, MemoryType};
    use crate::analyzer::memory::params::MemoryParameters;

    fn lru_maintainer(size: u32) -> CacheStateMaintainer {
        let config = Configuration {
            memory_type: MemoryType::Icache,
            memory_replacement_policy: ReplacementPolicy::Lru,
            memory_size: size,
            ..Configuration::default()
        };
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).cache_params(None).unwrap();
        CacheStateMaintainer::new(params, 1024)
    }

    #[test]
    fn test_lru_update_and_classify() {
        // 32 bytes, 16-byte lines, associativity 2 -> one set of two ways
        let m = lru_maintainer(32);
        let s0 = m.blank_state();
        assert_eq!(m.classify(&s0, 0x100), CacheClassification::AlwaysMiss);

        let s1 = m.update(&s0, &[0x100]).unwrap();
        let s2 = m.update(&s1, &[0x110]).unwrap();
        // both lines resident: {0x100: 1, 0x110: 0}
        assert!(m.is_in_must(&s2, 0x100));
        assert!(m.is_in_must(&s2, 0x110));
        if let CacheState::MustMay(ref mm) = s2 {
            assert_eq!(mm.must[&0x100], 1);
            assert_eq!(mm.must[&0x110], 0);
        } else {
            panic!("expected Must/May state");
        }

        // a third line in the same set evicts the oldest
        let s3 = m.update(&s2, &[0x120]).unwrap();
        assert!(!m.is_in_must(&s3, 0x100));
        assert!(m.is_in_must(&s3, 0x110));
        assert!(m.is_in_must(&s3, 0x120));
    }

    #[test]
    fn test_join_must_intersection_may_union() {
        let m = lru_maintainer(32);
        let s0 = m.blank_state();
        let left = m.update(&s0, &[0x100, 0x110]).unwrap();
        let right = m.update(&s0, &[0x100]).unwrap();
        let joined = m.join(&[left, right]).unwrap();
        assert!(m.is_in_must(&joined, 0x100));
        assert!(!m.is_in_must(&joined, 0x110));
        assert!(m.is_in_may(&joined, 0x110));
        // Must stays a subset of May
        if let CacheState::MustMay(mm) = &joined {
            for line in mm.must.keys() {
                assert!(mm.may.contains_key(line));
            }
        }
    }

    #[test]
    fn test_fifo_concrete_set() {
        let config = Configuration {
            memory_type: MemoryType::Icache,
            memory_replacement_policy: ReplacementPolicy::Fifo,
            memory_size: 16,
            ..Configuration::default()
        };
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).cache_params(None).unwrap();
        let m = CacheStateMaintainer::new(params, 8);

        // capacity 1: the diamond scenario joins to one identical queue
        let s0 = m.blank_state();
        let arm_a = m.update(&s0, &[0x100]).unwrap();
        let arm_b = m.update(&s0, &[0x100]).unwrap();
        let joined = m.join(&[arm_a, arm_b]).unwrap();
        assert_eq!(joined.concrete_count(), 1);
        assert_eq!(m.classify(&joined, 0x100), CacheClassification::AlwaysHit);
    }

    #[test]
    fn test_fifo_no_reorder_on_hit() {
        let config = Configuration {
            memory_type: MemoryType::Icache,
            memory_replacement_policy: ReplacementPolicy::Fifo,
            memory_size: 32,
            ..Configuration::default()
        };
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).cache_params(None).unwrap();
        let m = CacheStateMaintainer::new(params, 8);
        let s = m.update(&m.blank_state(), &[0x100, 0x110, 0x100, 0x120]).unwrap();
        if let CacheState::Concrete(cs) = &s {
            // 0x100 keeps its insertion position and is evicted first
            assert_eq!(cs.queues[0], vec![0x120, 0x110]);
        } else {
            panic!("expected concrete state");
        }
    }

    #[test]
    fn test_state_cap_enforced() {
        let config = Configuration {
            memory_type: MemoryType::Icache,
            memory_replacement_policy: ReplacementPolicy::Fifo,
            memory_size: 32,
            ..Configuration::default()
        };
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).cache_params(None).unwrap();
        let m = CacheStateMaintainer::new(params, 1);
        let state = CacheState::Concrete(ConcreteQueueSet {
            queues: vec![vec![0x100], vec![0x110]],
        });
        assert!(matches!(
            m.check_state_cap(&state, 3),
            Err(AnalysisError::StateExplosion { node: 3, count: 2, cap: 1 })
        ));
    }
}
