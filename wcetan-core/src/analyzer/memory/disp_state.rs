//! Concrete DISP memory states.
//!
//! The dynamic instruction scratchpad stores whole functions in a ring
//! buffer of blocks. Two replacement policies are modeled: STACK keeps byte
//! positions in the ring and evicts by range overlap, FIFO keeps insertion
//! order and evicts from the tail. States are concrete; the DFA maintains
//! sets of them.

use crate::analyzer::arch::ActivationType;
use crate::analyzer::error::{AnalysisError, Result};
use std::fmt;

/// Resident function with its byte range in the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEntry {
    pub address: u32,
    pub begin: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    begin: u32,
    end: u32,
}

/// STACK-replacement DISP state.
///
/// On a call the callee is placed directly behind the caller's footprint,
/// on a return the caller is restored directly before the callee's. Any
/// resident function whose byte range the new function overlaps is evicted;
/// the overlap must enter from one side, a middle overlap violates the ring
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackDispState {
    pub content: Vec<StackEntry>,
}

impl StackDispState {
    pub fn is_in_state(&self, function_addr: u32) -> bool {
        self.content.iter().any(|e| e.address == function_addr)
    }

    pub fn used_size(&self, function_mem_size: impl Fn(u32) -> u32) -> u32 {
        self.content.iter().map(|e| function_mem_size(e.address)).sum()
    }

    /// Apply a call or return event activating `function_addr`.
    ///
    /// `previous_function` is the function whose footprint anchors the
    /// insertion position: the caller on a call, the returned-from callee on
    /// a return.
    pub fn activate_function(
        &mut self,
        function_addr: u32,
        activation: ActivationType,
        previous_function: u32,
        mem_size: u32,
        function_size: u32,
    ) -> Result<()> {
        if self.is_in_state(function_addr) {
            return Ok(());
        }

        let entry = match activation {
            ActivationType::Call => {
                if self.content.is_empty() {
                    let e = StackEntry { address: function_addr, begin: 0, end: function_size };
                    self.content.push(e);
                    return self.evict_overlapping(e, mem_size);
                }
                let pos = self
                    .content
                    .iter()
                    .position(|e| e.address == previous_function)
                    .ok_or_else(|| {
                        AnalysisError::Internal(format!(
                            "caller 0x{:08X} not resident on call of 0x{:08X}",
                            previous_function, function_addr
                        ))
                    })?;
                let begin = self.content[pos].end % mem_size;
                let e = StackEntry {
                    address: function_addr,
                    begin,
                    end: (begin + function_size) % mem_size,
                };
                self.content.insert(pos + 1, e);
                e
            }
            ActivationType::Return => {
                // the callee being left anchors the caller's position
                let pos = self
                    .content
                    .iter()
                    .rposition(|e| e.address == previous_function)
                    .ok_or_else(|| {
                        AnalysisError::Internal(format!(
                            "callee 0x{:08X} not resident on return to 0x{:08X}",
                            previous_function, function_addr
                        ))
                    })?;
                let end = self.content[pos].begin;
                let e = StackEntry {
                    address: function_addr,
                    begin: (end + mem_size - function_size) % mem_size,
                    end,
                };
                self.content.insert(pos, e);
                e
            }
        };

        self.evict_overlapping(entry, mem_size)?;
        if self.content.is_empty() {
            return Err(AnalysisError::Internal(
                "DISP eviction removed the active function".into(),
            ));
        }
        Ok(())
    }

    /// Evict every resident function whose range intersects the new entry.
    fn evict_overlapping(&mut self, new_entry: StackEntry, mem_size: u32) -> Result<()> {
        let evict_range = Range { begin: new_entry.begin, end: new_entry.end };
        let mut kept = Vec::with_capacity(self.content.len());
        for e in self.content.drain(..) {
            if e.address == new_entry.address {
                kept.push(e);
                continue;
            }
            let range = Range { begin: e.begin, end: e.end };
            if !ranges_intersect(evict_range, range, mem_size) {
                kept.push(e);
                continue;
            }
            let overlap = intersection(evict_range, range, mem_size);
            // the write pointer must consume the victim from one of its ends
            if overlap.begin != range.begin && overlap.end != range.end {
                return Err(AnalysisError::Internal(format!(
                    "DISP eviction overlaps the middle of 0x{:08X}: victim [{},{}[, overlap [{},{}[",
                    e.address, range.begin, range.end, overlap.begin, overlap.end
                )));
            }
        }
        self.content = kept;
        Ok(())
    }

    /// Rotate all positions so the first resident function starts at 0;
    /// makes states comparable irrespective of the write-pointer history.
    pub fn normalize(&mut self, mem_size: u32) {
        let Some(first) = self.content.first() else { return };
        let offset = first.begin;
        if offset == 0 {
            return;
        }
        for e in self.content.iter_mut() {
            e.begin = (e.begin + mem_size - offset) % mem_size;
            e.end = (e.end + mem_size - offset) % mem_size;
        }
    }
}

impl fmt::Display for StackDispState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.content {
            write!(f, "0x{:08X}[{},{}[ ", e.address, e.begin, e.end)?;
        }
        Ok(())
    }
}

fn wraps(r: Range) -> bool {
    r.begin > r.end
}

/// Ring-buffer range intersection test.
fn ranges_intersect(a: Range, b: Range, mem_size: u32) -> bool {
    let wrap_a = wraps(a);
    let wrap_b = wraps(b);
    let b_end = if wrap_b { b.end + mem_size } else { b.end };
    let a_end = if wrap_a { a.end + mem_size } else { a.end };
    if a.begin >= b.begin && (a.begin < b_end || (wrap_a && a.end > b.begin)) {
        return true;
    }
    if b.begin >= a.begin && (b.begin < a_end || (wrap_b && b.end > a.begin)) {
        return true;
    }
    false
}

/// Intersection of two intersecting ring ranges.
fn intersection(a: Range, b: Range, _mem_size: u32) -> Range {
    let wrap_a = wraps(a);
    let wrap_b = wraps(b);
    match (wrap_a, wrap_b) {
        (false, false) => {
            Range { begin: a.begin.max(b.begin), end: a.end.min(b.end) }
        }
        (true, false) => {
            if a.begin > b.end {
                Range { begin: b.begin, end: a.end.min(b.end) }
            } else {
                Range { begin: a.begin.max(b.begin), end: b.end }
            }
        }
        (false, true) => {
            if b.begin > a.end {
                Range { begin: a.begin, end: b.end.min(a.end) }
            } else {
                Range { begin: b.begin.max(a.begin), end: a.end }
            }
        }
        (true, true) => Range { begin: a.begin.max(b.begin), end: a.end.min(b.end) },
    }
}

/// FIFO-replacement DISP state: resident functions in insertion order,
/// youngest first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FifoDispState {
    pub content: Vec<u32>,
}

impl FifoDispState {
    pub fn is_in_state(&self, function_addr: u32) -> bool {
        self.content.contains(&function_addr)
    }

    pub fn used_size(&self, function_mem_size: impl Fn(u32) -> u32) -> u32 {
        self.content.iter().map(|&a| function_mem_size(a)).sum()
    }

    /// Insert the activated function; evict the oldest entries while the
    /// mapping table or the capacity overflows.
    pub fn activate_function(
        &mut self,
        function_addr: u32,
        mem_size: u32,
        mapping_table_size: u32,
        function_mem_size: impl Fn(u32) -> u32,
    ) {
        if self.is_in_state(function_addr) {
            return;
        }
        self.content.insert(0, function_addr);
        if self.content.len() as u32 > mapping_table_size {
            self.content.pop();
        }
        while self.used_size(&function_mem_size) > mem_size {
            self.content.pop();
        }
    }
}

impl fmt::Display for FifoDispState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.content {
            write!(f, "0x{:08X} ", a)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_call_inserts_after_caller() {
        let mut s = StackDispState::default();
        s.activate_function(0x100, ActivationType::Call, 0, 128, 64).unwrap();
        s.activate_function(0x200, ActivationType::Call, 0x100, 128, 64).unwrap();
        assert_eq!(s.content.len(), 2);
        assert_eq!(s.content[0].address, 0x100);
        assert_eq!(s.content[1].address, 0x200);
        assert_eq!(s.content[1].begin, 64);
        assert_eq!(s.content[1].end, 0); // wraps to the ring start
    }

    #[test]
    fn test_stack_eviction_on_overflow() {
        let mut s = StackDispState::default();
        // three 64-byte functions in a 128-byte ring: the third call evicts
        // the first
        s.activate_function(0x100, ActivationType::Call, 0, 128, 64).unwrap();
        s.activate_function(0x200, ActivationType::Call, 0x100, 128, 64).unwrap();
        s.activate_function(0x300, ActivationType::Call, 0x200, 128, 64).unwrap();
        assert!(!s.is_in_state(0x100));
        assert!(s.is_in_state(0x200));
        assert!(s.is_in_state(0x300));
    }

    #[test]
    fn test_stack_return_restores_caller() {
        let mut s = StackDispState::default();
        s.activate_function(0x200, ActivationType::Call, 0, 128, 64).unwrap();
        // returning to 0x100 whose footprint was already overwritten
        s.activate_function(0x100, ActivationType::Return, 0x200, 128, 64).unwrap();
        assert!(s.is_in_state(0x100));
        assert!(s.is_in_state(0x200));
        // the caller sits directly before the callee in the ring
        let caller = s.content.iter().find(|e| e.address == 0x100).unwrap();
        let callee = s.content.iter().find(|e| e.address == 0x200).unwrap();
        assert_eq!(caller.end, callee.begin);
    }

    #[test]
    fn test_stack_normalize_rotation() {
        let mut a = StackDispState {
            content: vec![
                StackEntry { address: 0x100, begin: 32, end: 96 },
                StackEntry { address: 0x200, begin: 96, end: 32 },
            ],
        };
        let mut b = StackDispState {
            content: vec![
                StackEntry { address: 0x100, begin: 0, end: 64 },
                StackEntry { address: 0x200, begin: 64, end: 0 },
            ],
        };
        a.normalize(128);
        b.normalize(128);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fifo_mapping_table_cap() {
        let mut s = FifoDispState::default();
        let size = |_| 16u32;
        s.activate_function(0x100, 1024, 2, size);
        s.activate_function(0x200, 1024, 2, size);
        s.activate_function(0x300, 1024, 2, size);
        // mapping table of two entries: the oldest is gone despite free space
        assert_eq!(s.content, vec![0x300, 0x200]);
    }

    #[test]
    fn test_fifo_size_eviction() {
        let mut s = FifoDispState::default();
        let size = |_| 64u32;
        s.activate_function(0x100, 128, 16, size);
        s.activate_function(0x200, 128, 16, size);
        s.activate_function(0x300, 128, 16, size);
        assert_eq!(s.content, vec![0x300, 0x200]);
    }
}
