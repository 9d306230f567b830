//! Architecture descriptor.
//!
//! Bundles the timing and geometry parameters of the analyzed processor that
//! the cost calculator, the memory DFAs and the allocation optimizers read.
//! The descriptor is an explicit value threaded through the phases; there is
//! no process-wide configuration object.

use serde::{Deserialize, Serialize};

/// Target instruction set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Architecture {
    Carcore,
    Armv6m,
}

/// How two basic blocks are connected in the control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionType {
    /// Fall-through to the physically next block.
    ContinuousAdressing = 0,
    /// Taken jump.
    Jump = 1,
    /// Function call.
    Call = 2,
    /// Function return.
    Return = 3,
}

/// Displacement width of the terminating jump/call of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisplacementType {
    NoDisplacement = 0,
    Disp4 = 1,
    Disp8 = 2,
    Disp11 = 3,
    Disp15 = 4,
    Disp24 = 5,
    Indirect = 6,
    UnknownDisplacement = 7,
}

/// Whether a DISP event is a call or a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationType {
    Call,
    Return,
}

/// Timing and geometry parameters of one target architecture.
///
/// The jump-penalty tables are indexed by (connection, displacement); entries
/// missing from the table cost zero cycles / bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchConfig {
    pub architecture: Architecture,
    /// Fetch width in bytes per off-chip access.
    pub fetch_width: u32,
    /// Stall cycles per off-chip fetch.
    pub offchip_fetch_stall: u32,
    /// Pipeline cycles to perform a call (on-chip case).
    pub call_latency: u32,
    /// Pipeline cycles to perform a return (on-chip case).
    pub return_latency: u32,
    /// Cache line size in bytes, a power of two and at least the fetch width.
    pub cache_line_size: u32,
    /// Cache associativity; 0 selects a fully associative cache.
    pub cache_associativity: u32,
    /// Miss latency of the instruction cache in cycles.
    pub cache_miss_latency: u32,
    /// DISP block size in bytes.
    pub disp_block_size: u32,
    /// DISP mapping table entries (maximum resident functions).
    pub disp_mapping_table_size: u32,
    /// DISP controller cycles on a hit.
    pub disp_ctrl_hit_cycles: u32,
    /// DISP controller cycles on a miss.
    pub disp_ctrl_miss_cycles: u32,
    /// Block load latency of the DISP in cycles.
    pub disp_miss_latency: u32,
    /// Whether the fetch path is independent of the load path, allowing the
    /// call/return pipeline latency to hide part of a function load.
    pub fetch_mem_independent: bool,
    /// Extra cycles for a control-flow change of the given kind crossing the
    /// on-chip/off-chip boundary: (connection, displacement, cycles).
    pub jump_penalties: Vec<(u8, u8, u32)>,
    /// Extra bytes needed when a continuous-addressing connection must be
    /// turned into an explicit jump: (connection, displacement, bytes).
    pub jump_size_penalties: Vec<(u8, u8, u32)>,
}

impl Default for ArchConfig {
    fn default() -> Self {
        ArchConfig::for_architecture(Architecture::Carcore)
    }
}

impl ArchConfig {
    /// Built-in parameter set of the given architecture.
    pub fn for_architecture(architecture: Architecture) -> Self {
        match architecture {
            Architecture::Carcore => ArchConfig {
                architecture,
                fetch_width: 8,
                offchip_fetch_stall: 4,
                call_latency: 2,
                return_latency: 2,
                cache_line_size: 16,
                cache_associativity: 2,
                cache_miss_latency: 9,
                disp_block_size: 16,
                disp_mapping_table_size: 16,
                disp_ctrl_hit_cycles: 2,
                disp_ctrl_miss_cycles: 4,
                disp_miss_latency: 0,
                fetch_mem_independent: true,
                jump_penalties: vec![
                    (ConnectionType::ContinuousAdressing as u8, DisplacementType::NoDisplacement as u8, 2),
                    (ConnectionType::Jump as u8, DisplacementType::Disp4 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Disp8 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Disp15 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Disp24 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Indirect as u8, 2),
                    (ConnectionType::Call as u8, DisplacementType::Disp8 as u8, 1),
                    (ConnectionType::Call as u8, DisplacementType::Disp24 as u8, 1),
                    (ConnectionType::Call as u8, DisplacementType::Indirect as u8, 2),
                ],
                jump_size_penalties: vec![
                    (ConnectionType::ContinuousAdressing as u8, DisplacementType::NoDisplacement as u8, 4),
                    (ConnectionType::Jump as u8, DisplacementType::Disp4 as u8, 2),
                    (ConnectionType::Jump as u8, DisplacementType::Disp8 as u8, 2),
                ],
            },
            Architecture::Armv6m => ArchConfig {
                architecture,
                fetch_width: 4,
                offchip_fetch_stall: 1,
                call_latency: 3,
                return_latency: 3,
                cache_line_size: 16,
                cache_associativity: 2,
                cache_miss_latency: 5,
                disp_block_size: 8,
                disp_mapping_table_size: 16,
                disp_ctrl_hit_cycles: 1,
                disp_ctrl_miss_cycles: 2,
                disp_miss_latency: 0,
                fetch_mem_independent: false,
                jump_penalties: vec![
                    (ConnectionType::ContinuousAdressing as u8, DisplacementType::NoDisplacement as u8, 2),
                    (ConnectionType::Jump as u8, DisplacementType::Disp8 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Disp11 as u8, 1),
                    (ConnectionType::Jump as u8, DisplacementType::Indirect as u8, 2),
                    (ConnectionType::Call as u8, DisplacementType::Disp24 as u8, 1),
                    (ConnectionType::Call as u8, DisplacementType::Indirect as u8, 2),
                ],
                jump_size_penalties: vec![
                    (ConnectionType::ContinuousAdressing as u8, DisplacementType::NoDisplacement as u8, 2),
                    (ConnectionType::Jump as u8, DisplacementType::Disp8 as u8, 2),
                ],
            },
        }
    }

    /// Penalty in cycles for a (connection, displacement) pair.
    pub fn jump_penalty(&self, connection: ConnectionType, displacement: DisplacementType) -> u32 {
        lookup(&self.jump_penalties, connection, displacement)
    }

    /// Penalty in bytes for a (connection, displacement) pair.
    pub fn jump_size_penalty(
        &self,
        connection: ConnectionType,
        displacement: DisplacementType,
    ) -> u32 {
        lookup(&self.jump_size_penalties, connection, displacement)
    }

    /// Cycles a cache line miss costs (latency plus the access cycle).
    pub fn cache_miss_cost(&self) -> u32 {
        self.cache_miss_latency + 1
    }

    /// Cycles one DISP block load costs (latency plus the access cycle).
    pub fn disp_block_load_cost(&self) -> u32 {
        self.disp_miss_latency + 1
    }

    /// Pipeline cycles of a call or return including the issue cycle.
    pub fn call_return_latency(&self, activation: ActivationType) -> u32 {
        match activation {
            ActivationType::Call => self.call_latency + 1,
            ActivationType::Return => self.return_latency + 1,
        }
    }
}

fn lookup(table: &[(u8, u8, u32)], connection: ConnectionType, displacement: DisplacementType) -> u32 {
    table
        .iter()
        .find(|(c, d, _)| *c == connection as u8 && *d == displacement as u8)
        .map(|(_, _, p)| *p)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_penalty_lookup() {
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        assert_eq!(
            arch.jump_penalty(ConnectionType::ContinuousAdressing, DisplacementType::NoDisplacement),
            2
        );
        assert_eq!(arch.jump_penalty(ConnectionType::Return, DisplacementType::Disp24), 0);
    }

    #[test]
    fn test_latency_helpers() {
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        assert_eq!(arch.cache_miss_cost(), 10);
        assert_eq!(arch.call_return_latency(ActivationType::Call), 3);
    }
}
