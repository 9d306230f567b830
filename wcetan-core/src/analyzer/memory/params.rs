//! Memory parameter derivation.
//!
//! Combines the configuration and the architecture descriptor into the
//! concrete geometry of the analyzed memory. When a total on-chip budget is
//! configured instead of a usable size, the tag and mapping-table overhead is
//! subtracted first.

use crate::analyzer::arch::ArchConfig;
use crate::analyzer::config::{Configuration, MemoryType, ReplacementPolicy};
use crate::analyzer::error::{AnalysisError, Result};
use log::info;

/// Instruction cache geometry.
#[derive(Debug, Clone)]
pub struct CacheParams {
    pub replacement: ReplacementPolicy,
    pub size: u32,
    pub line_size: u32,
    pub line_count: u32,
    pub ways: u32,
    pub sets: u32,
    /// Enumerate one reference per basic block instead of per line.
    pub use_bbs_instead_of_lines: bool,
}

/// Dynamic scratchpad geometry.
#[derive(Debug, Clone)]
pub struct DispParams {
    pub replacement: ReplacementPolicy,
    pub size: u32,
    pub block_size: u32,
    pub block_count: u32,
    pub mapping_table_size: u32,
    pub ignore_outsized_functions: bool,
}

/// Static scratchpad parameters.
#[derive(Debug, Clone)]
pub struct SispParams {
    pub size: u32,
    pub use_jump_penalties: bool,
}

/// Derives memory parameters for the configured memory type.
pub struct MemoryParameters<'a> {
    config: &'a Configuration,
    arch: &'a ArchConfig,
}

fn is_power_of_two(n: u32) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

impl<'a> MemoryParameters<'a> {
    pub fn new(config: &'a Configuration, arch: &'a ArchConfig) -> Self {
        MemoryParameters { config, arch }
    }

    fn usable_size(&self, size_override: Option<u32>) -> u32 {
        let raw = size_override.unwrap_or_else(|| {
            if self.config.memory_budget != 0 {
                self.budget_derived_size(self.config.memory_budget)
            } else {
                self.config.memory_size
            }
        });
        raw
    }

    /// Translate a total on-chip byte budget into a usable capacity by
    /// subtracting the bookkeeping overhead of the memory type.
    fn budget_derived_size(&self, budget: u32) -> u32 {
        let usable = match self.config.memory_type {
            MemoryType::Icache => {
                // tag store: 4 bytes per line
                let line = self.arch.cache_line_size;
                let lines = budget / (line + 4);
                lines * line
            }
            MemoryType::Disp => {
                // mapping table: 8 bytes per entry
                budget.saturating_sub(self.arch.disp_mapping_table_size * 8)
            }
            _ => budget,
        };
        info!("memory budget of {} bytes yields {} usable bytes", budget, usable);
        usable
    }

    pub fn cache_params(&self, size_override: Option<u32>) -> Result<CacheParams> {
        let line_size = self.arch.cache_line_size;
        if !is_power_of_two(line_size) || line_size < self.arch.fetch_width {
            return Err(AnalysisError::Config(format!(
                "cache line size {} must be a power of two and at least the fetch width",
                line_size
            )));
        }
        let size = self.usable_size(size_override);
        if size == 0 || size % line_size != 0 {
            return Err(AnalysisError::Config(format!(
                "cache size {} must be a non-zero multiple of the line size {}",
                size, line_size
            )));
        }
        let line_count = size / line_size;
        // the brute-force FIFO analysis treats the cache as one queue, a
        // direct-mapped cache has exactly one way per set
        let associativity = match self.config.memory_replacement_policy {
            ReplacementPolicy::Fifo => 0,
            ReplacementPolicy::DirectMapped => 1,
            _ => self.arch.cache_associativity,
        };
        let (ways, sets) = if associativity != 0 {
            if line_count % associativity != 0 {
                return Err(AnalysisError::Config(format!(
                    "{} cache lines do not divide into {} ways",
                    line_count, associativity
                )));
            }
            (associativity, line_count / associativity)
        } else {
            // fully associative
            (line_count, 1)
        };
        Ok(CacheParams {
            replacement: self.config.memory_replacement_policy,
            size,
            line_size,
            line_count,
            ways,
            sets,
            use_bbs_instead_of_lines: self.config.memory_cache_bbs,
        })
    }

    pub fn disp_params(&self, size_override: Option<u32>) -> Result<DispParams> {
        let block_size = self.arch.disp_block_size;
        let size = self.usable_size(size_override);
        if size == 0 || block_size == 0 || size % block_size != 0 {
            return Err(AnalysisError::Config(format!(
                "DISP size {} must be a non-zero multiple of the block size {}",
                size, block_size
            )));
        }
        Ok(DispParams {
            replacement: self.config.memory_replacement_policy,
            size,
            block_size,
            block_count: size / block_size,
            mapping_table_size: self.arch.disp_mapping_table_size,
            ignore_outsized_functions: self.config.memory_disp_ignore_outsized_functions,
        })
    }

    pub fn sisp_params(&self, size_override: Option<u32>) -> SispParams {
        SispParams {
            size: self.usable_size(size_override),
            use_jump_penalties: self.config.memory_type.uses_jump_penalties()
                || self.config.memory_bbsisp_add_jump_penalties_to_wcet,
        }
    }

    /// Usable on-chip size of the configured memory, 0 for NO_MEM.
    pub fn usable_memory_size(&self, size_override: Option<u32>) -> u32 {
        match self.config.memory_type {
            MemoryType::NoMem | MemoryType::VivuTest => 0,
            _ => self.usable_size(size_override),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::arch::Architecture;

    fn setup(memory_type: MemoryType, policy: ReplacementPolicy, size: u32) -> Configuration {
        Configuration {
            memory_type,
            memory_replacement_policy: policy,
            memory_size: size,
            ..Configuration::default()
        }
    }

    #[test]
    fn test_cache_geometry() {
        let config = setup(MemoryType::Icache, ReplacementPolicy::Lru, 1024);
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).cache_params(None).unwrap();
        assert_eq!(params.line_count, 64);
        assert_eq!(params.ways, 2);
        assert_eq!(params.sets, 32);
    }

    #[test]
    fn test_cache_size_must_be_line_multiple() {
        let config = setup(MemoryType::Icache, ReplacementPolicy::Lru, 1000);
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        assert!(MemoryParameters::new(&config, &arch).cache_params(None).is_err());
    }

    #[test]
    fn test_disp_geometry_with_override() {
        let config = setup(MemoryType::Disp, ReplacementPolicy::Stack, 0);
        let arch = ArchConfig::for_architecture(Architecture::Carcore);
        let params = MemoryParameters::new(&config, &arch).disp_params(Some(128)).unwrap();
        assert_eq!(params.block_count, 8);
    }
}
