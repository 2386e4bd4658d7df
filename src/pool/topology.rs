//! CPU topology discovery for worker pinning (spec §4.2).
//!
//! `core_affinity`/`hwloc`-style crates aren't part of this crate's corpus,
//! so pinning goes straight through `libc::sched_setaffinity`. Topology
//! discovery reads `/proc/cpuinfo`'s `physical id`/`core id` pairs to build
//! an order that interleaves physical cores before SMT siblings; anywhere
//! that file's shape is unexpected (containers, non-Linux, restricted
//! procfs) falls back to a flat `0..N` order.

use std::collections::BTreeMap;
use std::fs;

pub struct Topology {
    /// OS logical CPU ids, ordered so that taking a prefix favours spreading
    /// across physical cores before doubling up on SMT siblings.
    pub order: Vec<usize>,
}

impl Topology {
    pub fn discover() -> Topology {
        match Self::from_proc_cpuinfo() {
            Some(order) if !order.is_empty() => Topology { order },
            _ => {
                let n = num_cpus::get();
                tracing::warn!(cpus = n, "pool: falling back to flat CPU topology order");
                Topology { order: (0..n).collect() }
            }
        }
    }

    fn from_proc_cpuinfo() -> Option<Vec<usize>> {
        let text = fs::read_to_string("/proc/cpuinfo").ok()?;
        // physical_id -> core_id -> [logical cpu ids]
        let mut groups: BTreeMap<u32, BTreeMap<u32, Vec<usize>>> = BTreeMap::new();
        let mut cpu = None;
        let mut physical = 0u32;
        let mut core = 0u32;
        for line in text.lines() {
            if line.is_empty() {
                if let Some(id) = cpu.take() {
                    groups.entry(physical).or_default().entry(core).or_default().push(id);
                }
                physical = 0;
                core = 0;
                continue;
            }
            let Some((key, value)) = line.split_once(':') else { continue };
            let key = key.trim();
            let value = value.trim();
            match key {
                "processor" => cpu = value.parse().ok(),
                "physical id" => physical = value.parse().unwrap_or(0),
                "core id" => core = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        if let Some(id) = cpu {
            groups.entry(physical).or_default().entry(core).or_default().push(id);
        }
        if groups.is_empty() {
            return None;
        }
        // Round-robin across physical packages and cores, taking one
        // sibling per pass, so a prefix of this order spreads load across
        // distinct physical cores before revisiting SMT siblings.
        let mut per_core: Vec<Vec<usize>> = groups.into_values().flat_map(|cores| cores.into_values()).collect();
        let mut order = Vec::new();
        loop {
            let mut advanced = false;
            for siblings in per_core.iter_mut() {
                if let Some(id) = siblings.pop() {
                    order.push(id);
                    advanced = true;
                }
            }
            if !advanced {
                break;
            }
        }
        Some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_never_returns_empty_on_a_live_machine() {
        let topo = Topology::discover();
        assert!(!topo.order.is_empty());
    }
}
