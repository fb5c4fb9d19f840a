//! Process-level context of a (possibly parallel) run.
//!
//! The grid layer never sends messages itself. It only asks how many
//! processes take part and which one it runs on, e.g. to choose between the
//! serial and the parallel refiner or to build layouts for a given number of
//! target processes.

use serde::{Deserialize, Serialize};

/// Number of processes and rank of the calling process.
pub trait ProcessContext {
    fn num_procs(&self) -> usize;
    fn proc_rank(&self) -> usize;

    /// `true` on the process with rank 0.
    fn is_output_proc(&self) -> bool {
        self.proc_rank() == 0
    }
}

/// Single-process context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SerialProcess;

impl ProcessContext for SerialProcess {
    fn num_procs(&self) -> usize {
        1
    }

    fn proc_rank(&self) -> usize {
        0
    }
}

/// Context of one member of a fixed-size process group, e.g. a rank
/// simulated in a test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProcessGroup {
    num_procs: usize,
    rank: usize,
}

impl LocalProcessGroup {
    /// A group of `num_procs` processes (at least one) seen from `rank`.
    /// Out-of-range ranks are clamped to the last process.
    pub fn new(num_procs: usize, rank: usize) -> Self {
        let num_procs = num_procs.max(1);
        Self {
            num_procs,
            rank: rank.min(num_procs - 1),
        }
    }

    /// Contexts for every rank of the group.
    pub fn ranks(num_procs: usize) -> Vec<Self> {
        (0..num_procs.max(1))
            .map(|r| Self::new(num_procs, r))
            .collect()
    }
}

impl ProcessContext for LocalProcessGroup {
    fn num_procs(&self) -> usize {
        self.num_procs
    }

    fn proc_rank(&self) -> usize {
        self.rank
    }
}

/// Even split of the processes into consecutive blocks, one per subdomain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardDomainDecomposition {
    num_subdomains: usize,
    num_spatial_dimensions: usize,
    procs_per_subdomain: Option<usize>,
}

impl StandardDomainDecomposition {
    /// Decomposition for `num_subdomains` subdomains. With a single process
    /// (or fewer processes than subdomains) no process mapping exists.
    pub fn new(proc: &dyn ProcessContext, num_subdomains: usize) -> Self {
        let mut dd = Self {
            num_subdomains: 1,
            num_spatial_dimensions: 2,
            procs_per_subdomain: None,
        };
        dd.set_num_subdomains(proc, num_subdomains);
        dd
    }

    pub fn set_num_subdomains(&mut self, proc: &dyn ProcessContext, num_subdomains: usize) {
        self.num_subdomains = num_subdomains;
        self.procs_per_subdomain = if num_subdomains > 0 && proc.num_procs() > 1 {
            Some(proc.num_procs() / num_subdomains).filter(|&n| n > 0)
        } else {
            None
        };
    }

    pub fn num_subdomains(&self) -> usize {
        self.num_subdomains
    }

    pub fn set_num_spatial_dimensions(&mut self, dim: usize) {
        self.num_spatial_dimensions = dim;
    }

    pub fn num_spatial_dimensions(&self) -> usize {
        self.num_spatial_dimensions
    }

    /// Subdomain the process `proc` works on.
    pub fn subdomain_of(&self, proc: usize) -> Option<usize> {
        self.procs_per_subdomain.map(|n| proc / n)
    }

    /// Processes working on subdomain `subdomain`.
    pub fn subdomain_procs(&self, subdomain: usize) -> Vec<usize> {
        match self.procs_per_subdomain {
            Some(n) => (subdomain * n..(subdomain + 1) * n).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_context() {
        assert_eq!(SerialProcess.num_procs(), 1);
        assert!(SerialProcess.is_output_proc());
    }

    #[test]
    fn group_clamps_rank() {
        let g = LocalProcessGroup::new(3, 7);
        assert_eq!((g.num_procs(), g.proc_rank()), (3, 2));
        assert_eq!(LocalProcessGroup::ranks(4).len(), 4);
    }

    #[test]
    fn decomposition_blocks() {
        let dd = StandardDomainDecomposition::new(&LocalProcessGroup::new(8, 0), 2);
        assert_eq!(dd.subdomain_of(5), Some(1));
        assert_eq!(dd.subdomain_procs(1), vec![4, 5, 6, 7]);

        let serial = StandardDomainDecomposition::new(&SerialProcess, 2);
        assert_eq!(serial.subdomain_of(0), None);
        assert!(serial.subdomain_procs(0).is_empty());
    }
}
