//! Thread and NUMA affinity for consumer threads (Linux).
//!
//! ```rust,ignore
//! use kaos_disruptor::affinity::CoreAffinity;
//! ConsumerBuilder::new().with_affinity(CoreAffinity::Core(2));
//! ```

use std::io;

/// Where a consumer thread should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAffinity {
    /// A single CPU core.
    Core(usize),
    /// Any core of a NUMA node.
    NumaNode(usize),
}

impl CoreAffinity {
    /// Pin the calling thread.
    pub fn apply(self) -> io::Result<()> {
        match self {
            Self::Core(core) => pin_to_core(core),
            Self::NumaNode(node) => pin_to_numa_node(node),
        }
    }
}

/// Pin current thread to a specific CPU core.
#[cfg(target_os = "linux")]
pub fn pin_to_core(core_id: usize) -> io::Result<()> {
    pin_to_cores(&[core_id])
}

/// Pin current thread to all cores in a NUMA node.
#[cfg(target_os = "linux")]
pub fn pin_to_numa_node(node: usize) -> io::Result<()> {
    let path = format!("/sys/devices/system/node/node{}/cpulist", node);
    let cpulist = std::fs::read_to_string(&path)
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "NUMA node not found"))?;

    let cores = parse_cpulist(&cpulist)?;
    if cores.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "No CPUs in node",
        ));
    }
    pin_to_cores(&cores)
}

#[cfg(target_os = "linux")]
fn pin_to_cores(cores: &[usize]) -> io::Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_SETSIZE, CPU_ZERO};

    if let Some(&bad) = cores.iter().find(|&&c| c >= CPU_SETSIZE as usize) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {} out of range", bad),
        ));
    }

    let mut set: cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        CPU_ZERO(&mut set);
        for &core in cores {
            CPU_SET(core, &mut set);
        }
        if sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// Parse "0-3,8-11" format
#[cfg(target_os = "linux")]
fn parse_cpulist(s: &str) -> io::Result<Vec<usize>> {
    let bad = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());
    let mut result = Vec::new();
    for part in s.trim().split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.parse().map_err(|_| bad("bad number"))?;
            let end: usize = end.parse().map_err(|_| bad("bad number"))?;
            if start > end {
                return Err(bad("bad range"));
            }
            result.extend(start..=end);
        } else if !part.is_empty() {
            result.push(part.parse().map_err(|_| bad("bad number"))?);
        }
    }
    Ok(result)
}

// Stubs for non-Linux
#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_core_id: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "Linux only"))
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_numa_node(_node: usize) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "Linux only"))
}
