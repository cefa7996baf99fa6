//! NUMA (Non-Uniform Memory Access) Placement
//!
//! On multi-socket machines memory attached to the local node is faster
//! than memory reached over the interconnect:
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐
//! │  CPU Node 0 │     │  CPU Node 1 │
//! │  ┌───────┐  │     │  ┌───────┐  │
//! │  │ Local │  │     │  │ Local │  │
//! │  │ Memory│  │     │  │ Memory│  │
//! │  └───────┘  │     │  └───────┘  │
//! └─────────────┘     └─────────────┘
//!       └────────┬──────────┘
//!         Interconnect (QPI/UPI)
//! ```
//!
//! Heap regions are spread over the active nodes round-robin by region
//! index. The mapper asks for placement right after committing memory and
//! before anything touches it, so the first fault lands on the preferred
//! node. Placement is advisory: failures are logged and ignored.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Placement hook consulted for freshly committed heap memory
pub trait NumaAdvisor: Send + Sync {
    /// Prefer the node chosen for `region_index` for `[address, address + size)`
    fn request_memory_on_node(&self, address: usize, size: usize, region_index: usize);
}

/// NumaManager - round-robin placement over the active NUMA nodes
pub struct NumaManager {
    /// Active node ids, in ascending order
    node_ids: Vec<usize>,

    /// Whether placement requests reach the kernel
    bind: bool,

    /// Per-node placement counters
    node_stats: Vec<NodeCounters>,
}

#[derive(Default)]
struct NodeCounters {
    requests: AtomicUsize,
    bytes: AtomicUsize,
    failures: AtomicUsize,
}

impl NumaManager {
    /// Detect the NUMA topology of the machine
    ///
    /// Reads `/sys/devices/system/node/online` on Linux; every other
    /// platform is treated as a single node.
    pub fn detect() -> Self {
        let node_ids = detect_numa_nodes();
        let bind = node_ids.len() > 1;

        log::debug!("NUMA nodes: {:?} (placement {})", node_ids, if bind { "on" } else { "off" });

        Self::build(node_ids, bind)
    }

    /// Single node, placement disabled
    pub fn single_node() -> Self {
        Self::build(vec![0], false)
    }

    /// Simulated topology: requests are spread and counted but never
    /// forwarded to the kernel
    pub fn with_nodes(node_ids: Vec<usize>) -> Self {
        let node_ids = if node_ids.is_empty() { vec![0] } else { node_ids };
        Self::build(node_ids, false)
    }

    fn build(node_ids: Vec<usize>, bind: bool) -> Self {
        let node_stats = node_ids.iter().map(|_| NodeCounters::default()).collect();
        Self {
            node_ids,
            bind,
            node_stats,
        }
    }

    /// Get NUMA node count
    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    /// Active node ids
    pub fn node_ids(&self) -> &[usize] {
        &self.node_ids
    }

    /// Index into `node_ids` preferred for a region
    pub fn preferred_node_index(&self, region_index: usize) -> usize {
        region_index % self.node_ids.len()
    }

    /// Get statistics for the node at `node_index`
    pub fn node_stats(&self, node_index: usize) -> Option<NumaNodeStats> {
        let counters = self.node_stats.get(node_index)?;
        Some(NumaNodeStats {
            node_id: self.node_ids[node_index],
            requests: counters.requests.load(Ordering::Relaxed),
            placed_bytes: counters.bytes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        })
    }
}

impl Default for NumaManager {
    fn default() -> Self {
        Self::detect()
    }
}

impl NumaAdvisor for NumaManager {
    fn request_memory_on_node(&self, address: usize, size: usize, region_index: usize) {
        let node_index = self.preferred_node_index(region_index);
        let counters = &self.node_stats[node_index];
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(size, Ordering::Relaxed);

        if !self.bind {
            return;
        }

        let node = self.node_ids[node_index];
        if let Err(e) = bind_memory_to_node(address, size, node) {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "NUMA placement of [{:#x}, {:#x}) on node {} failed: {}",
                address,
                address + size,
                node,
                e
            );
        }
    }
}

/// Statistics for a NUMA node
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NumaNodeStats {
    /// Node ID
    pub node_id: usize,
    /// Placement requests routed to the node
    pub requests: usize,
    /// Bytes requested on the node
    pub placed_bytes: usize,
    /// Requests the kernel rejected
    pub failures: usize,
}

/// Detect the active NUMA nodes
fn detect_numa_nodes() -> Vec<usize> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(online) = std::fs::read_to_string("/sys/devices/system/node/online") {
            let nodes = parse_node_list(&online);
            if !nodes.is_empty() {
                return nodes;
            }
        }
    }

    // Default: 1 node (UMA system)
    vec![0]
}

/// Parse a kernel node list such as `0-3,5`
fn parse_node_list(list: &str) -> Vec<usize> {
    let mut nodes = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                    nodes.extend(lo..=hi);
                }
            },
            None => {
                if let Ok(node) = part.trim().parse::<usize>() {
                    nodes.push(node);
                }
            },
        }
    }
    nodes.sort_unstable();
    nodes.dedup();
    nodes
}

#[cfg(target_os = "linux")]
fn bind_memory_to_node(address: usize, size: usize, node: usize) -> std::io::Result<()> {
    const MPOL_PREFERRED: libc::c_ulong = 1;
    let bits = 8 * std::mem::size_of::<libc::c_ulong>();

    let mut mask: Vec<libc::c_ulong> = vec![0; node / bits + 1];
    mask[node / bits] |= 1 << (node % bits);
    let max_node = (mask.len() * bits + 1) as libc::c_ulong;

    // SAFETY: mbind only changes the policy of pages inside the range; the
    // mask outlives the call.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            address as *mut libc::c_void,
            size as libc::c_ulong,
            MPOL_PREFERRED,
            mask.as_ptr(),
            max_node,
            0 as libc::c_uint,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_memory_to_node(_address: usize, _size: usize, _node: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "NUMA placement is only supported on Linux",
    ))
}
