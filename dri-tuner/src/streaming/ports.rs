//! Local RTP/RTCP port pair selection.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, trace};

use crate::error::{Result, TunerError};

/// Source of the local ports currently bound on this host.
pub trait PortInventory: Send + Sync {
    fn bound_ports(&self) -> Result<HashSet<u16>>;
}

/// Pick the first even port in `floor..=ceiling` whose pair `(p, p + 1)` is
/// entirely free.
pub fn select_port_pair(bound: &HashSet<u16>, floor: u16, ceiling: u16) -> Result<u16> {
    let start = floor.saturating_add(floor % 2);
    (start..=ceiling)
        .step_by(2)
        .find(|&port| match port.checked_add(1) {
            Some(companion) => !bound.contains(&port) && !bound.contains(&companion),
            None => false,
        })
        .ok_or(TunerError::NoFreePortPair { floor, ceiling })
}

/// Reads the kernel socket tables under `/proc/net`.
pub struct ProcNetInventory {
    root: PathBuf,
}

const SOCKET_TABLES: [&str; 4] = ["tcp", "tcp6", "udp", "udp6"];

impl Default for ProcNetInventory {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc/net"),
        }
    }
}

impl ProcNetInventory {
    /// Read tables from another directory, for tests and containers.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PortInventory for ProcNetInventory {
    fn bound_ports(&self) -> Result<HashSet<u16>> {
        let mut ports = HashSet::new();
        for table in SOCKET_TABLES {
            let path = self.root.join(table);
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("Socket table {} not present", path.display());
                    continue;
                }
                Err(e) => {
                    return Err(TunerError::Internal(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            };
            ports.extend(parse_socket_table(&contents));
        }
        debug!("{} local ports in use", ports.len());
        Ok(ports)
    }
}

/// Local ports from a `/proc/net/{tcp,udp}[6]` table.
///
/// Each row's second column is `ADDRESS:PORT` with the port in hex.
fn parse_socket_table(contents: &str) -> impl Iterator<Item = u16> + '_ {
    contents.lines().skip(1).filter_map(|line| {
        let local = line.split_whitespace().nth(1)?;
        let (_, port) = local.rsplit_once(':')?;
        u16::from_str_radix(port, 16).ok()
    })
}
