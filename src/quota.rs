//! Answer for Samba's `get quota command` hook.
//!
//! Quotas are not enforced on re-exported shares, but smbd still calls the
//! hook; it must get a well-formed "no quota" reply rather than an error.

use std::fmt;

pub const QUOTA_BLOCK_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReport {
    pub flags: u32,
    pub cur_blocks: u64,
    pub soft_blocks: u64,
    pub hard_blocks: u64,
    pub cur_inodes: u64,
    pub soft_inodes: u64,
    pub hard_inodes: u64,
    pub block_size: u32,
}

impl QuotaReport {
    pub fn unlimited() -> Self {
        Self {
            flags: 0,
            cur_blocks: 0,
            soft_blocks: 0,
            hard_blocks: 0,
            cur_inodes: 0,
            soft_inodes: 0,
            hard_inodes: 0,
            block_size: QUOTA_BLOCK_SIZE,
        }
    }
}

impl fmt::Display for QuotaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.flags,
            self.cur_blocks,
            self.soft_blocks,
            self.hard_blocks,
            self.cur_inodes,
            self.soft_inodes,
            self.hard_inodes,
            self.block_size
        )
    }
}

/// Reply for a quota query on `path`; the same for every path and user.
pub fn query(path: &str, kind: Option<&str>, id: Option<&str>) -> QuotaReport {
    tracing::debug!(
        "Quota query for {} (type {:?}, id {:?})",
        path,
        kind,
        id
    );
    QuotaReport::unlimited()
}
