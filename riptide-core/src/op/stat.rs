//! File metadata extracted from a raw `statx` completion buffer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default statx request mask: everything basic plus the birth time.
pub const DEFAULT_STAT_MASK: u32 = libc::STATX_BASIC_STATS | libc::STATX_BTIME;

/// Kind of filesystem object, derived from the mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Socket,
    Fifo,
    CharDevice,
    BlockDevice,
    Unknown,
}

impl FileType {
    fn from_mode(mode: u16) -> Self {
        match (mode as u32) & libc::S_IFMT {
            libc::S_IFREG => FileType::Regular,
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            libc::S_IFSOCK => FileType::Socket,
            libc::S_IFIFO => FileType::Fifo,
            libc::S_IFCHR => FileType::CharDevice,
            libc::S_IFBLK => FileType::BlockDevice,
            _ => FileType::Unknown,
        }
    }
}

/// Decoded view of a successful stat operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub file_type: FileType,
    pub size: u64,
    pub blocks: u64,
    pub block_size: u32,
    pub mode: u16,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub inode: u64,
    /// Fields actually filled by the kernel; timestamps absent from the
    /// mask decode to `None`.
    pub mask: u32,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub changed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl FileStat {
    pub(crate) fn from_statx(raw: &libc::statx) -> Self {
        Self {
            file_type: FileType::from_mode(raw.stx_mode),
            size: raw.stx_size,
            blocks: raw.stx_blocks,
            block_size: raw.stx_blksize,
            mode: raw.stx_mode,
            links: raw.stx_nlink,
            uid: raw.stx_uid,
            gid: raw.stx_gid,
            inode: raw.stx_ino,
            mask: raw.stx_mask,
            accessed: timestamp(raw.stx_mask, libc::STATX_ATIME, &raw.stx_atime),
            modified: timestamp(raw.stx_mask, libc::STATX_MTIME, &raw.stx_mtime),
            changed: timestamp(raw.stx_mask, libc::STATX_CTIME, &raw.stx_ctime),
            created: timestamp(raw.stx_mask, libc::STATX_BTIME, &raw.stx_btime),
        }
    }
}

fn timestamp(mask: u32, bit: u32, ts: &libc::statx_timestamp) -> Option<SystemTime> {
    if mask & bit == 0 || ts.tv_sec < 0 {
        return None;
    }
    Some(UNIX_EPOCH + Duration::new(ts.tv_sec as u64, ts.tv_nsec))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_statx() -> libc::statx {
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn extracts_size_and_type_from_raw_buffer() {
        let mut raw = zeroed_statx();
        raw.stx_mode = libc::S_IFREG as u16 | 0o644;
        raw.stx_size = 4096;
        raw.stx_mask = libc::STATX_BASIC_STATS;
        raw.stx_mtime.tv_sec = 1_600_000_000;

        let stat = FileStat::from_statx(&raw);
        assert_eq!(stat.file_type, FileType::Regular);
        assert_eq!(stat.size, 4096);
        assert!(stat.modified.is_some());
        // Birth time was not requested, so it stays empty.
        assert!(stat.created.is_none());
    }

    #[test]
    fn directory_mode_decodes_as_directory() {
        let mut raw = zeroed_statx();
        raw.stx_mode = libc::S_IFDIR as u16 | 0o755;

        assert_eq!(FileStat::from_statx(&raw).file_type, FileType::Directory);
    }
}
