//! Block-device discard primitives.
//!
//! Real block devices go through the `BLK*` ioctls. Regular files (loop images,
//! test fixtures) report their length as size, refuse discard, and are zeroed
//! with plain chunked writes.

#![allow(missing_docs)]
#![allow(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 4 * 1024 * 1024;
const FSYNC_EVERY_BYTES: u64 = 64 * 1024 * 1024;

mod ioctls {
    // <linux/fs.h>
    nix::ioctl_read!(blk_get_size64, 0x12, 114, u64);
    nix::ioctl_write_ptr_bad!(
        blk_discard,
        nix::request_code_none!(0x12, 119),
        [u64; 2]
    );
    nix::ioctl_read_bad!(
        blk_discard_zeroes,
        nix::request_code_none!(0x12, 124),
        libc::c_uint
    );
    nix::ioctl_write_ptr_bad!(
        blk_sec_discard,
        nix::request_code_none!(0x12, 125),
        [u64; 2]
    );
    nix::ioctl_write_ptr_bad!(
        blk_zero_out,
        nix::request_code_none!(0x12, 127),
        [u64; 2]
    );
}

/// Byte range `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub len: u64,
}

/// Erase primitives offered by a partition.
pub trait DiscardTarget {
    fn size(&mut self) -> io::Result<u64>;
    fn secure_discard(&mut self, range: ByteRange) -> io::Result<()>;
    /// Whether a plain discard reads back as zeroes.
    fn discard_zeroes_data(&mut self) -> io::Result<bool>;
    fn discard(&mut self, range: ByteRange) -> io::Result<()>;
    fn zero_out(&mut self, range: ByteRange) -> io::Result<()>;
}

/// An opened partition (or partition image).
#[derive(Debug)]
pub struct BlockDevice {
    path: PathBuf,
    file: File,
    is_block: bool,
}

impl BlockDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        let is_block = file.metadata()?.file_type().is_block_device();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            is_block,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unsupported(&self, what: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{what} unsupported on {}", self.path.display()),
        )
    }

    fn write_zeroes(&mut self, range: ByteRange) -> io::Result<()> {
        let chunk = vec![0u8; CHUNK_SIZE];
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut written: u64 = 0;
        let mut bytes_since_fsync: u64 = 0;
        while written < range.len {
            let remaining = range.len - written;
            let to_write = usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
            self.file.write_all(&chunk[..to_write])?;
            written += to_write as u64;
            bytes_since_fsync += to_write as u64;
            if bytes_since_fsync >= FSYNC_EVERY_BYTES {
                self.file.sync_data()?;
                bytes_since_fsync = 0;
            }
        }
        self.file.sync_data()
    }
}

impl DiscardTarget for BlockDevice {
    fn size(&mut self) -> io::Result<u64> {
        if !self.is_block {
            return Ok(self.file.metadata()?.len());
        }
        let mut size: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes one u64 through the pointer.
        unsafe { ioctls::blk_get_size64(self.file.as_raw_fd(), &raw mut size) }?;
        Ok(size)
    }

    fn secure_discard(&mut self, range: ByteRange) -> io::Result<()> {
        if !self.is_block {
            return Err(self.unsupported("BLKSECDISCARD"));
        }
        let arg = [range.start, range.len];
        // SAFETY: the kernel reads two u64 values from `arg`.
        unsafe { ioctls::blk_sec_discard(self.file.as_raw_fd(), &raw const arg) }?;
        Ok(())
    }

    fn discard_zeroes_data(&mut self) -> io::Result<bool> {
        if !self.is_block {
            return Ok(false);
        }
        let mut zeroes: libc::c_uint = 0;
        // SAFETY: BLKDISCARDZEROES writes one unsigned int through the pointer.
        unsafe { ioctls::blk_discard_zeroes(self.file.as_raw_fd(), &raw mut zeroes) }?;
        Ok(zeroes != 0)
    }

    fn discard(&mut self, range: ByteRange) -> io::Result<()> {
        if !self.is_block {
            return Err(self.unsupported("BLKDISCARD"));
        }
        let arg = [range.start, range.len];
        // SAFETY: the kernel reads two u64 values from `arg`.
        unsafe { ioctls::blk_discard(self.file.as_raw_fd(), &raw const arg) }?;
        Ok(())
    }

    fn zero_out(&mut self, range: ByteRange) -> io::Result<()> {
        if !self.is_block {
            return self.write_zeroes(range);
        }
        let arg = [range.start, range.len];
        // SAFETY: the kernel reads two u64 values from `arg`.
        unsafe { ioctls::blk_zero_out(self.file.as_raw_fd(), &raw const arg) }?;
        Ok(())
    }
}
