// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! NOR flash image held in memory and persisted to a file.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

use otau_common::FLASH_SECTOR_SIZE;

/// Erase sets 0xFF, programming clears bits.
pub struct FileFlash {
    data: Vec<u8>,
}

impl FileFlash {
    /// Fully erased flash of `size` bytes.
    pub fn blank(size: u32) -> Result<Self> {
        if size == 0 || size % FLASH_SECTOR_SIZE != 0 {
            bail!("Flash size {:#x} is not a multiple of the sector size", size);
        }
        Ok(Self {
            data: vec![0xFF; size as usize],
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if data.is_empty() || data.len() % FLASH_SECTOR_SIZE as usize != 0 {
            bail!(
                "{} is {} bytes, not a whole number of sectors",
                path.display(),
                data.len()
            );
        }
        Ok(Self { data })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.data).with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl ErrorType for FileFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for FileFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for FileFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, value) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *value;
        }
        Ok(())
    }
}
