use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use log::{info, warn};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

const HEADER_MAPPER: usize = 0x0147;
const HEADER_ROM_SIZE: usize = 0x0148;
const HEADER_RAM_SIZE: usize = 0x0149;
const HEADER_END: usize = 0x0150;

/// Mapper kinds accepted by the header parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Which decoded window of the cartridge an access targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartRegion {
    /// 0x0000-0x3FFF, offset 0x0000-0x3FFF.
    Rom0,
    /// 0x4000-0x7FFF, offset 0x0000-0x3FFF.
    Rom1,
    /// 0xA000-0xBFFF, offset 0x0000-0x1FFF.
    Ram,
}

#[derive(Debug)]
pub enum CartridgeError {
    Io(io::Error),
    TruncatedHeader,
    TruncatedRom { expected: usize, actual: usize },
    UnsupportedMapper(u8),
    InvalidRomBankCode(u8),
    InvalidRamBankCode(u8),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartridgeError::Io(e) => write!(f, "cartridge I/O error: {e}"),
            CartridgeError::TruncatedHeader => write!(f, "ROM image smaller than its header"),
            CartridgeError::TruncatedRom { expected, actual } => {
                write!(f, "ROM body truncated: expected {expected} bytes, got {actual}")
            }
            CartridgeError::UnsupportedMapper(code) => {
                write!(f, "unsupported mapper code {code:#04x}")
            }
            CartridgeError::InvalidRomBankCode(code) => {
                write!(f, "invalid ROM size code {code:#04x}")
            }
            CartridgeError::InvalidRamBankCode(code) => {
                write!(f, "invalid RAM size code {code:#04x}")
            }
        }
    }
}

impl std::error::Error for CartridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CartridgeError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CartridgeError {
    fn from(e: io::Error) -> Self {
        CartridgeError::Io(e)
    }
}

/// Run-time bank-select state, one variant per decoded scheme.
///
/// MBC2/MBC3 carts parse and load, but the bus decodes their banked regions as
/// open bus; `Unmapped` covers them.
#[derive(Debug)]
enum MbcState {
    None,
    Mbc1 {
        rom_bank: u8,
        bank_hi: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enable: bool,
    },
    Unmapped,
}

/// A loaded cartridge: immutable ROM banks, mutable RAM banks and the
/// bank-controller state the mapper writes mutate.
#[derive(Debug)]
pub struct Cartridge {
    rom: Vec<u8>,
    ram: Vec<u8>,
    pub kind: MbcKind,
    pub rom_banks: usize,
    pub ram_banks: usize,
    pub battery: bool,
    save_path: Option<PathBuf>,
    state: MbcState,
}

impl Cartridge {
    /// Parse a raw ROM image. Header offsets 0x0147-0x0149 select the mapper,
    /// the ROM bank count (`2 << code`) and the RAM bank count.
    pub fn load(data: Vec<u8>) -> Result<Self, CartridgeError> {
        if data.len() < HEADER_END {
            return Err(CartridgeError::TruncatedHeader);
        }

        let mapper_code = data[HEADER_MAPPER];
        let kind = match mapper_code {
            0x00 | 0x08 | 0x09 => MbcKind::None,
            0x01..=0x03 => MbcKind::Mbc1,
            0x05 | 0x06 => MbcKind::Mbc2,
            0x0F..=0x13 => MbcKind::Mbc3,
            0x19..=0x1E => MbcKind::Mbc5,
            _ => return Err(CartridgeError::UnsupportedMapper(mapper_code)),
        };

        let battery = matches!(
            mapper_code,
            0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0x22
        );

        let rom_code = data[HEADER_ROM_SIZE];
        if rom_code > 8 {
            return Err(CartridgeError::InvalidRomBankCode(rom_code));
        }
        let rom_banks = 2usize << rom_code;

        let ram_banks = match data[HEADER_RAM_SIZE] {
            0 | 1 => 0,
            2 => 1,
            3 => 4,
            4 => 16,
            5 => 8,
            code => return Err(CartridgeError::InvalidRamBankCode(code)),
        };

        let expected = rom_banks * ROM_BANK_SIZE;
        if data.len() < expected {
            return Err(CartridgeError::TruncatedRom {
                expected,
                actual: data.len(),
            });
        }

        let state = match kind {
            MbcKind::None => MbcState::None,
            MbcKind::Mbc1 => MbcState::Mbc1 {
                rom_bank: 0,
                bank_hi: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcKind::Mbc5 => MbcState::Mbc5 {
                rom_bank: 0,
                ram_bank: 0,
                ram_enable: false,
            },
            MbcKind::Mbc2 | MbcKind::Mbc3 => MbcState::Unmapped,
        };

        Ok(Self {
            rom: data,
            ram: vec![0; ram_banks * RAM_BANK_SIZE],
            kind,
            rom_banks,
            ram_banks,
            battery,
            save_path: None,
            state,
        })
    }

    /// Load a ROM image from disk, attaching a sibling `.sav` file for
    /// battery-backed carts.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CartridgeError> {
        let data = fs::read(&path)?;
        let mut cart = Self::load(data)?;

        if cart.battery && cart.ram_banks > 0 {
            let save = path.as_ref().with_extension("sav");
            if save.exists() {
                let bytes = fs::read(&save)?;
                for (dst, src) in cart.ram.iter_mut().zip(bytes.iter()) {
                    *dst = *src;
                }
            }
            cart.save_path = Some(save);
        }

        info!(
            "loaded ROM: {:?}, {} ROM bank(s), {} RAM bank(s), battery: {}",
            cart.kind, cart.rom_banks, cart.ram_banks, cart.battery
        );
        Ok(cart)
    }

    pub fn read(&self, region: CartRegion, offset: u16) -> u8 {
        let offset = offset as usize;
        match (&self.state, region) {
            (MbcState::None, CartRegion::Rom0) => self.rom_byte(0, offset),
            (MbcState::None, CartRegion::Rom1) => self.rom_byte(1, offset),
            (MbcState::None, CartRegion::Ram) => {
                if self.ram_banks > 0 {
                    self.ram_byte(0, offset)
                } else {
                    0xFF
                }
            }

            (MbcState::Mbc1 { bank_hi, mode, .. }, CartRegion::Rom0) => {
                // Mode 1 re-maps the fixed window through the high bank bits
                // on large (more than 32 bank) carts.
                let bank = if *mode == 0 || self.rom_banks <= 32 {
                    0
                } else {
                    ((*bank_hi as usize) << 5) & (self.rom_banks - 1)
                };
                self.rom_byte(bank, offset)
            }
            (
                MbcState::Mbc1 {
                    rom_bank, bank_hi, ..
                },
                CartRegion::Rom1,
            ) => {
                let low = if *rom_bank == 0 { 1 } else { *rom_bank as usize };
                let high = if self.rom_banks > 32 {
                    (*bank_hi as usize) << 5
                } else {
                    0
                };
                let bank = (low | high) & (self.rom_banks - 1);
                self.rom_byte(bank, offset)
            }
            (MbcState::Mbc1 { ram_enable, .. }, CartRegion::Ram) => {
                if self.ram_banks > 0 && *ram_enable {
                    self.ram_byte(self.mbc1_ram_bank(), offset)
                } else {
                    0xFF
                }
            }

            (MbcState::Mbc5 { .. }, CartRegion::Rom0) => self.rom_byte(0, offset),
            (MbcState::Mbc5 { rom_bank, .. }, CartRegion::Rom1) => {
                let bank = *rom_bank as usize & (self.rom_banks - 1);
                self.rom_byte(bank, offset)
            }
            (
                MbcState::Mbc5 {
                    ram_enable,
                    ram_bank,
                    ..
                },
                CartRegion::Ram,
            ) => {
                if self.ram_banks > 0 && *ram_enable {
                    self.ram_byte(*ram_bank as usize & (self.ram_banks - 1), offset)
                } else {
                    0xFF
                }
            }

            (MbcState::Unmapped, _) => 0xFF,
        }
    }

    pub fn write(&mut self, region: CartRegion, offset: u16, val: u8) {
        if region == CartRegion::Ram {
            if let Some(bank) = self.ram_write_bank() {
                self.write_ram_byte(bank, offset as usize, val);
            }
            return;
        }
        self.write_control(region, offset, val);
    }

    /// Bank-select and enable-latch writes (the 0x0000-0x7FFF ROM window).
    fn write_control(&mut self, region: CartRegion, offset: u16, val: u8) {
        match (&mut self.state, region) {
            (
                MbcState::Mbc1 {
                    rom_bank,
                    ram_enable,
                    ..
                },
                CartRegion::Rom0,
            ) => {
                if offset < 0x2000 {
                    // Only the declared enable/disable byte classes latch.
                    if val == 0x0A {
                        *ram_enable = true;
                    } else if val == 0x00 {
                        *ram_enable = false;
                    }
                } else {
                    *rom_bank = val & 0x1F;
                }
            }
            (MbcState::Mbc1 { bank_hi, mode, .. }, CartRegion::Rom1) => {
                if offset < 0x2000 {
                    *bank_hi = val & 0x03;
                } else if val <= 1 {
                    *mode = val;
                }
            }

            (
                MbcState::Mbc5 {
                    rom_bank,
                    ram_enable,
                    ..
                },
                CartRegion::Rom0,
            ) => {
                if offset < 0x2000 {
                    if val & 0x0F == 0x0A {
                        *ram_enable = true;
                    } else if val == 0x00 {
                        *ram_enable = false;
                    }
                } else {
                    *rom_bank = (*rom_bank & 0x0100) | val as u16;
                }
            }
            (
                MbcState::Mbc5 {
                    rom_bank, ram_bank, ..
                },
                CartRegion::Rom1,
            ) => {
                if offset < 0x2000 {
                    *rom_bank = (*rom_bank & 0x00FF) | (((val & 0x01) as u16) << 8);
                } else {
                    *ram_bank = val;
                }
            }

            _ => {}
        }
    }

    /// RAM bank targeted by a data write, or `None` while writes are locked
    /// out (RAM disabled or absent).
    fn ram_write_bank(&self) -> Option<usize> {
        if self.ram_banks == 0 {
            return None;
        }
        match &self.state {
            MbcState::None => Some(0),
            MbcState::Mbc1 { ram_enable, .. } => ram_enable.then(|| self.mbc1_ram_bank()),
            MbcState::Mbc5 {
                ram_enable,
                ram_bank,
                ..
            } => ram_enable.then(|| *ram_bank as usize & (self.ram_banks - 1)),
            MbcState::Unmapped => None,
        }
    }

    /// Flush battery-backed RAM to the sidecar save file.
    pub fn save_ram(&self) -> io::Result<()> {
        if let (true, Some(path)) = (self.battery, &self.save_path)
            && !self.ram.is_empty()
        {
            fs::write(path, &self.ram)?;
        }
        Ok(())
    }

    fn mbc1_ram_bank(&self) -> usize {
        match &self.state {
            MbcState::Mbc1 { bank_hi, mode, .. } => {
                if *mode == 0 || self.rom_banks > 32 {
                    0
                } else {
                    *bank_hi as usize & (self.ram_banks - 1)
                }
            }
            _ => 0,
        }
    }

    fn rom_byte(&self, bank: usize, offset: usize) -> u8 {
        self.rom
            .get(bank * ROM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn ram_byte(&self, bank: usize, offset: usize) -> u8 {
        self.ram
            .get(bank * RAM_BANK_SIZE + offset)
            .copied()
            .unwrap_or(0xFF)
    }

    fn write_ram_byte(&mut self, bank: usize, offset: usize, val: u8) {
        if let Some(b) = self.ram.get_mut(bank * RAM_BANK_SIZE + offset) {
            *b = val;
        }
    }
}

impl Drop for Cartridge {
    fn drop(&mut self) {
        if let Err(e) = self.save_ram() {
            warn!("failed to flush cartridge RAM on drop: {e}");
        }
    }
}
