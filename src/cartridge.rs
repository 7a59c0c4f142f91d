use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirroringMode {
    Horizontal,
    Vertical,
    SingleScreenLowerBank,
    SingleScreenUpperBank,
    FourScreen,
}

pub const PRG_BANK_SIZE: usize = 0x4000;
pub const CHR_BANK_SIZE: usize = 0x2000;

/// Raw cartridge contents as produced by the iNES loader.
#[derive(Clone, Debug)]
pub struct Cartridge {
    pub prg: Vec<u8>, // 0x4000 aligned
    pub chr: Vec<u8>, // 0x2000 aligned, empty means CHR RAM
    pub mapper_id: u8,
    pub mirror: MirroringMode,
    pub has_extended_ram: bool,
}

impl Cartridge {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::ines::CartridgeError> {
        let mut reader = bytes;
        crate::ines::load(&mut reader)
    }
}

/// Bank-switching policy over the cartridge bytes.
///
/// Every supported board is one variant; adding a mapper means adding a
/// variant and the compiler points at every dispatch that needs an arm.
#[derive(Clone, Debug)]
pub enum Mapper {
    NROM(NROM),
}

impl Mapper {
    pub fn new(cartridge: Cartridge) -> Result<Self, Error> {
        match cartridge.mapper_id {
            0 => {
                log::info!(
                    "mapper 0 (NROM): {} PRG bytes, {} CHR bytes, {:?} mirroring",
                    cartridge.prg.len(),
                    cartridge.chr.len(),
                    cartridge.mirror
                );
                Ok(Mapper::NROM(NROM::new(cartridge)))
            }
            id => Err(Error::UnsupportedMapper(id)),
        }
    }

    pub fn read_prg(&self, address: u16) -> u8 {
        match self {
            Mapper::NROM(m) => m.read_prg(address),
        }
    }

    pub fn write_prg(&mut self, address: u16, data: u8) {
        match self {
            Mapper::NROM(m) => m.write_prg(address, data),
        }
    }

    pub fn read_chr(&self, address: u16) -> u8 {
        match self {
            Mapper::NROM(m) => m.read_chr(address),
        }
    }

    pub fn write_chr(&mut self, address: u16, data: u8) {
        match self {
            Mapper::NROM(m) => m.write_chr(address, data),
        }
    }

    pub fn mirror(&self) -> MirroringMode {
        match self {
            Mapper::NROM(m) => m.cartridge.mirror,
        }
    }

    pub fn has_extended_ram(&self) -> bool {
        match self {
            Mapper::NROM(m) => m.cartridge.has_extended_ram,
        }
    }

    /// Clocked by the PPU once per rendered scanline.
    pub fn scanline_irq(&mut self) {
        match self {
            Mapper::NROM(_) => {}
        }
    }
}

#[derive(Clone, Debug)]
pub struct NROM {
    cartridge: Cartridge,
    one_bank: bool,
    chr_ram: Option<Box<[u8; CHR_BANK_SIZE]>>,
}

impl NROM {
    fn new(cartridge: Cartridge) -> Self {
        NROM {
            one_bank: cartridge.prg.len() <= PRG_BANK_SIZE,
            chr_ram: if cartridge.chr.is_empty() {
                Some(Box::new([0; CHR_BANK_SIZE]))
            } else {
                None
            },
            cartridge,
        }
    }

    fn read_prg(&self, address: u16) -> u8 {
        // CPU $8000-$BFFF: first 16 KB of PRG ROM
        // CPU $C000-$FFFF: last 16 KB of PRG ROM, or a mirror of $8000-$BFFF
        let offset = if self.one_bank {
            (address as usize - 0x8000) & 0x3fff
        } else {
            address as usize - 0x8000
        };

        self.cartridge.prg.get(offset).copied().unwrap_or(0)
    }

    fn write_prg(&mut self, address: u16, data: u8) {
        log::warn!("ROM write attempt at ${:04X} with ${:02X}", address, data);
    }

    fn read_chr(&self, address: u16) -> u8 {
        let offset = address as usize & 0x1fff;
        match &self.chr_ram {
            Some(ram) => ram[offset],
            None => self.cartridge.chr.get(offset).copied().unwrap_or(0),
        }
    }

    fn write_chr(&mut self, address: u16, data: u8) {
        match &mut self.chr_ram {
            Some(ram) => ram[address as usize & 0x1fff] = data,
            None => log::warn!(
                "read-only CHR write attempt at ${:04X} with ${:02X}",
                address,
                data
            ),
        }
    }
}
