use super::cartridge::{self, Cartridge, MirroringMode};

const MAGIC: [u8; 4] = [b'N', b'E', b'S', 0x1a];

#[derive(Debug, thiserror::Error)]
pub enum CartridgeError {
    #[error("failed to read iNES image: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an iNES image (magic {0:02X?})")]
    BadMagic([u8; 4]),
    #[error("iNES image declares no PRG ROM banks")]
    NoPrgBanks,
    #[error("iNES trainers are not supported")]
    TrainerUnsupported,
    #[error("PAL images are not supported")]
    PalUnsupported,
    #[error("iNES image is truncated in its {section} section")]
    Truncated { section: &'static str },
}

// https://www.nesdev.org/wiki/INES
#[derive(Default, Debug)]
struct INESHeader {
    prg_banks: u8,            // 4: Size of PRG ROM in 16 KB units
    chr_banks: u8,            // 5: Size of CHR ROM in 8 KB units (0 means CHR RAM)
    vertical_mirror: bool,    // 6 0
    has_battery: bool,        // 6 1
    has_trainer: bool,        // 6 2
    four_screen_mirror: bool, // 6 3
    mapper: u8,               // 7 4..7 << 4 | 6 4..7
    pal: bool,                // 10 0..1
}

impl INESHeader {
    fn parse<R: std::io::Read>(reader: &mut R) -> Result<INESHeader, CartridgeError> {
        let mut buffer: [u8; 16] = [0; 16];
        read_section(reader, &mut buffer, "header")?;

        let magic: [u8; 4] = [buffer[0], buffer[1], buffer[2], buffer[3]];
        if magic != MAGIC {
            return Err(CartridgeError::BadMagic(magic));
        }

        Ok(INESHeader {
            prg_banks: buffer[4],
            chr_banks: buffer[5],
            vertical_mirror: (buffer[6] & 0b0001) != 0,
            has_battery: (buffer[6] & 0b0010) != 0,
            has_trainer: (buffer[6] & 0b0100) != 0,
            four_screen_mirror: (buffer[6] & 0b1000) != 0,
            mapper: (buffer[7] & 0xf0) | (buffer[6] >> 4),
            pal: (buffer[10] & 0b11) == 0b10 || (buffer[10] & 0b01) != 0,
        })
    }

    fn read<R: std::io::Read>(&self, reader: &mut R) -> Result<Cartridge, CartridgeError> {
        // 1. Header (16 bytes)
        // 2. Trainer, if present (0 or 512 bytes)
        // 3. PRG ROM data (16384 * x bytes)
        // 4. CHR ROM data, if present (8192 * y bytes)
        if self.prg_banks == 0 {
            return Err(CartridgeError::NoPrgBanks);
        }

        if self.has_trainer {
            return Err(CartridgeError::TrainerUnsupported);
        }

        if self.pal {
            return Err(CartridgeError::PalUnsupported);
        }

        let mut prg = vec![0u8; self.prg_banks as usize * cartridge::PRG_BANK_SIZE];
        read_section(reader, &mut prg, "PRG ROM")?;

        let mut chr = vec![0u8; self.chr_banks as usize * cartridge::CHR_BANK_SIZE];
        read_section(reader, &mut chr, "CHR ROM")?;

        Ok(Cartridge {
            prg,
            chr,
            mapper_id: self.mapper,
            mirror: match (self.four_screen_mirror, self.vertical_mirror) {
                (true, _) => MirroringMode::FourScreen,
                (false, false) => MirroringMode::Horizontal,
                (false, true) => MirroringMode::Vertical,
            },
            has_extended_ram: self.has_battery,
        })
    }
}

fn read_section<R: std::io::Read>(
    reader: &mut R,
    buffer: &mut [u8],
    section: &'static str,
) -> Result<(), CartridgeError> {
    reader.read_exact(buffer).map_err(|err| match err.kind() {
        std::io::ErrorKind::UnexpectedEof => CartridgeError::Truncated { section },
        _ => CartridgeError::Io(err),
    })
}

pub fn load<R: std::io::Read>(reader: &mut R) -> Result<Cartridge, CartridgeError> {
    let header = INESHeader::parse(reader)?;
    let cartridge = header.read(reader)?;

    log::info!(
        "loaded iNES image: mapper {}, {} x 16KB PRG, {} x 8KB CHR, {:?}",
        cartridge.mapper_id,
        header.prg_banks,
        header.chr_banks,
        cartridge.mirror
    );

    Ok(cartridge)
}
