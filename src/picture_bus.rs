use std::cell::RefCell;
use std::rc::Rc;

use crate::cartridge::{Mapper, MirroringMode};

const NAMETABLE_SIZE: usize = 0x400;

/// PPU-side address space.
///
/// $0000-$1FFF pattern tables (mapper CHR)
/// $2000-$2FFF name tables, $3000-$3EFF mirrors them
/// $3F00-$3FFF palette RAM (32 bytes, mirrored)
pub struct PictureBus {
    mapper: Rc<RefCell<Mapper>>,
    // two physical banks, four when the cartridge provides four-screen VRAM
    vram: [u8; 4 * NAMETABLE_SIZE],
    palette: [u8; 0x20],
    nametables: [usize; 4],
}

impl PictureBus {
    pub fn new(mapper: Rc<RefCell<Mapper>>) -> Self {
        let mut bus = PictureBus {
            mapper,
            vram: [0; 4 * NAMETABLE_SIZE],
            palette: [0; 0x20],
            nametables: [0; 4],
        };
        bus.update_mirroring();
        bus
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1fff => self.mapper.borrow().read_chr(addr),
            0x2000..=0x3eff => self.vram[self.nametable_index(addr)],
            0x3f00..=0x3fff => self.read_palette((addr & 0x1f) as u8),
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x0000..=0x1fff => self.mapper.borrow_mut().write_chr(addr, data),
            0x2000..=0x3eff => {
                let index = self.nametable_index(addr);
                self.vram[index] = data;
            }
            0x3f00..=0x3fff => {
                self.palette[PictureBus::mirror_palette((addr & 0x1f) as u8) as usize] = data
            }
            _ => {}
        }
    }

    pub fn read_palette(&self, offset: u8) -> u8 {
        self.palette[PictureBus::mirror_palette(offset & 0x1f) as usize]
    }

    /// Recompute the physical bank behind each logical name table. Must run
    /// whenever the mapper can have changed its mirroring mode.
    pub fn update_mirroring(&mut self) {
        // 0x2000, 0x2400, 0x2800, 0x2C00
        let banks: [usize; 4] = match self.mapper.borrow().mirror() {
            MirroringMode::Horizontal => [0, 0, 1, 1],
            MirroringMode::Vertical => [0, 1, 0, 1],
            MirroringMode::SingleScreenLowerBank => [0, 0, 0, 0],
            MirroringMode::SingleScreenUpperBank => [1, 1, 1, 1],
            MirroringMode::FourScreen => [0, 1, 2, 3],
        };

        self.nametables = banks.map(|bank| bank * NAMETABLE_SIZE);
    }

    pub fn scanline_irq(&mut self) {
        self.mapper.borrow_mut().scanline_irq();
    }

    fn nametable_index(&self, addr: u16) -> usize {
        // $3000-$3EFF folds down onto $2000-$2EFF
        let normalized = if addr >= 0x3000 { addr - 0x1000 } else { addr };
        let select = ((normalized - 0x2000) / NAMETABLE_SIZE as u16) as usize;
        self.nametables[select] + (normalized as usize & (NAMETABLE_SIZE - 1))
    }

    fn mirror_palette(offset: u8) -> u8 {
        // Addresses $3F10/$3F14/$3F18/$3F1C are mirrors of $3F00/$3F04/$3F08/$3F0C
        let is_mirrored = (offset & 0x13) == 0x10;
        offset & !((is_mirrored as u8) << 4)
    }
}
