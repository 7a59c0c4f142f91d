//! CPU memory map
//!
//! $0000-$07FF 2KB internal RAM, mirrored up to $1FFF
//! $2000-$2007 PPU registers, mirrored every 8 bytes up to $3FFF
//! $4014-$4017 OAM DMA and controller ports
//! $6000-$7FFF extended (battery) RAM, when the cartridge has it
//! $8000-$FFFF cartridge PRG, through the mapper

use std::cell::RefCell;
use std::rc::Rc;

use crate::cartridge::Mapper;

/// Registers whose behaviour lives outside the bus. The bus only knows the
/// address of each one; what happens on access is whatever was registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoRegister {
    PPUCTRL = 0,
    PPUMASK,
    PPUSTATUS,
    OAMADDR,
    OAMDATA,
    PPUSCROLL,
    PPUADDR,
    PPUDATA,
    OAMDMA,
    JOY1,
    JOY2,
}

impl IoRegister {
    pub const COUNT: usize = 11;

    pub fn from_address(addr: u16) -> Option<IoRegister> {
        match addr {
            0x2000..=0x3fff => Some(match addr & 0x7 {
                0 => IoRegister::PPUCTRL,
                1 => IoRegister::PPUMASK,
                2 => IoRegister::PPUSTATUS,
                3 => IoRegister::OAMADDR,
                4 => IoRegister::OAMDATA,
                5 => IoRegister::PPUSCROLL,
                6 => IoRegister::PPUADDR,
                _ => IoRegister::PPUDATA,
            }),
            0x4014 => Some(IoRegister::OAMDMA),
            0x4016 => Some(IoRegister::JOY1),
            0x4017 => Some(IoRegister::JOY2),
            _ => None,
        }
    }
}

pub type ReadCallback = Box<dyn FnMut() -> u8>;
pub type WriteCallback = Box<dyn FnMut(u8)>;

pub struct MemoryBus {
    ram: [u8; 0x800],
    extended_ram: Option<Box<[u8; 0x2000]>>,
    mapper: Rc<RefCell<Mapper>>,
    read_callbacks: [Option<ReadCallback>; IoRegister::COUNT],
    write_callbacks: [Option<WriteCallback>; IoRegister::COUNT],
}

impl MemoryBus {
    pub fn new(mapper: Rc<RefCell<Mapper>>) -> Self {
        let extended_ram = if mapper.borrow().has_extended_ram() {
            Some(Box::new([0; 0x2000]))
        } else {
            None
        };

        MemoryBus {
            ram: [0; 0x800],
            extended_ram,
            mapper,
            read_callbacks: Default::default(),
            write_callbacks: Default::default(),
        }
    }

    /// Binds the read handler of `register`. Returns false if one is bound already.
    pub fn set_read_callback<F>(&mut self, register: IoRegister, callback: F) -> bool
    where
        F: FnMut() -> u8 + 'static,
    {
        let slot = &mut self.read_callbacks[register as usize];
        if slot.is_some() {
            return false;
        }

        *slot = Some(Box::new(callback));
        true
    }

    /// Binds the write handler of `register`. Returns false if one is bound already.
    pub fn set_write_callback<F>(&mut self, register: IoRegister, callback: F) -> bool
    where
        F: FnMut(u8) + 'static,
    {
        let slot = &mut self.write_callbacks[register as usize];
        if slot.is_some() {
            return false;
        }

        *slot = Some(Box::new(callback));
        true
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1fff => self.ram[addr as usize & 0x7ff],
            0x2000..=0x401f => match IoRegister::from_address(addr) {
                Some(register) => match &mut self.read_callbacks[register as usize] {
                    Some(callback) => callback(),
                    None => {
                        log::warn!("no read handler for {:?} (${:04X})", register, addr);
                        0
                    }
                },
                None => {
                    log::warn!("read from unmapped register ${:04X}", addr);
                    0
                }
            },
            0x4020..=0x5fff => {
                log::warn!("expansion ROM read at ${:04X} is not implemented", addr);
                0
            }
            0x6000..=0x7fff => match &self.extended_ram {
                Some(ram) => ram[addr as usize - 0x6000],
                None => {
                    log::warn!("extended RAM read at ${:04X} without extended RAM", addr);
                    0
                }
            },
            0x8000..=0xffff => self.mapper.borrow().read_prg(addr),
        }
    }

    pub fn write(&mut self, addr: u16, data: u8) {
        match addr {
            0x0000..=0x1fff => self.ram[addr as usize & 0x7ff] = data,
            0x2000..=0x401f => match IoRegister::from_address(addr) {
                Some(register) => match &mut self.write_callbacks[register as usize] {
                    Some(callback) => callback(data),
                    None => log::warn!("no write handler for {:?} (${:04X})", register, addr),
                },
                None => log::warn!("write to unmapped register ${:04X}", addr),
            },
            0x4020..=0x5fff => {
                log::warn!("expansion ROM write at ${:04X} is not implemented", addr)
            }
            0x6000..=0x7fff => match &mut self.extended_ram {
                Some(ram) => ram[addr as usize - 0x6000] = data,
                None => log::warn!("extended RAM write at ${:04X} without extended RAM", addr),
            },
            0x8000..=0xffff => self.mapper.borrow_mut().write_prg(addr, data),
        }
    }

    /// Read without side effects. Register space has none to offer.
    pub fn peek(&self, addr: u16) -> Option<u8> {
        match addr {
            0x0000..=0x1fff => Some(self.ram[addr as usize & 0x7ff]),
            0x6000..=0x7fff => self
                .extended_ram
                .as_ref()
                .map(|ram| ram[addr as usize - 0x6000]),
            0x8000..=0xffff => Some(self.mapper.borrow().read_prg(addr)),
            _ => None,
        }
    }

    /// The 256 bytes at `page << 8`, if they are backed by RAM. Used as the
    /// source of OAM DMA.
    pub fn read_page(&self, page: u8) -> Option<&[u8; 256]> {
        let start = (page as usize) << 8;
        match start {
            0x0000..=0x1fff => {
                let start = start & 0x7ff;
                self.ram[start..start + 256].try_into().ok()
            }
            0x6000..=0x7fff => self
                .extended_ram
                .as_ref()
                .and_then(|ram| ram[start - 0x6000..start - 0x6000 + 256].try_into().ok()),
            _ => None,
        }
    }
}
