//! NES emulator core: 6502 CPU, picture processing unit, iNES cartridges
//! with the NROM mapper, and a driver that steps them in lock-step.

pub mod bus;
pub mod cartridge;
pub mod console;
pub mod cpu;
pub mod error;
pub mod ines;
pub mod instructions;
pub mod picture_bus;
pub mod ppu;

pub use console::Console;
pub use error::Error;
