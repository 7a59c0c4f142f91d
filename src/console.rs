use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use crate::{
    bus::{IoRegister, MemoryBus},
    cartridge::{Cartridge, Mapper},
    cpu::CPU,
    error::Error,
    instructions::Interrupt,
    picture_bus::PictureBus,
    ppu::{PixelSink, PPU},
};

/// The whole machine. Owns the CPU, its bus and the PPU, and wires the PPU
/// registers into the bus once at construction.
pub struct Console {
    cpu: CPU,
    bus: MemoryBus,
    ppu: Rc<RefCell<PPU>>,
    // raised by the PPU at vblank, handed to the CPU before its next step
    nmi_line: Rc<Cell<bool>>,
    // page written to OAMDMA, serviced after the CPU step that wrote it
    dma_page: Rc<Cell<Option<u8>>>,
}

fn bind_read<F>(bus: &mut MemoryBus, register: IoRegister, callback: F) -> Result<(), Error>
where
    F: FnMut() -> u8 + 'static,
{
    if bus.set_read_callback(register, callback) {
        Ok(())
    } else {
        Err(Error::CallbackRegistration(register))
    }
}

fn bind_write<F>(bus: &mut MemoryBus, register: IoRegister, callback: F) -> Result<(), Error>
where
    F: FnMut(u8) + 'static,
{
    if bus.set_write_callback(register, callback) {
        Ok(())
    } else {
        Err(Error::CallbackRegistration(register))
    }
}

impl Console {
    pub fn new(cartridge: Cartridge, sink: Box<dyn PixelSink>) -> Result<Self, Error> {
        let mapper = Rc::new(RefCell::new(Mapper::new(cartridge)?));
        let mut bus = MemoryBus::new(Rc::clone(&mapper));
        let ppu = Rc::new(RefCell::new(PPU::new(PictureBus::new(mapper), sink)));

        let nmi_line = Rc::new(Cell::new(false));
        let line = Rc::clone(&nmi_line);
        ppu.borrow_mut()
            .set_interrupt_callback(move || line.set(true));

        let dma_page = Rc::new(Cell::new(None));
        Console::wire_registers(&mut bus, &ppu, &dma_page)?;

        let mut console = Console {
            cpu: CPU::default(),
            bus,
            ppu,
            nmi_line,
            dma_page,
        };
        console.reset();
        Ok(console)
    }

    fn wire_registers(
        bus: &mut MemoryBus,
        ppu: &Rc<RefCell<PPU>>,
        dma_page: &Rc<Cell<Option<u8>>>,
    ) -> Result<(), Error> {
        let p = Rc::clone(ppu);
        bind_read(bus, IoRegister::PPUSTATUS, move || p.borrow_mut().read_status())?;
        let p = Rc::clone(ppu);
        bind_read(bus, IoRegister::PPUDATA, move || p.borrow_mut().read_data())?;
        let p = Rc::clone(ppu);
        bind_read(bus, IoRegister::OAMDATA, move || p.borrow().read_oam_data())?;

        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::PPUCTRL, move |b| p.borrow_mut().write_control(b))?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::PPUMASK, move |b| p.borrow_mut().write_mask(b))?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::OAMADDR, move |b| {
            p.borrow_mut().write_oam_address(b)
        })?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::OAMDATA, move |b| p.borrow_mut().write_oam_data(b))?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::PPUSCROLL, move |b| p.borrow_mut().write_scroll(b))?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::PPUADDR, move |b| {
            p.borrow_mut().write_data_address(b)
        })?;
        let p = Rc::clone(ppu);
        bind_write(bus, IoRegister::PPUDATA, move |b| p.borrow_mut().write_data(b))?;

        let page = Rc::clone(dma_page);
        bind_write(bus, IoRegister::OAMDMA, move |b| page.set(Some(b)))?;

        // no controllers are plugged in
        bind_read(bus, IoRegister::JOY1, || 0)?;
        bind_read(bus, IoRegister::JOY2, || 0)?;
        bind_write(bus, IoRegister::JOY1, |_| {})?;

        Ok(())
    }

    /// Power cycle the PPU and start the CPU at the reset vector.
    pub fn reset(&mut self) {
        self.ppu.borrow_mut().reset();
        self.cpu.reset(&mut self.bus, None);
        self.nmi_line.set(false);
        self.dma_page.set(None);
    }

    /// One CPU cycle: three PPU dots, then the CPU.
    pub fn step(&mut self) {
        {
            let mut ppu = self.ppu.borrow_mut();
            ppu.step();
            ppu.step();
            ppu.step();
        }

        if self.nmi_line.replace(false) {
            self.cpu.interrupt(Interrupt::NMI);
        }

        self.cpu.step(&mut self.bus);

        if let Some(page) = self.dma_page.take() {
            self.service_dma(page);
        }
    }

    fn service_dma(&mut self, page: u8) {
        match self.bus.read_page(page) {
            Some(data) => self.ppu.borrow_mut().do_dma(data),
            None => log::error!("OAM DMA from page ${:02X}, which has no RAM behind it", page),
        }
        self.cpu.skip_dma_cycles();
    }

    /// Step until the PPU has presented one more frame.
    pub fn run_frame(&mut self) {
        let start = self.frame();
        while self.frame() == start {
            self.step();
        }
    }

    /// Frames presented since power-up.
    pub fn frame(&self) -> u64 {
        self.ppu.borrow().frame()
    }

    pub fn cpu(&self) -> &CPU {
        &self.cpu
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    pub fn ppu(&self) -> Ref<'_, PPU> {
        self.ppu.borrow()
    }
}
