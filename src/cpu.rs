use crate::bus::MemoryBus;
use crate::instructions::{
    self, branch_flag, group_one, group_one_mode, group_two, group_two_mode, group_zero,
    Interrupt, OPERATION_CYCLES,
};

/// Processor status plus the two interrupt latches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub carry: bool,
    pub zero: bool,
    pub interrupt_disable: bool,
    pub decimal: bool,
    pub overflow: bool,
    pub negative: bool,
    pub pending_nmi: bool,
    pub pending_irq: bool,
}

impl Status {
    // N V 1 B D I Z C
    fn to_byte(self, brk: bool) -> u8 {
        (self.negative as u8) << 7
            | (self.overflow as u8) << 6
            | 1 << 5
            | (brk as u8) << 4
            | (self.decimal as u8) << 3
            | (self.interrupt_disable as u8) << 2
            | (self.zero as u8) << 1
            | (self.carry as u8)
    }

    fn load_byte(&mut self, flags: u8) {
        self.negative = flags & 0x80 != 0;
        self.overflow = flags & 0x40 != 0;
        self.decimal = flags & 0x08 != 0;
        self.interrupt_disable = flags & 0x04 != 0;
        self.zero = flags & 0x02 != 0;
        self.carry = flags & 0x01 != 0;
    }
}

#[derive(Clone, Debug, Default)]
pub struct CPU {
    cycles: u64,
    skip_cycles: u32,
    pc: u16,
    a: u8,
    x: u8,
    y: u8,
    status: Status,
    sp: u8,
}

fn crosses_page_boundary(a: u16, b: u16) -> bool {
    (a & 0xff00) != (b & 0xff00)
}

impl CPU {
    /// Power-on state. Starts at `entry`, or at the reset vector if none is given.
    pub fn reset(&mut self, bus: &mut MemoryBus, entry: Option<u16>) {
        // https://www.nesdev.org/wiki/CPU_power_up_state
        self.skip_cycles = 0;
        self.cycles = 0;
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xfd;
        self.status = Status {
            interrupt_disable: true,
            ..Status::default()
        };
        self.pc = match entry {
            Some(addr) => addr,
            None => self.read_address(bus, instructions::RESET_VECTOR),
        };
    }

    /// One CPU cycle. The cycle that starts an instruction executes all of it;
    /// the remaining cycles of that instruction are idle.
    pub fn step(&mut self, bus: &mut MemoryBus) {
        self.cycles += 1;

        if self.skip_cycles > 1 {
            self.skip_cycles -= 1;
            return;
        }

        self.skip_cycles = 0;

        if self.status.pending_nmi {
            self.status.pending_nmi = false;
            self.interrupt_sequence(bus, Interrupt::NMI);
            return;
        } else if self.status.pending_irq && !self.status.interrupt_disable {
            self.status.pending_irq = false;
            self.interrupt_sequence(bus, Interrupt::IRQ);
            return;
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", self.trace_line(bus));
        }

        let opcode = self.fetch(bus);
        let cycle_length = OPERATION_CYCLES[opcode as usize];

        if cycle_length != 0
            && (self.execute_implied(bus, opcode)
                || self.execute_branch(bus, opcode)
                || self.execute_group_one(bus, opcode)
                || self.execute_group_two(bus, opcode)
                || self.execute_group_zero(bus, opcode))
        {
            self.skip_cycles += cycle_length as u32;
        } else {
            // unknown opcodes are skipped and cost nothing
            log::warn!(
                "unknown opcode ${:02X} at ${:04X}",
                opcode,
                self.pc.wrapping_sub(1)
            );
        }
    }

    /// Latch an interrupt line; it is serviced at the start of the next instruction.
    pub fn interrupt(&mut self, kind: Interrupt) {
        match kind {
            Interrupt::NMI => self.status.pending_nmi = true,
            Interrupt::IRQ => self.status.pending_irq = true,
            Interrupt::BRK => {}
        }
    }

    /// Halt for the duration of an OAM DMA transfer.
    pub fn skip_dma_cycles(&mut self) {
        self.skip_cycles += 513 + (self.cycles & 1) as u32;
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn a(&self) -> u8 {
        self.a
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn y(&self) -> u8 {
        self.y
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Total cycles stepped since reset.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles still owed by the current instruction, interrupt or DMA.
    pub fn pending_cycles(&self) -> u32 {
        self.skip_cycles
    }

    fn interrupt_sequence(&mut self, bus: &mut MemoryBus, kind: Interrupt) {
        if self.status.interrupt_disable && kind == Interrupt::IRQ {
            return;
        }

        if kind == Interrupt::BRK {
            self.pc = self.pc.wrapping_add(1);
        }

        self.push_stack(bus, (self.pc >> 8) as u8);
        self.push_stack(bus, self.pc as u8);
        let flags = self.status.to_byte(kind == Interrupt::BRK);
        self.push_stack(bus, flags);

        self.status.interrupt_disable = true;

        self.pc = match kind {
            Interrupt::IRQ | Interrupt::BRK => self.read_address(bus, instructions::IRQ_VECTOR),
            Interrupt::NMI => self.read_address(bus, instructions::NMI_VECTOR),
        };

        // BRK pays through its own opcode cycles
        if kind != Interrupt::BRK {
            self.skip_cycles += 6;
        }
    }

    fn push_stack(&mut self, bus: &mut MemoryBus, data: u8) {
        bus.write(0x100 | self.sp as u16, data);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull_stack(&mut self, bus: &mut MemoryBus) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(0x100 | self.sp as u16)
    }

    fn fetch(&mut self, bus: &mut MemoryBus) -> u8 {
        let data = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        data
    }

    fn fetch_address(&mut self, bus: &mut MemoryBus) -> u16 {
        let address = self.read_address(bus, self.pc);
        self.pc = self.pc.wrapping_add(2);
        address
    }

    fn read_address(&self, bus: &mut MemoryBus, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read(addr.wrapping_add(1));

        (hi as u16) << 8 | (lo as u16)
    }

    // the high byte never leaves the page of the low byte
    fn read_address_indirect(&self, bus: &mut MemoryBus, addr: u16) -> u16 {
        let lo = bus.read(addr);
        let hi = bus.read((addr & 0xff00) | (0x00ff & addr.wrapping_add(1)));

        (hi as u16) << 8 | (lo as u16)
    }

    fn read_zero_page_address(&self, bus: &mut MemoryBus, zero: u8) -> u16 {
        let lo = bus.read(zero as u16);
        let hi = bus.read(zero.wrapping_add(1) as u16);

        (hi as u16) << 8 | (lo as u16)
    }

    fn indexed(&mut self, base: u16, index: u8, penalty: bool) -> u16 {
        let address = base.wrapping_add(index as u16);
        if penalty && crosses_page_boundary(base, address) {
            self.skip_cycles += 1;
        }
        address
    }

    fn set_zn(&mut self, value: u8) {
        self.status.zero = value == 0;
        self.status.negative = value & 0x80 != 0;
    }

    fn add_with_carry(&mut self, operand: u8) {
        let sum = self.a as u16 + operand as u16 + self.status.carry as u16;
        let result = sum as u8;
        self.status.carry = sum & 0x100 != 0;
        self.status.overflow = (self.a ^ result) & (operand ^ result) & 0x80 != 0;
        self.a = result;
        self.set_zn(result);
    }

    fn compare(&mut self, register: u8, operand: u8) {
        self.status.carry = register >= operand;
        self.set_zn(register.wrapping_sub(operand));
    }

    /// Single-byte control and transfer opcodes, plus JSR and both JMPs.
    fn execute_implied(&mut self, bus: &mut MemoryBus, opcode: u8) -> bool {
        match opcode {
            0xea => {} // NOP
            0x00 => self.interrupt_sequence(bus, Interrupt::BRK),
            0x20 => {
                // JSR pushes the address of its own last byte
                let ret = self.pc.wrapping_add(1);
                self.push_stack(bus, (ret >> 8) as u8);
                self.push_stack(bus, ret as u8);
                self.pc = self.read_address(bus, self.pc);
            }
            0x60 => {
                // RTS
                let lo = self.pull_stack(bus) as u16;
                let hi = self.pull_stack(bus) as u16;
                self.pc = (hi << 8 | lo).wrapping_add(1);
            }
            0x40 => {
                // RTI
                let flags = self.pull_stack(bus);
                self.status.load_byte(flags);
                let lo = self.pull_stack(bus) as u16;
                let hi = self.pull_stack(bus) as u16;
                self.pc = hi << 8 | lo;
            }
            0x4c => self.pc = self.read_address(bus, self.pc), // JMP
            0x6c => {
                // JMP (indirect)
                let indirect = self.read_address(bus, self.pc);
                self.pc = self.read_address_indirect(bus, indirect);
            }
            0x08 => {
                // PHP
                let flags = self.status.to_byte(true);
                self.push_stack(bus, flags);
            }
            0x28 => {
                // PLP
                let flags = self.pull_stack(bus);
                self.status.load_byte(flags);
            }
            0x48 => self.push_stack(bus, self.a), // PHA
            0x68 => {
                // PLA
                self.a = self.pull_stack(bus);
                self.set_zn(self.a);
            }
            0x88 => {
                // DEY
                self.y = self.y.wrapping_sub(1);
                self.set_zn(self.y);
            }
            0xca => {
                // DEX
                self.x = self.x.wrapping_sub(1);
                self.set_zn(self.x);
            }
            0xa8 => {
                // TAY
                self.y = self.a;
                self.set_zn(self.y);
            }
            0xc8 => {
                // INY
                self.y = self.y.wrapping_add(1);
                self.set_zn(self.y);
            }
            0xe8 => {
                // INX
                self.x = self.x.wrapping_add(1);
                self.set_zn(self.x);
            }
            0x18 => self.status.carry = false,             // CLC
            0x38 => self.status.carry = true,              // SEC
            0x58 => self.status.interrupt_disable = false, // CLI
            0x78 => self.status.interrupt_disable = true,  // SEI
            0xd8 => self.status.decimal = false,           // CLD
            0xf8 => self.status.decimal = true,            // SED
            0xb8 => self.status.overflow = false,          // CLV
            0x98 => {
                // TYA
                self.a = self.y;
                self.set_zn(self.a);
            }
            0x8a => {
                // TXA
                self.a = self.x;
                self.set_zn(self.a);
            }
            0x9a => self.sp = self.x, // TXS
            0xaa => {
                // TAX
                self.x = self.a;
                self.set_zn(self.x);
            }
            0xba => {
                // TSX
                self.x = self.sp;
                self.set_zn(self.x);
            }
            _ => return false,
        };

        true
    }

    /// Conditional branches: xxy 100 00, branch when flag xx equals y.
    fn execute_branch(&mut self, bus: &mut MemoryBus, opcode: u8) -> bool {
        if opcode & 0x1f != 0x10 {
            return false;
        }

        let expected = opcode & 0x20 != 0;
        let flag = match opcode >> 6 {
            branch_flag::NEGATIVE => self.status.negative,
            branch_flag::OVERFLOW => self.status.overflow,
            branch_flag::CARRY => self.status.carry,
            _ => self.status.zero,
        };

        let offset = self.fetch(bus) as i8;
        if flag == expected {
            let target = self.pc.wrapping_add(offset as u16);
            self.skip_cycles += 1;
            if crosses_page_boundary(self.pc, target) {
                self.skip_cycles += 1;
            }
            self.pc = target;
        }

        true
    }

    /// ALU group: aaa bbb 01.
    fn execute_group_one(&mut self, bus: &mut MemoryBus, opcode: u8) -> bool {
        if opcode & 0x3 != 0x1 {
            return false;
        }

        let op = (opcode & 0xe0) >> 5;
        let penalty = op != group_one::STA;

        let location = match (opcode & 0x1c) >> 2 {
            group_one_mode::INDEXED_INDIRECT => {
                let zero = self.fetch(bus).wrapping_add(self.x);
                self.read_zero_page_address(bus, zero)
            }
            group_one_mode::ZERO_PAGE => self.fetch(bus) as u16,
            group_one_mode::IMMEDIATE => {
                let location = self.pc;
                self.pc = self.pc.wrapping_add(1);
                location
            }
            group_one_mode::ABSOLUTE => self.fetch_address(bus),
            group_one_mode::INDIRECT_INDEXED => {
                let zero = self.fetch(bus);
                let base = self.read_zero_page_address(bus, zero);
                self.indexed(base, self.y, penalty)
            }
            group_one_mode::ZERO_PAGE_X => self.fetch(bus).wrapping_add(self.x) as u16,
            group_one_mode::ABSOLUTE_Y => {
                let base = self.fetch_address(bus);
                self.indexed(base, self.y, penalty)
            }
            _ => {
                // absolute,X
                let base = self.fetch_address(bus);
                self.indexed(base, self.x, penalty)
            }
        };

        match op {
            group_one::ORA => {
                self.a |= bus.read(location);
                self.set_zn(self.a);
            }
            group_one::AND => {
                self.a &= bus.read(location);
                self.set_zn(self.a);
            }
            group_one::EOR => {
                self.a ^= bus.read(location);
                self.set_zn(self.a);
            }
            group_one::ADC => {
                let operand = bus.read(location);
                self.add_with_carry(operand);
            }
            group_one::STA => bus.write(location, self.a),
            group_one::LDA => {
                self.a = bus.read(location);
                self.set_zn(self.a);
            }
            group_one::CMP => {
                let operand = bus.read(location);
                self.compare(self.a, operand);
            }
            _ => {
                // SBC is ADC of the complemented operand
                let operand = bus.read(location);
                self.add_with_carry(!operand);
            }
        }

        true
    }

    /// Shift, rotate, X transfer and memory inc/dec group: aaa bbb 10.
    fn execute_group_two(&mut self, bus: &mut MemoryBus, opcode: u8) -> bool {
        if opcode & 0x3 != 0x2 {
            return false;
        }

        let op = (opcode & 0xe0) >> 5;
        let mode = (opcode & 0x1c) >> 2;
        let index = if op == group_two::STX || op == group_two::LDX {
            self.y
        } else {
            self.x
        };

        let location = match mode {
            group_two_mode::IMMEDIATE => {
                let location = self.pc;
                self.pc = self.pc.wrapping_add(1);
                location
            }
            group_two_mode::ZERO_PAGE => self.fetch(bus) as u16,
            group_two_mode::ACCUMULATOR => 0,
            group_two_mode::ABSOLUTE => self.fetch_address(bus),
            group_two_mode::ZERO_PAGE_INDEXED => self.fetch(bus).wrapping_add(index) as u16,
            group_two_mode::ABSOLUTE_INDEXED => {
                let base = self.fetch_address(bus);
                self.indexed(base, index, op == group_two::LDX)
            }
            _ => return false,
        };

        let on_accumulator = mode == group_two_mode::ACCUMULATOR;

        match op {
            group_two::ASL | group_two::ROL => {
                let carry_in = (op == group_two::ROL && self.status.carry) as u8;
                let operand = if on_accumulator { self.a } else { bus.read(location) };
                let result = operand << 1 | carry_in;
                self.status.carry = operand & 0x80 != 0;
                self.set_zn(result);
                if on_accumulator {
                    self.a = result;
                } else {
                    bus.write(location, result);
                }
            }
            group_two::LSR | group_two::ROR => {
                let carry_in = (op == group_two::ROR && self.status.carry) as u8;
                let operand = if on_accumulator { self.a } else { bus.read(location) };
                let result = operand >> 1 | carry_in << 7;
                self.status.carry = operand & 0x01 != 0;
                self.set_zn(result);
                if on_accumulator {
                    self.a = result;
                } else {
                    bus.write(location, result);
                }
            }
            group_two::STX => bus.write(location, self.x),
            group_two::LDX => {
                self.x = bus.read(location);
                self.set_zn(self.x);
            }
            group_two::DEC => {
                let result = bus.read(location).wrapping_sub(1);
                self.set_zn(result);
                bus.write(location, result);
            }
            _ => {
                // INC
                let result = bus.read(location).wrapping_add(1);
                self.set_zn(result);
                bus.write(location, result);
            }
        }

        true
    }

    /// BIT, Y transfer and X/Y compare group: aaa bbb 00.
    fn execute_group_zero(&mut self, bus: &mut MemoryBus, opcode: u8) -> bool {
        if opcode & 0x3 != 0x0 {
            return false;
        }

        let op = (opcode & 0xe0) >> 5;
        if !matches!(
            op,
            group_zero::BIT | group_zero::STY | group_zero::LDY | group_zero::CPY | group_zero::CPX
        ) {
            return false;
        }

        let location = match (opcode & 0x1c) >> 2 {
            group_two_mode::IMMEDIATE => {
                let location = self.pc;
                self.pc = self.pc.wrapping_add(1);
                location
            }
            group_two_mode::ZERO_PAGE => self.fetch(bus) as u16,
            group_two_mode::ABSOLUTE => self.fetch_address(bus),
            group_two_mode::ZERO_PAGE_INDEXED => self.fetch(bus).wrapping_add(self.x) as u16,
            group_two_mode::ABSOLUTE_INDEXED => {
                let base = self.fetch_address(bus);
                self.indexed(base, self.x, op == group_zero::LDY)
            }
            _ => return false,
        };

        match op {
            group_zero::BIT => {
                let operand = bus.read(location);
                self.status.zero = self.a & operand == 0;
                self.status.overflow = operand & 0x40 != 0;
                self.status.negative = operand & 0x80 != 0;
            }
            group_zero::STY => bus.write(location, self.y),
            group_zero::LDY => {
                self.y = bus.read(location);
                self.set_zn(self.y);
            }
            group_zero::CPY => {
                let operand = bus.read(location);
                self.compare(self.y, operand);
            }
            _ => {
                // CPX
                let operand = bus.read(location);
                self.compare(self.x, operand);
            }
        }

        true
    }

    fn trace_line(&self, bus: &MemoryBus) -> arrayvec::ArrayString<96> {
        // C000  4C F5 C5  A:00 X:00 Y:00 P:24 SP:FD CYC:7
        // PC    < raw >   < registers >             < timing >
        use std::fmt::Write;
        let mut str_buf = arrayvec::ArrayString::<96>::new();

        let _ = write!(str_buf, "{:04X}  ", self.pc);
        for offset in 0..3u16 {
            let _ = match bus.peek(self.pc.wrapping_add(offset)) {
                Some(byte) => write!(str_buf, "{:02X} ", byte),
                None => write!(str_buf, "?? "),
            };
        }

        let _ = write!(
            str_buf,
            " A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
            self.a,
            self.x,
            self.y,
            self.status.to_byte(false),
            self.sp,
            self.cycles
        );

        str_buf
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::cartridge::{Cartridge, Mapper, MirroringMode};

    const NMI_HANDLER: u16 = 0x9000;
    const IRQ_HANDLER: u16 = 0xa000;

    fn bus_with_program(program: &[u8]) -> MemoryBus {
        let mut prg = vec![0xea; 0x8000];
        prg[..program.len()].copy_from_slice(program);
        prg[0x7ffa..].copy_from_slice(&[
            NMI_HANDLER as u8,
            (NMI_HANDLER >> 8) as u8,
            0x00,
            0x80,
            IRQ_HANDLER as u8,
            (IRQ_HANDLER >> 8) as u8,
        ]);

        let cartridge = Cartridge {
            prg,
            chr: Vec::new(),
            mapper_id: 0,
            mirror: MirroringMode::Horizontal,
            has_extended_ram: false,
        };
        MemoryBus::new(Rc::new(RefCell::new(Mapper::new(cartridge).unwrap())))
    }

    fn boot(program: &[u8]) -> (CPU, MemoryBus) {
        let mut bus = bus_with_program(program);
        let mut cpu = CPU::default();
        cpu.reset(&mut bus, None);
        (cpu, bus)
    }

    // runs exactly one instruction and reports the cycles it was charged
    fn execute(cpu: &mut CPU, bus: &mut MemoryBus) -> u32 {
        cpu.skip_cycles = 0;
        cpu.step(bus);
        cpu.skip_cycles
    }

    #[test]
    fn test_reset_reads_vector() {
        let (cpu, _) = boot(&[]);
        assert_eq!(cpu.pc(), 0x8000);
        assert_eq!(cpu.sp(), 0xfd);
        assert!(cpu.status().interrupt_disable);
        assert_eq!(cpu.pending_cycles(), 0);
    }

    #[test]
    fn test_reset_with_entry() {
        let mut bus = bus_with_program(&[]);
        let mut cpu = CPU::default();
        cpu.reset(&mut bus, Some(0xc123));
        assert_eq!(cpu.pc(), 0xc123);
    }

    #[test]
    fn test_adc_overflow() {
        // LDA #$7F; ADC #$01
        let (mut cpu, mut bus) = boot(&[0xa9, 0x7f, 0x69, 0x01]);
        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.a(), 0x80);
        let status = cpu.status();
        assert!(status.overflow);
        assert!(status.negative);
        assert!(!status.carry);
        assert!(!status.zero);
    }

    #[test]
    fn test_adc_carry_and_zero() {
        let cases: [(u8, u8, bool, u8, bool, bool); 4] = [
            // a, operand, carry in, result, carry out, overflow
            (0xff, 0x01, false, 0x00, true, false),
            (0x80, 0xff, false, 0x7f, true, true),
            (0x01, 0x01, true, 0x03, false, false),
            (0x50, 0x50, false, 0xa0, false, true),
        ];

        for (a, operand, carry_in, result, carry_out, overflow) in cases {
            let (mut cpu, mut bus) = boot(&[0xa9, a, 0x69, operand]);
            execute(&mut cpu, &mut bus);
            cpu.status.carry = carry_in;
            execute(&mut cpu, &mut bus);

            assert_eq!(cpu.a(), result, "{:02X} + {:02X}", a, operand);
            assert_eq!(cpu.status().carry, carry_out, "{:02X} + {:02X}", a, operand);
            assert_eq!(cpu.status().overflow, overflow, "{:02X} + {:02X}", a, operand);
            assert_eq!(cpu.status().zero, result == 0);
            assert_eq!(cpu.status().negative, result & 0x80 != 0);
        }
    }

    #[test]
    fn test_sbc() {
        // SEC; LDA #$50; SBC #$F0; SEC; LDA #$50; SBC #$B0; CLC; LDA #$05; SBC #$04
        let (mut cpu, mut bus) = boot(&[
            0x38, 0xa9, 0x50, 0xe9, 0xf0, 0x38, 0xa9, 0x50, 0xe9, 0xb0, 0x18, 0xa9, 0x05, 0xe9,
            0x04,
        ]);
        for _ in 0..3 {
            execute(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.a(), 0x60);
        assert!(!cpu.status().carry);
        assert!(!cpu.status().overflow);

        for _ in 0..3 {
            execute(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.a(), 0xa0);
        assert!(!cpu.status().carry);
        assert!(cpu.status().overflow);

        // borrow in: 5 - 4 - 1
        for _ in 0..3 {
            execute(&mut cpu, &mut bus);
        }
        assert_eq!(cpu.a(), 0x00);
        assert!(cpu.status().zero);
        assert!(cpu.status().carry);
    }

    #[test]
    fn test_adc_sbc_all_inputs() {
        let mut bus = bus_with_program(&[]);
        let mut cpu = CPU::default();

        for opcode in [0x69u8, 0xe9] {
            for a in 0..=255u8 {
                for operand in 0..=255u8 {
                    for carry_in in [false, true] {
                        // LDA #a; ADC/SBC #operand, from RAM
                        bus.write(0x0000, 0xa9);
                        bus.write(0x0001, a);
                        bus.write(0x0002, opcode);
                        bus.write(0x0003, operand);
                        cpu.reset(&mut bus, Some(0x0000));
                        execute(&mut cpu, &mut bus);
                        cpu.status.carry = carry_in;
                        execute(&mut cpu, &mut bus);

                        let (unsigned, signed) = if opcode == 0x69 {
                            (
                                a as i16 + operand as i16 + carry_in as i16,
                                a as i8 as i16 + operand as i8 as i16 + carry_in as i16,
                            )
                        } else {
                            (
                                a as i16 - operand as i16 - !carry_in as i16,
                                a as i8 as i16 - operand as i8 as i16 - !carry_in as i16,
                            )
                        };
                        let result = unsigned as u8;
                        let carry = if opcode == 0x69 {
                            unsigned > 0xff
                        } else {
                            unsigned >= 0
                        };
                        let context = (opcode, a, operand, carry_in);

                        let status = cpu.status();
                        assert_eq!(cpu.a(), result, "{:02X?}", context);
                        assert_eq!(status.carry, carry, "{:02X?}", context);
                        assert_eq!(
                            status.overflow,
                            !(-128..=127).contains(&signed),
                            "{:02X?}",
                            context
                        );
                        assert_eq!(status.zero, result == 0, "{:02X?}", context);
                        assert_eq!(status.negative, result & 0x80 != 0, "{:02X?}", context);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare() {
        // LDA #$40; CMP #$40; CMP #$41; LDX #$10; CPX #$01; LDY #$00; CPY #$01
        let (mut cpu, mut bus) = boot(&[
            0xa9, 0x40, 0xc9, 0x40, 0xc9, 0x41, 0xa2, 0x10, 0xe0, 0x01, 0xa0, 0x00, 0xc0, 0x01,
        ]);
        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert!(cpu.status().zero && cpu.status().carry);

        execute(&mut cpu, &mut bus);
        assert!(!cpu.status().zero && !cpu.status().carry && cpu.status().negative);
        assert_eq!(cpu.a(), 0x40);

        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert!(cpu.status().carry && !cpu.status().zero);

        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert!(!cpu.status().carry && cpu.status().negative);
    }

    #[test]
    fn test_stack_round_trip() {
        let (mut cpu, mut bus) = boot(&[]);
        let sp = cpu.sp();
        cpu.push_stack(&mut bus, 0x42);
        assert_eq!(cpu.sp(), sp.wrapping_sub(1));
        assert_eq!(bus.read(0x0100 | sp as u16), 0x42);
        assert_eq!(cpu.pull_stack(&mut bus), 0x42);
        assert_eq!(cpu.sp(), sp);
    }

    #[test]
    fn test_stack_wraps_within_page() {
        let (mut cpu, mut bus) = boot(&[]);
        cpu.sp = 0x00;
        cpu.push_stack(&mut bus, 0x24);
        assert_eq!(cpu.sp(), 0xff);
        assert_eq!(bus.read(0x0100), 0x24);
        assert_eq!(cpu.pull_stack(&mut bus), 0x24);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $8010 ... $8010: RTS
        let mut program = vec![0xea; 0x11];
        program[..3].copy_from_slice(&[0x20, 0x10, 0x80]);
        program[0x10] = 0x60;
        let (mut cpu, mut bus) = boot(&program);

        assert_eq!(execute(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.pc(), 0x8010);
        assert_eq!(bus.read(0x01fd), 0x80);
        assert_eq!(bus.read(0x01fc), 0x02);

        assert_eq!(execute(&mut cpu, &mut bus), 6);
        assert_eq!(cpu.pc(), 0x8003);
        assert_eq!(cpu.sp(), 0xfd);
    }

    #[test]
    fn test_nmi_has_priority() {
        let (mut cpu, mut bus) = boot(&[]);
        cpu.status.interrupt_disable = false;
        cpu.interrupt(Interrupt::IRQ);
        cpu.interrupt(Interrupt::NMI);

        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.pc(), NMI_HANDLER);
        assert!(cpu.status().interrupt_disable);
        assert!(!cpu.status().pending_nmi);
        assert_eq!(cpu.pending_cycles(), 6);

        // return address then status, B clear
        assert_eq!(bus.read(0x01fd), 0x80);
        assert_eq!(bus.read(0x01fc), 0x00);
        assert_eq!(bus.read(0x01fb) & 0x30, 0x20);
    }

    #[test]
    fn test_irq_masked_runs_instruction() {
        // INX
        let (mut cpu, mut bus) = boot(&[0xe8]);
        cpu.interrupt(Interrupt::IRQ);

        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.pc(), 0x8001);
        assert_eq!(cpu.x(), 1);
        assert!(cpu.status().pending_irq);
    }

    #[test]
    fn test_irq_serviced_when_enabled() {
        // CLI; NOP
        let (mut cpu, mut bus) = boot(&[0x58, 0xea]);
        execute(&mut cpu, &mut bus);
        cpu.interrupt(Interrupt::IRQ);

        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.pc(), IRQ_HANDLER);
        assert!(!cpu.status().pending_irq);
        assert_eq!(bus.read(0x01fc), 0x01);
    }

    #[test]
    fn test_brk_and_rti() {
        // BRK; (padding); at the IRQ handler: RTI
        let mut program = vec![0xea; 0x2001];
        program[0] = 0x00;
        program[0x2000] = 0x40;
        let (mut cpu, mut bus) = boot(&program);
        cpu.status.carry = true;

        assert_eq!(execute(&mut cpu, &mut bus), 7);
        assert_eq!(cpu.pc(), IRQ_HANDLER);
        assert_eq!(bus.read(0x01fc), 0x02);
        assert_eq!(bus.read(0x01fb) & 0x31, 0x31);

        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.pc(), 0x8002);
        assert!(cpu.status().carry);
        assert!(cpu.status().interrupt_disable);
    }

    #[test]
    fn test_base_cycle_counts() {
        // LDA #$01; LDA $10; LDA $1234; STA $10; INC $1234; ASL A; PHA; PLA; NOP
        let (mut cpu, mut bus) = boot(&[
            0xa9, 0x01, 0xa5, 0x10, 0xad, 0x34, 0x12, 0x85, 0x10, 0xee, 0x34, 0x12, 0x0a, 0x48,
            0x68, 0xea,
        ]);
        for expected in [2, 3, 4, 3, 6, 2, 3, 4, 2] {
            assert_eq!(execute(&mut cpu, &mut bus), expected);
        }
    }

    #[test]
    fn test_every_opcode_charges_table_cycles() {
        for opcode in 0..=255u8 {
            let expected = OPERATION_CYCLES[opcode as usize] as u32;
            if expected == 0 {
                continue;
            }

            // operands point at $10 / $0210, X = Y = 0, so no index crosses a page
            let mut bus = bus_with_program(&[]);
            bus.write(0x0300, opcode);
            bus.write(0x0301, 0x10);
            bus.write(0x0302, 0x02);
            let mut cpu = CPU::default();
            cpu.reset(&mut bus, Some(0x0300));
            cpu.status = Status::default();

            // with every flag clear, BPL BVC BCC and BNE branch within the page
            let taken_branch = opcode & 0x1f == 0x10 && opcode & 0x20 == 0;
            let expected = expected + taken_branch as u32;

            assert_eq!(
                execute(&mut cpu, &mut bus),
                expected,
                "opcode ${:02X}",
                opcode
            );
        }
    }

    #[test]
    fn test_page_crossing_penalty() {
        // LDX #$FF; LDA $0201,X; LDA $0200,X; STA $0201,X; LDY #$10; LDA ($20),Y; STA ($20),Y
        let (mut cpu, mut bus) = boot(&[
            0xa2, 0xff, 0xbd, 0x01, 0x02, 0xbd, 0x00, 0x02, 0x9d, 0x01, 0x02, 0xa0, 0x10, 0xb1,
            0x20, 0x91, 0x20,
        ]);
        bus.write(0x0020, 0xf8);
        bus.write(0x0021, 0x03);

        execute(&mut cpu, &mut bus);
        assert_eq!(execute(&mut cpu, &mut bus), 5);
        assert_eq!(execute(&mut cpu, &mut bus), 4);
        assert_eq!(execute(&mut cpu, &mut bus), 5);
        execute(&mut cpu, &mut bus);
        assert_eq!(execute(&mut cpu, &mut bus), 6);
        assert_eq!(execute(&mut cpu, &mut bus), 6);
    }

    #[test]
    fn test_branch_cycles() {
        let mut program = vec![0xea; 0x100];
        program[..2].copy_from_slice(&[0xa9, 0x00]); // LDA #$00
        program[2..4].copy_from_slice(&[0xd0, 0x02]); // BNE +2, not taken
        program[4..6].copy_from_slice(&[0xf0, 0x02]); // BEQ +2, taken
        program[8..10].copy_from_slice(&[0xf0, 0x7f]); // BEQ +127, stays on the page
        let (mut cpu, mut bus) = boot(&program);

        execute(&mut cpu, &mut bus);
        assert_eq!(execute(&mut cpu, &mut bus), 2);
        assert_eq!(cpu.pc(), 0x8004);

        assert_eq!(execute(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.pc(), 0x8008);

        assert_eq!(execute(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.pc(), 0x8089);
    }

    #[test]
    fn test_branch_across_page() {
        // at $80F0: BEQ +$20 lands on $8112
        let mut program = vec![0xea; 0x200];
        program[..2].copy_from_slice(&[0xa9, 0x00]);
        program[2..5].copy_from_slice(&[0x4c, 0xf0, 0x80]);
        program[0xf0..0xf2].copy_from_slice(&[0xf0, 0x20]);
        let (mut cpu, mut bus) = boot(&program);

        execute(&mut cpu, &mut bus);
        assert_eq!(execute(&mut cpu, &mut bus), 3);
        assert_eq!(cpu.pc(), 0x80f0);
        assert_eq!(execute(&mut cpu, &mut bus), 4);
        assert_eq!(cpu.pc(), 0x8112);
    }

    #[test]
    fn test_jmp_indirect_page_bug() {
        // JMP ($02FF)
        let (mut cpu, mut bus) = boot(&[0x6c, 0xff, 0x02]);
        bus.write(0x02ff, 0x34);
        bus.write(0x0200, 0x12);
        bus.write(0x0300, 0x56);

        assert_eq!(execute(&mut cpu, &mut bus), 5);
        assert_eq!(cpu.pc(), 0x1234);
    }

    #[test]
    fn test_zero_page_index_wraps() {
        // LDX #$01; LDA $FF,X; LDX #$FF; LDA ($01,X)
        let (mut cpu, mut bus) = boot(&[0xa2, 0x01, 0xb5, 0xff, 0xa2, 0xff, 0xa1, 0x01]);
        bus.write(0x0000, 0x77);
        bus.write(0x0001, 0x02);
        bus.write(0x0277, 0x99);

        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.a(), 0x77);

        // pointer at $00/$01 reads $0277
        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.a(), 0x99);
    }

    #[test]
    fn test_shifts_and_memory_ops() {
        // LDA #$81; ASL A; ROL A; LSR $10; ROR $10; INC $11; DEC $12
        let (mut cpu, mut bus) = boot(&[
            0xa9, 0x81, 0x0a, 0x2a, 0x46, 0x10, 0x66, 0x10, 0xe6, 0x11, 0xc6, 0x12,
        ]);
        bus.write(0x0010, 0x03);
        bus.write(0x0011, 0xff);
        bus.write(0x0012, 0x00);

        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.a(), 0x02);
        assert!(cpu.status().carry);

        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.a(), 0x05);
        assert!(!cpu.status().carry);

        execute(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x0010), 0x01);
        assert!(cpu.status().carry);

        execute(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x0010), 0x80);
        assert!(cpu.status().carry);
        assert!(cpu.status().negative);

        execute(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x0011), 0x00);
        assert!(cpu.status().zero);

        execute(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x0012), 0xff);
        assert!(cpu.status().negative);
    }

    #[test]
    fn test_bit() {
        // LDA #$01; BIT $10
        let (mut cpu, mut bus) = boot(&[0xa9, 0x01, 0x24, 0x10]);
        bus.write(0x0010, 0xc0);
        execute(&mut cpu, &mut bus);
        assert_eq!(execute(&mut cpu, &mut bus), 3);
        assert!(cpu.status().zero);
        assert!(cpu.status().overflow);
        assert!(cpu.status().negative);
    }

    #[test]
    fn test_php_plp() {
        // SEC; PHP; CLC; PLP
        let (mut cpu, mut bus) = boot(&[0x38, 0x08, 0x18, 0x28]);
        execute(&mut cpu, &mut bus);
        execute(&mut cpu, &mut bus);
        assert_eq!(bus.read(0x01fd), 0x35);
        execute(&mut cpu, &mut bus);
        assert!(!cpu.status().carry);
        execute(&mut cpu, &mut bus);
        assert!(cpu.status().carry);
    }

    #[test]
    fn test_unknown_opcode_is_free() {
        // $02; SBC #imm alias $EB; INX
        let (mut cpu, mut bus) = boot(&[0x02, 0xeb, 0xe8]);
        assert_eq!(execute(&mut cpu, &mut bus), 0);
        assert_eq!(cpu.pc(), 0x8001);
        assert_eq!(execute(&mut cpu, &mut bus), 0);
        assert_eq!(cpu.pc(), 0x8002);
        execute(&mut cpu, &mut bus);
        assert_eq!(cpu.x(), 1);
    }

    #[test]
    fn test_skip_cycles_stall_steps() {
        // LDA $1234 (4 cycles); INX
        let (mut cpu, mut bus) = boot(&[0xad, 0x34, 0x12, 0xe8]);
        cpu.step(&mut bus);
        for _ in 0..3 {
            cpu.step(&mut bus);
            assert_eq!(cpu.pc(), 0x8003);
        }
        cpu.step(&mut bus);
        assert_eq!(cpu.x(), 1);
        assert_eq!(cpu.cycles(), 5);
    }

    #[test]
    fn test_dma_stall_parity() {
        let (mut cpu, mut bus) = boot(&[0xea, 0xea]);
        cpu.skip_dma_cycles();
        assert_eq!(cpu.pending_cycles(), 513);

        // odd cycle
        cpu.skip_cycles = 0;
        cpu.step(&mut bus);
        cpu.skip_cycles = 0;
        cpu.skip_dma_cycles();
        assert_eq!(cpu.pending_cycles(), 514);
    }

    #[test]
    fn test_deterministic_from_same_state() {
        let program = [0xa2, 0x05, 0xca, 0xd0, 0xfd, 0x4c, 0x00, 0x80];
        let run = || {
            let (mut cpu, mut bus) = boot(&program);
            for _ in 0..200 {
                cpu.step(&mut bus);
            }
            (cpu.pc(), cpu.x(), cpu.cycles(), cpu.pending_cycles())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_trace_line() {
        let (cpu, bus) = boot(&[0x4c, 0xf5, 0xc5]);
        assert_eq!(
            cpu.trace_line(&bus).as_str(),
            "8000  4C F5 C5  A:00 X:00 Y:00 P:24 SP:FD CYC:0"
        );
    }
}
