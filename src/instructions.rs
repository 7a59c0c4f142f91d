#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    IRQ,
    NMI,
    BRK,
}

pub const NMI_VECTOR: u16 = 0xfffa;
pub const RESET_VECTOR: u16 = 0xfffc;
pub const IRQ_VECTOR: u16 = 0xfffe;

/// Base cycle count of each official opcode. Zero marks an opcode the CPU
/// does not implement.
#[rustfmt::skip]
pub const OPERATION_CYCLES: [u8; 0x100] = [
    7, 6, 0, 0, 0, 3, 5, 0, 3, 2, 2, 0, 0, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
    6, 6, 0, 0, 3, 3, 5, 0, 4, 2, 2, 0, 4, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
    6, 6, 0, 0, 0, 3, 5, 0, 3, 2, 2, 0, 3, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
    6, 6, 0, 0, 0, 3, 5, 0, 4, 2, 2, 0, 5, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
    0, 6, 0, 0, 3, 3, 3, 0, 2, 0, 2, 0, 4, 4, 4, 0,
    2, 6, 0, 0, 4, 4, 4, 0, 2, 5, 2, 0, 0, 5, 0, 0,
    2, 6, 2, 0, 3, 3, 3, 0, 2, 2, 2, 0, 4, 4, 4, 0,
    2, 5, 0, 0, 4, 4, 4, 0, 2, 4, 2, 0, 4, 4, 4, 0,
    2, 6, 0, 0, 3, 3, 5, 0, 2, 2, 2, 0, 4, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
    2, 6, 0, 0, 3, 3, 5, 0, 2, 2, 2, 0, 4, 4, 6, 0,
    2, 5, 0, 0, 0, 4, 6, 0, 2, 4, 0, 0, 0, 4, 7, 0,
];

// bits 5..7 of a group-one (xxx xxx 01) opcode
pub mod group_one {
    pub const ORA: u8 = 0;
    pub const AND: u8 = 1;
    pub const EOR: u8 = 2;
    pub const ADC: u8 = 3;
    pub const STA: u8 = 4;
    pub const LDA: u8 = 5;
    pub const CMP: u8 = 6;
    pub const SBC: u8 = 7;
}

// bits 5..7 of a group-two (xxx xxx 10) opcode
pub mod group_two {
    pub const ASL: u8 = 0;
    pub const ROL: u8 = 1;
    pub const LSR: u8 = 2;
    pub const ROR: u8 = 3;
    pub const STX: u8 = 4;
    pub const LDX: u8 = 5;
    pub const DEC: u8 = 6;
    pub const INC: u8 = 7;
}

// bits 5..7 of a group-zero (xxx xxx 00) opcode
pub mod group_zero {
    pub const BIT: u8 = 1;
    pub const STY: u8 = 4;
    pub const LDY: u8 = 5;
    pub const CPY: u8 = 6;
    pub const CPX: u8 = 7;
}

// bits 2..4 of a group-one opcode
pub mod group_one_mode {
    pub const INDEXED_INDIRECT: u8 = 0;
    pub const ZERO_PAGE: u8 = 1;
    pub const IMMEDIATE: u8 = 2;
    pub const ABSOLUTE: u8 = 3;
    pub const INDIRECT_INDEXED: u8 = 4;
    pub const ZERO_PAGE_X: u8 = 5;
    pub const ABSOLUTE_Y: u8 = 6;
    pub const ABSOLUTE_X: u8 = 7;
}

// bits 2..4 of group-two and group-zero opcodes
pub mod group_two_mode {
    pub const IMMEDIATE: u8 = 0;
    pub const ZERO_PAGE: u8 = 1;
    pub const ACCUMULATOR: u8 = 2;
    pub const ABSOLUTE: u8 = 3;
    pub const ZERO_PAGE_INDEXED: u8 = 5;
    pub const ABSOLUTE_INDEXED: u8 = 7;
}

// bits 6..7 of a branch opcode (xxy 100 00)
pub mod branch_flag {
    pub const NEGATIVE: u8 = 0;
    pub const OVERFLOW: u8 = 1;
    pub const CARRY: u8 = 2;
    pub const ZERO: u8 = 3;
}
