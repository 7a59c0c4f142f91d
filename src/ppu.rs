use std::cell::{Cell, RefCell};
use std::rc::Rc;

use arrayvec::ArrayVec;

use crate::picture_bus::PictureBus;

pub const SCANLINE_END_CYCLE: u16 = 340;
pub const VISIBLE_SCANLINES: u16 = 240;
pub const SCANLINE_VISIBLE_DOTS: u16 = 256;
pub const PRE_RENDER_SCANLINE: u16 = 261;
pub const VBLANK_SCANLINE: u16 = 241;

const PALETTE_RGB: [u32; 64] = [
    0x666666, 0x002A88, 0x1412A7, 0x3B00A4, 0x5C007E, 0x6E0040, 0x6C0600, 0x561D00, 0x333500,
    0x0B4800, 0x005200, 0x004F08, 0x00404D, 0x000000, 0x000000, 0x000000, 0xADADAD, 0x155FD9,
    0x4240FF, 0x7527FE, 0xA01ACC, 0xB71E7B, 0xB53120, 0x994E00, 0x6B6D00, 0x388700, 0x0C9300,
    0x008F32, 0x007C8D, 0x000000, 0x000000, 0x000000, 0xFFFEFF, 0x64B0FF, 0x9290FF, 0xC676FF,
    0xF36AFF, 0xFE6ECC, 0xFE8170, 0xEA9E22, 0xBCBE00, 0x88D800, 0x5CE430, 0x45E082, 0x48CDDE,
    0x4F4F4F, 0x000000, 0x000000, 0xFFFEFF, 0xC0DFFF, 0xD3D2FF, 0xE8C8FF, 0xFBC2FF, 0xFEC4EA,
    0xFECCC5, 0xF7D8A5, 0xE4E594, 0xCFEF96, 0xBDF4AB, 0xB3F3CC, 0xB5EBF2, 0xB8B8B8, 0x000000,
    0x000000,
];

const fn opaque(rgb: [u32; 64]) -> [u32; 64] {
    let mut rgba = [0; 64];
    let mut i = 0;
    while i < 64 {
        rgba[i] = rgb[i] << 8 | 0xff;
        i += 1;
    }
    rgba
}

/// 6-bit PPU colour index to packed `0xRRGGBBAA`.
pub static PALETTE: [u32; 64] = opaque(PALETTE_RGB);

#[derive(Clone, Copy, Debug, Default)]
struct PPUControl {
    base_nametable: u8, // two bits
    vram_increment: bool,
    sprite_pattern_table: bool,
    background_pattern_table: bool,
    tall_sprites: bool,
    enable_nmi: bool,
}

impl From<u8> for PPUControl {
    fn from(raw: u8) -> Self {
        PPUControl {
            base_nametable: raw & 0b11,
            vram_increment: (raw & 0b100) != 0,
            sprite_pattern_table: (raw & 0b1000) != 0,
            background_pattern_table: (raw & 0b0001_0000) != 0,
            tall_sprites: (raw & 0b0010_0000) != 0,
            enable_nmi: (raw & 0b1000_0000) != 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PPUMask {
    greyscale: bool,
    show_background_left8: bool,
    show_sprites_left8: bool,
    show_background: bool,
    show_sprites: bool,
}

impl From<u8> for PPUMask {
    fn from(raw: u8) -> Self {
        PPUMask {
            greyscale: (raw & 0b1) != 0,
            show_background_left8: (raw & 0b10) != 0,
            show_sprites_left8: (raw & 0b100) != 0,
            show_background: (raw & 0b1000) != 0,
            show_sprites: (raw & 0b0001_0000) != 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct VRAMAddress {
    coarse_x: u8,  //  0 ...  4
    coarse_y: u8,  //  5 ...  9
    nametable: u8, // 10 ... 11
    fine_y: u8,    // 12 ... 14
}

impl VRAMAddress {
    fn increment_x(&mut self) {
        // https://www.nesdev.org/wiki/PPU_scrolling#X_increment
        if self.coarse_x < 31 {
            self.coarse_x += 1;
        } else {
            self.nametable ^= 0b01;
            self.coarse_x = 0;
        }
    }

    fn increment_y(&mut self) {
        // https://www.nesdev.org/wiki/PPU_scrolling#Y_increment
        if self.fine_y < 7 {
            self.fine_y += 1;
            return;
        }

        self.fine_y = 0;
        match self.coarse_y {
            29 => {
                self.coarse_y = 0;
                self.nametable ^= 0b10;
            }
            // attribute rows: wrap without switching name table
            31 => self.coarse_y = 0,
            _ => self.coarse_y += 1,
        }
    }

    fn copy_x(&mut self, other: &VRAMAddress) {
        self.coarse_x = other.coarse_x;
        self.nametable = (self.nametable & 0b10) | (other.nametable & 0b01);
    }

    fn copy_y(&mut self, other: &VRAMAddress) {
        self.coarse_y = other.coarse_y;
        self.fine_y = other.fine_y;
        self.nametable = (self.nametable & 0b01) | (other.nametable & 0b10);
    }
}

impl From<VRAMAddress> for u16 {
    fn from(v: VRAMAddress) -> u16 {
        (v.coarse_x as u16)
            | ((v.coarse_y as u16) << 5)
            | ((v.nametable as u16) << 10)
            | ((v.fine_y as u16) << 12)
    }
}

impl From<u16> for VRAMAddress {
    fn from(raw: u16) -> Self {
        VRAMAddress {
            coarse_x: (raw & 0x1f) as u8,
            coarse_y: ((raw >> 5) & 0x1f) as u8,
            nametable: ((raw >> 10) & 0b11) as u8,
            fine_y: ((raw >> 12) & 0b111) as u8,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct ParsedSprite {
    top_y: u8,
    tile_index: u8,
    palette: u8, // two bits
    behind_background: bool,
    flip_horizontal: bool,
    flip_vertical: bool,
    left_x: u8,
}

impl From<&[u8]> for ParsedSprite {
    fn from(raw_sprite: &[u8]) -> Self {
        ParsedSprite {
            top_y: raw_sprite[0],
            tile_index: raw_sprite[1],
            palette: raw_sprite[2] & 0b11,
            behind_background: (raw_sprite[2] & 0b0010_0000) != 0,
            flip_horizontal: (raw_sprite[2] & 0b0100_0000) != 0,
            flip_vertical: (raw_sprite[2] & 0b1000_0000) != 0,
            left_x: raw_sprite[3],
        }
    }
}

/// One finished frame: 256x240 packed RGBA8 (`0xRRGGBBAA`), row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Screen {
    pixels: Vec<u32>,
}

impl Screen {
    pub const WIDTH: usize = 256;
    pub const HEIGHT: usize = 240;

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * Screen::WIDTH + x]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Byte order R, G, B, A per pixel.
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|px| px.to_be_bytes()).collect()
    }

    fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        self.pixels[y * Screen::WIDTH + x] = color;
    }
}

impl Default for Screen {
    fn default() -> Self {
        Screen {
            pixels: vec![PALETTE[0x0f]; Screen::WIDTH * Screen::HEIGHT],
        }
    }
}

/// Receives every completed frame.
pub trait PixelSink {
    fn present(&mut self, screen: &Screen);
}

impl<F: FnMut(&Screen)> PixelSink for F {
    fn present(&mut self, screen: &Screen) {
        self(screen)
    }
}

/// Keeps the most recent frame around for whoever holds a clone.
#[derive(Clone, Default)]
pub struct SharedScreen {
    latest: Rc<RefCell<Screen>>,
    presented: Rc<Cell<u64>>,
}

impl SharedScreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented.get()
    }

    pub fn snapshot(&self) -> Screen {
        self.latest.borrow().clone()
    }

    pub fn with_frame<R>(&self, f: impl FnOnce(&Screen) -> R) -> R {
        f(&self.latest.borrow())
    }
}

impl PixelSink for SharedScreen {
    fn present(&mut self, screen: &Screen) {
        self.latest.borrow_mut().clone_from(screen);
        self.presented.set(self.presented.get() + 1);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    PreRender,
    Render,
    PostRender,
    VerticalBlank,
}

pub struct PPU {
    bus: PictureBus,
    sink: Box<dyn PixelSink>,
    interrupt_callback: Option<Box<dyn FnMut()>>,
    screen: Screen,

    oam: [u8; 256],
    oam_addr: u8,
    // OAM indices of the sprites on the line being drawn
    scanline_sprites: ArrayVec<u8, 8>,

    state: PipelineState,
    cycle: u16,
    scanline: u16,
    even_frame: bool,
    frame: u64,

    vblank: bool,
    sprite_zero_hit: bool,
    sprite_overflow: bool,

    v: u16,
    t: u16,
    fine_x: u8,
    write_toggle: bool,
    data_buffer: u8,

    control: PPUControl,
    mask: PPUMask,
}

impl PPU {
    pub fn new(bus: PictureBus, sink: Box<dyn PixelSink>) -> Self {
        let mut ppu = PPU {
            bus,
            sink,
            interrupt_callback: None,
            screen: Screen::default(),
            oam: [0; 256],
            oam_addr: 0,
            scanline_sprites: ArrayVec::new(),
            state: PipelineState::PreRender,
            cycle: 0,
            scanline: PRE_RENDER_SCANLINE,
            even_frame: true,
            frame: 0,
            vblank: false,
            sprite_zero_hit: false,
            sprite_overflow: false,
            v: 0,
            t: 0,
            fine_x: 0,
            write_toggle: false,
            data_buffer: 0,
            control: PPUControl::default(),
            mask: PPUMask::default(),
        };
        ppu.reset();
        ppu
    }

    /// Power-up state: rendering off, at dot 0 of the pre-render line.
    pub fn reset(&mut self) {
        self.control = PPUControl::default();
        self.mask = PPUMask::default();
        self.vblank = false;
        self.sprite_zero_hit = false;
        self.sprite_overflow = false;
        self.even_frame = true;
        self.write_toggle = false;
        self.v = 0;
        self.t = 0;
        self.fine_x = 0;
        self.data_buffer = 0;
        self.oam_addr = 0;
        self.cycle = 0;
        self.scanline = PRE_RENDER_SCANLINE;
        self.state = PipelineState::PreRender;
        self.scanline_sprites.clear();
    }

    /// Invoked when vblank starts with NMI generation enabled.
    pub fn set_interrupt_callback<F: FnMut() + 'static>(&mut self, callback: F) {
        self.interrupt_callback = Some(Box::new(callback));
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn cycle(&self) -> u16 {
        self.cycle
    }

    /// Frames presented since power-up.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn in_vblank(&self) -> bool {
        self.vblank
    }

    pub fn oam(&self) -> &[u8; 256] {
        &self.oam
    }

    pub fn picture_bus(&self) -> &PictureBus {
        &self.bus
    }

    fn rendering_enabled(&self) -> bool {
        self.mask.show_background || self.mask.show_sprites
    }

    fn sprite_height(&self) -> u16 {
        if self.control.tall_sprites {
            16
        } else {
            8
        }
    }

    /// Advance by one dot.
    pub fn step(&mut self) {
        // odd frames drop the last dot of the pre-render line
        let end_cycle = if self.state == PipelineState::PreRender
            && !self.even_frame
            && self.rendering_enabled()
        {
            SCANLINE_END_CYCLE - 1
        } else {
            SCANLINE_END_CYCLE
        };

        match self.state {
            PipelineState::PreRender => self.step_pre_render(),
            PipelineState::Render => self.step_render(),
            PipelineState::PostRender => {}
            PipelineState::VerticalBlank => self.step_vblank(),
        }

        if self.cycle >= end_cycle {
            self.cycle = 0;
            self.end_scanline();
        } else {
            self.cycle += 1;
        }
    }

    fn end_scanline(&mut self) {
        match self.state {
            PipelineState::PreRender => {
                self.state = PipelineState::Render;
                self.scanline = 0;
            }
            PipelineState::Render => {
                self.evaluate_sprites();
                self.scanline += 1;
                if self.scanline >= VISIBLE_SCANLINES {
                    self.state = PipelineState::PostRender;
                }
            }
            PipelineState::PostRender => {
                self.sink.present(&self.screen);
                self.frame += 1;
                self.scanline += 1;
                self.state = PipelineState::VerticalBlank;
            }
            PipelineState::VerticalBlank => {
                self.scanline += 1;
                if self.scanline >= PRE_RENDER_SCANLINE {
                    self.state = PipelineState::PreRender;
                    self.even_frame = !self.even_frame;
                }
            }
        }
    }

    fn step_pre_render(&mut self) {
        if self.cycle == 1 {
            self.vblank = false;
            self.sprite_zero_hit = false;
            self.sprite_overflow = false;
            // nothing is evaluated for line 0
            self.scanline_sprites.clear();
        }

        if !self.rendering_enabled() {
            return;
        }

        match self.cycle {
            257 => self.copy_x(),
            260 => self.bus.scanline_irq(),
            // https://www.nesdev.org/wiki/PPU_scrolling#During_dots_280_to_304_of_the_pre-render_scanline_(end_of_vblank)
            281..=304 => {
                let mut v = VRAMAddress::from(self.v);
                v.copy_y(&self.t.into());
                self.v = v.into();
            }
            _ => {}
        }
    }

    fn step_render(&mut self) {
        match self.cycle {
            1..=SCANLINE_VISIBLE_DOTS => {
                self.render_pixel();
                if self.cycle == SCANLINE_VISIBLE_DOTS && self.rendering_enabled() {
                    let mut v = VRAMAddress::from(self.v);
                    v.increment_y();
                    self.v = v.into();
                }
            }
            257 if self.rendering_enabled() => self.copy_x(),
            260 if self.rendering_enabled() => self.bus.scanline_irq(),
            _ => {}
        }
    }

    fn step_vblank(&mut self) {
        if self.scanline == VBLANK_SCANLINE && self.cycle == 1 {
            self.vblank = true;
            if self.control.enable_nmi {
                self.raise_interrupt();
            }
        }
    }

    fn raise_interrupt(&mut self) {
        if let Some(callback) = &mut self.interrupt_callback {
            callback();
        }
    }

    fn copy_x(&mut self) {
        // https://www.nesdev.org/wiki/PPU_scrolling#At_dot_257_of_each_scanline
        let mut v = VRAMAddress::from(self.v);
        v.copy_x(&self.t.into());
        self.v = v.into();
    }

    fn render_pixel(&mut self) {
        let x = self.cycle - 1;
        let y = self.scanline;

        let (bg_color, bg_opaque) = self.background_pixel(x);
        let sprite = self.sprite_pixel(x, y);

        if let Some((_, is_sprite_zero, _)) = sprite {
            // https://www.nesdev.org/wiki/PPU_OAM#Sprite_zero_hits
            if is_sprite_zero && bg_opaque && self.mask.show_background && x != 255 {
                self.sprite_zero_hit = true;
            }
        }

        let palette_addr = match sprite {
            Some((color, _, in_front)) if !bg_opaque || in_front => color,
            _ if bg_opaque => bg_color,
            _ => 0,
        };

        let mut color = self.bus.read_palette(palette_addr) & 0x3f;
        if self.mask.greyscale {
            color &= 0x30;
        }

        self.screen
            .set_pixel(x as usize, y as usize, PALETTE[color as usize]);
    }

    /// Background palette address for dot `x` and whether it is opaque.
    fn background_pixel(&mut self, x: u16) -> (u8, bool) {
        let fine_x = ((self.fine_x as u16 + x) % 8) as u8;
        let mut color = 0;

        if self.mask.show_background && (self.mask.show_background_left8 || x >= 8) {
            // https://www.nesdev.org/wiki/PPU_scrolling#Tile_and_attribute_fetching
            let tile = self.bus.read(0x2000 | (self.v & 0x0fff)) as u16;
            let fine_y = VRAMAddress::from(self.v).fine_y as u16;
            let pattern_table = (self.control.background_pattern_table as u16) << 12;
            let pattern_addr = pattern_table | tile << 4 | fine_y;

            let shift = 7 ^ fine_x;
            color = (self.bus.read(pattern_addr) >> shift) & 1;
            color |= ((self.bus.read(pattern_addr + 8) >> shift) & 1) << 1;

            if color != 0 {
                let attr_addr = 0x23c0
                    | (self.v & 0x0c00)
                    | ((self.v >> 4) & 0x38)
                    | ((self.v >> 2) & 0x07);
                let attr_shift = ((self.v >> 4) & 4) | (self.v & 2);
                let attribute = self.bus.read(attr_addr);
                color |= ((attribute >> attr_shift) & 0b11) << 2;
            }
        }

        if fine_x == 7 && self.rendering_enabled() {
            let mut v = VRAMAddress::from(self.v);
            v.increment_x();
            self.v = v.into();
        }

        (color, color != 0)
    }

    /// First opaque sprite pixel at (`x`, `y`): palette address, whether it
    /// is sprite zero, and whether it draws in front of the background.
    fn sprite_pixel(&self, x: u16, y: u16) -> Option<(u8, bool, bool)> {
        if !self.mask.show_sprites || (!self.mask.show_sprites_left8 && x < 8) {
            return None;
        }

        let height = self.sprite_height();

        for &index in &self.scanline_sprites {
            let offset = index as usize * 4;
            let sprite = ParsedSprite::from(&self.oam[offset..offset + 4]);

            let left = sprite.left_x as u16;
            if x < left || x >= left + 8 {
                continue;
            }

            // OAM holds the line above the sprite's first line
            let top = sprite.top_y as u16 + 1;
            let mut row = y.wrapping_sub(top) % height;
            let mut column = ((x - left) % 8) as u8;

            if !sprite.flip_horizontal {
                column ^= 7;
            }
            if sprite.flip_vertical {
                row ^= height - 1;
            }

            let addr = if self.control.tall_sprites {
                // https://www.nesdev.org/wiki/PPU_OAM#Byte_1
                let bank = (sprite.tile_index as u16 & 1) << 12;
                let tile = (sprite.tile_index as u16 & !1) << 4;
                bank | tile | (row & 7) | ((row & 8) << 1)
            } else {
                let bank = (self.control.sprite_pattern_table as u16) << 12;
                bank | (sprite.tile_index as u16) << 4 | row
            };

            let mut color = (self.bus.read(addr) >> column) & 1;
            color |= ((self.bus.read(addr + 8) >> column) & 1) << 1;

            if color == 0 {
                continue;
            }

            color |= 0x10 | sprite.palette << 2;
            return Some((color, index == 0, !sprite.behind_background));
        }

        None
    }

    /// Select the sprites for the next line.
    fn evaluate_sprites(&mut self) {
        let height = self.sprite_height() as i32;
        self.scanline_sprites.clear();

        for index in 0..64u8 {
            let diff = self.scanline as i32 - self.oam[index as usize * 4] as i32;
            if (0..height).contains(&diff) && self.scanline_sprites.try_push(index).is_err() {
                self.sprite_overflow = true;
                break;
            }
        }
    }

    // Register surface

    /// PPUCTRL ($2000)
    pub fn write_control(&mut self, data: u8) {
        let previous = self.control;
        self.control = PPUControl::from(data);

        // t: ...GH.. ........ <- d: ......GH
        let mut t = VRAMAddress::from(self.t);
        t.nametable = self.control.base_nametable;
        self.t = t.into();

        // https://www.nesdev.org/wiki/NMI
        if self.vblank && !previous.enable_nmi && self.control.enable_nmi {
            self.raise_interrupt();
        }
    }

    /// PPUMASK ($2001)
    pub fn write_mask(&mut self, data: u8) {
        self.mask = PPUMask::from(data);
    }

    /// PPUSTATUS ($2002). Clears vblank and the write toggle.
    pub fn read_status(&mut self) -> u8 {
        let status = (self.sprite_overflow as u8) << 5
            | (self.sprite_zero_hit as u8) << 6
            | (self.vblank as u8) << 7;

        self.vblank = false;
        self.write_toggle = false;

        status
    }

    /// OAMADDR ($2003)
    pub fn write_oam_address(&mut self, addr: u8) {
        self.oam_addr = addr;
    }

    /// OAMDATA ($2004)
    pub fn read_oam_data(&self) -> u8 {
        self.oam[self.oam_addr as usize]
    }

    /// OAMDATA ($2004)
    pub fn write_oam_data(&mut self, data: u8) {
        self.oam[self.oam_addr as usize] = data;
        self.oam_addr = self.oam_addr.wrapping_add(1);
    }

    /// PPUSCROLL ($2005)
    pub fn write_scroll(&mut self, data: u8) {
        let mut t = VRAMAddress::from(self.t);
        if !self.write_toggle {
            // t: ....... ...ABCDE <- d: ABCDE...
            // x:              FGH <- d: .....FGH
            t.coarse_x = data >> 3;
            self.fine_x = data & 0b111;
        } else {
            // t: FGH..AB CDE..... <- d: ABCDEFGH
            t.coarse_y = data >> 3;
            t.fine_y = data & 0b111;
        }
        self.t = t.into();
        self.write_toggle = !self.write_toggle;
    }

    /// PPUADDR ($2006)
    pub fn write_data_address(&mut self, data: u8) {
        if !self.write_toggle {
            // t: .CDEFGH ........ <- d: ..CDEFGH
            // t: Z...... ........ <- 0
            self.t = (self.t & 0x00ff) | ((data as u16 & 0x3f) << 8);
        } else {
            // t: ....... ABCDEFGH <- d: ABCDEFGH
            // v: <...all bits...> <- t: <...all bits...>
            self.t = (self.t & 0xff00) | data as u16;
            self.v = self.t;
        }
        self.write_toggle = !self.write_toggle;
    }

    /// PPUDATA ($2007). Below the palette the value lags one read behind.
    pub fn read_data(&mut self) -> u8 {
        let addr = self.v & 0x3fff;
        self.increment_data_address();

        let data = self.bus.read(addr);
        if addr < 0x3f00 {
            std::mem::replace(&mut self.data_buffer, data)
        } else {
            // the buffer picks up the name table byte under the palette
            self.data_buffer = self.bus.read(addr - 0x1000);
            data
        }
    }

    /// PPUDATA ($2007)
    pub fn write_data(&mut self, data: u8) {
        let addr = self.v & 0x3fff;
        self.bus.write(addr, data);
        self.increment_data_address();
    }

    fn increment_data_address(&mut self) {
        let increment = if self.control.vram_increment { 32 } else { 1 };
        self.v = self.v.wrapping_add(increment) & 0x7fff;
    }

    /// OAMDMA ($4014): copy a CPU page into OAM, starting at OAMADDR and wrapping.
    pub fn do_dma(&mut self, page: &[u8; 256]) {
        let start = self.oam_addr as usize;
        let (before, after) = page.split_at(page.len() - start);
        self.oam[start..].copy_from_slice(before);
        self.oam[..start].copy_from_slice(after);
    }
}
