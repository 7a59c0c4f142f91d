use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use image::{write_buffer_with_format, GrayImage, ImageBuffer, Luma};
use nesemu::cartridge::{Cartridge, CHR_BANK_SIZE};
use nesemu::ppu::{Screen, SharedScreen};
use nesemu::{ines, Console};

fn load_cartridge(rom_path: &Path) -> anyhow::Result<Cartridge> {
    let rom_file = File::open(rom_path)
        .with_context(|| format!("failed to open {}", rom_path.display()))?;

    let cartridge = ines::load(&mut BufReader::new(rom_file))
        .with_context(|| format!("failed to load cartridge {}", rom_path.display()))?;
    Ok(cartridge)
}

fn save_chr_png(rom_path: &Path, png_path: &Path) -> anyhow::Result<()> {
    const TILES_PER_BANK: usize = CHR_BANK_SIZE / 16;

    let cartridge = load_cartridge(rom_path)?;
    if cartridge.chr.is_empty() {
        bail!("{} uses CHR RAM, there are no tiles to dump", rom_path.display());
    }

    let num_tiles = cartridge.chr.len() / 16;
    let tiles_x = 32usize;
    let tiles_y = (num_tiles + tiles_x - 1) / tiles_x;

    let mut img: GrayImage = ImageBuffer::new((1 + tiles_x * 9) as u32, (1 + tiles_y * 9) as u32);

    for (tile_no, tile) in cartridge.chr.chunks_exact(16).enumerate() {
        // 16 bytes per tile
        // planeOne = offset + [0 ... 7]
        // planeTwo = planeOne + 8
        let left_x = 1 + 9 * (tile_no % tiles_x);
        let top_y = 1 + 9 * (tile_no / tiles_x);

        for tile_y in 0..8usize {
            let lo_y = tile[tile_y];
            let hi_y = tile[tile_y + 8];

            for tile_x in 0..8usize {
                let lo_px = (lo_y >> (7 - tile_x)) & 0b1;
                let hi_px = (hi_y >> (7 - tile_x)) & 0b1;
                let px = hi_px << 1 | lo_px;

                img.put_pixel(
                    (left_x + tile_x) as u32,
                    (top_y + tile_y) as u32,
                    Luma([px << 6]),
                );
            }
        }
    }

    let mut png_file = File::create(png_path)
        .with_context(|| format!("failed to create {}", png_path.display()))?;
    write_buffer_with_format(
        &mut png_file,
        &img,
        img.width(),
        img.height(),
        image::ColorType::L8,
        image::ImageOutputFormat::Png,
    )
    .context("failed to save image")?;

    log::info!(
        "dumped {} tiles ({} banks) to {}",
        num_tiles,
        num_tiles / TILES_PER_BANK,
        png_path.display()
    );
    Ok(())
}

fn save_screen_png(screen: &Screen, png_path: &Path) -> anyhow::Result<()> {
    let mut png_file = File::create(png_path)
        .with_context(|| format!("failed to create {}", png_path.display()))?;
    write_buffer_with_format(
        &mut png_file,
        &screen.to_rgba_bytes(),
        Screen::WIDTH as u32,
        Screen::HEIGHT as u32,
        image::ColorType::Rgba8,
        image::ImageOutputFormat::Png,
    )
    .context("failed to save image")?;
    Ok(())
}

fn run_rom(rom_path: &Path, frames: u64, out: Option<&Path>) -> anyhow::Result<()> {
    let screen = SharedScreen::new();
    let mut console = Console::new(load_cartridge(rom_path)?, Box::new(screen.clone()))?;

    for _ in 0..frames {
        console.run_frame();
    }

    log::info!(
        "ran {} frames, {} CPU cycles, PC=${:04X}",
        console.frame(),
        console.cpu().cycles(),
        console.cpu().pc()
    );

    if let Some(png_path) = out {
        screen.with_frame(|frame| save_screen_png(frame, png_path))?;
    }
    Ok(())
}

#[cfg(feature = "display")]
fn play_rom(rom_path: &Path, scaling: u32) -> anyhow::Result<()> {
    use sdl2::event::Event;
    use sdl2::keyboard::Keycode;
    use sdl2::pixels::{Color, PixelFormatEnum};
    use std::time::Duration;

    const WIDTH: u32 = Screen::WIDTH as u32;
    const HEIGHT: u32 = Screen::HEIGHT as u32;
    let frame_duration = Duration::from_secs(1) / 60;
    let sdl_err = |e: String| anyhow::anyhow!(e);

    let screen = SharedScreen::new();
    let mut console = Console::new(load_cartridge(rom_path)?, Box::new(screen.clone()))?;

    let sdl_context = sdl2::init().map_err(sdl_err)?;
    let video_subsystem = sdl_context.video().map_err(sdl_err)?;

    let window = video_subsystem
        .window("nesemu", WIDTH * scaling, HEIGHT * scaling)
        .position_centered()
        .build()
        .context("could not initialize video subsystem")?;

    let mut canvas = window
        .into_canvas()
        .build()
        .context("could not make a canvas")?;

    canvas.set_draw_color(Color::RGB(0, 0, 0));
    canvas.clear();
    canvas.present();

    let mut event_pump = sdl_context.event_pump().map_err(sdl_err)?;

    let creator = canvas.texture_creator();
    // packed 0xRRGGBBAA, same as the screen
    let mut texture = creator
        .create_texture_streaming(PixelFormatEnum::RGBA8888, WIDTH, HEIGHT)
        .context("could not make a texture")?;

    let mut raw_texture = vec![0u8; (WIDTH * HEIGHT * 4) as usize];

    'run_loop: loop {
        let pre_draw = std::time::Instant::now();
        for event in event_pump.poll_iter() {
            if let Event::Quit { .. }
            | Event::KeyDown {
                keycode: Some(Keycode::Escape),
                ..
            } = event
            {
                break 'run_loop;
            }
        }

        console.run_frame();

        screen.with_frame(|frame| {
            for (dst, px) in raw_texture.chunks_exact_mut(4).zip(frame.pixels()) {
                dst.copy_from_slice(&px.to_ne_bytes());
            }
        });

        canvas.clear();
        texture
            .update(None, &raw_texture, (WIDTH * 4) as usize)
            .context("could not update texture")?;
        canvas.copy(&texture, None, None).map_err(sdl_err)?;
        canvas.present();

        // sleep for 1/60th of a second
        let elapsed = pre_draw.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    Ok(())
}

#[derive(clap::Parser)]
#[command(version, about = "NES emulator")]
enum CLI {
    /// Run a ROM without a window
    Run {
        #[arg(short, long)]
        rom: PathBuf,
        #[arg(short, long, default_value_t = 60)]
        frames: u64,
        /// Write the last frame here as PNG
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Render every CHR tile of a ROM into a PNG
    ChrDump {
        #[arg(long)]
        rom: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run a ROM in a window
    #[cfg(feature = "display")]
    Play {
        #[arg(short, long)]
        rom: PathBuf,
        #[arg(short, long, default_value_t = 2)]
        scale: u32,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = CLI::parse();

    match args {
        CLI::Run { rom, frames, out } => run_rom(&rom, frames, out.as_deref()),
        CLI::ChrDump { rom, out } => save_chr_png(&rom, &out),
        #[cfg(feature = "display")]
        CLI::Play { rom, scale } => play_rom(&rom, scale),
    }
}
