//! Seam between the encoder and whatever turns a byte stream into a grid of
//! styled cells. The production implementation wraps the `vt100` parser; the
//! encoder itself only talks to the [`Emulator`] trait.

use container::{Cell, CellStyle, Color, FrameContent, GridSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmulatedColor {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// One raw cell as reported by the emulator, before any normalization.
#[derive(Debug, Clone, Default)]
pub struct EmulatedCell {
    pub chars: String,
    pub fg: EmulatedColor,
    pub bg: EmulatedColor,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
}

pub trait Emulator {
    fn feed(&mut self, bytes: &[u8]);

    /// Bytes the emulator wants sent back to the application (cursor
    /// position reports and the like). Must be drained after every feed.
    fn drain_responses(&mut self) -> Vec<u8>;

    fn cell(&self, row: u32, col: u32) -> EmulatedCell;

    fn resize(&mut self, size: GridSize);

    fn size(&self) -> GridSize;
}

pub struct Vt100Emulator {
    parser: vt100::Parser,
    size: GridSize,
}

impl Vt100Emulator {
    pub fn new(size: GridSize) -> Vt100Emulator {
        Vt100Emulator {
            parser: vt100::Parser::new(size.rows as u16, size.cols as u16, 0),
            size,
        }
    }
}

fn convert_color(color: vt100::Color) -> EmulatedColor {
    match color {
        vt100::Color::Default => EmulatedColor::Default,
        vt100::Color::Idx(i) => EmulatedColor::Indexed(i),
        vt100::Color::Rgb(r, g, b) => EmulatedColor::Rgb(r, g, b),
    }
}

impl Emulator for Vt100Emulator {
    fn feed(&mut self, bytes: &[u8]) {
        self.parser.process(bytes);
    }

    fn drain_responses(&mut self) -> Vec<u8> {
        // vt100 never answers queries on its own; nothing to drain.
        Vec::new()
    }

    fn cell(&self, row: u32, col: u32) -> EmulatedCell {
        match self.parser.screen().cell(row as u16, col as u16) {
            Some(cell) => EmulatedCell {
                chars: cell.contents().to_string(),
                fg: convert_color(cell.fgcolor()),
                bg: convert_color(cell.bgcolor()),
                bold: cell.bold(),
                italic: cell.italic(),
                underline: cell.underline(),
                blink: false,
                reverse: cell.inverse(),
            },
            None => EmulatedCell::default(),
        }
    }

    fn resize(&mut self, size: GridSize) {
        self.parser.set_size(size.rows as u16, size.cols as u16);
        self.size = size;
    }

    fn size(&self) -> GridSize {
        self.size
    }
}

/// Colors a cell renders with when the application never picked any, plus
/// the 256-entry lookup used to resolve indexed colors at encode time.
pub struct StagePalette {
    pub fg: (u8, u8, u8),
    pub bg: (u8, u8, u8),
    pub colors: [(u8, u8, u8); 256],
}

fn split_rgb(packed: u32) -> (u8, u8, u8) {
    ((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
}

impl StagePalette {
    /// The stage the reference recordings were made on: Solarized defaults
    /// and ANSI colors, xterm cube and grayscale above 15.
    pub fn solarized() -> StagePalette {
        const ANSI: [u32; 16] = [
            0x073642, 0xDC322F, 0x859900, 0xB58900, 0x268BD2, 0xD33682, 0x2AA198, 0xEEE8D5,
            0x002B36, 0xCB4B16, 0x586E75, 0x657B83, 0x839496, 0x6C71C4, 0x93A1A1, 0xFDF6E3,
        ];

        let mut colors = [(0u8, 0u8, 0u8); 256];
        for (i, packed) in ANSI.iter().enumerate() {
            colors[i] = split_rgb(*packed);
        }
        const CUBE: [u8; 6] = [0, 95, 135, 175, 215, 255];
        for i in 16..232 {
            let v = i - 16;
            colors[i] = (CUBE[v / 36], CUBE[(v % 36) / 6], CUBE[v % 6]);
        }
        for i in 232..256 {
            let v = (8 + 10 * (i - 232)) as u8;
            colors[i] = (v, v, v);
        }

        StagePalette {
            fg: split_rgb(0x657B83),
            bg: split_rgb(0xFDF6E3),
            colors,
        }
    }

    fn resolve(&self, color: EmulatedColor, default: (u8, u8, u8)) -> Color {
        let (r, g, b) = match color {
            EmulatedColor::Default => default,
            EmulatedColor::Indexed(i) => self.colors[i as usize],
            EmulatedColor::Rgb(r, g, b) => (r, g, b),
        };
        Color::Rgb(r, g, b)
    }

    /// Normalizes a raw emulator cell into the encoded model: trailing NULs
    /// trimmed, empty chars become a space, italic/blink fold into bold, and
    /// reverse video is resolved by swapping the colors.
    pub fn sample(&self, raw: EmulatedCell) -> Cell {
        let mut chars = raw.chars;
        while chars.ends_with('\0') {
            chars.pop();
        }
        if chars.is_empty() {
            chars.push(' ');
        }

        let mut fg = self.resolve(raw.fg, self.fg);
        let mut bg = self.resolve(raw.bg, self.bg);
        if raw.reverse {
            std::mem::swap(&mut fg, &mut bg);
        }

        Cell {
            chars,
            style: CellStyle {
                fg,
                bg,
                bold: raw.bold || raw.italic || raw.blink,
                underline: raw.underline,
            },
        }
    }
}

/// Reads every cell of the emulator's grid into a frame.
pub fn sample_content(
    emulator: &impl Emulator,
    size: GridSize,
    stage: &StagePalette,
) -> FrameContent {
    let mut cells = Vec::with_capacity(size.cell_count());
    for row in 0..size.rows {
        for col in 0..size.cols {
            cells.push(stage.sample(emulator.cell(row, col)));
        }
    }
    FrameContent { cells }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_text_lands_in_cells() {
        let size = GridSize::new(1, 2);
        let mut emu = Vt100Emulator::new(size);
        emu.feed(b"A");
        emu.drain_responses();
        let content = sample_content(&emu, size, &StagePalette::solarized());
        assert_eq!(content.cells[0].chars, "A");
        assert_eq!(content.cells[1].chars, " ");
    }

    #[test]
    fn bold_red_resolves_through_the_stage_palette() {
        let size = GridSize::new(1, 1);
        let mut emu = Vt100Emulator::new(size);
        emu.feed(b"\x1b[1;31mX\x1b[0m");
        emu.drain_responses();
        let cell = &sample_content(&emu, size, &StagePalette::solarized()).cells[0];
        assert_eq!(cell.chars, "X");
        assert!(cell.style.bold);
        assert!(!cell.style.underline);
        let Color::Rgb(r, g, _) = cell.style.fg else {
            panic!("expected an RGB foreground, got {:?}", cell.style.fg);
        };
        assert!(r > g, "red channel should dominate, got r={r} g={g}");
    }

    #[test]
    fn reverse_video_swaps_at_sample_time() {
        let size = GridSize::new(1, 1);
        let mut emu = Vt100Emulator::new(size);
        emu.feed(b"\x1b[7mZ");
        emu.drain_responses();
        let stage = StagePalette::solarized();
        let cell = &sample_content(&emu, size, &stage).cells[0];
        assert_eq!(cell.style.fg, Color::Rgb(stage.bg.0, stage.bg.1, stage.bg.2));
        assert_eq!(cell.style.bg, Color::Rgb(stage.fg.0, stage.fg.1, stage.fg.2));
    }

    #[test]
    fn trailing_nuls_are_trimmed() {
        let stage = StagePalette::solarized();
        let cell = stage.sample(EmulatedCell {
            chars: "e\u{301}\0".to_string(),
            ..EmulatedCell::default()
        });
        assert_eq!(cell.chars, "e\u{301}");

        let blank = stage.sample(EmulatedCell::default());
        assert_eq!(blank.chars, " ");
    }

    #[test]
    fn xterm_cube_formula() {
        let stage = StagePalette::solarized();
        assert_eq!(stage.colors[16], (0, 0, 0));
        assert_eq!(stage.colors[21], (0, 0, 255));
        assert_eq!(stage.colors[196], (255, 0, 0));
        assert_eq!(stage.colors[231], (255, 255, 255));
        assert_eq!(stage.colors[232], (8, 8, 8));
        assert_eq!(stage.colors[255], (238, 238, 238));
    }
}
