//! Cell styling and the packed 64-bit attribute code.
//!
//! Layout, MSB to LSB:
//!
//! ```text
//!    7  6  5  4  3  2  1  0
//! 0x FF RR GG BB rr gg bb bu
//!       |---fg---|---bg---|fontattr
//! ```
//!
//! Byte 7 carries the color-kind flags (bit 7: bg indexed, bit 6: fg
//! indexed); byte 4 and byte 1 double as palette indices when the matching
//! flag is set.

pub const ATTR_BOLD: u64 = 1;
pub const ATTR_UNDERLINE: u64 = 1 << 1;
pub const ATTR_FG_INDEXED: u64 = 1 << 62;
pub const ATTR_BG_INDEXED: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Rgb(u8, u8, u8),
    Indexed(u8),
}

impl Color {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Color::Indexed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellStyle {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub underline: bool,
}

impl Default for CellStyle {
    fn default() -> Self {
        CellStyle {
            fg: Color::Rgb(255, 255, 255),
            bg: Color::Rgb(0, 0, 0),
            bold: false,
            underline: false,
        }
    }
}

impl CellStyle {
    pub fn attr_code(&self) -> u64 {
        let mut code = 0u64;
        match self.fg {
            Color::Rgb(r, g, b) => {
                code |= (r as u64) << (8 * 6);
                code |= (g as u64) << (8 * 5);
                code |= (b as u64) << (8 * 4);
            }
            Color::Indexed(index) => {
                code |= (index as u64) << (8 * 4);
                code |= ATTR_FG_INDEXED;
            }
        }
        match self.bg {
            Color::Rgb(r, g, b) => {
                code |= (r as u64) << (8 * 3);
                code |= (g as u64) << (8 * 2);
                code |= (b as u64) << 8;
            }
            Color::Indexed(index) => {
                code |= (index as u64) << 8;
                code |= ATTR_BG_INDEXED;
            }
        }
        if self.bold {
            code |= ATTR_BOLD;
        }
        if self.underline {
            code |= ATTR_UNDERLINE;
        }
        code
    }

    pub fn from_attr_code(code: u64) -> CellStyle {
        let fg = if code & ATTR_FG_INDEXED != 0 {
            Color::Indexed((code >> (8 * 4)) as u8)
        } else {
            Color::Rgb(
                (code >> (8 * 6)) as u8,
                (code >> (8 * 5)) as u8,
                (code >> (8 * 4)) as u8,
            )
        };
        let bg = if code & ATTR_BG_INDEXED != 0 {
            Color::Indexed((code >> 8) as u8)
        } else {
            Color::Rgb(
                (code >> (8 * 3)) as u8,
                (code >> (8 * 2)) as u8,
                (code >> 8) as u8,
            )
        };
        CellStyle {
            fg,
            bg,
            bold: code & ATTR_BOLD != 0,
            underline: code & ATTR_UNDERLINE != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub chars: String,
    pub style: CellStyle,
}

impl Cell {
    pub fn blank() -> Cell {
        Cell {
            chars: " ".to_string(),
            style: CellStyle::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use tinyrand::{RandRange, StdRand};

    use super::*;

    fn rand_color(rng: &mut StdRand) -> Color {
        if rng.next_range(0u32..2u32) == 0 {
            Color::Indexed(rng.next_range(0u32..256u32) as u8)
        } else {
            Color::Rgb(
                rng.next_range(0u32..256u32) as u8,
                rng.next_range(0u32..256u32) as u8,
                rng.next_range(0u32..256u32) as u8,
            )
        }
    }

    #[test]
    fn attr_code_roundtrip_exhaustive_shapes() {
        let colors = [Color::Rgb(220, 50, 47), Color::Indexed(5)];
        for fg in colors {
            for bg in colors {
                for bold in [false, true] {
                    for underline in [false, true] {
                        let style = CellStyle {
                            fg,
                            bg,
                            bold,
                            underline,
                        };
                        assert_eq!(CellStyle::from_attr_code(style.attr_code()), style);
                    }
                }
            }
        }
    }

    #[test]
    fn attr_code_roundtrip_rand() {
        let mut rng = StdRand::default();
        for _ in 0..200 {
            let style = CellStyle {
                fg: rand_color(&mut rng),
                bg: rand_color(&mut rng),
                bold: rng.next_range(0u32..2u32) == 0,
                underline: rng.next_range(0u32..2u32) == 0,
            };
            let code = style.attr_code();
            assert_eq!(CellStyle::from_attr_code(code), style, "code {code:#018x}");
        }
    }

    #[test]
    fn indexed_palette_entry_survives() {
        let style = CellStyle {
            fg: Color::Indexed(5),
            ..CellStyle::default()
        };
        let decoded = CellStyle::from_attr_code(style.attr_code());
        assert_eq!(decoded.fg, Color::Indexed(5));
        assert!(!decoded.bg.is_indexed());
    }

    #[test]
    fn flag_bits_match_layout() {
        let style = CellStyle {
            fg: Color::Indexed(0xAA),
            bg: Color::Indexed(0xBB),
            bold: true,
            underline: true,
        };
        let code = style.attr_code();
        assert_eq!(code >> 56, 0xC0);
        assert_eq!((code >> 32) as u8, 0xAA);
        assert_eq!((code >> 8) as u8, 0xBB);
        assert_eq!(code as u8, 0x03);
    }
}
