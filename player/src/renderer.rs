//! Differential frame renderer: cursor moves plus only the cells that
//! changed since the previously displayed frame.

use std::io::{self, Write};

use container::{CellStyle, Color, FrameContent, GridSize};

use crate::profile::ColorProfile;

/// Sub-rectangle of the physical terminal being drawn into; `x`/`y` are the
/// top-left corner, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Viewport {
    pub fn sized(w: u16, h: u16) -> Viewport {
        Viewport { x: 0, y: 0, w, h }
    }
}

/// Writes `next` into the viewport, skipping every cell that is byte-equal
/// (chars) and bit-equal (attr code) to `prev`. Never wraps and never writes
/// outside the viewport.
pub fn render_frame(
    prev: Option<&FrameContent>,
    next: &FrameContent,
    out: &mut impl Write,
    viewport: Viewport,
    size: GridSize,
    profile: Option<&ColorProfile>,
) -> io::Result<()> {
    let rows = size.rows.min(viewport.h as u32);
    let cols = size.cols.min(viewport.w as u32);

    cursor_to(out, viewport.y, viewport.x)?;
    let mut cursor_row = 0u32;
    let mut cursor_col = 0u32;
    let mut last_attr: Option<u64> = None;

    for row in 0..rows {
        for col in 0..cols {
            let cell = next.cell_at(row, col, &size);
            if let Some(prev) = prev {
                if prev.cell_at(row, col, &size) == cell {
                    continue;
                }
            }
            if cursor_row != row || cursor_col != col {
                cursor_to(out, viewport.y + row as u16, viewport.x + col as u16)?;
                cursor_row = row;
                cursor_col = col;
            }
            let code = cell.style.attr_code();
            if last_attr != Some(code) || (row == 0 && col == 0) {
                write_style(out, &cell.style, profile)?;
                last_attr = Some(code);
            }
            out.write_all(cell.chars.as_bytes())?;
            cursor_col += 1;
        }
    }
    Ok(())
}

pub(crate) fn cursor_to(out: &mut impl Write, row: u16, col: u16) -> io::Result<()> {
    let mut buf = itoa::Buffer::new();
    out.write_all(b"\x1b[")?;
    out.write_all(buf.format(row + 1).as_bytes())?;
    out.write_all(b";")?;
    out.write_all(buf.format(col + 1).as_bytes())?;
    out.write_all(b"H")
}

fn write_style(
    out: &mut impl Write,
    style: &CellStyle,
    profile: Option<&ColorProfile>,
) -> io::Result<()> {
    write_color(out, b"\x1b[48;", style.bg, profile)?;
    write_color(out, b"\x1b[38;", style.fg, profile)?;
    out.write_all(if style.bold { b"\x1b[1m" } else { b"\x1b[22m" })?;
    out.write_all(if style.underline {
        b"\x1b[4m"
    } else {
        b"\x1b[24m"
    })
}

fn write_color(
    out: &mut impl Write,
    intro: &[u8],
    color: Color,
    profile: Option<&ColorProfile>,
) -> io::Result<()> {
    let color = match (color, profile) {
        (Color::Indexed(i), Some(profile)) => {
            let [r, g, b] = profile.palette[i as usize];
            Color::Rgb(r, g, b)
        }
        (color, _) => color,
    };

    let mut buf = itoa::Buffer::new();
    out.write_all(intro)?;
    match color {
        Color::Rgb(r, g, b) => {
            out.write_all(b"2;")?;
            out.write_all(buf.format(r).as_bytes())?;
            out.write_all(b";")?;
            out.write_all(buf.format(g).as_bytes())?;
            out.write_all(b";")?;
            out.write_all(buf.format(b).as_bytes())?;
        }
        Color::Indexed(i) => {
            out.write_all(b"5;")?;
            out.write_all(buf.format(i).as_bytes())?;
        }
    }
    out.write_all(b"m")
}

#[cfg(test)]
mod test {
    use container::Cell;

    use super::*;

    fn grid(size: GridSize) -> FrameContent {
        FrameContent::blank(size)
    }

    fn render_to_string(
        prev: Option<&FrameContent>,
        next: &FrameContent,
        viewport: Viewport,
        size: GridSize,
        profile: Option<&ColorProfile>,
    ) -> String {
        let mut out = Vec::new();
        render_frame(prev, next, &mut out, viewport, size, profile).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn identical_frames_emit_only_cursor_home() {
        let size = GridSize::new(3, 4);
        let content = grid(size);
        let out = render_to_string(
            Some(&content),
            &content,
            Viewport::sized(80, 24),
            size,
            None,
        );
        assert_eq!(out, "\x1b[1;1H");
    }

    #[test]
    fn only_the_changed_cell_is_redrawn() {
        let size = GridSize::new(3, 4);
        let prev = grid(size);
        let mut next = prev.clone();
        let mut cell = Cell::blank();
        cell.chars = "X".to_string();
        next.set_cell_at(1, 2, cell, &size);

        let out = render_to_string(Some(&prev), &next, Viewport::sized(80, 24), size, None);
        assert!(out.starts_with("\x1b[1;1H"));
        assert!(out.contains("\x1b[2;3H"), "absolute move expected: {out:?}");
        assert!(out.ends_with('X'));
        assert_eq!(out.matches('X').count(), 1);
    }

    #[test]
    fn attr_escape_is_reused_across_a_run() {
        let size = GridSize::new(1, 4);
        let mut next = grid(size);
        for col in 0..4 {
            let mut cell = Cell::blank();
            cell.chars = "#".to_string();
            cell.style.bold = true;
            next.set_cell_at(0, col, cell, &size);
        }
        let out = render_to_string(None, &next, Viewport::sized(80, 24), size, None);
        // one style escape up front, then bare chars
        assert_eq!(out.matches("\x1b[1m").count(), 1);
        assert_eq!(out.matches('#').count(), 4);
    }

    #[test]
    fn indexed_color_without_profile_uses_256_color_escapes() {
        let size = GridSize::new(1, 1);
        let mut next = grid(size);
        let mut cell = Cell::blank();
        cell.style.fg = Color::Indexed(5);
        next.set_cell_at(0, 0, cell, &size);
        let out = render_to_string(None, &next, Viewport::sized(80, 24), size, None);
        assert!(out.contains("\x1b[38;5;5m"), "{out:?}");
    }

    #[test]
    fn indexed_color_with_profile_resolves_to_rgb() {
        let size = GridSize::new(1, 1);
        let mut next = grid(size);
        let mut cell = Cell::blank();
        cell.style.fg = Color::Indexed(5);
        next.set_cell_at(0, 0, cell, &size);

        let mut profile = ColorProfile::default();
        profile.palette[5] = [1, 2, 3];
        let out = render_to_string(None, &next, Viewport::sized(80, 24), size, Some(&profile));
        assert!(out.contains("\x1b[38;2;1;2;3m"), "{out:?}");
        assert!(!out.contains(";5;"));
    }

    #[test]
    fn viewport_clips_without_wrapping() {
        let size = GridSize::new(2, 10);
        let mut next = grid(size);
        for col in 0..10 {
            let mut cell = Cell::blank();
            cell.chars = "y".to_string();
            next.set_cell_at(0, col, cell, &size);
        }
        let out = render_to_string(None, &next, Viewport::sized(3, 1), size, None);
        assert_eq!(out.matches('y').count(), 3);
        // nothing below the viewport's single row
        assert!(!out.contains("\x1b[2;"));
    }
}
