//! Terminal color profiles. A profile is captured by screenshotting a
//! calibration pattern this module prints; decoding the screenshot recovers
//! the terminal's 256-entry palette plus its default foreground and
//! background.

use std::{io::Write, path::Path};

use anyhow::{Context, bail};
use image::RgbaImage;

pub const PATTERN_WIDTH: i32 = 34;
pub const PATTERN_HEIGHT: i32 = 10;

/// Finder colors; chosen to be unlikely terminal theme colors.
const FINDER_BG: [u8; 3] = [0x00, 0x00, 0x00];
const FINDER_FG: [u8; 3] = [0xFF, 0x00, 0xFF];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorProfile {
    pub fg: [u8; 3],
    pub bg: [u8; 3],
    pub palette: [[u8; 3]; 256],
}

impl Default for ColorProfile {
    fn default() -> Self {
        ColorProfile {
            fg: [255, 255, 255],
            bg: [0, 0, 0],
            palette: [[0, 0, 0]; 256],
        }
    }
}

pub fn load_color_profile(path: &Path) -> anyhow::Result<ColorProfile> {
    if path.extension().and_then(|e| e.to_str()) != Some("png") {
        bail!("only png color profiles are supported");
    }
    let img = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgba8();
    decode_color_profile(&img)
}

/// Prints the calibration pattern: a finder frame of alternating black and
/// magenta cells around an 8x32 grid of palette patches, plus one default-fg
/// and one default-bg cell on the right edge.
pub fn print_calibration_pattern(out: &mut impl Write) -> std::io::Result<()> {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    let start_x = cols as i32 / 2 - PATTERN_WIDTH / 2;
    let start_y = rows as i32 / 4;

    write!(out, "\x1b[7l\x1b[1;1H\x1b[2J\x1b[{};{}H", start_y + 1, start_x + 1)?;
    write!(
        out,
        "\x1b[48;2;{};{};{}m\x1b[38;2;{};{};{}m",
        FINDER_BG[0], FINDER_BG[1], FINDER_BG[2], FINDER_FG[0], FINDER_FG[1], FINDER_FG[2]
    )?;
    // top finder line
    for _ in 0..PATTERN_WIDTH / 2 {
        write!(out, "\x1b[27m \x1b[7m ")?;
    }
    // bottom finder line
    write!(
        out,
        "\x1b[{};{}H",
        start_y + PATTERN_HEIGHT,
        start_x + 1
    )?;
    for _ in 0..PATTERN_WIDTH / 2 {
        write!(out, "\x1b[7m \x1b[27m ")?;
    }
    // left and right edges
    for y in 0..PATTERN_HEIGHT {
        write!(out, "\x1b[{};{}H", start_y + y + 1, start_x + 1)?;
        if y % 2 == 0 {
            write!(out, "\x1b[27m \x1b[{}C\x1b[7m ", PATTERN_WIDTH - 2)?;
        } else {
            write!(out, "\x1b[7m \x1b[{}C\x1b[27m ", PATTERN_WIDTH - 2)?;
        }
    }
    // palette patches
    write!(out, "\x1b[{};{}H", start_y + 2, start_x + 2)?;
    let mut row_off = 1;
    let mut col_off = 0;
    for i in 0..256 {
        write!(out, "\x1b[27;48;5;{i}m ")?;
        col_off += 1;
        if col_off == PATTERN_WIDTH - 2 {
            col_off = 0;
            row_off += 1;
            write!(out, "\x1b[{};{}H", start_y + 1 + row_off, start_x + 2)?;
        }
    }
    // default fg and bg sample cells on the right edge
    write!(
        out,
        "\x1b[{};{}H\x1b[0;7m ",
        start_y + PATTERN_HEIGHT - 2,
        start_x + PATTERN_WIDTH
    )?;
    write!(
        out,
        "\x1b[{};{}H\x1b[0;27m ",
        start_y + PATTERN_HEIGHT - 1,
        start_x + PATTERN_WIDTH
    )?;

    let msgs = [
        "Take a screenshot of the above pattern and save it as a png image.",
        "That image can then be used as a color profile.",
        "You don't have to be precise. Some background border is OK.",
        "Even a screenshot of the entire screen will be fine.",
    ];
    for (i, msg) in msgs.iter().enumerate() {
        write!(
            out,
            "\x1b[{};{}H\x1b[0m{}",
            start_y + PATTERN_HEIGHT + 3 + i as i32,
            (cols as i32 / 2 - msg.len() as i32 / 2).max(1),
            msg
        )?;
    }
    write!(out, "\x1b[{};1H\x1b[0m", start_y + PATTERN_HEIGHT + 8)?;
    out.flush()
}

fn color_eq(a: [u8; 3], b: [u8; 3]) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.abs_diff(*y) <= 1)
}

fn px(img: &RgbaImage, x: i32, y: i32) -> [u8; 3] {
    let p = img.get_pixel(x as u32, y as u32);
    [p.0[0], p.0[1], p.0[2]]
}

const SIGN_FG_TO_BG: i8 = -1;
const SIGN_BG_TO_FG: i8 = 1;
// The first switch of the top finder line goes bg->fg; the bottom one fg->bg.
const LINESIGN_TOP: i8 = SIGN_BG_TO_FG;
const LINESIGN_BOTTOM: i8 = SIGN_FG_TO_BG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineInfo {
    sign: i8,
    y: i32,
    first_switch_x: i32,
    segment_width: i32,
}

/// Scans one pixel row for a run of 33 equally spaced finder-color switches.
fn scan_line(img: &RgbaImage, y: i32) -> Option<LineInfo> {
    let width = img.width() as i32;
    let mut switches: Vec<(i32, i8)> = Vec::new();
    for x in 1..width {
        let last = px(img, x - 1, y);
        let now = px(img, x, y);
        if color_eq(last, FINDER_BG) && color_eq(now, FINDER_FG) {
            switches.push((x, SIGN_BG_TO_FG));
        } else if color_eq(last, FINDER_FG) && color_eq(now, FINDER_BG) {
            switches.push((x, SIGN_FG_TO_BG));
        }
    }
    if switches.len() < 33 {
        return None;
    }

    let widths: Vec<i32> = switches.windows(2).map(|w| w[1].0 - w[0].0).collect();
    let mut run = 1usize;
    for k in 1..widths.len() {
        if widths[k] == widths[k - 1] {
            run += 1;
            if run >= 32 {
                let first = k - 31;
                let (x, sign) = switches[first];
                return Some(LineInfo {
                    sign,
                    y,
                    first_switch_x: x,
                    segment_width: widths[k],
                });
            }
        } else {
            run = 1;
        }
    }
    None
}

pub fn decode_color_profile(img: &RgbaImage) -> anyhow::Result<ColorProfile> {
    let height = img.height() as i32;

    let lines: Vec<Option<LineInfo>> = (0..height).map(|y| scan_line(img, y)).collect();
    if lines.iter().all(|l| l.is_none()) {
        bail!("no calibration pattern recognized");
    }

    // Collapse each contiguous band of top lines to its last row, and each
    // band of bottom lines to its first row; the palette content sits
    // strictly between the two.
    let tops = collapse_bands(lines.iter(), LINESIGN_TOP);
    let bottoms = collapse_bands(lines.iter().rev(), LINESIGN_BOTTOM);

    for top in &tops {
        for bottom in &bottoms {
            if bottom.segment_width != top.segment_width
                || bottom.first_switch_x != top.first_switch_x
            {
                continue;
            }
            let content_height = bottom.y - top.y - 1;
            if content_height < PATTERN_HEIGHT - 2 {
                continue;
            }
            if let Some(profile) = try_read_pattern(img, top, content_height) {
                return Ok(profile);
            }
        }
    }
    bail!("no calibration pattern found")
}

fn collapse_bands<'a>(
    lines: impl Iterator<Item = &'a Option<LineInfo>>,
    wanted_sign: i8,
) -> Vec<LineInfo> {
    let mut bands: Vec<LineInfo> = Vec::new();
    let mut last_sign = 0i8;
    for line_opt in lines {
        let Some(line) = line_opt else {
            last_sign = 0;
            continue;
        };
        if line.sign == wanted_sign {
            if last_sign == 0 {
                bands.push(*line);
            } else if last_sign == wanted_sign {
                match bands.last_mut() {
                    Some(last)
                        if last.segment_width == line.segment_width
                            && last.first_switch_x == line.first_switch_x =>
                    {
                        *last = *line;
                    }
                    _ => bands.push(*line),
                }
            }
        }
        last_sign = line.sign;
    }
    bands
}

/// Validates the left/right finder columns for one top/bottom pair and, if
/// they hold up, samples the palette patches.
fn try_read_pattern(img: &RgbaImage, top: &LineInfo, content_height: i32) -> Option<ColorProfile> {
    let left_finder_x = top.first_switch_x - 1;
    let content_y = top.y + 1;
    if left_finder_x < 0 || content_y < 1 {
        return None;
    }
    if !color_eq(px(img, left_finder_x, content_y), FINDER_FG) {
        return None;
    }
    if !color_eq(px(img, left_finder_x, content_y - 1), FINDER_BG) {
        return None;
    }

    let mut segment_height = 0;
    while segment_height < content_height {
        if color_eq(px(img, left_finder_x, content_y + segment_height), FINDER_BG) {
            break;
        }
        segment_height += 1;
    }
    if segment_height == 0 || segment_height * (PATTERN_HEIGHT - 2) != content_height {
        return None;
    }

    let segment_width = top.segment_width;
    let right_finder_x = left_finder_x + 1 + segment_width * 32;
    if right_finder_x >= img.width() as i32 {
        return None;
    }
    for yd in 0..content_height {
        let expect_fg = (yd / segment_height) % 2 == 0;
        let (expect, expect_inverse) = if expect_fg {
            (FINDER_FG, FINDER_BG)
        } else {
            (FINDER_BG, FINDER_FG)
        };
        if !color_eq(px(img, left_finder_x, content_y + yd), expect) {
            return None;
        }
        // the last two right-edge cells hold the default-color samples
        if yd >= 6 * segment_height {
            continue;
        }
        if !color_eq(px(img, right_finder_x, content_y + yd), expect_inverse) {
            return None;
        }
    }

    let content_x = top.first_switch_x;
    let mut profile = ColorProfile::default();
    let mut i = 0;
    for row in 0..8 {
        for col in 0..32 {
            let x = content_x + col * segment_width + segment_width / 2;
            let y = content_y + row * segment_height + segment_height / 2;
            profile.palette[i] = px(img, x, y);
            i += 1;
        }
    }
    let sample_x = content_x + 32 * segment_width + segment_width / 2;
    profile.fg = px(
        img,
        sample_x,
        content_y + 6 * segment_height + segment_height / 2,
    );
    profile.bg = px(
        img,
        sample_x,
        content_y + 7 * segment_height + segment_height / 2,
    );
    Some(profile)
}

pub fn format_rgb(color: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

#[cfg(test)]
mod test {
    use image::Rgba;

    use super::*;

    const SEG_W: i32 = 3;
    const SEG_H: i32 = 2;

    fn patch_color(i: usize) -> [u8; 3] {
        [i as u8, (255 - i) as u8, ((i * 37) % 256) as u8]
    }

    /// Pattern cell color at (row, col) of the 10x34 calibration grid, as it
    /// would appear on screen.
    fn cell_color(row: i32, col: i32, fg: [u8; 3], bg: [u8; 3]) -> [u8; 3] {
        // right-edge default samples overwrite the finder column
        if row == PATTERN_HEIGHT - 3 && col == PATTERN_WIDTH - 1 {
            return fg;
        }
        if row == PATTERN_HEIGHT - 2 && col == PATTERN_WIDTH - 1 {
            return bg;
        }
        if row == 0 {
            return if col % 2 == 0 { FINDER_BG } else { FINDER_FG };
        }
        if row == PATTERN_HEIGHT - 1 {
            return if col % 2 == 0 { FINDER_FG } else { FINDER_BG };
        }
        if col == 0 {
            return if row % 2 == 0 { FINDER_BG } else { FINDER_FG };
        }
        if col == PATTERN_WIDTH - 1 {
            return if row % 2 == 0 { FINDER_FG } else { FINDER_BG };
        }
        patch_color(((row - 1) * 32 + (col - 1)) as usize)
    }

    fn synthetic_screenshot(fg: [u8; 3], bg: [u8; 3]) -> RgbaImage {
        let margin = 7;
        let width = (margin * 2 + PATTERN_WIDTH * SEG_W) as u32;
        let height = (margin * 2 + PATTERN_HEIGHT * SEG_H) as u32;
        let mut img = RgbaImage::from_pixel(width, height, Rgba([9, 9, 9, 255]));
        for row in 0..PATTERN_HEIGHT {
            for col in 0..PATTERN_WIDTH {
                let color = cell_color(row, col, fg, bg);
                for dy in 0..SEG_H {
                    for dx in 0..SEG_W {
                        let x = (margin + col * SEG_W + dx) as u32;
                        let y = (margin + row * SEG_H + dy) as u32;
                        img.put_pixel(x, y, Rgba([color[0], color[1], color[2], 255]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn synthetic_pattern_decodes() {
        let fg = [0x65, 0x7B, 0x83];
        let bg = [0xFD, 0xF6, 0xE3];
        let img = synthetic_screenshot(fg, bg);
        let profile = decode_color_profile(&img).unwrap();
        assert_eq!(profile.fg, fg);
        assert_eq!(profile.bg, bg);
        for i in 0..256 {
            assert_eq!(profile.palette[i], patch_color(i), "palette entry {i}");
        }
    }

    #[test]
    fn blank_image_is_rejected() {
        let img = RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 255]));
        assert!(decode_color_profile(&img).is_err());
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(format_rgb([0xFD, 0xF6, 0xE3]), "#fdf6e3");
        assert_eq!(format_rgb([0, 1, 2]), "#000102");
    }
}
