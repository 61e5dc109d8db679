//! Cooperative playback scheduler. One condition variable carries every
//! wakeup (timer, input, resize, loader, termination); the UI thread draws at
//! most one frame per wakeup while the loader keeps the look-ahead window
//! full.

use std::{
    io::{self, BufWriter, Read, Seek, Write},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use container::{FrameContent, GridSize, format_seconds, index::ItsIndex, read::ItsReader};
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, terminal,
};
use parking_lot::{Condvar, Mutex};

use crate::{
    cache::{CACHE_SIZE, CachedFrame, FrameCache},
    profile::ColorProfile,
    renderer::{Viewport, cursor_to, render_frame},
};

const RETRY_TIME: Duration = Duration::from_millis(100);
const CONTROL_BAR_TIME: Duration = Duration::from_secs(1);
const SEEK_STEP_SECS: f64 = 5.0;

#[derive(Default)]
struct PlayerState {
    current_frame: u64,
    paused: bool,
    force_redraw: bool,
    control_bar_until: Option<Instant>,
    exiting: bool,
    resized: bool,
    /// When the frame on screen stops being current. `None` means the timer
    /// is disarmed (paused, end of stream, or waiting on the cache).
    next_frame_due: Option<Instant>,
}

struct Playback {
    ui: Mutex<PlayerState>,
    cache: Mutex<FrameCache>,
    wakeup: Condvar,
    index: ItsIndex,
    size: GridSize,
}

#[derive(Default)]
pub struct PlayOptions {
    pub profile: Option<ColorProfile>,
}

/// Raw mode and the alternate screen are process-global; this guard makes
/// sure every exit path, including panics, puts the terminal back.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> io::Result<TerminalGuard> {
        terminal::enable_raw_mode()?;
        execute!(
            io::stdout(),
            terminal::EnterAlternateScreen,
            cursor::Hide,
            terminal::Clear(terminal::ClearType::All)
        )?;
        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

pub fn run_player<R>(reader: ItsReader<R>, opts: PlayOptions) -> anyhow::Result<()>
where
    R: Read + Seek + Send + 'static,
{
    let shared = Arc::new(Playback {
        ui: Mutex::new(PlayerState::default()),
        cache: Mutex::new(FrameCache::default()),
        wakeup: Condvar::new(),
        index: reader.index().clone(),
        size: reader.size(),
    });

    let loader = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || loader_loop(reader, shared))
    };
    {
        let shared = Arc::clone(&shared);
        // Not joined: it blocks on terminal reads and dies with the process.
        thread::spawn(move || input_loop(shared));
    }

    let result = ui_loop(&shared, &opts);

    shared.ui.lock().exiting = true;
    shared.wakeup.notify_all();
    let _ = loader.join();
    result
}

/// Owns the reader and the file descriptor. Decodes strictly ascending
/// missing ids inside the window; holds `cache` only to insert or evict and
/// never while waiting on the condvar.
fn loader_loop<R: Read + Seek>(mut reader: ItsReader<R>, shared: Arc<Playback>) {
    let frame_count = reader.frame_count();
    loop {
        let want = {
            let mut ui = shared.ui.lock();
            loop {
                if ui.exiting {
                    return;
                }
                let current = ui.current_frame;
                let missing = {
                    let mut cache = shared.cache.lock();
                    cache.evict_outside(current);
                    cache.first_missing(current, frame_count)
                };
                match missing {
                    Some(id) => break id,
                    None => shared.wakeup.wait(&mut ui),
                }
            }
        };

        let entry = match reader
            .frame_offset(want)
            .and_then(|offset| reader.read_frame_at(offset))
        {
            Ok((record, _)) => CachedFrame::Ready {
                info: record.info,
                content: Arc::new(record.content),
            },
            Err(err) => {
                tracing::warn!(frame = want, error = %err, "failed to decode frame, skipping");
                CachedFrame::Failed
            }
        };

        let current = shared.ui.lock().current_frame;
        {
            let mut cache = shared.cache.lock();
            if want >= current && want < current.saturating_add(CACHE_SIZE) {
                cache.insert(want, entry);
            }
            cache.evict_outside(current);
        }
        shared.wakeup.notify_all();
    }
}

fn input_loop(shared: Arc<Playback>) {
    loop {
        let event = match crossterm::event::read() {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if handle_key(&shared, key) {
                    break;
                }
            }
            Event::Resize(_, _) => {
                shared.ui.lock().resized = true;
                shared.wakeup.notify_all();
            }
            _ => {}
        }
    }
}

/// Applies one command; returns true once the player is exiting.
fn handle_key(shared: &Playback, key: KeyEvent) -> bool {
    let last = shared.index.count().saturating_sub(1);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    let mut ui = shared.ui.lock();
    match key.code {
        KeyCode::Char('c') if ctrl => ui.exiting = true,
        KeyCode::Char('l') if ctrl => ui.force_redraw = true,
        KeyCode::Char('q') => ui.exiting = true,
        KeyCode::Char(' ') | KeyCode::Char('k') => {
            ui.paused = !ui.paused;
            if ui.paused {
                ui.next_frame_due = None;
            } else {
                ui.control_bar_until = Some(Instant::now() + CONTROL_BAR_TIME);
                ui.next_frame_due = None;
            }
        }
        KeyCode::Char(',') => {
            ui.paused = true;
            ui.next_frame_due = None;
            ui.current_frame = ui.current_frame.saturating_sub(1);
        }
        KeyCode::Char('.') => {
            ui.paused = true;
            ui.next_frame_due = None;
            ui.current_frame = (ui.current_frame + 1).min(last);
        }
        KeyCode::Char('j') => seek_by(&mut ui, &shared.index, -SEEK_STEP_SECS),
        KeyCode::Char('l') => seek_by(&mut ui, &shared.index, SEEK_STEP_SECS),
        KeyCode::Char('^') | KeyCode::Char('0') => {
            ui.current_frame = 0;
            ui.next_frame_due = None;
        }
        KeyCode::Char('$') => {
            ui.current_frame = last;
            ui.paused = true;
            ui.next_frame_due = None;
        }
        _ => {}
    }
    let exiting = ui.exiting;
    drop(ui);
    shared.wakeup.notify_all();
    exiting
}

fn seek_by(ui: &mut PlayerState, index: &ItsIndex, delta: f64) {
    let here = index
        .entry(ui.current_frame)
        .map(|e| e.time_offset)
        .unwrap_or(0.0);
    ui.current_frame = index.search_for_frame(here + delta);
    ui.control_bar_until = Some(Instant::now() + CONTROL_BAR_TIME);
    ui.next_frame_due = None;
}

fn current_viewport(size: GridSize) -> Viewport {
    match terminal::size() {
        Ok((cols, rows)) => Viewport::sized(cols, rows),
        Err(_) => Viewport::sized(size.cols as u16, size.rows as u16),
    }
}

fn frame_duration_from_index(index: &ItsIndex, frame_id: u64) -> Duration {
    match (index.entry(frame_id), index.entry(frame_id + 1)) {
        (Some(a), Some(b)) => Duration::from_secs_f64((b.time_offset - a.time_offset).max(0.0)),
        _ => RETRY_TIME,
    }
}

/// The draw thread. Holds `ui` across a whole wakeup (commands apply between
/// draws, never during one) and borrows the cache only long enough to grab an
/// `Arc` of the frame being drawn.
fn ui_loop(shared: &Playback, opts: &PlayOptions) -> anyhow::Result<()> {
    let size = shared.size;
    let frame_count = shared.index.count();
    let total_time = shared.index.last_time();
    let mut stdout = BufWriter::with_capacity(size.cell_count().max(4096) * 20, io::stdout());

    let mut last_rendered: Option<(u64, Arc<FrameContent>)> = None;
    let mut splash_drawn = false;
    let mut bar_visible = false;

    let mut ui = shared.ui.lock();
    loop {
        if ui.exiting {
            break;
        }
        let now = Instant::now();

        if !ui.paused {
            if let Some(due) = ui.next_frame_due {
                if now >= due {
                    if ui.current_frame + 1 < frame_count {
                        ui.current_frame += 1;
                    }
                    ui.next_frame_due = None;
                }
            }
        }

        let want = ui.current_frame;
        let at_end = want + 1 >= frame_count;
        let force = std::mem::take(&mut ui.force_redraw);
        let resized = std::mem::take(&mut ui.resized);
        let paused = ui.paused;
        let bar_deadline = ui.control_bar_until;
        let bar_active = bar_deadline.is_some_and(|d| now < d);
        let want_bar = bar_active || paused;

        let last_id = last_rendered.as_ref().map(|(id, _)| *id);
        let needs_draw = force
            || resized
            || want_bar != bar_visible
            || last_id != Some(want)
            || (!paused && !at_end && ui.next_frame_due.is_none());

        let mut wait_until: Option<Instant> = ui.next_frame_due;

        if needs_draw {
            let cached = {
                let cache = shared.cache.lock();
                cache.get(want).cloned()
            };
            match cached {
                Some(CachedFrame::Ready { info, content }) => {
                    let full =
                        force || resized || last_rendered.is_none() || (bar_visible && !want_bar);
                    let viewport = current_viewport(size);
                    if full {
                        let _ = stdout.write_all(b"\x1b[0m\x1b[2J");
                    }
                    let prev = if full {
                        None
                    } else {
                        last_rendered.as_ref().map(|(_, content)| content.as_ref())
                    };
                    let _ = render_frame(
                        prev,
                        &content,
                        &mut stdout,
                        viewport,
                        size,
                        opts.profile.as_ref(),
                    );
                    bar_visible = want_bar;
                    if bar_visible {
                        let _ = draw_control_bar(
                            &mut stdout,
                            viewport,
                            info.time,
                            total_time,
                            paused,
                        );
                    }
                    let _ = stdout.flush();
                    splash_drawn = true;

                    ui.next_frame_due = if paused || at_end {
                        None
                    } else {
                        Some(now + Duration::from_secs_f64(info.duration.max(0.0)))
                    };
                    wait_until = ui.next_frame_due;
                    last_rendered = Some((want, content));
                }
                Some(CachedFrame::Failed) => {
                    // Hold whatever is on screen for this frame's slot.
                    let content = last_rendered
                        .take()
                        .map(|(_, content)| content)
                        .unwrap_or_else(|| Arc::new(FrameContent::blank(size)));
                    last_rendered = Some((want, content));
                    ui.next_frame_due = if paused || at_end {
                        None
                    } else {
                        Some(now + frame_duration_from_index(&shared.index, want))
                    };
                    wait_until = ui.next_frame_due;
                }
                None => {
                    if !splash_drawn && last_rendered.is_none() {
                        let _ = stdout.write_all(b"\x1b[0m\x1b[2J\x1b[1;1HRendering...");
                        let _ = stdout.flush();
                        splash_drawn = true;
                    }
                    let retry = now + RETRY_TIME;
                    wait_until = Some(wait_until.map_or(retry, |t| t.min(retry)));
                }
            }
        }

        if bar_active {
            if let Some(deadline) = bar_deadline {
                wait_until = Some(wait_until.map_or(deadline, |t| t.min(deadline)));
            }
        }

        match wait_until {
            Some(deadline) => {
                let _ = shared.wakeup.wait_until(&mut ui, deadline);
            }
            None => shared.wakeup.wait(&mut ui),
        }
    }
    drop(ui);

    let _ = stdout.flush();
    Ok(())
}

fn draw_control_bar(
    out: &mut impl Write,
    viewport: Viewport,
    time: f64,
    total_time: f64,
    paused: bool,
) -> io::Result<()> {
    let row = viewport.h.saturating_sub(1);
    cursor_to(out, row, viewport.x)?;
    let state = if paused { "||" } else { "|>" };
    let text = format!(
        " {state} {} / {} ",
        format_seconds(time),
        format_seconds(total_time)
    );
    let clipped: String = text.chars().take(viewport.w as usize).collect();
    out.write_all(b"\x1b[0m\x1b[7m")?;
    out.write_all(clipped.as_bytes())?;
    out.write_all(b"\x1b[0m")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn failed_frame_duration_comes_from_the_index() {
        let mut index = ItsIndex::default();
        index.push(0.0, 100);
        index.push(0.25, 200);
        index.push(0.75, 300);
        assert_eq!(
            frame_duration_from_index(&index, 0),
            Duration::from_secs_f64(0.25)
        );
        assert_eq!(
            frame_duration_from_index(&index, 1),
            Duration::from_secs_f64(0.5)
        );
        assert_eq!(frame_duration_from_index(&index, 2), RETRY_TIME);
    }
}
