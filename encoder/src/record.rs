//! Live recording front-end: spawn `$SHELL` on a pty, mirror its output to
//! the real terminal, and sample frames out of the mirrored byte stream as
//! they arrive.

use std::{
    fs::File,
    io::{Read, Write},
    os::unix::process::CommandExt,
    path::Path,
    process::{Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use container::{Frame, GridSize, metadata::CompressionMode, write::ItsWriter};
use nix::pty::{Winsize, openpty};
use spin_sleep::SpinSleeper;

use crate::vt::{Emulator, StagePalette, Vt100Emulator, sample_content};

/// How often the sampler looks for freshly mirrored output.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> std::io::Result<RawModeGuard> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

pub fn run_record(output: &Path, size_override: Option<GridSize>) -> anyhow::Result<()> {
    let shell = std::env::var("SHELL").context("environment variable $SHELL must be set")?;
    let out_file = File::options()
        .write(true)
        .create_new(true)
        .open(output)
        .with_context(|| format!("opening {} for writing", output.display()))?;

    let (cols, rows) = crossterm::terminal::size()?;
    let size = size_override.unwrap_or_else(|| GridSize::new(rows as u32, cols as u32));

    let winsize = Winsize {
        ws_row: size.rows as u16,
        ws_col: size.cols as u16,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(Some(&winsize), None).context("opening pty")?;
    let master = File::from(pty.master);
    let slave = pty.slave;

    let writer = ItsWriter::new(out_file, size, CompressionMode::Zstd, None)?;

    println!("Recording started. Exit the shell to end.");
    let _raw = RawModeGuard::enter()?;

    let mut command = Command::new(&shell);
    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave));
    unsafe {
        // By the time pre_exec runs, stdio has been remapped, so fd 0 is the
        // pty slave; make it the controlling terminal of a fresh session.
        command.pre_exec(|| {
            nix::unistd::setsid()?;
            if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let mut child = command.spawn().with_context(|| format!("spawning {shell}"))?;

    let pending: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::with_capacity(1 << 20)));
    let done = Arc::new(AtomicBool::new(false));

    // stdin -> pty master
    {
        let mut master = master.try_clone()?;
        std::thread::spawn(move || {
            let mut buf = vec![0u8; 1 << 16];
            let mut stdin = std::io::stdin();
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if master.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // pty master -> real terminal + frame buffer
    {
        let mut master = master.try_clone()?;
        let pending = Arc::clone(&pending);
        std::thread::spawn(move || {
            let mut buf = vec![0u8; 1 << 20];
            let mut stdout = std::io::stdout();
            loop {
                match master.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = stdout.write_all(&buf[..n]);
                        let _ = stdout.flush();
                        pending.lock().unwrap().extend_from_slice(&buf[..n]);
                    }
                }
            }
        });
    }

    let sampler = {
        let pending = Arc::clone(&pending);
        let done = Arc::clone(&done);
        std::thread::spawn(move || sampler_loop(writer, size, pending, done))
    };

    child.wait()?;
    done.store(true, Ordering::Release);
    sampler
        .join()
        .map_err(|_| anyhow::anyhow!("frame sampler panicked"))??;

    drop(_raw);
    println!("\rRecording saved to {}", output.display());
    Ok(())
}

/// Owns the emulator and the writer; everything it consumes arrives through
/// the shared pending buffer.
fn sampler_loop(
    mut writer: ItsWriter<File>,
    size: GridSize,
    pending: Arc<Mutex<Vec<u8>>>,
    done: Arc<AtomicBool>,
) -> container::Result<()> {
    let stage = StagePalette::solarized();
    let mut emulator = Vt100Emulator::new(size);
    emulator.feed(b"\x1b[0m\x1b[2J");

    let sleeper = SpinSleeper::default();
    let start = Instant::now();
    let mut frame_id = 0u64;
    let mut last_sample: Option<(Instant, container::FrameContent)> = None;

    loop {
        let finished = done.load(Ordering::Acquire);
        let chunk = {
            let mut pending = pending.lock().unwrap();
            if pending.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut *pending))
            }
        };

        match chunk {
            Some(bytes) => {
                let now = Instant::now();
                if let Some((sampled_at, content)) = last_sample.take() {
                    let info = Frame::builder()
                        .frame_id(frame_id)
                        .time(sampled_at.duration_since(start).as_secs_f64())
                        .duration(now.duration_since(sampled_at).as_secs_f64())
                        .build();
                    writer.write_frame(&info, &content)?;
                    frame_id += 1;
                }
                emulator.feed(&bytes);
                emulator.drain_responses();
                last_sample = Some((now, sample_content(&emulator, size, &stage)));
            }
            None if finished => break,
            None => sleeper.sleep(SAMPLE_INTERVAL),
        }
    }

    if let Some((sampled_at, content)) = last_sample.take() {
        let info = Frame::builder()
            .frame_id(frame_id)
            .time(sampled_at.duration_since(start).as_secs_f64())
            .duration(Instant::now().duration_since(sampled_at).as_secs_f64())
            .build();
        writer.write_frame(&info, &content)?;
    }
    writer.finalize()?;
    Ok(())
}
