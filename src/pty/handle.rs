//! Low-level PTY handle: spawn a child shell on a pseudoterminal and
//! bridge its output onto the service's event channel.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

/// Raw I/O events from PTY reader threads, tagged by PTY id.
pub enum PtyIo {
    Data { pty_id: u64, bytes: Vec<u8> },
    Exit { pty_id: u64 },
}

/// Spawn parameters for one PTY child.
pub struct SpawnOptions {
    pub cols: u16,
    pub rows: u16,
    pub cwd: String,
    pub shell: String,
    pub env: Vec<(String, String)>,
}

/// One spawned child on a PTY.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    /// Flag cleared when the reader thread sees EOF (child terminated).
    alive: Arc<AtomicBool>,
}

impl PtyHandle {
    /// Spawn the shell and start a reader thread that forwards output to
    /// `events` until EOF.
    pub fn spawn(pty_id: u64, options: &SpawnOptions, events: Sender<PtyIo>) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&options.shell);
        cmd.cwd(&options.cwd);

        // Capability hints for the child.
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", options.shell))?;
        drop(pair.slave);

        let writer = pair.master.take_writer()?;
        let mut reader = pair.master.try_clone_reader()?;

        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);

        let _reader = thread::Builder::new()
            .name(format!("openmux-pty-{pty_id}"))
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if events
                                .send(PtyIo::Data {
                                    pty_id,
                                    bytes: buf[..n].to_vec(),
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                alive_flag.store(false, Ordering::SeqCst);
                let _ = events.send(PtyIo::Exit { pty_id });
            })
            .context("Failed to spawn PTY reader thread")?;

        Ok(Self {
            master: pair.master,
            writer,
            child,
            alive,
        })
    }

    /// Write keyboard input (or device replies) to the child.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Exit code if the child has finished.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    /// Process id of the foreground process group on the PTY, when the
    /// platform exposes it.
    pub fn foreground_pid(&self) -> Option<i32> {
        self.master.process_group_leader()
    }

    /// Ask the child to terminate: SIGHUP to its process group first, then
    /// a hard kill.
    pub fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.process_id() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGHUP);
        }
        let _ = self.child.kill();
    }
}
