use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, OwnedFd};
use std::path::{Path, PathBuf};

use nix::pty::{Winsize, openpty};
use nix::sys::termios::Termios;
use nix::unistd::ttyname;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AppResult;

/// Pseudo-terminal pair wired to the target program. The slave device is
/// handed to GDB via `--tty`; the master side feeds `target_output`. Both
/// descriptors close on drop.
pub struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
    slave_name: PathBuf,
}

impl Pty {
    pub fn open() -> AppResult<Pty> {
        let pair = openpty(None::<&Winsize>, None::<&Termios>)?;
        let slave_name = ttyname(pair.slave.as_fd())?;
        debug!("allocated pty, slave {}", slave_name.display());
        Ok(Pty { master: pair.master, slave: pair.slave, slave_name })
    }

    /// Device name of the slave side, e.g. `/dev/pts/3`.
    pub fn slave_name(&self) -> &Path {
        &self.slave_name
    }

    /// Pump raw byte chunks written by the target into a channel.
    ///
    /// Ptys have no portable non-blocking story, so the reads run on the
    /// blocking pool over a duplicated master descriptor. The worker ends
    /// once every slave descriptor is gone and the master starts returning
    /// EIO, or when the receiver is dropped.
    pub fn spawn_reader(&self) -> AppResult<mpsc::Receiver<Vec<u8>>> {
        let (chunk_input, chunk_output) = mpsc::channel(64);
        let mut master = File::from(self.master.try_clone()?);
        tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; 1024];
            loop {
                match master.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if chunk_input.blocking_send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("pty master closed: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(chunk_output)
    }
}
