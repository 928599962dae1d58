//! Text-line transport to the switch.
//!
//! The controller only needs two primitives: send a command, and send a
//! query and read back one line. `LineTransport` provides them over any byte
//! stream (a TCP socket, a serial bridge); `Recorder` wraps another transport
//! and keeps a log of the commands that went through it.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, trace};

pub trait Transport {
    /// Send a command that produces no response.
    fn write(&mut self, cmd: &str) -> io::Result<()>;

    /// Send a query and return its one-line response, without the terminator.
    fn ask(&mut self, cmd: &str) -> io::Result<String>;

    /// Drain any responses nobody asked for.
    fn clear_read_queue(&mut self) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        (**self).write(cmd)
    }

    fn ask(&mut self, cmd: &str) -> io::Result<String> {
        (**self).ask(cmd)
    }

    fn clear_read_queue(&mut self) -> io::Result<Vec<String>> {
        (**self).clear_read_queue()
    }
}

/// Byte stream whose blocking reads can be bounded in time.
pub trait Link: Read + Write {
    /// Bound every following read; `None` blocks until data arrives.
    fn limit_reads(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Link for TcpStream {
    fn limit_reads(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

const LF: u8 = 0x0A;

/// Line-oriented transport over a byte stream.
///
/// Bytes read past the end of a response line stay buffered for the next
/// read.
pub struct LineTransport<T> {
    io_handle: T,
    line_ending: String,
    read_buf: Vec<u8>,
    response_timeout: Option<Duration>,
    flush_timeout: Duration,
}

impl<T: Link> LineTransport<T> {
    pub fn new(io_handle: T) -> Self {
        Self {
            io_handle,
            line_ending: "\n".to_string(),
            read_buf: Vec::with_capacity(128),
            response_timeout: None,
            flush_timeout: Duration::from_millis(1),
        }
    }

    pub fn with_line_ending(mut self, line_ending: &str) -> Self {
        self.line_ending = line_ending.to_string();
        self
    }

    /// Wait at most `response` for an answer, and consider the link drained
    /// once it has been silent for `flush`.
    pub fn with_timeouts(mut self, response: Duration, flush: Duration) -> io::Result<Self> {
        self.io_handle.limit_reads(Some(response))?;
        self.response_timeout = Some(response);
        self.flush_timeout = flush;
        Ok(self)
    }

    #[cfg(test)]
    pub fn into_inner(self) -> T {
        self.io_handle
    }

    fn find_line_ending(&self, start_hint: usize) -> Option<usize> {
        self.read_buf
            .get(start_hint..)?
            .iter()
            .position(|&b| b == LF)
            .map(|i| i + start_hint)
    }

    /// Remove one complete line from the front of the buffer, if there is one.
    fn take_buffered_line(&mut self) -> io::Result<Option<String>> {
        let Some(end) = self.find_line_ending(0) else {
            return Ok(None);
        };
        let raw: Vec<u8> = self.read_buf.drain(..=end).collect();
        let line = String::from_utf8(raw)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut searched = 0;
        while self.find_line_ending(searched).is_none() {
            searched = self.read_buf.len();
            let mut temp_buf = [0u8; 64];
            let bytes_read = self.io_handle.read(&mut temp_buf)?;
            if bytes_read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed before end of response line",
                ));
            }
            self.read_buf.extend_from_slice(&temp_buf[..bytes_read]);
        }

        self.take_buffered_line()?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "response line vanished"))
    }

    /// Pull everything the device sends until it goes quiet or hangs up.
    fn read_until_quiet(&mut self) -> io::Result<()> {
        let mut temp_buf = [0u8; 64];
        loop {
            match self.io_handle.read(&mut temp_buf) {
                Ok(0) => return Ok(()),
                Ok(bytes_read) => self.read_buf.extend_from_slice(&temp_buf[..bytes_read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: Link> Transport for LineTransport<T> {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        trace!(cmd, "write");
        self.io_handle.write_all(cmd.as_bytes())?;
        self.io_handle.write_all(self.line_ending.as_bytes())?;
        self.io_handle.flush()
    }

    fn ask(&mut self, cmd: &str) -> io::Result<String> {
        self.write(cmd)?;
        let response = self.read_line()?;
        trace!(cmd, response = %response, "ask");
        Ok(response)
    }

    /// Takes at least the flush timeout.
    fn clear_read_queue(&mut self) -> io::Result<Vec<String>> {
        self.io_handle.limit_reads(Some(self.flush_timeout))?;
        let drained = self.read_until_quiet();
        self.io_handle.limit_reads(self.response_timeout)?;
        drained?;

        let mut lingering = Vec::new();
        while let Some(line) = self.take_buffered_line()? {
            lingering.push(line);
        }
        if !lingering.is_empty() {
            debug!(count = lingering.len(), "drained lingering responses");
        }
        Ok(lingering)
    }
}

/// Transport wrapper recording every command sent while recording is on.
#[cfg(test)]
pub struct Recorder<T> {
    inner: T,
    recording: bool,
    sent: Vec<String>,
}

#[cfg(test)]
impl<T: Transport> Recorder<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            recording: false,
            sent: Vec::new(),
        }
    }

    /// Discard earlier recordings and start recording.
    pub fn start_recording(&mut self) {
        self.sent.clear();
        self.recording = true;
    }

    /// Commands recorded since the last call.
    pub fn take_recorded(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn record(&mut self, cmd: &str) {
        if self.recording {
            debug!(cmd, "recorded");
            self.sent.push(cmd.to_string());
        }
    }
}

#[cfg(test)]
impl<T: Transport> Transport for Recorder<T> {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        self.record(cmd);
        self.inner.write(cmd)
    }

    fn ask(&mut self, cmd: &str) -> io::Result<String> {
        self.record(cmd);
        self.inner.ask(cmd)
    }

    fn clear_read_queue(&mut self) -> io::Result<Vec<String>> {
        self.inner.clear_read_queue()
    }
}
