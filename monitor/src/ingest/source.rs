use std::io::{ErrorKind, Read};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

/// Longest line kept before the buffer is discarded as garbage.
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("line exceeded {MAX_LINE_LEN} bytes without a newline")]
    LineTooLong,
}

/// Yields one text line at a time.
pub trait LineSource: Send {
    /// `Ok(None)` when the read timed out before a full line arrived.
    fn read_line(&mut self) -> Result<Option<String>, SerialError>;
}

/// Line reader over any byte stream with read timeouts, usually a serial
/// port. Bytes received before a timeout are kept, so a line split across
/// two reads is reassembled rather than lost.
pub struct SerialLineSource<R = Box<dyn SerialPort>> {
    reader: R,
    pending: Vec<u8>,
    chunk: [u8; 256],
}

impl SerialLineSource {
    /// Open `port` 8N1 with no flow control.
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, SerialError> {
        let serial = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| SerialError::Open {
                port: port.to_string(),
                source,
            })?;
        info!(port, baud_rate, "opened serial port");
        Ok(Self::from_reader(serial))
    }
}

impl<R: Read + Send> SerialLineSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(256),
            chunk: [0u8; 256],
        }
    }

    /// Pop one complete line from the pending buffer, if there is one.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim().to_string())
    }
}

impl<R: Read + Send> LineSource for SerialLineSource<R> {
    fn read_line(&mut self) -> Result<Option<String>, SerialError> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            if self.pending.len() > MAX_LINE_LEN {
                self.pending.clear();
                return Err(SerialError::LineTooLong);
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&self.chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Replays a script of read results; an exhausted script times out.
    struct Scripted(VecDeque<io::Result<Vec<u8>>>);

    impl Scripted {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self(steps.into())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
            }
        }
    }

    fn data(bytes: &[u8]) -> io::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn timeout() -> io::Result<Vec<u8>> {
        Err(io::Error::new(ErrorKind::TimedOut, "timeout"))
    }

    #[test]
    fn line_split_by_timeout_is_reassembled() {
        let mut src = SerialLineSource::from_reader(Scripted::new(vec![
            data(b"{\"heartRate\": 7"),
            timeout(),
            data(b"2, \"spo2\": 97}\r\n"),
        ]));
        assert_eq!(src.read_line().unwrap(), None);
        assert_eq!(
            src.read_line().unwrap().as_deref(),
            Some("{\"heartRate\": 72, \"spo2\": 97}")
        );
        assert_eq!(src.read_line().unwrap(), None);
    }

    #[test]
    fn several_lines_in_one_read() {
        let mut src = SerialLineSource::from_reader(Scripted::new(vec![data(b"a\n\nb\n")]));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("a"));
        assert_eq!(src.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut src = SerialLineSource::from_reader(Scripted::new(vec![data(b"ok\xff\n")]));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("ok\u{FFFD}"));
    }

    #[test]
    fn io_error_is_reported_and_source_keeps_working() {
        let mut src = SerialLineSource::from_reader(Scripted::new(vec![
            Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")),
            data(b"next\n"),
        ]));
        assert!(matches!(src.read_line(), Err(SerialError::Io(_))));
        assert_eq!(src.read_line().unwrap().as_deref(), Some("next"));
    }

    #[test]
    fn runaway_line_is_discarded() {
        let steps = (0..20).map(|_| data(&[b'x'; 256])).collect();
        let mut src = SerialLineSource::from_reader(Scripted::new(steps));
        let mut saw_error = false;
        for _ in 0..20 {
            if matches!(src.read_line(), Err(SerialError::LineTooLong)) {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        assert!(src.pending.is_empty());
    }
}
