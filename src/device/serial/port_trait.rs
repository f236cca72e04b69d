//! Trait abstraction for serial port operations to enable testing

use std::io;
use std::time::Duration;

/// Trait for serial port I/O operations
pub trait SerialPortIO: Send {
    /// Write all data to the port
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    fn flush(&mut self) -> io::Result<()>;

    /// Read one reply line from the device, without the line ending
    ///
    /// Returns `TimedOut` when no complete line arrived within the port's
    /// read timeout.
    fn read_line(&mut self) -> io::Result<String>;

    /// Drop any unread replies (boot banner, temperature reports)
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Wrapper around a blocking `tokio_serial` port that implements SerialPortIO
pub struct NativeSerialPort {
    port: Box<dyn tokio_serial::SerialPort>,
    pending: Vec<u8>,
}

impl NativeSerialPort {
    /// Opens `path` as 8N1 without flow control.
    ///
    /// `timeout` bounds each individual read.
    pub fn open(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, tokio_serial::Error> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(timeout)
            .open()?;
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }
}

impl SerialPortIO for NativeSerialPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }

    fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                return Ok(String::from_utf8_lossy(&line).trim().to_string());
            }

            let mut chunk = [0u8; 64];
            let read = io::Read::read(&mut self.port, &mut chunk)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                ));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
