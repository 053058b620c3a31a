use std::io::{Read, Write};
use std::time::Duration;
use serialport::{SerialPort, SerialPortType};

use super::{Result, SerialError, SerialPortInfo};

pub const BAUD_RATE: u32 = 9600;
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Byte-level access to one opened port.
///
/// Reads never block: `read_available` returns whatever the driver has
/// buffered, possibly nothing.
pub trait SerialPortIO: Send {
    fn send_data(&mut self, data: &[u8]) -> Result<()>;
    fn read_available(&mut self) -> Result<Vec<u8>>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

/// Port enumeration and opening, so the link can run against real
/// hardware or a scripted port.
pub trait PortProvider: Send + Sync {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>>;
    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPortIO>>;
}

/// Ports provided by the operating system through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let description = match &port.port_type {
                    SerialPortType::UsbPort(usb_info) => format!(
                        "{} ({})",
                        usb_info.product.as_deref().unwrap_or("USB Serial Port"),
                        port.port_name
                    ),
                    SerialPortType::BluetoothPort => format!("Bluetooth ({})", port.port_name),
                    SerialPortType::PciPort => format!("PCI Serial ({})", port.port_name),
                    SerialPortType::Unknown => port.port_name.clone(),
                };
                SerialPortInfo::new(port.port_name, description)
            })
            .collect())
    }

    fn open(&self, port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPortIO>> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                _ => SerialError::ConnectionFailed(format!("{}: {}", port_name, e)),
            })?;

        Ok(Box::new(NativePort {
            port: Some(port),
            port_name: port_name.to_string(),
        }))
    }
}

struct NativePort {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
}

impl SerialPortIO for NativePort {
    fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(SerialError::PortClosed)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(SerialError::PortClosed)?;
        let pending = port.bytes_to_read()? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; pending];
        match port.read(&mut buffer) {
            Ok(bytes_read) => {
                buffer.truncate(bytes_read);
                Ok(buffer)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial handle for {}", self.port_name);
        }
    }
}

/// The Transport: owns the handle of the live connection and speaks in
/// newline-terminated lines on the way out, raw bytes on the way in.
pub struct SerialInterface {
    io: Option<Box<dyn SerialPortIO>>,
    port_name: String,
}

impl SerialInterface {
    pub fn new(port_name: impl Into<String>, io: Box<dyn SerialPortIO>) -> Self {
        Self {
            io: Some(io),
            port_name: port_name.into(),
        }
    }

    /// Open `port_name` through `provider`.
    pub fn open(provider: &dyn PortProvider, port_name: &str, baud_rate: u32) -> Result<Self> {
        let io = provider.open(port_name, baud_rate)?;
        log::info!("Opened {} at {} baud", port_name, baud_rate);
        Ok(Self::new(port_name, io))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Whether the underlying handle is still open.
    pub fn is_open(&self) -> bool {
        self.io.as_ref().map(|io| io.is_open()).unwrap_or(false)
    }

    /// Write one frame followed by the `\n` terminator.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        let io = self
            .io
            .as_mut()
            .filter(|io| io.is_open())
            .ok_or(SerialError::PortClosed)?;

        let line = format!("{}\n", text);
        io.send_data(line.as_bytes())?;
        log::debug!("Sent: {}", text);
        Ok(())
    }

    /// Whatever bytes are buffered right now, without blocking.
    pub fn read_available(&mut self) -> Result<Vec<u8>> {
        let io = self
            .io
            .as_mut()
            .filter(|io| io.is_open())
            .ok_or(SerialError::PortClosed)?;
        io.read_available()
    }

    /// Close the handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.close();
            log::debug!("Transport for {} closed", self.port_name);
        }
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.close();
    }
}
