//! Serial port discovery.

use serialport::SerialPortType;

use crate::error::{Result, SoniaError};

/// Bus a serial device is attached through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortKind {
    /// USB device, with its descriptor strings when the OS exposes them.
    Usb {
        /// Vendor ID.
        vid: u16,
        /// Product ID.
        pid: u16,
        /// Serial number string.
        serial_number: Option<String>,
        /// Manufacturer string.
        manufacturer: Option<String>,
        /// Product string.
        product: Option<String>,
    },
    /// PCI device.
    Pci,
    /// Bluetooth RFCOMM device.
    Bluetooth,
    /// Anything else (on-board UARTs, pseudo terminals).
    Unknown,
}

/// A serial device present on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
    /// How the device is attached.
    pub kind: PortKind,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let kind = match info.port_type {
            SerialPortType::UsbPort(usb) => PortKind::Usb {
                vid: usb.vid,
                pid: usb.pid,
                serial_number: usb.serial_number,
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            SerialPortType::PciPort => PortKind::Pci,
            SerialPortType::BluetoothPort => PortKind::Bluetooth,
            SerialPortType::Unknown => PortKind::Unknown,
        };
        Self {
            path: info.port_name,
            kind,
        }
    }
}

/// List the serial devices present on the host, sorted by path.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(|e| SoniaError::io_other("enumerating serial ports", e.to_string()))?
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(count = ports.len(), "enumerated serial ports");
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_metadata_is_kept() {
        let info = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".into(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A1".into()),
                manufacturer: Some("FTDI".into()),
                product: None,
            }),
        };
        let port = PortInfo::from(info);
        assert_eq!(port.path, "/dev/ttyUSB0");
        assert!(matches!(port.kind, PortKind::Usb { vid: 0x0403, pid: 0x6001, .. }));
    }
}
