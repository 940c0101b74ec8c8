use futures::future::BoxFuture;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serialport::SerialPortType;
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

use crate::{
    device::{Connector, DeviceSettings, SerialIo},
    serial::error::SerialPortError,
};

/// Opens real serial ports through `tokio-serial`.
///
/// Ports are opened 8N1 without flow control.
#[derive(Debug, Default, Clone)]
pub struct SerialPortConnector;

impl SerialPortConnector {
    /// A connector for real hardware.
    pub fn new() -> Self {
        Self
    }
}

fn try_create_serial_port(
    settings: &DeviceSettings,
) -> Result<tokio_serial::SerialStream, SerialPortError> {
    let stream = tokio_serial::new(&settings.port, settings.baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;

    Ok(stream)
}

impl Connector for SerialPortConnector {
    fn connect(
        &self,
        settings: &DeviceSettings,
    ) -> BoxFuture<'static, Result<Box<dyn SerialIo>, SerialPortError>> {
        let settings = settings.clone();

        Box::pin(async move {
            info!(%settings, "Opening serial port");

            let stream = try_create_serial_port(&settings)?;

            Ok(Box::new(stream) as Box<dyn SerialIo>)
        })
    }
}

/// A serial device connected to this machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortInfo {
    /// What to pass when opening, e.g. `COM3` or `/dev/ttyUSB0`.
    pub port: String,

    /// Human readable description, if known.
    pub description: String,

    /// Hardware identification, e.g. `USB VID:PID=2341:0043`.
    pub hwid: String,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let (description, hwid) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = usb
                    .product
                    .or(usb.manufacturer)
                    .unwrap_or_else(|| "USB serial device".into());

                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial_number) = usb.serial_number {
                    hwid += &format!(" SER={serial_number}");
                }

                (description, hwid)
            }
            SerialPortType::PciPort => ("PCI serial device".into(), "PCI".into()),
            SerialPortType::BluetoothPort => ("Bluetooth serial device".into(), "BTH".into()),
            SerialPortType::Unknown => ("n/a".into(), "n/a".into()),
        };

        Self {
            port: info.port_name,
            description,
            hwid,
        }
    }
}

/// List the serial devices connected to this machine, sorted by port name.
///
/// Enumeration problems are logged and result in an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(PortInfo::from)
            .filter(|info| !info.port.is_empty())
            .sorted_by(|a, b| a.port.cmp(&b.port))
            .collect(),
        Err(e) => {
            warn!(?e, "Could not enumerate serial ports");
            vec![]
        }
    }
}
