//! Serial port device manipulation.

use std::{
    io::{self, Read, Write},
    time::Duration,
};

use log::{debug, info, trace, warn};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use crate::{transport::Transport, Settings};

//==============================================================================
// Public Interface
//==============================================================================

/// Open the port named in `settings` and configure it. The device may still
/// be enumerating after a reset, so opening is retried a few times.
pub fn open_and_setup_port(settings: &Settings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let path = settings.path.clone().ok_or_else(|| {
        serialport::Error::new(serialport::ErrorKind::InvalidInput, "no serial port selected")
    })?;

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .open()
        },
    );
    match result {
        Ok(mut port) => {
            // Some drivers ignore the builder values on open.
            port.set_baud_rate(settings.baud_rate)?;
            port.set_data_bits(settings.data_bits)?;
            port.set_stop_bits(settings.stop_bits)?;
            port.set_parity(settings.parity)?;
            port.set_flow_control(settings.flow_control)?;
            port.clear(serialport::ClearBuffer::All)?;

            info!("Connected to {} at {} baud", path, port.baud_rate()?);
            debug!("data_bits    : {:#?}", port.data_bits()?);
            debug!("stop_bits    : {:#?}", port.stop_bits()?);
            debug!("parity       : {:#?}", port.parity()?);
            debug!("flow control : {:#?}", port.flow_control()?);

            Ok(port)
        }
        Err(err) => match err {
            retry::Error::Operation {
                error,
                total_delay,
                tries,
            } => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error)
            }
            retry::Error::Internal(_) => {
                info!("Internal retry error while opening port");
                Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "internal error while retrying to open the port",
                ))
            }
        },
    }
}

/// Serial ports to offer when no port was given, sorted by name.
///
/// USB adapters are listed as `<port>: (<manufacturer> / <product>)`; the
/// port name is everything before the first `:`. An enumeration failure is
/// logged and yields an empty list.
pub fn available_ports() -> Vec<String> {
    let ports = serialport::available_ports().unwrap_or_else(|e| {
        warn!("cannot enumerate serial ports: {}", e);
        vec![]
    });

    let mut names: Vec<String> = ports.into_iter().map(describe_port).collect();
    names.sort();
    names
}

/// The boot-loader link over a real serial port.
impl Transport for Box<dyn SerialPort> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        trace!("-> {} bytes", bytes.len());
        self.write_all(bytes)?;
        self.flush()
    }

    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        // A zero timeout would mean "block forever" to some drivers.
        let timeout = timeout.max(Duration::from_millis(1));
        self.set_timeout(timeout)?;

        let mut byte = [0u8; 1];
        match self.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn describe_port(port: SerialPortInfo) -> String {
    match port.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{}: ({} / {})",
            port.port_name,
            usb.manufacturer.unwrap_or_default(),
            usb.product.unwrap_or_default()
        ),
        _ => port.port_name,
    }
}

#[test]
fn usb_ports_are_described() {
    use serialport::UsbPortInfo;

    let usb = SerialPortInfo {
        port_name: "/dev/ttyUSB0".into(),
        port_type: SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x10C4,
            pid: 0xEA60,
            serial_number: None,
            manufacturer: Some("Silicon Labs".into()),
            product: None,
        }),
    };
    let name = describe_port(usb);
    assert_eq!(name, "/dev/ttyUSB0: (Silicon Labs / )");
    assert_eq!(name.split(':').next(), Some("/dev/ttyUSB0"));

    let virtual_port = SerialPortInfo {
        port_name: "/dev/pts/3".into(),
        port_type: SerialPortType::Unknown,
    };
    assert_eq!(describe_port(virtual_port), "/dev/pts/3");
}
