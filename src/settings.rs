//! Settings for the serial link, the boot-loader menu and the Xmodem transfer.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values. The protocol timings and budgets
//! have been chosen empirically against the standalone boot-loader; they are
//! defaults, not requirements, and can all be tuned.

use std::time::Duration;

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::bootloader::WINDOW_CAPACITY;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by `ncpboot` and acts as a
/// [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for the settings.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// The tail of the boot-loader menu, printed when it is ready for a
    /// command.
    pub prompt: Vec<u8>,
    /// Byte sent to make the boot-loader print its menu again.
    pub provoke_byte: u8,
    /// Menu command starting an image upload.
    pub download_command: u8,
    /// Menu command running the application image.
    pub run_command: u8,
    /// Maximum number of bytes received while waiting for the prompt.
    pub prompt_byte_budget: usize,
    /// Maximum number of bytes received while waiting for the Xmodem start
    /// character after the download command.
    pub start_byte_budget: usize,
    /// How long to wait for any single byte during the menu handshake.
    pub handshake_byte_timeout: Duration,

    /// How long to wait for the receiver to answer a block or the EOT.
    pub block_timeout: Duration,
    /// Total number of send attempts per block, including the first one.
    pub max_attempts: usize,
    /// How long to wait for the start character when the session was not
    /// started immediately.
    pub start_timeout: Duration,

    /// Number of bytes read from the container at a time.
    pub chunk_size: u32,
    /// Progress granularity, in percent.
    pub progress_step: u8,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                prompt: b"BL >".to_vec(),
                provoke_byte: b'\r',
                download_command: b'1',
                run_command: b'2',
                prompt_byte_budget: 200,
                start_byte_budget: 20,
                handshake_byte_timeout: Duration::from_secs(1),
                block_timeout: Duration::from_secs(3),
                max_attempts: 5,
                start_timeout: Duration::from_secs(3),
                chunk_size: 256,
                progress_step: 5,
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the boot-loader prompt suffix.
    ///
    /// # Panics
    ///
    /// The prompt must be non-empty and fit in the handshake sync window.
    pub fn prompt(mut self, prompt: impl AsRef<[u8]>) -> Self {
        let prompt = prompt.as_ref();
        assert!(
            !prompt.is_empty() && prompt.len() <= WINDOW_CAPACITY,
            "the prompt must be 1 to {} bytes long",
            WINDOW_CAPACITY
        );
        self.settings.prompt = prompt.to_vec();
        self
    }

    pub fn provoke_byte(mut self, byte: u8) -> Self {
        self.settings.provoke_byte = byte;
        self
    }

    pub fn download_command(mut self, command: u8) -> Self {
        self.settings.download_command = command;
        self
    }

    pub fn run_command(mut self, command: u8) -> Self {
        self.settings.run_command = command;
        self
    }

    pub fn prompt_byte_budget(mut self, budget: usize) -> Self {
        self.settings.prompt_byte_budget = budget;
        self
    }

    pub fn start_byte_budget(mut self, budget: usize) -> Self {
        self.settings.start_byte_budget = budget;
        self
    }

    pub fn handshake_byte_timeout(mut self, timeout: Duration) -> Self {
        self.settings.handshake_byte_timeout = timeout;
        self
    }

    pub fn block_timeout(mut self, timeout: Duration) -> Self {
        self.settings.block_timeout = timeout;
        self
    }

    /// Set the number of send attempts per block (at least one).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.settings.max_attempts = attempts.max(1);
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.settings.start_timeout = timeout;
        self
    }

    /// Set the container read granularity (at least one byte).
    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.settings.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the progress reporting granularity, clamped to `1..=100` percent.
    pub fn progress_step(mut self, step: u8) -> Self {
        self.settings.progress_step = step.max(1).min(100);
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            prompt: b"BL >".to_vec(),
            provoke_byte: 0x0d,
            download_command: b'1',
            run_command: b'2',
            prompt_byte_budget: 200,
            start_byte_budget: 20,
            handshake_byte_timeout: Duration::from_secs(1),
            block_timeout: Duration::from_secs(3),
            max_attempts: 5,
            start_timeout: Duration::from_secs(3),
            chunk_size: 256,
            progress_step: 5,
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB0");
}

#[test]
fn baud_rate() {
    let baud_rate = 57_600;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn parity() {
    let parity = Parity::Even;
    let settings = SettingsBuilder::new().parity(parity).finalize();
    assert_eq!(settings.parity, parity);
}

#[test]
fn prompt() {
    let settings = SettingsBuilder::new().prompt("boot> ").finalize();
    assert_eq!(settings.prompt, b"boot> ");
}

#[test]
#[should_panic]
fn prompt_too_long() {
    let _ = SettingsBuilder::new().prompt([b'x'; WINDOW_CAPACITY + 1]);
}

#[test]
fn attempts_and_chunk_size_are_at_least_one() {
    let settings = SettingsBuilder::new()
        .max_attempts(0)
        .chunk_size(0)
        .finalize();
    assert_eq!(settings.max_attempts, 1);
    assert_eq!(settings.chunk_size, 1);
}

#[test]
fn progress_step_is_clamped() {
    assert_eq!(SettingsBuilder::new().progress_step(0).finalize().progress_step, 1);
    assert_eq!(
        SettingsBuilder::new().progress_step(250).finalize().progress_step,
        100
    );
}
