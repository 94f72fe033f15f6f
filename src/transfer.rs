//! One complete NCP update, from a stored OTA container to a rebooted
//! device.
//!
//! **Example** - Flashing the upgrade image of an OTA file:
//! ```no_run
//! use std::fs::File;
//! use ncpboot::{ota::{OtaFile, UPGRADE_IMAGE_TAG}, open_and_setup_port, SettingsBuilder, Transfer};
//!
//! let settings = SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
//! let mut port = open_and_setup_port(&settings).unwrap();
//! let mut ota = OtaFile::new(File::open("ncp.ota").unwrap()).unwrap();
//! let image = ota.image_id();
//!
//! let mut show = |label: &str, percent: u8| println!("{} {}%", label, percent);
//! let report = Transfer::new(&mut port, &settings)
//!     .on_progress(&mut show)
//!     .transfer_image(&mut ota, &image, UPGRADE_IMAGE_TAG)
//!     .unwrap();
//! assert!(report.is_complete());
//! ```

use std::{io, sync::atomic::AtomicBool};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    bootloader::{Handshake, HandshakeError},
    ota::{ImageId, ImageStorage, OtaError, TagRecord},
    settings::Settings,
    transport::Transport,
    xmodem::{SessionStats, Xmodem, XmodemError},
};

/// Label passed to the progress sink.
pub const PROGRESS_LABEL: &str = "Uploading";

// =============================================================================
// Public Interface
// =============================================================================

/// How far a failed transfer went.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    /// Nothing was sent to the boot-loader's receiver. The device still runs
    /// whatever it ran before and the update can be retried as is.
    BeforeData,
    /// The boot-loader was armed and may have written part of the image.
    /// The device state is unknown until a whole update goes through.
    DataSent,
}

/// Why a transfer failed.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("image lookup failed: {0}")]
    Lookup(OtaError),
    #[error("boot-loader handshake failed: {0}")]
    Handshake(HandshakeError),
    #[error("failed to read {length} bytes at {offset:#x} from the image: {source}")]
    Read {
        offset: u32,
        length: u32,
        source: io::Error,
    },
    #[error("short read at {offset:#x}: expected {expected} bytes, got {got}")]
    ShortRead {
        offset: u32,
        expected: u32,
        got: usize,
    },
    #[error("transfer aborted: {0}")]
    Aborted(XmodemError),
}
impl TransferError {
    pub fn phase(&self) -> Phase {
        match self {
            TransferError::Lookup(_) | TransferError::Handshake(_) => Phase::BeforeData,
            _ => Phase::DataSent,
        }
    }

    /// Whether the device was left untouched.
    pub fn is_safe_to_retry(&self) -> bool {
        self.phase() == Phase::BeforeData
    }
}

/// What happened to the final run command.
#[derive(Debug)]
pub enum RebootStatus {
    Rebooted,
    /// The image went through but the boot-loader menu could not be reached
    /// afterwards. The device usually recovers on its own.
    Failed(HandshakeError),
}

/// Outcome of a transfer whose data went through.
#[derive(Debug)]
pub struct TransferReport {
    /// The sub-image that was sent.
    pub tag: TagRecord,
    pub stats: SessionStats,
    pub reboot: RebootStatus,
}
impl TransferReport {
    /// `true` only when the data went through and the device was told to
    /// run it.
    pub fn is_complete(&self) -> bool {
        matches!(self.reboot, RebootStatus::Rebooted)
    }
}

/// Drives one update over a borrowed transport. Hooks are optional.
pub struct Transfer<'a> {
    transport: &'a mut dyn Transport,
    settings: &'a Settings,
    progress: Option<&'a mut dyn FnMut(&str, u8)>,
    watchdog: Option<&'a mut dyn FnMut()>,
    cancel: Option<&'a AtomicBool>,
}
impl<'a> Transfer<'a> {
    pub fn new(transport: &'a mut dyn Transport, settings: &'a Settings) -> Self {
        Transfer {
            transport,
            settings,
            progress: None,
            watchdog: None,
            cancel: None,
        }
    }

    /// Report progress to `sink`, each time another step of
    /// [`progress_step`](Settings::progress_step) percent is crossed.
    pub fn on_progress(mut self, sink: &'a mut dyn FnMut(&str, u8)) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Call `watchdog` at least once per block.
    pub fn with_watchdog(mut self, watchdog: &'a mut dyn FnMut()) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Abort between blocks once `cancel` is set.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Send the sub-image `tag_id` of the container `image` to the
    /// boot-loader, then tell the device to run it.
    ///
    /// A failure of the final run command does not fail the transfer; it is
    /// reported in the returned [`TransferReport`].
    pub fn transfer_image(
        &mut self,
        storage: &mut dyn ImageStorage,
        image: &ImageId,
        tag_id: u16,
    ) -> Result<TransferReport, TransferError> {
        let tag = storage.locate(image, tag_id).map_err(TransferError::Lookup)?;
        let end = tag.end().ok_or_else(|| {
            TransferError::Lookup(OtaError::BadRange {
                offset: tag.offset,
                size: tag.size,
            })
        })?;
        info!(
            "image {} tag {:#06x}: {} bytes at {:#x}",
            image, tag_id, tag.size, tag.offset
        );

        let mut handshake = Handshake::new(&mut *self.transport, self.settings);
        if let Some(cancel) = self.cancel {
            handshake = handshake.with_cancel(cancel);
        }
        handshake.begin().map_err(TransferError::Handshake)?;

        let stats = self.stream(storage, image, &tag, end)?;

        let reboot = match Handshake::new(&mut *self.transport, self.settings).reboot_device() {
            Ok(()) => {
                info!("device rebooted");
                RebootStatus::Rebooted
            }
            Err(error) => {
                warn!("image sent but the device could not be rebooted: {}", error);
                RebootStatus::Failed(error)
            }
        };

        Ok(TransferReport { tag, stats, reboot })
    }

    /// Pump `[tag.offset, end)` from the storage into an Xmodem session
    /// started right after the handshake.
    fn stream(
        &mut self,
        storage: &mut dyn ImageStorage,
        image: &ImageId,
        tag: &TagRecord,
        end: u32,
    ) -> Result<SessionStats, TransferError> {
        let mut xmodem = Xmodem::new(&mut *self.transport, self.settings);
        if let Some(watchdog) = self.watchdog.as_mut() {
            xmodem = xmodem.with_watchdog(&mut **watchdog);
        }
        if let Some(cancel) = self.cancel {
            xmodem = xmodem.with_cancel(cancel);
        }
        xmodem.init_session(true);

        let mut progress = Progress::new(tag.size, self.settings.progress_step);
        let chunk_size = self.settings.chunk_size.max(1);
        let mut cursor = tag.offset;

        if tag.size == 0 {
            xmodem.send_data(&[], true).map_err(TransferError::Aborted)?;
        }
        while cursor < end {
            let length = chunk_size.min(end - cursor);
            let chunk = storage
                .read_range(image, cursor, length)
                .map_err(|source| TransferError::Read {
                    offset: cursor,
                    length,
                    source,
                })?;
            if chunk.len() != length as usize {
                return Err(TransferError::ShortRead {
                    offset: cursor,
                    expected: length,
                    got: chunk.len(),
                });
            }

            cursor += length;
            xmodem
                .send_data(&chunk, cursor == end)
                .map_err(TransferError::Aborted)?;

            if let Some(percent) = progress.advance(length) {
                debug!("{}% ({}/{})", percent, progress.done, progress.total);
                if let Some(sink) = self.progress.as_mut() {
                    sink(PROGRESS_LABEL, percent);
                }
            }
        }
        if tag.size == 0 {
            if let Some(sink) = self.progress.as_mut() {
                sink(PROGRESS_LABEL, 100);
            }
        }

        Ok(xmodem.stats())
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Linear progress over the sub-image, reported in steps.
#[derive(Debug)]
struct Progress {
    total: u32,
    done: u32,
    step: u8,
    last_reported: Option<u8>,
}
impl Progress {
    fn new(total: u32, step: u8) -> Self {
        Progress {
            total,
            done: 0,
            step: step.max(1),
            last_reported: None,
        }
    }

    /// Account for `bytes` more, and return the percentage to report if a
    /// new step was crossed. Completion is always reported.
    fn advance(&mut self, bytes: u32) -> Option<u8> {
        self.done = self.done.saturating_add(bytes).min(self.total);
        let percent = if self.total == 0 || self.done == self.total {
            100
        } else {
            (u64::from(self.done) * 100 / u64::from(self.total)) as u8
        };
        let reached = if percent == 100 {
            100
        } else {
            percent / self.step * self.step
        };
        match self.last_reported {
            Some(last) if last >= reached => None,
            _ => {
                self.last_reported = Some(reached);
                Some(reached)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, io::Cursor, sync::atomic::Ordering, time::Duration};

    use super::*;
    use crate::ota::{OtaFile, UPGRADE_IMAGE_TAG};
    use crate::utils::mock::{bootloader, frames, MockTransport, MENU};
    use crate::xmodem::{ACK, BLOCK_SIZE, EOT, NAK, PAD};
    use crate::SettingsBuilder;

    const ID: ImageId = ImageId {
        manufacturer_code: 0x1002,
        image_type: 0x0001,
        file_version: 0x0000_0105,
    };

    /// Storage holding one container in memory, recording every read.
    struct MemoryStorage {
        tags: Vec<TagRecord>,
        bytes: Vec<u8>,
        reads: Vec<(u32, u32)>,
        short_reads: bool,
    }
    impl MemoryStorage {
        fn new(tag: TagRecord) -> Self {
            let bytes = (0..tag.end().unwrap_or(0)).map(|i| (i % 251) as u8).collect();
            MemoryStorage {
                tags: vec![tag],
                bytes,
                reads: vec![],
                short_reads: false,
            }
        }

        fn bytes_read(&self) -> u32 {
            self.reads.iter().map(|(_, length)| length).sum()
        }
    }
    impl ImageStorage for MemoryStorage {
        fn locate(&mut self, id: &ImageId, tag_id: u16) -> Result<TagRecord, OtaError> {
            if *id != ID {
                return Err(OtaError::UnknownImage(*id));
            }
            crate::ota::find_tag(&self.tags, tag_id)
        }

        fn read_range(&mut self, _id: &ImageId, offset: u32, length: u32) -> io::Result<Vec<u8>> {
            self.reads.push((offset, length));
            let start = offset as usize;
            let end = (start + length as usize).min(self.bytes.len());
            if self.short_reads {
                return Ok(self.bytes[start..end - 1].to_vec());
            }
            Ok(self.bytes[start..end].to_vec())
        }
    }

    fn settings() -> Settings {
        SettingsBuilder::new()
            .handshake_byte_timeout(Duration::from_millis(1))
            .start_timeout(Duration::from_millis(1))
            .block_timeout(Duration::from_millis(1))
            .finalize()
    }

    fn tag_0100() -> TagRecord {
        TagRecord {
            tag_id: 0x0100,
            offset: 4096,
            size: 300,
        }
    }

    #[test]
    fn end_to_end() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));

        let report = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.stats.blocks_acked, 3);
        assert!(report.stats.eot_acknowledged);

        assert_eq!(storage.bytes_read(), 300);
        assert_eq!(storage.reads, vec![(4096, 256), (4352, 44)]);

        let blocks = frames(&port.writes);
        assert_eq!(blocks.len(), 3);
        let image = &storage.bytes[4096..4396];
        assert_eq!(&blocks[0][3..131], &image[..128]);
        assert_eq!(&blocks[1][3..131], &image[128..256]);
        assert_eq!(&blocks[2][3..47], &image[256..]);
        assert!(blocks[2][47..131].iter().all(|b| *b == PAD));

        // Menu, upload, three blocks, EOT, menu, run.
        assert_eq!(port.writes.len(), 8);
        assert_eq!(port.writes[..2], [vec![b'\r'], vec![b'1']]);
        assert_eq!(port.writes.iter().filter(|w| **w == [EOT]).count(), 1);
        assert_eq!(port.writes[6..], [vec![b'\r'], vec![b'2']]);
    }

    #[test]
    fn end_to_end_from_an_ota_file() {
        let image: Vec<u8> = (0..1000u32).map(|i| (i * 13) as u8).collect();
        let bytes = crate::ota::container(
            crate::ota::TEST_IMAGE_ID,
            &[(UPGRADE_IMAGE_TAG, &image[..]), (0x0001, &[0u8; 72][..])],
        );
        let mut ota = OtaFile::new(Cursor::new(bytes)).unwrap();
        let id = ota.image_id();

        let settings = settings();
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        let report = Transfer::new(&mut port, &settings)
            .transfer_image(&mut ota, &id, UPGRADE_IMAGE_TAG)
            .unwrap();
        assert!(report.is_complete());

        let sent: Vec<u8> = frames(&port.writes)
            .iter()
            .flat_map(|f| f[3..3 + BLOCK_SIZE].to_vec())
            .collect();
        assert_eq!(sent.len(), 8 * BLOCK_SIZE);
        assert_eq!(&sent[..1000], &image[..]);
    }

    #[test]
    fn missing_tag_fails_before_touching_the_device() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0200)
            .unwrap_err();
        assert!(matches!(error, TransferError::Lookup(OtaError::TagNotFound(0x0200))));
        assert!(error.is_safe_to_retry());
        assert!(port.writes.is_empty());
        assert!(storage.reads.is_empty());
    }

    #[test]
    fn handshake_failure_is_safe_to_retry() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(|_: &[u8]| b"garbage".to_vec());

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(error, TransferError::Handshake(_)));
        assert_eq!(error.phase(), Phase::BeforeData);
        assert!(frames(&port.writes).is_empty());
        assert!(storage.reads.is_empty());
    }

    #[test]
    fn aborted_transfer_does_not_reboot() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|number, _| if number == 2 { NAK } else { ACK }));

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(
            error,
            TransferError::Aborted(XmodemError::RetriesExhausted { block: 2, .. })
        ));
        assert_eq!(error.phase(), Phase::DataSent);
        assert!(!error.is_safe_to_retry());
        assert_eq!(frames(&port.writes).len(), 1 + 5);
        assert!(!port.writes.contains(&vec![b'2']));
    }

    #[test]
    fn short_read_aborts() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        storage.short_reads = true;
        let mut port = MockTransport::new(bootloader(|_, _| ACK));

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(
            error,
            TransferError::ShortRead {
                offset: 4096,
                expected: 256,
                got: 255
            }
        ));
        assert_eq!(error.phase(), Phase::DataSent);
        assert!(frames(&port.writes).is_empty());
    }

    #[test]
    fn reboot_failure_is_reported_not_escalated() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut menus = 0;
        let mut device = bootloader(|_, _| ACK);
        let mut port = MockTransport::new(move |bytes: &[u8]| match bytes {
            // The menu only shows up once; the device goes quiet after the
            // upload.
            [b'\r'] => {
                menus += 1;
                if menus == 1 {
                    MENU.to_vec()
                } else {
                    vec![]
                }
            }
            _ => device(bytes),
        });

        let report = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap();
        assert!(!report.is_complete());
        assert!(matches!(report.reboot, RebootStatus::Failed(HandshakeError::Timeout { .. })));
        assert_eq!(report.stats.blocks_acked, 3);
        assert!(!port.writes.contains(&vec![b'2']));
    }

    #[test]
    fn empty_sub_image() {
        let settings = settings();
        let mut storage = MemoryStorage::new(TagRecord {
            tag_id: 0x0100,
            offset: 16,
            size: 0,
        });
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        let percents = RefCell::new(vec![]);
        let mut sink = |_: &str, percent: u8| percents.borrow_mut().push(percent);

        let report = Transfer::new(&mut port, &settings)
            .on_progress(&mut sink)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap();
        assert!(report.is_complete());
        assert!(frames(&port.writes).is_empty());
        assert_eq!(port.writes.iter().filter(|w| **w == [EOT]).count(), 1);
        assert_eq!(*percents.borrow(), vec![100]);
    }

    #[test]
    fn progress_is_reported_in_steps() {
        let settings = SettingsBuilder::new()
            .handshake_byte_timeout(Duration::from_millis(1))
            .start_timeout(Duration::from_millis(1))
            .chunk_size(16)
            .finalize();
        let mut storage = MemoryStorage::new(TagRecord {
            tag_id: 0x0100,
            offset: 0,
            size: 1000,
        });
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        let reported = RefCell::new(vec![]);
        let mut sink = |label: &str, percent: u8| {
            assert_eq!(label, PROGRESS_LABEL);
            reported.borrow_mut().push(percent)
        };
        let mut kicks = 0;
        let mut watchdog = || kicks += 1;

        Transfer::new(&mut port, &settings)
            .on_progress(&mut sink)
            .with_watchdog(&mut watchdog)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap();

        let reported = reported.into_inner();
        assert_eq!(storage.reads.len(), 63);
        assert_eq!(reported.first(), Some(&0));
        assert_eq!(reported.last(), Some(&100));
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
        assert!(reported.iter().all(|p| p % 5 == 0));
        assert_eq!(reported.len(), 21);
        // Eight blocks and the EOT.
        assert_eq!(kicks, 9);
    }

    #[test]
    fn cancelled_before_the_handshake() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        let cancel = AtomicBool::new(true);

        let error = Transfer::new(&mut port, &settings)
            .with_cancel(&cancel)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(error, TransferError::Handshake(HandshakeError::Cancelled)));
        assert!(error.is_safe_to_retry());
        assert!(port.writes.is_empty());
    }

    #[test]
    fn cancelled_between_blocks() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        let cancel = AtomicBool::new(false);
        // Pressed while the first block is on its way.
        let mut press = || cancel.store(true, Ordering::SeqCst);

        let error = Transfer::new(&mut port, &settings)
            .with_cancel(&cancel)
            .with_watchdog(&mut press)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(error, TransferError::Aborted(XmodemError::Cancelled)));
        assert_eq!(error.phase(), Phase::DataSent);
        assert_eq!(frames(&port.writes).len(), 1);
        assert!(!port.writes.contains(&vec![b'2']));
    }

    #[test]
    fn overflowing_range_fails_before_touching_the_device() {
        let settings = settings();
        let mut storage = MemoryStorage::new(TagRecord {
            tag_id: 0x0100,
            offset: 0xFFFF_FF00,
            size: 0x200,
        });
        let mut port = MockTransport::new(bootloader(|_, _| ACK));

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(
            error,
            TransferError::Lookup(OtaError::BadRange {
                offset: 0xFFFF_FF00,
                size: 0x200
            })
        ));
        assert!(error.is_safe_to_retry());
        assert!(port.writes.is_empty());
        assert!(storage.reads.is_empty());
    }

    #[test]
    fn zero_chunk_size_reads_a_byte_at_a_time() {
        let mut settings = settings();
        settings.chunk_size = 0;
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));

        let report = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(storage.reads.len(), 300);
        assert!(storage.reads.iter().all(|(_, length)| *length == 1));
        assert_eq!(frames(&port.writes).len(), 3);
    }

    #[test]
    fn link_lost_mid_transfer() {
        let settings = settings();
        let mut storage = MemoryStorage::new(tag_0100());
        let mut port = MockTransport::new(bootloader(|_, _| ACK));
        // Menu, upload command and the first block go through.
        port.fail_sends_after(3);

        let error = Transfer::new(&mut port, &settings)
            .transfer_image(&mut storage, &ID, 0x0100)
            .unwrap_err();
        assert!(matches!(error, TransferError::Aborted(XmodemError::Io(_))));
        assert_eq!(error.phase(), Phase::DataSent);
        assert_eq!(frames(&port.writes).len(), 1);
        assert!(!port.writes.contains(&vec![b'2']));
    }

    #[test]
    fn progress_steps() {
        let mut progress = Progress::new(200, 5);
        assert_eq!(progress.advance(1), Some(0));
        assert_eq!(progress.advance(1), None);
        assert_eq!(progress.advance(8), Some(5));
        assert_eq!(progress.advance(100), Some(55));
        assert_eq!(progress.advance(89), Some(95));
        assert_eq!(progress.advance(1), Some(100));
        assert_eq!(progress.advance(1), None);

        let mut progress = Progress::new(100, 7);
        assert_eq!(progress.advance(99), Some(98));
        assert_eq!(progress.advance(1), Some(100));
    }
}
