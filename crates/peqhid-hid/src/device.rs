//! hidapi-backed transport and device detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::{HidError, HidResult};
use crate::transport::{InboundReports, Transport, inbound_channel};

/// FiiO / JadeAudio USB Vendor ID
pub const FIIO_VID: u16 = 0x2972;

/// Size of the input report buffer.
const INPUT_REPORT_SIZE: usize = 64;

/// How long the reader holds the device per read, in milliseconds.
const READ_SLICE_MS: i32 = 20;

/// Pause between reads so writers can take the device.
const READ_PAUSE: Duration = Duration::from_millis(1);

/// Options for opening a device.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// USB vendor id to match
    pub vendor_id: u16,
    /// Exact product name to match, or any product of the vendor
    pub product_name: Option<String>,
    /// Report id prepended to output reports
    pub output_report_id: u8,
    /// Drop the leading report id byte from input reports
    pub strip_report_id: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { vendor_id: FIIO_VID, product_name: None, output_report_id: 0, strip_report_id: false }
    }
}

/// A HID device opened through hidapi.
///
/// A reader thread forwards every input report onto the inbound channel
/// until the transport is dropped or the receiver goes away.
pub struct HidapiTransport {
    device: Arc<Mutex<HidDevice>>,
    product_name: String,
    output_report_id: u8,
    running: Arc<AtomicBool>,
}

impl HidapiTransport {
    /// Find and open the first matching device.
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if nothing matches, or a transport error if
    /// hidapi fails.
    pub fn detect(options: &OpenOptions) -> HidResult<(Self, InboundReports)> {
        let api = HidApi::new().map_err(|e| HidError::Transport(e.to_string()))?;

        for info in api.device_list() {
            if info.vendor_id() != options.vendor_id {
                continue;
            }
            let product = info.product_string().unwrap_or_default();
            if options.product_name.as_deref().is_some_and(|wanted| wanted != product) {
                debug!(product, "Skipping non-matching product");
                continue;
            }

            let device = info.open_device(&api).map_err(|e| HidError::Transport(e.to_string()))?;
            info!(
                product,
                vid = format_args!("{:04x}", info.vendor_id()),
                pid = format_args!("{:04x}", info.product_id()),
                path = %info.path().to_string_lossy(),
                "PEQ device detected"
            );
            return Ok(Self::spawn(device, product.to_string(), options));
        }

        debug!(vendor_id = options.vendor_id, "No PEQ device found");
        Err(HidError::DeviceNotFound)
    }

    fn spawn(device: HidDevice, product_name: String, options: &OpenOptions) -> (Self, InboundReports) {
        let (tx, rx) = inbound_channel();
        let device = Arc::new(Mutex::new(device));
        let running = Arc::new(AtomicBool::new(true));

        let reader_device = Arc::clone(&device);
        let reader_running = Arc::clone(&running);
        let strip = options.strip_report_id;
        let spawned = std::thread::Builder::new()
            .name("peqhid-reader".to_string())
            .spawn(move || read_loop(&reader_device, &reader_running, strip, &tx));
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn HID reader thread");
            running.store(false, Ordering::SeqCst);
        }

        let transport = Self { device, product_name, output_report_id: options.output_report_id, running };
        (transport, rx)
    }
}

fn read_loop(device: &Mutex<HidDevice>, running: &AtomicBool, strip_report_id: bool, tx: &mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; INPUT_REPORT_SIZE];

    while running.load(Ordering::SeqCst) {
        let read = device.lock().read_timeout(&mut buf, READ_SLICE_MS);
        match read {
            Ok(0) => {}
            Ok(len) => {
                let start = usize::from(strip_report_id && len > 1);
                trace!(len, "Input report");
                if tx.blocking_send(buf[start..len].to_vec()).is_err() {
                    debug!("Inbound receiver dropped, stopping reader");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "HID read failed, stopping reader");
                break;
            }
        }
        std::thread::sleep(READ_PAUSE);
    }
}

impl Transport for HidapiTransport {
    fn open(&mut self) -> HidResult<()> {
        // hidapi handles are open from detection onwards
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn product_name(&self) -> &str {
        &self.product_name
    }

    fn output_report_id(&self) -> u8 {
        self.output_report_id
    }

    fn send_report(&self, report_id: u8, data: &[u8]) -> HidResult<()> {
        let mut report = Vec::with_capacity(data.len() + 1);
        report.push(report_id);
        report.extend_from_slice(data);

        self.device.lock().write(&report).map_err(|e| HidError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl Drop for HidapiTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
