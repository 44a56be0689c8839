//! Device transport contract.
//!
//! The transport owns the physical connection. Outbound reports go through
//! [`Transport::send_report`]; inbound reports arrive asynchronously, in no
//! particular relation to requests, on an [`InboundReports`] channel fed by
//! whatever reads the device.

use tokio::sync::mpsc;

use crate::error::HidResult;

/// Capacity of the inbound report queue.
pub const INBOUND_CAPACITY: usize = 256;

/// Receiving end of the raw inbound report stream.
pub type InboundReports = mpsc::Receiver<Vec<u8>>;

/// Create the channel a transport pushes raw inbound reports onto.
#[must_use]
pub fn inbound_channel() -> (mpsc::Sender<Vec<u8>>, InboundReports) {
    mpsc::channel(INBOUND_CAPACITY)
}

/// Access to one HID device.
pub trait Transport: Send + Sync {
    /// Open the device if it is not open yet.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened.
    fn open(&mut self) -> HidResult<()>;

    /// Whether the device is open.
    fn is_open(&self) -> bool;

    /// HID product name, used as the model key.
    fn product_name(&self) -> &str;

    /// Report id for output reports.
    fn output_report_id(&self) -> u8;

    /// Send one output report.
    ///
    /// Success means the transport delivered the report, not that the device
    /// processed it.
    ///
    /// # Errors
    /// Returns an error if the report could not be written.
    fn send_report(&self, report_id: u8, data: &[u8]) -> HidResult<()>;
}
