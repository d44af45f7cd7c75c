pub mod devices;
pub mod provider;

pub use devices::{CaptureDevices, DeviceAvailability, HeadlessDevices, MediaConstraints};
pub use provider::{LocalMediaState, LocalStreamReader, MediaSourceProvider, StreamChange};
