//! Capture devices and the live capture stream
//!
//! This module provides device enumeration, permission tracking and the
//! capture session that owns the hardware handles.

pub mod registry;
pub mod session;
pub mod traits;
pub mod virtual_device;

#[cfg(feature = "native")]
pub mod native;

pub use registry::DeviceRegistry;
pub use session::{CaptureSession, CaptureStream, CaptureView, StreamEvent, StreamTap, TrackSelection};
pub use traits::{
    AcquisitionError, Device, DeviceError, LiveTrack, MediaBackend, MediaFrame, PermissionState,
    TrackEnded, TrackKind,
};
pub use virtual_device::VirtualBackend;
