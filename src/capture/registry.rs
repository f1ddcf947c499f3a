//! Device registry
//!
//! Tracks the set of capture devices and the permission state. The device
//! list is only ever replaced wholesale by a fresh enumeration.

use super::traits::{Device, DeviceError, MediaBackend, PermissionState, TrackKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared, read-mostly view of the available capture devices
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn MediaBackend>,
    devices: Arc<RwLock<Vec<Device>>>,
    permission: Arc<RwLock<PermissionState>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            devices: Arc::new(RwLock::new(Vec::new())),
            permission: Arc::new(RwLock::new(PermissionState::Prompt)),
        }
    }

    pub fn backend(&self) -> Arc<dyn MediaBackend> {
        self.backend.clone()
    }

    /// Re-enumerate devices, replacing the previous set
    pub async fn enumerate(&self) -> Result<Vec<Device>, DeviceError> {
        let devices = self.backend.enumerate().await?;

        tracing::debug!(
            "Enumerated {} devices via {} ({} video, {} audio)",
            devices.len(),
            self.backend.name(),
            devices.iter().filter(|d| d.kind == TrackKind::Video).count(),
            devices.iter().filter(|d| d.kind == TrackKind::Audio).count(),
        );

        *self.devices.write() = devices.clone();
        Ok(devices)
    }

    /// Request capture permission for `kinds`
    ///
    /// A denial is recorded and returned as-is; it is never retried here.
    /// On grant the devices are re-enumerated so labels become available.
    pub async fn request_permission(&self, kinds: &[TrackKind]) -> Result<(), DeviceError> {
        match self.backend.request_permission(kinds).await {
            Ok(()) => {
                *self.permission.write() = PermissionState::Granted;
                tracing::info!("Capture permission granted");
                self.enumerate().await?;
                Ok(())
            }
            Err(err) => {
                if matches!(err, DeviceError::PermissionDenied(_)) {
                    *self.permission.write() = PermissionState::Denied;
                }
                tracing::warn!("Capture permission request failed: {}", err);
                Err(err)
            }
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.read()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    pub fn devices_of(&self, kind: TrackKind) -> Vec<Device> {
        self.devices
            .read()
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    pub fn find(&self, kind: TrackKind, device_id: &str) -> Option<Device> {
        self.devices
            .read()
            .iter()
            .find(|d| d.kind == kind && d.id == device_id)
            .cloned()
    }

    pub fn first_of(&self, kind: TrackKind) -> Option<Device> {
        self.devices.read().iter().find(|d| d.kind == kind).cloned()
    }

    /// Keep `preferred` if it is still present, otherwise fall back to the
    /// first device of that kind.
    pub fn resolve(&self, kind: TrackKind, preferred: Option<&str>) -> Option<String> {
        preferred
            .and_then(|id| self.find(kind, id))
            .or_else(|| self.first_of(kind))
            .map(|d| d.id)
    }

    pub fn subscribe_changes(&self) -> Option<broadcast::Receiver<()>> {
        self.backend.device_changes()
    }
}
