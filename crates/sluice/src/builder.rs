//! Runtime construction and backend selection.

use std::sync::Arc;

use sluice_core::error::Result;
use sluice_core::Platform;
use sluice_host::HostPlatform;

use crate::runtime::{logged, Sluice};

/// Which platform a runtime is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Probe CUDA first (when compiled in) and fall back to host emulation.
    Auto,
    /// Host-memory emulation. Available in every build.
    Host,
    /// CUDA driver API, behind the `cuda` feature.
    Cuda,
}

/// Configures and builds a [`Sluice`] runtime.
///
/// ```
/// use sluice::{Backend, Sluice};
///
/// let runtime = Sluice::builder()
///     .backend(Backend::Host)
///     .devices(2)
///     .default_device(1)
///     .build()
///     .unwrap();
/// assert_eq!(runtime.current_device().unwrap(), 1);
/// ```
pub struct SluiceBuilder {
    backend: Backend,
    devices: usize,
    default_device: Option<usize>,
}

impl SluiceBuilder {
    pub(crate) fn new() -> Self {
        Self {
            backend: Backend::Auto,
            devices: 1,
            default_device: None,
        }
    }

    /// Select the backend. Defaults to [`Backend::Auto`].
    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Number of emulated devices for the host backend. Hardware backends
    /// expose whatever the driver reports and ignore this.
    #[must_use]
    pub fn devices(mut self, count: usize) -> Self {
        self.devices = count;
        self
    }

    /// Ordinal to install as the current device after construction. When
    /// unset, ordinal 0 becomes current on any platform that has a device;
    /// a zero-device platform builds with no current device at all.
    #[must_use]
    pub fn default_device(mut self, ordinal: usize) -> Self {
        self.default_device = Some(ordinal);
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Result<Sluice> {
        let (platform, backend) = select_platform(self.backend, self.devices)?;
        let count = logged("build", platform.device_count())?;
        let current = match self.default_device {
            Some(ordinal) => {
                logged("build", platform.device_handle(ordinal))?;
                Some(ordinal)
            }
            None => (count > 0).then_some(0),
        };
        tracing::info!(
            backend = ?backend,
            devices = count,
            current = ?current,
            "sluice runtime initialized"
        );
        Ok(Sluice::from_parts(platform, backend, current))
    }
}

fn select_platform(backend: Backend, devices: usize) -> Result<(Arc<dyn Platform>, Backend)> {
    match backend {
        Backend::Host => Ok((Arc::new(HostPlatform::new(devices)), Backend::Host)),
        Backend::Cuda => Ok((logged("build", cuda_platform())?, Backend::Cuda)),
        Backend::Auto => match cuda_platform() {
            Ok(platform) => Ok((platform, Backend::Cuda)),
            Err(error) => {
                tracing::debug!(error = %error, "cuda unavailable, using host emulation");
                Ok((Arc::new(HostPlatform::new(devices)), Backend::Host))
            }
        },
    }
}

#[cfg(feature = "cuda")]
fn cuda_platform() -> Result<Arc<dyn Platform>> {
    Ok(Arc::new(sluice_cuda::CudaPlatform::new()?))
}

#[cfg(not(feature = "cuda"))]
fn cuda_platform() -> Result<Arc<dyn Platform>> {
    Err(sluice_core::error::Error::RuntimeUnavailable(
        "cuda support is not compiled into this build".into(),
    ))
}

/// Backend probing without building a runtime.
pub mod availability {
    use super::Backend;

    /// Host emulation is compiled into every build.
    #[must_use]
    pub fn host_available() -> bool {
        true
    }

    /// True when the `cuda` feature is enabled and the driver loads and
    /// reports at least one device.
    #[must_use]
    pub fn cuda_available() -> bool {
        #[cfg(feature = "cuda")]
        {
            sluice_cuda::driver_available()
        }
        #[cfg(not(feature = "cuda"))]
        {
            false
        }
    }

    /// Backends that would succeed if selected explicitly, in probe order.
    #[must_use]
    pub fn available_backends() -> Vec<Backend> {
        let mut backends = vec![Backend::Host];
        if cuda_available() {
            backends.push(Backend::Cuda);
        }
        backends
    }
}
