//! Device selection and management for video pipelines
//!
//! A [`DeviceContext`] is chosen once per model manager. It starts on the
//! accelerator when one is reachable and falls back to CPU otherwise. The
//! fallback is one-way: once the accelerator disappears the context stays
//! on CPU for the rest of its lifetime.

use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inference device for pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceDevice {
    /// CPU inference (always available)
    Cpu,
    /// NVIDIA CUDA GPU with device index
    Cuda(usize),
}

impl InferenceDevice {
    /// Check if this is an accelerator
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda(_))
    }

    /// Weight precision appropriate for this device
    pub fn precision(&self) -> Precision {
        match self {
            Self::Cpu => Precision::F32,
            Self::Cuda(_) => Precision::Bf16,
        }
    }
}

impl std::fmt::Display for InferenceDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{}", idx),
        }
    }
}

/// Numeric precision pipelines are loaded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// bfloat16, used on accelerators
    Bf16,
    /// float32, used on CPU
    F32,
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bf16 => write!(f, "bf16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Accelerator runtime hooks
///
/// Implementations report reachability and release memory the runtime keeps
/// cached after pipelines are dropped.
pub trait Accelerator: Send + Sync {
    /// Whether the accelerator with this index is reachable right now
    fn is_available(&self, index: usize) -> bool;

    /// Return cached device memory to the driver
    fn release_memory(&self);
}

/// Accelerator backed by the compiled-in CUDA runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAccelerator;

impl Accelerator for SystemAccelerator {
    #[cfg(feature = "cuda")]
    fn is_available(&self, index: usize) -> bool {
        candle_core::utils::cuda_is_available() && candle_core::Device::new_cuda(index).is_ok()
    }

    #[cfg(not(feature = "cuda"))]
    fn is_available(&self, _index: usize) -> bool {
        false
    }

    fn release_memory(&self) {
        // Candle frees device buffers when the owning tensors drop; there is
        // no allocator cache to flush.
        debug!("Accelerator memory release requested");
    }
}

/// Device selector with automatic fallback
pub struct DeviceSelector;

impl DeviceSelector {
    /// Select the best available device
    ///
    /// Priority: CUDA → CPU
    pub fn select_best(accelerator: &dyn Accelerator) -> InferenceDevice {
        if accelerator.is_available(0) {
            info!("CUDA device available, using GPU acceleration");
            return InferenceDevice::Cuda(0);
        }

        info!("Using CPU for inference (no GPU acceleration available)");
        InferenceDevice::Cpu
    }

    /// Select device from string configuration
    ///
    /// Accepts: "auto", "cpu", "cuda", "cuda:N". An explicit CUDA device is
    /// returned even when unreachable; pair it with
    /// [`DeviceContext::with_required_accelerator`] to reject requests
    /// instead of running on CPU.
    pub fn from_config(config: &str, accelerator: &dyn Accelerator) -> Result<InferenceDevice> {
        match config.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::select_best(accelerator)),
            "cpu" => Ok(InferenceDevice::Cpu),
            "cuda" | "gpu" => Ok(InferenceDevice::Cuda(0)),
            s if s.starts_with("cuda:") => s["cuda:".len()..]
                .parse()
                .map(InferenceDevice::Cuda)
                .map_err(|_| Error::InvalidInput(format!("Invalid CUDA device index in '{}'", s))),
            other => Err(Error::InvalidInput(format!(
                "Unknown device: {}. Valid options: auto, cpu, cuda, cuda:N",
                other
            ))),
        }
    }
}

/// Execution device shared by every pipeline a manager loads
pub struct DeviceContext {
    /// Device chosen at construction
    selected: InferenceDevice,
    /// Set once the accelerator has been lost; never cleared
    downgraded: AtomicBool,
    /// Reject work when no accelerator is reachable
    require_accelerator: bool,
    accelerator: Arc<dyn Accelerator>,
}

impl DeviceContext {
    pub fn new(selected: InferenceDevice, accelerator: Arc<dyn Accelerator>) -> Self {
        Self {
            selected,
            downgraded: AtomicBool::new(false),
            require_accelerator: false,
            accelerator,
        }
    }

    /// CPU-only context, mostly useful for tests and development
    pub fn cpu() -> Self {
        Self::new(InferenceDevice::Cpu, Arc::new(SystemAccelerator))
    }

    /// Require an accelerator for generation
    pub fn with_required_accelerator(mut self, required: bool) -> Self {
        self.require_accelerator = required;
        self
    }

    /// Current device, downgrading to CPU if the accelerator went away
    pub fn current(&self) -> InferenceDevice {
        let InferenceDevice::Cuda(index) = self.selected else {
            return self.selected;
        };

        if self.downgraded.load(Ordering::Acquire) {
            return InferenceDevice::Cpu;
        }

        if self.accelerator.is_available(index) {
            return self.selected;
        }

        if self
            .downgraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(device = %self.selected, "CUDA not available, falling back to CPU");
        }
        InferenceDevice::Cpu
    }

    /// Device chosen at construction, before any fallback
    pub fn selected(&self) -> InferenceDevice {
        self.selected
    }

    /// Whether the selected accelerator is reachable right now
    pub fn accelerator_available(&self) -> bool {
        match self.selected {
            InferenceDevice::Cuda(index) => self.accelerator.is_available(index),
            InferenceDevice::Cpu => self.accelerator.is_available(0),
        }
    }

    /// Whether the context has permanently fallen back to CPU
    pub fn is_downgraded(&self) -> bool {
        self.downgraded.load(Ordering::Acquire)
    }

    /// Whether work is rejected when no accelerator is reachable
    pub fn requires_accelerator(&self) -> bool {
        self.require_accelerator
    }

    /// Fail with [`Error::DeviceUnavailable`] when an accelerator is
    /// required but unreachable
    ///
    /// Without the requirement a lost accelerator only downgrades to CPU.
    pub fn ensure_available(&self) -> Result<()> {
        if !self.require_accelerator || self.current().is_accelerator() {
            return Ok(());
        }

        let device = match self.selected {
            InferenceDevice::Cpu => InferenceDevice::Cuda(0),
            other => other,
        };
        Err(Error::DeviceUnavailable {
            device: device.to_string(),
        })
    }

    /// Ask the accelerator runtime to release cached memory
    pub fn release_memory(&self) {
        if self.selected.is_accelerator() {
            self.accelerator.release_memory();
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("selected", &self.selected)
            .field("downgraded", &self.is_downgraded())
            .field("require_accelerator", &self.require_accelerator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Accelerator whose availability can be flipped from the test
    #[derive(Default)]
    struct ToggleAccelerator {
        available: AtomicBool,
        releases: AtomicUsize,
    }

    impl ToggleAccelerator {
        fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                available: AtomicBool::new(available),
                releases: AtomicUsize::new(0),
            })
        }

        fn set(&self, available: bool) {
            self.available.store(available, Ordering::SeqCst);
        }
    }

    impl Accelerator for ToggleAccelerator {
        fn is_available(&self, _index: usize) -> bool {
            self.available.load(Ordering::SeqCst)
        }

        fn release_memory(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cpu_always_available() {
        let device = DeviceSelector::from_config("cpu", &SystemAccelerator).unwrap();
        assert_eq!(device, InferenceDevice::Cpu);
        assert!(!device.is_accelerator());
        assert_eq!(device.precision(), Precision::F32);
    }

    #[test]
    fn test_config_parsing() {
        let accel = ToggleAccelerator::new(true);
        assert_eq!(
            DeviceSelector::from_config("auto", accel.as_ref()).unwrap(),
            InferenceDevice::Cuda(0)
        );
        assert_eq!(
            DeviceSelector::from_config("CUDA:1", accel.as_ref()).unwrap(),
            InferenceDevice::Cuda(1)
        );
        assert!(DeviceSelector::from_config("cuda:x", accel.as_ref()).is_err());
        assert!(DeviceSelector::from_config("tpu", accel.as_ref()).is_err());

        accel.set(false);
        assert_eq!(
            DeviceSelector::from_config("auto", accel.as_ref()).unwrap(),
            InferenceDevice::Cpu
        );
    }

    #[test]
    fn test_device_display() {
        assert_eq!(InferenceDevice::Cpu.to_string(), "cpu");
        assert_eq!(InferenceDevice::Cuda(2).to_string(), "cuda:2");
        assert_eq!(InferenceDevice::Cuda(0).precision().to_string(), "bf16");
    }

    #[test]
    fn test_downgrade_is_monotonic() {
        let accel = ToggleAccelerator::new(true);
        let ctx = DeviceContext::new(InferenceDevice::Cuda(0), accel.clone());
        assert_eq!(ctx.current(), InferenceDevice::Cuda(0));

        accel.set(false);
        assert_eq!(ctx.current(), InferenceDevice::Cpu);
        assert!(ctx.is_downgraded());

        // Accelerator comes back; the context must not upgrade again
        accel.set(true);
        assert_eq!(ctx.current(), InferenceDevice::Cpu);
        assert_eq!(ctx.selected(), InferenceDevice::Cuda(0));
    }

    #[test]
    fn test_ensure_available() {
        let accel = ToggleAccelerator::new(false);

        let cpu = DeviceContext::new(InferenceDevice::Cpu, accel.clone());
        assert!(cpu.ensure_available().is_ok());

        let required = DeviceContext::new(InferenceDevice::Cpu, accel.clone())
            .with_required_accelerator(true);
        assert!(matches!(
            required.ensure_available(),
            Err(Error::DeviceUnavailable { .. })
        ));

        let cuda = DeviceContext::new(InferenceDevice::Cuda(0), accel.clone())
            .with_required_accelerator(true);
        assert!(matches!(
            cuda.ensure_available(),
            Err(Error::DeviceUnavailable { device }) if device == "cuda:0"
        ));

        // Auto-selected accelerator that went away falls back instead
        let fallback = DeviceContext::new(InferenceDevice::Cuda(0), accel.clone());
        assert!(fallback.ensure_available().is_ok());
        assert_eq!(fallback.current(), InferenceDevice::Cpu);
    }

    #[test]
    fn test_release_only_on_accelerator() {
        let accel = ToggleAccelerator::new(true);
        DeviceContext::new(InferenceDevice::Cpu, accel.clone()).release_memory();
        assert_eq!(accel.releases.load(Ordering::SeqCst), 0);

        DeviceContext::new(InferenceDevice::Cuda(0), accel.clone()).release_memory();
        assert_eq!(accel.releases.load(Ordering::SeqCst), 1);
    }
}
