use std::fmt;

/// Compute hardware a run executes on. Chosen once before anything is built
/// and passed down as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cuda,
    Wgpu,
    Cpu,
}

impl Accelerator {
    /// Parallel accelerator if compiled in, else the portable GPU backend,
    /// else the CPU.
    pub fn preferred() -> Self {
        if cfg!(feature = "cuda") {
            Accelerator::Cuda
        } else if cfg!(feature = "wgpu") {
            Accelerator::Wgpu
        } else {
            Accelerator::Cpu
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Accelerator::Cuda => "cuda",
            Accelerator::Wgpu => "wgpu",
            Accelerator::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Where the forward pass runs (`compute`) and where losses and metrics are
/// computed against the labels (`host`).
///
/// Both are devices of the same backend: burn moves tensors between devices
/// of one backend but not across backends, so on a `cuda` build `host` is a
/// CUDA device too and losses are computed there. Batches are always built
/// on `host` and only moved when the two differ, e.g. across GPUs.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<D> {
    pub accelerator: Accelerator,
    pub compute: D,
    pub host: D,
}

impl<D: Clone> Placement<D> {
    pub fn new(accelerator: Accelerator, compute: D, host: D) -> Self {
        Self {
            accelerator,
            compute,
            host,
        }
    }

    /// Both roles on the same device, the usual case on a CPU build.
    pub fn single(accelerator: Accelerator, device: D) -> Self {
        Self::new(accelerator, device.clone(), device)
    }
}

impl<D: fmt::Debug> fmt::Display for Placement<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (compute {:?}, host {:?})",
            self.accelerator, self.compute, self.host
        )
    }
}

#[cfg(feature = "cuda")]
pub type ComputeBackend = burn::backend::CudaJit;

#[cfg(all(feature = "wgpu", not(feature = "cuda")))]
pub type ComputeBackend = burn::backend::Wgpu;

#[cfg(not(any(feature = "cuda", feature = "wgpu")))]
pub type ComputeBackend = burn::backend::NdArray;

/// Backend the binaries train with: the compiled-in accelerator plus autodiff.
pub type TrainingBackend = burn::backend::Autodiff<ComputeBackend>;

/// Placement on the default device of the preferred accelerator, with
/// `host == compute`.
pub fn default_placement() -> Placement<<ComputeBackend as burn::tensor::backend::Backend>::Device> {
    Placement::single(Accelerator::preferred(), Default::default())
}
