//! Resource vectors and capacity arithmetic

use serde::{Deserialize, Serialize};

use crate::{GpuletError, GpuletResult};

/// Default CPU request when a job leaves it unspecified (1 core).
pub const DEFAULT_CPU_MILLIS: u64 = 1000;

/// Default memory request when a job leaves it unspecified (4 GiB).
pub const DEFAULT_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// A fixed three-dimensional resource quantity: GPU units, CPU millicores,
/// and memory bytes.
///
/// Arithmetic is component-wise. Comparison is a partial order: a vector
/// "fits within" another only when all three dimensions do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    /// Whole GPU units
    pub gpus: u32,
    /// CPU in millicores (1000 = one core)
    pub cpu_millis: u64,
    /// Memory in bytes
    pub memory_bytes: u64,
}

impl ResourceVector {
    /// The zero vector
    pub const ZERO: ResourceVector = ResourceVector {
        gpus: 0,
        cpu_millis: 0,
        memory_bytes: 0,
    };

    /// Create a new resource vector
    pub fn new(gpus: u32, cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            gpus,
            cpu_millis,
            memory_bytes,
        }
    }

    /// Whether every dimension of `self` is satisfied by `available`
    pub fn fits_within(&self, available: &ResourceVector) -> bool {
        self.gpus <= available.gpus
            && self.cpu_millis <= available.cpu_millis
            && self.memory_bytes <= available.memory_bytes
    }

    /// Component-wise sum
    pub fn plus(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            gpus: self.gpus.saturating_add(other.gpus),
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }

    /// Component-wise subtraction that refuses to go negative.
    ///
    /// The committed-resources path must treat underflow as a bookkeeping
    /// bug, not something to clamp away. The error names the first
    /// dimension that underflowed.
    pub fn checked_sub(&self, other: &ResourceVector) -> GpuletResult<ResourceVector> {
        let gpus = self.gpus.checked_sub(other.gpus).ok_or_else(|| {
            GpuletError::AccountingUnderflow {
                resource: "gpu",
                detail: format!("{} - {}", self.gpus, other.gpus),
            }
        })?;
        let cpu_millis = self.cpu_millis.checked_sub(other.cpu_millis).ok_or_else(|| {
            GpuletError::AccountingUnderflow {
                resource: "cpu",
                detail: format!("{}m - {}m", self.cpu_millis, other.cpu_millis),
            }
        })?;
        let memory_bytes = self
            .memory_bytes
            .checked_sub(other.memory_bytes)
            .ok_or_else(|| GpuletError::AccountingUnderflow {
                resource: "memory",
                detail: format!("{}B - {}B", self.memory_bytes, other.memory_bytes),
            })?;
        Ok(ResourceVector {
            gpus,
            cpu_millis,
            memory_bytes,
        })
    }

    /// Component-wise subtraction clamped at zero.
    ///
    /// Only for advisory quantities (availability filters, load scoring),
    /// never for the committed-resources path.
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            gpus: self.gpus.saturating_sub(other.gpus),
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }

    /// Whether all dimensions are zero
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl std::fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} gpu / {}m cpu / {} bytes",
            self.gpus, self.cpu_millis, self.memory_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_within_all_dimensions() {
        let req = ResourceVector::new(1, 500, 1024);
        let avail = ResourceVector::new(2, 1000, 2048);
        assert!(req.fits_within(&avail));
        assert!(!avail.fits_within(&req));
    }

    #[test]
    fn test_fits_is_partial_order() {
        // More GPU but less memory: neither fits within the other.
        let a = ResourceVector::new(4, 1000, 1024);
        let b = ResourceVector::new(1, 1000, 4096);
        assert!(!a.fits_within(&b));
        assert!(!b.fits_within(&a));
    }

    #[test]
    fn test_plus() {
        let a = ResourceVector::new(1, 500, 1024);
        let b = ResourceVector::new(2, 250, 1024);
        assert_eq!(a.plus(&b), ResourceVector::new(3, 750, 2048));
    }

    #[test]
    fn test_checked_sub_underflow_names_dimension() {
        let a = ResourceVector::new(1, 1000, 1024);
        let b = ResourceVector::new(2, 500, 512);
        let err = a.checked_sub(&b).unwrap_err();
        assert!(matches!(
            err,
            GpuletError::AccountingUnderflow { resource: "gpu", .. }
        ));
    }

    #[test]
    fn test_checked_sub_success() {
        let a = ResourceVector::new(4, 8000, 4096);
        let b = ResourceVector::new(3, 2000, 1024);
        assert_eq!(
            a.checked_sub(&b).unwrap(),
            ResourceVector::new(1, 6000, 3072)
        );
    }

    #[test]
    fn test_saturating_sub_clamps() {
        let a = ResourceVector::new(1, 500, 1024);
        let b = ResourceVector::new(2, 1000, 512);
        assert_eq!(a.saturating_sub(&b), ResourceVector::new(0, 0, 512));
    }

    #[test]
    fn test_zero() {
        assert!(ResourceVector::ZERO.is_zero());
        assert!(!ResourceVector::new(0, 0, 1).is_zero());
    }
}
