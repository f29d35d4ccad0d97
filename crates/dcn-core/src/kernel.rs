//! Similarity kernels for soft assignment
//!
//! Kernels score the distance between a latent value and a codebook level.
//! Scores are returned as log-weights so callers can normalize rows with a
//! max shift instead of letting large distances underflow to zero.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{DEFAULT_DOF, DEFAULT_SIGMA};
use crate::error::{DcnError, DcnResult};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Kernel {
    /// `exp(-σ d²)`
    Gaussian { sigma: f64 },
    /// `(1 + (σ d)² / ν)^(-(ν + 1) / 2)`
    StudentT { sigma: f64, dof: f64 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::from_params(DEFAULT_SIGMA, DEFAULT_DOF)
    }
}

impl Kernel {
    pub fn gaussian(sigma: f64) -> DcnResult<Self> {
        let kernel = Kernel::Gaussian { sigma };
        kernel.validate()?;
        Ok(kernel)
    }

    pub fn student_t(sigma: f64, dof: f64) -> DcnResult<Self> {
        let kernel = Kernel::StudentT { sigma, dof };
        kernel.validate()?;
        Ok(kernel)
    }

    /// Pick the kernel from raw parameters: `dof <= 0` selects the Gaussian.
    ///
    /// No validation is performed; call [`Kernel::validate`] before use.
    pub fn from_params(sigma: f64, dof: f64) -> Self {
        if dof > 0.0 {
            Kernel::StudentT { sigma, dof }
        } else {
            Kernel::Gaussian { sigma }
        }
    }

    pub fn validate(&self) -> DcnResult<()> {
        let sigma = self.sigma();
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(DcnError::config(format!(
                "kernel sharpness must be positive and finite, got {}",
                sigma
            )));
        }
        if let Kernel::StudentT { dof, .. } = self {
            if !dof.is_finite() || *dof <= 0.0 {
                return Err(DcnError::config(format!(
                    "Student-t degrees of freedom must be positive and finite, got {}",
                    dof
                )));
            }
        }
        Ok(())
    }

    pub fn sigma(&self) -> f64 {
        match *self {
            Kernel::Gaussian { sigma } | Kernel::StudentT { sigma, .. } => sigma,
        }
    }

    /// Degrees of freedom, 0 for the Gaussian kernel
    pub fn dof(&self) -> f64 {
        match *self {
            Kernel::Gaussian { .. } => 0.0,
            Kernel::StudentT { dof, .. } => dof,
        }
    }

    /// Same kernel family with a different sharpness
    pub fn with_sigma(&self, sigma: f64) -> Self {
        match *self {
            Kernel::Gaussian { .. } => Kernel::Gaussian { sigma },
            Kernel::StudentT { dof, .. } => Kernel::StudentT { sigma, dof },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Gaussian { .. } => "gaussian",
            Kernel::StudentT { .. } => "student-t",
        }
    }

    /// Unnormalized log-weight for the signed distance `d = x - c`
    #[inline]
    pub fn log_weight(&self, d: f64) -> f64 {
        match *self {
            Kernel::Gaussian { sigma } => -sigma * d * d,
            Kernel::StudentT { sigma, dof } => {
                let t = sigma * d;
                -0.5 * (dof + 1.0) * (t * t / dof).ln_1p()
            }
        }
    }

    /// Unnormalized weight for the signed distance `d = x - c`
    #[inline]
    pub fn weight(&self, d: f64) -> f64 {
        self.log_weight(d).exp()
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Gaussian { sigma } => write!(f, "gaussian(σ={})", sigma),
            Kernel::StudentT { sigma, dof } => write!(f, "student-t(σ={}, ν={})", sigma, dof),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_params_selects_family() {
        assert_eq!(Kernel::from_params(5.0, 0.0), Kernel::Gaussian { sigma: 5.0 });
        assert_eq!(Kernel::from_params(5.0, -1.0), Kernel::Gaussian { sigma: 5.0 });
        assert_eq!(
            Kernel::from_params(5.0, 25.0),
            Kernel::StudentT { sigma: 5.0, dof: 25.0 }
        );
        assert_eq!(Kernel::default().name(), "student-t");
    }

    #[test]
    fn test_validation() {
        assert!(Kernel::gaussian(0.0).is_err());
        assert!(Kernel::gaussian(f64::NAN).is_err());
        assert!(Kernel::student_t(5.0, 0.0).is_err());
        assert!(Kernel::student_t(5.0, f64::INFINITY).is_err());
        assert!(Kernel::student_t(5.0, 3.0).is_ok());
    }

    #[test]
    fn test_weights_peak_at_zero() {
        for kernel in [Kernel::Gaussian { sigma: 5.0 }, Kernel::StudentT { sigma: 5.0, dof: 3.0 }] {
            assert_relative_eq!(kernel.weight(0.0), 1.0);
            assert!(kernel.weight(0.1) < 1.0);
            assert_relative_eq!(kernel.weight(0.3), kernel.weight(-0.3));
            assert!(kernel.weight(1.0) > kernel.weight(2.0));
        }
    }

    #[test]
    fn test_student_t_heavier_tail() {
        let gaussian = Kernel::Gaussian { sigma: 5.0 };
        let student = Kernel::StudentT { sigma: 5.0, dof: 3.0 };
        // Far away the Gaussian underflows, the log-weight stays finite
        assert!(gaussian.log_weight(200.0).is_finite());
        assert!(student.log_weight(3.0) > gaussian.log_weight(3.0));
    }

    #[test]
    fn test_student_t_approaches_gaussian() {
        // (1 + t²/ν)^(-(ν+1)/2) → exp(-t²/2) as ν → ∞, i.e. Gaussian with σ² / 2
        let sigma: f64 = 2.0;
        let student = Kernel::StudentT { sigma, dof: 1e7 };
        let gaussian = Kernel::Gaussian { sigma: sigma * sigma / 2.0 };
        for d in [0.1, 0.5, 1.0] {
            assert_relative_eq!(student.weight(d), gaussian.weight(d), max_relative = 1e-4);
        }
    }
}
