//! Moment tensors in north-east-down coordinates.

use serde::{Deserialize, Serialize};

/// Converts moment magnitude to scalar moment in Nm.
#[must_use]
pub fn magnitude_to_moment(magnitude: f64) -> f64 {
    10f64.powf(1.5 * (magnitude + 10.7)) * 1.0e-7
}

/// Converts scalar moment in Nm to moment magnitude.
#[must_use]
pub fn moment_to_magnitude(moment: f64) -> f64 {
    (moment * 1.0e7).log10() / 1.5 - 10.7
}

/// Symmetric moment tensor stored as `[mnn, mee, mdd, mne, mnd, med]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MomentTensor {
    m6: [f64; 6],
}

impl MomentTensor {
    /// Creates a tensor from its six independent entries.
    #[must_use]
    pub const fn new(m6: [f64; 6]) -> Self {
        Self { m6 }
    }

    /// Isotropic source with `moment` on each diagonal entry.
    #[must_use]
    pub const fn explosion(moment: f64) -> Self {
        Self::new([moment, moment, moment, 0.0, 0.0, 0.0])
    }

    /// Double couple from strike, dip and rake in degrees (Aki & Richards convention).
    #[must_use]
    pub fn from_strike_dip_rake(strike: f64, dip: f64, rake: f64, moment: f64) -> Self {
        let (sp, cp) = strike.to_radians().sin_cos();
        let (sd, cd) = dip.to_radians().sin_cos();
        let (sl, cl) = rake.to_radians().sin_cos();
        let (s2p, c2p) = (2.0 * strike.to_radians()).sin_cos();
        let (s2d, c2d) = (2.0 * dip.to_radians()).sin_cos();

        let mnn = -moment * (sd * cl * s2p + s2d * sl * sp * sp);
        let mee = moment * (sd * cl * s2p - s2d * sl * cp * cp);
        let mdd = moment * s2d * sl;
        let mne = moment * (sd * cl * c2p + 0.5 * s2d * sl * s2p);
        let mnd = -moment * (cd * cl * cp + c2d * sl * sp);
        let med = -moment * (cd * cl * sp - c2d * sl * cp);

        Self::new([mnn, mee, mdd, mne, mnd, med])
    }

    /// The six independent entries.
    #[must_use]
    pub const fn m6(&self) -> [f64; 6] {
        self.m6
    }

    /// Tensor multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.m6.map(|m| m * factor))
    }

    /// Entry-wise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut m6 = self.m6;
        for (a, b) in m6.iter_mut().zip(other.m6) {
            *a += b;
        }
        Self::new(m6)
    }

    /// Scalar moment, `sqrt(sum(m_ij^2) / 2)` over the full 3x3 tensor.
    #[must_use]
    pub fn scalar_moment(&self) -> f64 {
        let [mnn, mee, mdd, mne, mnd, med] = self.m6;
        let diag = mnn * mnn + mee * mee + mdd * mdd;
        let off = 2.0 * (mne * mne + mnd * mnd + med * med);
        ((diag + off) / 2.0).sqrt()
    }

    /// Moment magnitude of the scalar moment.
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        moment_to_magnitude(self.scalar_moment())
    }
}
