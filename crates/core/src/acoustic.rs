//! Acoustic stream layout
//!
//! Frames are laid out as `[cc_0 .. cc_{n-1}, fv, lf0, uv]`: `n` cepstral
//! coefficients followed by the voicing frequency, log-F0 and the
//! voiced/unvoiced flag.

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Number of excitation streams following the cepstrum
pub const EXCITATION_STREAMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcousticLayout {
    pub cepstral_order: usize,
}

impl Default for AcousticLayout {
    fn default() -> Self {
        Self { cepstral_order: 40 }
    }
}

impl AcousticLayout {
    pub fn new(cepstral_order: usize) -> Self {
        Self { cepstral_order }
    }

    /// Derive the layout from a frame width declared elsewhere (e.g. a model)
    pub fn from_width(width: usize) -> Result<Self, DataError> {
        if width <= EXCITATION_STREAMS {
            return Err(DataError::dimension(
                "acoustic frame width",
                EXCITATION_STREAMS + 1,
                width,
            ));
        }
        Ok(Self::new(width - EXCITATION_STREAMS))
    }

    pub fn width(&self) -> usize {
        self.cepstral_order + EXCITATION_STREAMS
    }

    pub fn cepstrum(&self) -> std::ops::Range<usize> {
        0..self.cepstral_order
    }

    pub fn fv(&self) -> usize {
        self.cepstral_order
    }

    pub fn lf0(&self) -> usize {
        self.cepstral_order + 1
    }

    pub fn uv(&self) -> usize {
        self.cepstral_order + 2
    }

    /// Validate against a width that takes precedence
    pub fn check(&self, authoritative_width: usize) -> Result<(), DataError> {
        if self.width() != authoritative_width {
            return Err(DataError::dimension(
                "acoustic layout width",
                authoritative_width,
                self.width(),
            ));
        }
        Ok(())
    }
}
