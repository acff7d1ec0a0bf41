//! Output projections: one shared head, or one head per speaker

use candle_nn::{linear, Linear, VarBuilder};
use std::collections::BTreeMap;

use crate::error::{ModelError, Result};

pub enum OutputHeads {
    Shared(Linear),
    /// Keyed by speaker index
    PerSpeaker(BTreeMap<usize, Linear>),
}

impl OutputHeads {
    pub fn shared(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self::Shared(linear(in_dim, out_dim, vb.pp("head"))?))
    }

    pub fn per_speaker(
        speakers: impl IntoIterator<Item = usize>,
        in_dim: usize,
        out_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let vb = vb.pp("heads");
        let heads = speakers
            .into_iter()
            .map(|idx| -> Result<(usize, Linear)> { Ok((idx, linear(in_dim, out_dim, vb.pp(idx.to_string()))?)) })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self::PerSpeaker(heads))
    }

    /// Head for a batch whose active rows belong to `speakers`
    ///
    /// Per-speaker heads require exactly one distinct speaker.
    pub fn select(&self, speakers: &[usize]) -> Result<&Linear> {
        match self {
            Self::Shared(head) => Ok(head),
            Self::PerSpeaker(heads) => {
                let mut distinct: Vec<usize> = speakers.to_vec();
                distinct.sort_unstable();
                distinct.dedup();
                match distinct.as_slice() {
                    [speaker] => heads.get(speaker).ok_or(ModelError::UnknownSpeakerHead(*speaker)),
                    _ => Err(ModelError::MixedSpeakers(distinct)),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Shared(_) => 1,
            Self::PerSpeaker(heads) => heads.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_per_speaker_dispatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let heads = OutputHeads::per_speaker([0, 3], 4, 2, vb).unwrap();

        assert_eq!(heads.len(), 2);
        assert!(heads.select(&[3, 3]).is_ok());
        assert!(matches!(heads.select(&[0, 3]), Err(ModelError::MixedSpeakers(_))));
        assert!(matches!(heads.select(&[1]), Err(ModelError::UnknownSpeakerHead(1))));
        assert!(matches!(heads.select(&[]), Err(ModelError::MixedSpeakers(_))));
    }
}
