//! Batch samplers
//!
//! A sampler turns a dataset into a [`BatchPlan`]: one entry per batch, each
//! a list of sample slots. `None` slots are idle lanes in stateful mode.
//!
//! | Sampler | Used for |
//! |---|---|
//! | `Sequential` | validation, plain models |
//! | `Shuffled` | training, plain models |
//! | `PerSpeaker` | mulout models, every batch holds one speaker |
//! | `Lanes` | stateful (chunked) training and validation |

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::dataset::SequenceDataset;

/// Batches of sample slots, in consumption order
pub type BatchPlan = Vec<Vec<Option<usize>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSampler {
    Sequential { batch_size: usize },
    Shuffled { batch_size: usize },
    PerSpeaker { batch_size: usize, shuffle: bool },
    Lanes(LaneSchedule),
}

impl BatchSampler {
    /// Pick the sampler matching a dataset's training mode
    pub fn for_dataset(dataset: &SequenceDataset, batch_size: usize, mulout: bool, stateful: bool) -> Self {
        let shuffle = dataset.split() == ptts_core::Split::Train;
        let batch_size = batch_size.max(1);
        if stateful {
            Self::Lanes(LaneSchedule {
                lanes: batch_size,
                per_speaker: mulout,
                shuffle,
            })
        } else if mulout {
            Self::PerSpeaker { batch_size, shuffle }
        } else if shuffle {
            Self::Shuffled { batch_size }
        } else {
            Self::Sequential { batch_size }
        }
    }

    pub fn plan(&self, dataset: &SequenceDataset, rng: &mut StdRng) -> BatchPlan {
        match *self {
            Self::Sequential { batch_size } => chunked((0..dataset.len()).collect(), batch_size),
            Self::Shuffled { batch_size } => {
                let mut order: Vec<usize> = (0..dataset.len()).collect();
                order.shuffle(rng);
                chunked(order, batch_size)
            }
            Self::PerSpeaker { batch_size, shuffle } => per_speaker(dataset, batch_size, shuffle, rng),
            Self::Lanes(schedule) => schedule.plan(dataset, rng),
        }
    }
}

fn chunked(order: Vec<usize>, batch_size: usize) -> BatchPlan {
    order
        .chunks(batch_size)
        .map(|c| c.iter().copied().map(Some).collect())
        .collect()
}

fn by_speaker(dataset: &SequenceDataset) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, sample) in dataset.samples().iter().enumerate() {
        groups.entry(sample.speaker).or_default().push(i);
    }
    groups
}

/// Single-speaker batches
///
/// Training shuffles within each speaker, then repeatedly draws the next
/// speaker with probability proportional to its remaining batches. Validation
/// emits speakers in index order, samples in dataset order.
fn per_speaker(dataset: &SequenceDataset, batch_size: usize, shuffle: bool, rng: &mut StdRng) -> BatchPlan {
    let mut queues: Vec<std::collections::VecDeque<Vec<Option<usize>>>> = by_speaker(dataset)
        .into_values()
        .map(|mut indices| {
            if shuffle {
                indices.shuffle(rng);
            }
            chunked(indices, batch_size).into()
        })
        .collect();

    if !shuffle {
        return queues.into_iter().flatten().collect();
    }

    let mut plan = Vec::new();
    loop {
        let remaining: usize = queues.iter().map(|q| q.len()).sum();
        if remaining == 0 {
            break;
        }
        let mut draw = rng.gen_range(0..remaining);
        for queue in queues.iter_mut() {
            if draw < queue.len() {
                if let Some(batch) = queue.pop_front() {
                    plan.push(batch);
                }
                break;
            }
            draw -= queue.len();
        }
    }
    plan
}

/// Lane assignment for stateful training
///
/// Utterances are dealt to `lanes` rows, each new utterance going to the lane
/// with the fewest chunks so far. Batch `k` holds chunk `k` of every lane;
/// exhausted lanes are idle (`None`). With `per_speaker` each speaker gets its
/// own run of batches, so lanes never carry state across speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSchedule {
    pub lanes: usize,
    pub per_speaker: bool,
    pub shuffle: bool,
}

impl LaneSchedule {
    pub fn plan(&self, dataset: &SequenceDataset, rng: &mut StdRng) -> BatchPlan {
        let mut groups = dataset.utterance_groups();
        if self.shuffle {
            groups.shuffle(rng);
        }

        if !self.per_speaker {
            return self.deal(groups);
        }

        let mut by_spk: BTreeMap<usize, Vec<Vec<usize>>> = BTreeMap::new();
        for group in groups {
            let speaker = dataset.sample(group[0]).speaker;
            by_spk.entry(speaker).or_default().push(group);
        }
        let mut runs: Vec<BatchPlan> = by_spk.into_values().map(|g| self.deal(g)).collect();
        if self.shuffle {
            runs.shuffle(rng);
        }
        runs.into_iter().flatten().collect()
    }

    fn deal(&self, groups: Vec<Vec<usize>>) -> BatchPlan {
        let lanes = self.lanes.max(1);
        let mut streams: Vec<Vec<usize>> = vec![Vec::new(); lanes];
        for group in groups {
            if let Some(lane) = streams.iter_mut().min_by_key(|s| s.len()) {
                lane.extend(group);
            }
        }
        let steps = streams.iter().map(Vec::len).max().unwrap_or(0);
        (0..steps)
            .map(|k| streams.iter().map(|s| s.get(k).copied()).collect())
            .collect()
    }
}
