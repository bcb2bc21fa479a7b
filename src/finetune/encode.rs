use rand::{Rng, seq::SliceRandom};

use crate::{error::ServiceError, model::TextCodec};

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

/// How many batches are length-sorted together when grouping by length.
const MEGABATCH_FACTOR: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
    /// Copy of `input_ids`: the model learns to reproduce the whole text.
    pub labels: Vec<i64>,
}

impl EncodedExample {
    fn from_ids(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        let labels = input_ids.iter().map(|&id| id as i64).collect();
        Self {
            input_ids,
            attention_mask,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Encodes one formatted sample, appending EOS when asked and truncating to
/// `max_length` tokens.
pub fn tokenize(
    codec: &dyn TextCodec,
    text: &str,
    max_length: usize,
    add_eos: bool,
) -> Result<EncodedExample, ServiceError> {
    let mut ids = codec.encode(text, true)?;
    if add_eos {
        if let Some(eos) = codec.eos_token_id() {
            if ids.last() != Some(&eos) {
                ids.push(eos);
            }
        }
    }
    ids.truncate(max_length);
    Ok(EncodedExample::from_ids(ids))
}

/// Concatenates samples (EOS-separated) and cuts the stream into blocks of
/// exactly `block_size` tokens. The trailing partial block is dropped.
pub fn pack(examples: &[EncodedExample], block_size: usize, eos: Option<u32>) -> Vec<EncodedExample> {
    if block_size == 0 {
        return Vec::new();
    }
    let mut stream = Vec::new();
    for example in examples {
        stream.extend_from_slice(&example.input_ids);
        if let Some(eos) = eos {
            if example.input_ids.last() != Some(&eos) {
                stream.push(eos);
            }
        }
    }
    stream
        .chunks_exact(block_size)
        .map(|block| EncodedExample::from_ids(block.to_vec()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingSide {
    #[default]
    Left,
    Right,
}

/// A rectangular batch ready to become tensors (row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub batch_size: usize,
    pub seq_len: usize,
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub labels: Vec<i64>,
}

/// Pads a list of examples to a common length.
#[derive(Debug, Clone)]
pub struct DataCollator {
    pub pad_token_id: u32,
    pub pad_to_multiple_of: Option<usize>,
    pub padding_side: PaddingSide,
}

impl DataCollator {
    pub fn new(pad_token_id: u32, pad_to_multiple_of: Option<usize>) -> Self {
        Self {
            pad_token_id,
            pad_to_multiple_of,
            padding_side: PaddingSide::Left,
        }
    }

    pub fn collate<'a, I>(&self, examples: I) -> Batch
    where
        I: IntoIterator<Item = &'a EncodedExample>,
    {
        let examples: Vec<&EncodedExample> = examples.into_iter().collect();
        let longest = examples.iter().map(|e| e.len()).max().unwrap_or(0);
        let seq_len = match self.pad_to_multiple_of {
            Some(m) if m > 0 => longest.div_ceil(m) * m,
            _ => longest,
        };

        let mut batch = Batch {
            batch_size: examples.len(),
            seq_len,
            input_ids: Vec::with_capacity(examples.len() * seq_len),
            attention_mask: Vec::with_capacity(examples.len() * seq_len),
            labels: Vec::with_capacity(examples.len() * seq_len),
        };
        let pad_id = self.pad_token_id as i64;
        for example in examples {
            let pad = seq_len - example.len();
            let ids = example.input_ids.iter().map(|&id| id as i64);
            let mask = example.attention_mask.iter().map(|&m| m as i64);
            let labels = example.labels.iter().copied();
            match self.padding_side {
                PaddingSide::Left => {
                    batch.input_ids.extend(std::iter::repeat_n(pad_id, pad).chain(ids));
                    batch.attention_mask.extend(std::iter::repeat_n(0, pad).chain(mask));
                    batch.labels.extend(std::iter::repeat_n(IGNORE_INDEX, pad).chain(labels));
                }
                PaddingSide::Right => {
                    batch.input_ids.extend(ids.chain(std::iter::repeat_n(pad_id, pad)));
                    batch.attention_mask.extend(mask.chain(std::iter::repeat_n(0, pad)));
                    batch.labels.extend(labels.chain(std::iter::repeat_n(IGNORE_INDEX, pad)));
                }
            }
        }
        batch
    }
}

/// Splits example indices into batches for one epoch. With
/// `group_by_length`, indices are shuffled, cut into megabatches and sorted
/// longest-first inside each megabatch so batches carry little padding.
pub fn batch_plan<R: Rng>(
    lengths: &[usize],
    batch_size: usize,
    group_by_length: bool,
    rng: &mut R,
) -> Vec<Vec<usize>> {
    let batch_size = batch_size.max(1);
    let mut indices: Vec<usize> = (0..lengths.len()).collect();
    indices.shuffle(rng);
    if group_by_length {
        for mega in indices.chunks_mut(batch_size * MEGABATCH_FACTOR) {
            mega.sort_by(|&a, &b| lengths[b].cmp(&lengths[a]));
        }
    }
    indices.chunks(batch_size).map(<[usize]>::to_vec).collect()
}
