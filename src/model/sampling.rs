use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::model::GenerationConfig;

/// Picks the next token from a row of logits according to a
/// [`GenerationConfig`]. Owns its RNG so a seeded sampler is reproducible.
pub struct Sampler {
    greedy: bool,
    temperature: f32,
    top_k: usize,
    top_p: f32,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: &GenerationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            greedy: config.is_greedy(),
            temperature: config.temperature as f32,
            top_k: config.top_k,
            top_p: config.top_p as f32,
            rng,
        }
    }

    pub fn next_token(&mut self, logits: &mut [f32]) -> u32 {
        if self.greedy {
            return argmax(logits);
        }
        for v in logits.iter_mut() {
            *v /= self.temperature;
        }
        if self.top_k > 0 {
            apply_top_k(logits, self.top_k);
        }
        apply_top_p(logits, self.top_p);
        sample_categorical(logits, &mut self.rng)
    }
}

pub(crate) fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0u32;
    let mut max_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > max_val {
            max_val = v;
            best = i as u32;
        }
    }
    best
}

/// Masks everything below the k-th largest logit. Ties with the k-th value
/// survive.
pub(crate) fn apply_top_k(logits: &mut [f32], k: usize) {
    if k >= logits.len() {
        return;
    }
    let mut vals = logits.to_vec();
    let pivot = vals.len() - k;
    vals.select_nth_unstable_by(pivot, |a, b| a.total_cmp(b));
    let threshold = vals[pivot];
    for v in logits.iter_mut() {
        if *v < threshold {
            *v = f32::NEG_INFINITY;
        }
    }
}

/// Keeps the smallest set of tokens whose probability mass reaches `p`.
pub(crate) fn apply_top_p(logits: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }
    let probs = softmax(logits);
    let mut indices: Vec<usize> = (0..probs.len()).collect();
    indices.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut keep = vec![false; logits.len()];
    let mut cumsum = 0.0f32;
    for &idx in &indices {
        cumsum += probs[idx];
        keep[idx] = true;
        if cumsum >= p {
            break;
        }
    }
    for (v, kept) in logits.iter_mut().zip(keep) {
        if !kept {
            *v = f32::NEG_INFINITY;
        }
    }
}

pub(crate) fn sample_categorical<R: Rng>(logits: &[f32], rng: &mut R) -> u32 {
    let probs = softmax(logits);
    let r: f32 = rng.r#gen();
    let mut cumsum = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if r < cumsum {
            return i as u32;
        }
    }
    // rounding can leave `r` above the final cumulative sum
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len().saturating_sub(1)) as u32
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max_val).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}
