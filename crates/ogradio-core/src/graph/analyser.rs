//! Frequency analyser node.
//!
//! Keeps the last `fft_size` samples, applies a Blackman window, and maps
//! smoothed magnitudes in decibels onto bytes the way browser analyser nodes
//! do (`min_db` → 0, `max_db` → 255).

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::GraphError;

pub const MIN_DB: f32 = -100.0;
pub const MAX_DB: f32 = -30.0;

pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    samples: VecDeque<f32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Result<Self, GraphError> {
        if !fft_size.is_power_of_two() || !(32..=32768).contains(&fft_size) {
            return Err(GraphError::InvalidAnalyser(format!(
                "fft size {fft_size} must be a power of two in 32..=32768"
            )));
        }
        if !(0.0..=1.0).contains(&smoothing) {
            return Err(GraphError::InvalidAnalyser(format!(
                "smoothing {smoothing} outside 0..=1"
            )));
        }

        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Ok(Self {
            fft_size,
            smoothing,
            samples: VecDeque::from(vec![0.0; fft_size]),
            window,
            smoothed: vec![0.0; fft_size / 2],
            fft: FftPlanner::new().plan_fft_forward(fft_size),
            scratch: Vec::with_capacity(fft_size),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn push(&mut self, input: &[f32]) {
        let skip = input.len().saturating_sub(self.fft_size);
        for &s in &input[skip..] {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Run one analysis pass and write up to `out.len()` bins.
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) -> usize {
        self.scratch.clear();
        self.scratch.extend(
            self.samples
                .iter()
                .zip(&self.window)
                .map(|(s, w)| Complex::new(s * w, 0.0)),
        );
        self.fft.process(&mut self.scratch);

        let norm = 1.0 / self.fft_size as f32;
        for (bin, value) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[bin].norm() * norm;
            *value = self.smoothing * *value + (1.0 - self.smoothing) * magnitude;
        }

        let n = out.len().min(self.smoothed.len());
        for (byte, &magnitude) in out.iter_mut().zip(&self.smoothed).take(n) {
            *byte = to_byte(magnitude);
        }
        n
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}
