//! Fixed-capacity sample windows with incrementally maintained moments.
//!
//! Both windows keep running sums so `mean`/`variance` are O(1) (O(subcarriers)
//! for CSI) per sample. Sums are recomputed from the buffer once per full
//! rotation to bound floating point drift.

use std::fmt;

use ringbuf::{traits::*, HeapRb};

/// Scalar window (RSSI / monitor samples)
pub struct SignalWindow {
    buf: HeapRb<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
    since_resync: usize,
}

impl fmt::Debug for SignalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalWindow")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("mean", &self.mean())
            .field("variance", &self.variance())
            .finish()
    }
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: HeapRb::new(capacity),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
            since_resync: 0,
        }
    }

    /// Append a sample, returning the evicted oldest one when full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.buf.is_full() {
            self.buf.try_pop()
        } else {
            None
        };
        if let Some(old) = evicted {
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        let _ = self.buf.try_push(value);
        self.sum += value;
        self.sum_sq += value * value;

        self.since_resync += 1;
        if self.since_resync >= self.capacity {
            self.resync();
        }
        evicted
    }

    fn resync(&mut self) {
        self.sum = self.buf.iter().sum();
        self.sum_sq = self.buf.iter().map(|v| v * v).sum();
        self.since_resync = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> f64 {
        match self.len() {
            0 => 0.0,
            n => self.sum / n as f64,
        }
    }

    /// Population variance of the window contents
    pub fn variance(&self) -> f64 {
        let n = self.len();
        if n == 0 {
            return 0.0;
        }
        let mean = self.sum / n as f64;
        (self.sum_sq / n as f64 - mean * mean).max(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.buf.iter()
    }
}

/// Window of fixed-width amplitude vectors (CSI)
pub struct VectorWindow {
    buf: HeapRb<Vec<f64>>,
    capacity: usize,
    width: usize,
    sums: Vec<f64>,
    sums_sq: Vec<f64>,
    since_resync: usize,
}

impl fmt::Debug for VectorWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorWindow")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("width", &self.width)
            .finish()
    }
}

impl VectorWindow {
    pub fn new(capacity: usize, width: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: HeapRb::new(capacity),
            capacity,
            width,
            sums: vec![0.0; width],
            sums_sq: vec![0.0; width],
            since_resync: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Append a vector. Caller guarantees `row.len() == width`.
    pub fn push(&mut self, row: Vec<f64>) {
        debug_assert_eq!(row.len(), self.width);
        if self.buf.is_full() {
            if let Some(old) = self.buf.try_pop() {
                for (i, v) in old.iter().enumerate() {
                    self.sums[i] -= v;
                    self.sums_sq[i] -= v * v;
                }
            }
        }
        for (i, v) in row.iter().enumerate() {
            self.sums[i] += v;
            self.sums_sq[i] += v * v;
        }
        let _ = self.buf.try_push(row);

        self.since_resync += 1;
        if self.since_resync >= self.capacity {
            self.resync();
        }
    }

    fn resync(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = 0.0);
        self.sums_sq.iter_mut().for_each(|s| *s = 0.0);
        for row in self.buf.iter() {
            for (i, v) in row.iter().enumerate() {
                self.sums[i] += v;
                self.sums_sq[i] += v * v;
            }
        }
        self.since_resync = 0;
    }

    pub fn len(&self) -> usize {
        self.buf.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    /// Variance of one subcarrier across the window
    pub fn subcarrier_variance(&self, idx: usize) -> f64 {
        let n = self.len();
        if n == 0 || idx >= self.width {
            return 0.0;
        }
        let mean = self.sums[idx] / n as f64;
        (self.sums_sq[idx] / n as f64 - mean * mean).max(0.0)
    }

    /// Mean of the per-subcarrier variances
    pub fn aggregate_variance(&self) -> f64 {
        if self.width == 0 || self.is_empty() {
            return 0.0;
        }
        (0..self.width)
            .map(|i| self.subcarrier_variance(i))
            .sum::<f64>()
            / self.width as f64
    }

    /// Rows oldest first
    pub fn rows(&self) -> Vec<&[f64]> {
        self.buf.iter().map(Vec::as_slice).collect()
    }
}
