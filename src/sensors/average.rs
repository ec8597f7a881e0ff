//! CO2 moving-average aggregator.
//!
//! A fixed 12-slot ring of the most recent samples.  Pushing is O(1) and
//! overwrites the oldest entry once full.  The 5 s mean walks the ring
//! newest to oldest and stops at the first sample outside the window,
//! which is valid because samples are pushed in timestamp order.

/// Ring capacity.  At the default 1 s sample interval this holds 12 s of
/// history, comfortably more than the averaging window.
pub const CAPACITY: usize = 12;

/// Averaging window (milliseconds).
pub const WINDOW_MS: u64 = 5_000;

/// One converted CO2 measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Co2Sample {
    pub ppm: u16,
    pub temperature_c: f32,
    pub humidity_rh: f32,
    pub timestamp_ms: u64,
}

/// Mean over the samples inside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Co2Average {
    pub ppm: f32,
    pub temperature_c: f32,
    pub humidity_rh: f32,
    /// Number of samples that contributed
    pub samples: usize,
}

#[derive(Debug, Clone)]
pub struct Co2RingBuffer {
    ring: [Co2Sample; CAPACITY],
    /// Next slot to write
    head: usize,
    count: usize,
}

impl Default for Co2RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Co2RingBuffer {
    pub const fn new() -> Self {
        Self {
            ring: [Co2Sample {
                ppm: 0,
                temperature_c: 0.0,
                humidity_rh: 0.0,
                timestamp_ms: 0,
            }; CAPACITY],
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, sample: Co2Sample) {
        self.ring[self.head] = sample;
        self.head = (self.head + 1) % CAPACITY;
        if self.count < CAPACITY {
            self.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Most recently pushed sample.
    pub fn latest(&self) -> Option<&Co2Sample> {
        self.iter_newest_first().next()
    }

    /// Stored samples, newest first.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Co2Sample> + '_ {
        (1..=self.count).map(move |back| &self.ring[(self.head + CAPACITY - back) % CAPACITY])
    }

    /// Mean of the samples no older than [`WINDOW_MS`] at `now_ms`, or
    /// `None` when nothing qualifies.
    pub fn mean_last_5s(&self, now_ms: u64) -> Option<Co2Average> {
        let mut ppm = 0.0f32;
        let mut temperature = 0.0f32;
        let mut humidity = 0.0f32;
        let mut n = 0usize;

        for s in self.iter_newest_first() {
            if now_ms.saturating_sub(s.timestamp_ms) > WINDOW_MS {
                break;
            }
            ppm += f32::from(s.ppm);
            temperature += s.temperature_c;
            humidity += s.humidity_rh;
            n += 1;
        }

        if n == 0 {
            return None;
        }
        let k = n as f32;
        Some(Co2Average {
            ppm: ppm / k,
            temperature_c: temperature / k,
            humidity_rh: humidity / k,
            samples: n,
        })
    }
}
