//! Work item generator with a bounded recency window.
//!
//! Identifiers are a prefix drawn from the configured set followed by a
//! fixed-width digit suffix. The last `W` issued identifiers are tracked so
//! none of them is reissued; older ones are forgotten, which keeps memory
//! bounded but means uniqueness holds only across the trailing window.
//!
//! Large domains use rejection sampling. Domains under ten windows use a
//! shuffled permutation of the whole domain instead, so draws never stall on
//! a crowded window.

use crate::config::{
    GeneratorConfig, MAX_PERMUTATION_DOMAIN, REJECTION_MIN_RATIO, duplicate_prefix,
};
use crate::error::{Error, Result};
use crate::model::WorkItem;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How candidates are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Uniform random draw, retried while the candidate is in the window.
    Rejection,
    /// Walk a shuffled permutation of the domain, reshuffling on exhaustion.
    Permutation,
}

/// Set + FIFO of recently issued codes. `seen.len() == order.len() <= capacity`.
#[derive(Debug)]
struct Window {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, code: u64) -> bool {
        self.seen.contains(&code)
    }

    fn insert(&mut self, code: u64) {
        self.seen.insert(code);
        self.order.push_back(code);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Default)]
struct Cycle {
    codes: Vec<u32>,
    cursor: usize,
}

#[derive(Debug)]
struct State {
    window: Window,
    cycle: Cycle,
    issued: u64,
    rng: StdRng,
}

/// Thread-safe identifier source shared by all workers of a pool.
#[derive(Debug)]
pub struct Generator {
    prefixes: Vec<String>,
    width: usize,
    suffix_domain: u64,
    domain: u64,
    strategy: Strategy,
    state: Mutex<State>,
}

impl Generator {
    /// Build a generator seeded from OS entropy.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        Self::build(config, StdRng::from_entropy())
    }

    /// Build a generator with a fixed seed (reproducible sequences).
    pub fn with_seed(config: &GeneratorConfig, seed: u64) -> Result<Self> {
        Self::build(config, StdRng::seed_from_u64(seed))
    }

    fn build(config: &GeneratorConfig, rng: StdRng) -> Result<Self> {
        if config.prefixes.is_empty() {
            return Err(Error::Config("generator needs at least one prefix".to_string()));
        }
        if let Some(dup) = duplicate_prefix(&config.prefixes) {
            return Err(Error::Config(format!("prefix {dup:?} is listed more than once")));
        }
        if !(1..=9).contains(&config.suffix_width) {
            return Err(Error::Config(format!(
                "suffix_width must be between 1 and 9, got {}",
                config.suffix_width
            )));
        }
        if config.window == 0 {
            return Err(Error::Config("generator window must be at least 1".to_string()));
        }

        let suffix_domain = 10u64.pow(config.suffix_width);
        let domain = config.domain_size();
        let window = config.window as u64;

        let strategy = if domain >= window.saturating_mul(REJECTION_MIN_RATIO) {
            Strategy::Rejection
        } else if domain >= window.saturating_mul(2) && domain <= MAX_PERMUTATION_DOMAIN {
            Strategy::Permutation
        } else {
            return Err(Error::Config(format!(
                "identifier domain {domain} cannot sustain a window of {window}"
            )));
        };

        Ok(Self {
            prefixes: config.prefixes.clone(),
            width: config.suffix_width as usize,
            suffix_domain,
            domain,
            strategy,
            state: Mutex::new(State {
                window: Window::new(config.window),
                cycle: Cycle::default(),
                issued: 0,
                rng,
            }),
        })
    }

    /// Issue the next identifier. Never returns one of the last `W` issued.
    pub fn next(&self) -> WorkItem {
        let mut state = self.lock();
        let state = &mut *state;
        loop {
            let code = match self.strategy {
                Strategy::Rejection => state.rng.gen_range(0..self.domain),
                Strategy::Permutation => self.next_in_cycle(state),
            };
            if state.window.contains(code) {
                continue;
            }
            state.window.insert(code);
            state.issued += 1;
            return self.render(code);
        }
    }

    fn next_in_cycle(&self, state: &mut State) -> u64 {
        if state.cycle.cursor >= state.cycle.codes.len() {
            self.reshuffle(state);
        }
        let code = state.cycle.codes[state.cycle.cursor];
        state.cycle.cursor += 1;
        u64::from(code)
    }

    /// Start a new pass over the domain. Codes still in the window go last,
    /// by which time they have aged out.
    fn reshuffle(&self, state: &mut State) {
        let mut codes: Vec<u32> = (0..self.domain as u32).collect();
        codes.shuffle(&mut state.rng);
        let window = &state.window;
        let (mut fresh, recent): (Vec<u32>, Vec<u32>) = codes
            .into_iter()
            .partition(|code| !window.contains(u64::from(*code)));
        fresh.extend(recent);
        state.cycle = Cycle {
            codes: fresh,
            cursor: 0,
        };
    }

    fn render(&self, code: u64) -> WorkItem {
        let prefix = &self.prefixes[(code / self.suffix_domain) as usize];
        let suffix = code % self.suffix_domain;
        WorkItem::new(format!("{prefix}{suffix:0width$}", width = self.width))
    }

    /// Forget every issued identifier. Used when a pool restarts.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.window.clear();
        state.cycle = Cycle::default();
        state.issued = 0;
    }

    /// Identifiers currently tracked; never exceeds [`Generator::capacity`].
    pub fn window_len(&self) -> usize {
        self.lock().window.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().window.capacity
    }

    /// Identifiers issued since construction or the last reset.
    pub fn issued(&self) -> u64 {
        self.lock().issued
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn domain_size(&self) -> u64 {
        self.domain
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
