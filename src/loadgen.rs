//! Load generator for the relay's `/message` endpoint.
//!
//! An [`Emitter`] iteration posts one message per recipient of a
//! [`Profile`], strictly in order, awaiting each response before the next.
//! Outcomes are never acted upon, only recorded as [`Sample`]s. [`run`]
//! drives several virtual users concurrently; each folds its samples into a
//! [`Tally`] and the tallies are merged into a [`Report`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use log::{debug, warn};

use crate::types::Message;

pub const DEFAULT_URL: &str = "http://localhost:8081/message";
pub const ORIGINATOR: &str = "hey";
pub const BODY: &str = "Message!";

pub const BURST_RECIPIENTS: [i64; 3] = [31123123123, 32123123123, 33123123123];
pub const SINGLE_RECIPIENTS: [i64; 1] = [123456789];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Profile {
    /// Three fixed recipients per iteration.
    Burst,
    /// One fixed recipient per iteration.
    Single,
}

impl Profile {
    pub fn recipients(self) -> &'static [i64] {
        match self {
            Profile::Burst => &BURST_RECIPIENTS,
            Profile::Single => &SINGLE_RECIPIENTS,
        }
    }
}

pub fn payload(recipient: i64) -> Message {
    Message::new(recipient, ORIGINATOR, BODY)
}

/// Outcome of a single request.
#[derive(Debug, Clone)]
pub struct Sample {
    pub recipient: i64,
    /// `None` when no response arrived at all.
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
}

impl Sample {
    pub fn is_failure(&self) -> bool {
        !matches!(self.status, Some(s) if (200..300).contains(&s))
    }
}

#[derive(Clone)]
pub struct Emitter {
    client: reqwest::Client,
    url: String,
}

impl Emitter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn run_iteration(&self, recipients: &[i64]) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(recipients.len());
        for &recipient in recipients {
            samples.push(self.post(recipient).await);
        }
        samples
    }

    async fn post(&self, recipient: i64) -> Sample {
        let started = Instant::now();
        let result = self
            .client
            .post(&self.url)
            .json(&payload(recipient))
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                // drain so the connection goes back to the pool
                let _ = resp.bytes().await;
                debug!("POST {} -> {} for {}", self.url, status, recipient);
                Sample {
                    recipient,
                    status: Some(status),
                    latency: started.elapsed(),
                    error: None,
                }
            }
            Err(e) => Sample {
                recipient,
                status: None,
                latency: started.elapsed(),
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Iterations per virtual user.
    Iterations(usize),
    /// Keep iterating until this much time has passed.
    After(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub vus: usize,
    pub stop: Stop,
}

async fn virtual_user(
    emitter: Emitter,
    profile: Profile,
    stop: Stop,
    started: Instant,
) -> Tally {
    let mut tally = Tally::new();

    loop {
        let done = match stop {
            Stop::Iterations(n) => tally.iterations >= n,
            Stop::After(budget) => started.elapsed() >= budget,
        };
        if done {
            break;
        }

        for sample in emitter.run_iteration(profile.recipients()).await {
            tally.record(&sample);
        }
        tally.iterations += 1;
    }

    tally
}

pub async fn run(emitter: &Emitter, plan: Plan, profile: Profile) -> Report {
    let started = Instant::now();

    let tasks: Vec<_> = (0..plan.vus.max(1))
        .map(|_| tokio::spawn(virtual_user(emitter.clone(), profile, plan.stop, started)))
        .collect();

    let mut tally = Tally::new();
    for t in tasks {
        match t.await {
            Ok(vu) => tally.merge(vu),
            Err(e) => warn!("Virtual user task failed: {}", e),
        }
    }

    Report::new(tally, started.elapsed())
}

/// Running totals for one or more virtual users. Latencies go into an HDR
/// histogram in microseconds so memory stays flat however long a run lasts.
#[derive(Debug, Clone)]
pub struct Tally {
    pub iterations: usize,
    pub requests: usize,
    pub failures: usize,
    pub statuses: BTreeMap<Option<u16>, usize>,
    pub errors: BTreeMap<String, usize>,
    latencies: Histogram<u64>,
}

impl Tally {
    pub fn new() -> Self {
        Self {
            iterations: 0,
            requests: 0,
            failures: 0,
            statuses: BTreeMap::new(),
            errors: BTreeMap::new(),
            // 3 significant digits, auto-resizing
            latencies: Histogram::new(3).expect("3 significant digits is a valid precision"),
        }
    }

    pub fn record(&mut self, sample: &Sample) {
        self.requests += 1;
        if sample.is_failure() {
            self.failures += 1;
        }
        *self.statuses.entry(sample.status).or_insert(0) += 1;
        if let Some(e) = &sample.error {
            *self.errors.entry(e.clone()).or_insert(0) += 1;
        }

        let micros = u64::try_from(sample.latency.as_micros()).unwrap_or(u64::MAX);
        let _ = self.latencies.record(micros);
    }

    pub fn merge(&mut self, other: Tally) {
        self.iterations += other.iterations;
        self.requests += other.requests;
        self.failures += other.failures;
        for (status, n) in other.statuses {
            *self.statuses.entry(status).or_insert(0) += n;
        }
        for (error, n) in other.errors {
            *self.errors.entry(error).or_insert(0) += n;
        }
        if let Err(e) = self.latencies.add(&other.latencies) {
            warn!("Dropping latencies from a virtual user: {}", e);
        }
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
}

impl LatencyStats {
    fn from_histogram(hist: &Histogram<u64>) -> Option<Self> {
        if hist.is_empty() {
            return None;
        }

        Some(Self {
            min: Duration::from_micros(hist.min()),
            mean: Duration::from_secs_f64(hist.mean() / 1_000_000.0),
            p50: Duration::from_micros(hist.value_at_quantile(0.50)),
            p95: Duration::from_micros(hist.value_at_quantile(0.95)),
            max: Duration::from_micros(hist.max()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub iterations: usize,
    pub requests: usize,
    pub failures: usize,
    /// Response status histogram; `None` counts transport errors.
    pub statuses: BTreeMap<Option<u16>, usize>,
    /// Transport errors grouped by message.
    pub errors: BTreeMap<String, usize>,
    pub latency: Option<LatencyStats>,
    pub elapsed: Duration,
}

impl Report {
    pub fn new(tally: Tally, elapsed: Duration) -> Self {
        let latency = LatencyStats::from_histogram(&tally.latencies);
        Self {
            iterations: tally.iterations,
            requests: tally.requests,
            failures: tally.failures,
            statuses: tally.statuses,
            errors: tally.errors,
            latency,
            elapsed,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "iterations: {}", self.iterations)?;
        writeln!(f, "requests:   {}", self.requests)?;
        writeln!(f, "failures:   {}", self.failures)?;
        writeln!(f, "elapsed:    {:.2?}", self.elapsed)?;
        for (status, count) in &self.statuses {
            match status {
                Some(code) => writeln!(f, "  status {}: {}", code, count)?,
                None => writeln!(f, "  error: {}", count)?,
            }
        }
        for (error, count) in &self.errors {
            writeln!(f, "    {} x {}", count, error)?;
        }
        if let Some(l) = &self.latency {
            writeln!(
                f,
                "latency:    min={:.2?} mean={:.2?} p50={:.2?} p95={:.2?} max={:.2?}",
                l.min, l.mean, l.p50, l.p95, l.max
            )?;
        }
        Ok(())
    }
}
