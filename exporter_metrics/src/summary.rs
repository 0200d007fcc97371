//! Sliding-window latency summary.
//!
//! The prometheus crate ships no summary type, so quantiles are computed
//! here over the samples of the last `max_age`, one window per label value.
//! Count and sum are cumulative and never reset.

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_OBJECTIVES: &[f64] = &[0.5, 0.9, 0.95, 0.99];
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);
const MAX_SAMPLES: usize = 10_000;

#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<(Instant, f64)>,
    count: u64,
    sum: f64,
}

impl Window {
    fn observe(&mut self, now: Instant, value: f64) {
        self.samples.push_back((now, value));
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.count += 1;
        self.sum += value;
    }

    fn expire(&mut self, now: Instant, max_age: Duration) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn quantile(sorted: &[f64], q: f64) -> f64 {
        if sorted.is_empty() {
            return f64::NAN;
        }
        let index = ((sorted.len() as f64) * q) as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

struct SummaryInner {
    desc: Desc,
    label: String,
    objectives: Vec<f64>,
    max_age: Duration,
    windows: Mutex<BTreeMap<String, Window>>,
}

/// Summary with a single variable label.
#[derive(Clone)]
pub struct WindowedSummary {
    inner: Arc<SummaryInner>,
}

impl WindowedSummary {
    pub fn new(name: &str, help: &str, label: &str) -> prometheus::Result<Self> {
        Self::with_window(name, help, label, DEFAULT_OBJECTIVES, DEFAULT_MAX_AGE)
    }

    pub fn with_window(
        name: &str,
        help: &str,
        label: &str,
        objectives: &[f64],
        max_age: Duration,
    ) -> prometheus::Result<Self> {
        let desc = Desc::new(
            name.to_string(),
            help.to_string(),
            vec![label.to_string()],
            HashMap::new(),
        )?;

        Ok(Self {
            inner: Arc::new(SummaryInner {
                desc,
                label: label.to_string(),
                objectives: objectives.to_vec(),
                max_age,
                windows: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    pub fn observe(&self, label_value: &str, value: f64) {
        let now = Instant::now();
        let mut windows = self
            .inner
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(label_value.to_string()).or_default();
        window.expire(now, self.inner.max_age);
        window.observe(now, value);
    }

    /// `(quantile, value)` pairs for one label value at this instant.
    pub fn quantiles(&self, label_value: &str) -> Vec<(f64, f64)> {
        let now = Instant::now();
        let mut windows = self
            .inner
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(window) = windows.get_mut(label_value) else {
            return self.inner.objectives.iter().map(|q| (*q, f64::NAN)).collect();
        };
        window.expire(now, self.inner.max_age);
        self.quantiles_of(window)
    }

    pub fn sample_count(&self, label_value: &str) -> u64 {
        self.inner
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(label_value)
            .map(|w| w.count)
            .unwrap_or(0)
    }

    fn quantiles_of(&self, window: &Window) -> Vec<(f64, f64)> {
        let mut sorted: Vec<f64> = window.samples.iter().map(|(_, v)| *v).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        self.inner
            .objectives
            .iter()
            .map(|q| (*q, Window::quantile(&sorted, *q)))
            .collect()
    }
}

impl Collector for WindowedSummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let now = Instant::now();
        let mut windows = self
            .inner
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut family = MetricFamily::default();
        family.set_name(self.inner.desc.fq_name.clone());
        family.set_help(self.inner.desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);

        for (label_value, window) in windows.iter_mut() {
            window.expire(now, self.inner.max_age);

            let mut summary = proto::Summary::default();
            summary.set_sample_count(window.count);
            summary.set_sample_sum(window.sum);
            for (q, value) in self.quantiles_of(window) {
                let mut quantile = proto::Quantile::default();
                quantile.set_quantile(q);
                quantile.set_value(value);
                summary.mut_quantile().push(quantile);
            }

            let mut pair = proto::LabelPair::default();
            pair.set_name(self.inner.label.clone());
            pair.set_value(label_value.clone());

            let mut metric = proto::Metric::default();
            metric.mut_label().push(pair);
            metric.set_summary(summary);
            family.mut_metric().push(metric);
        }

        vec![family]
    }
}
