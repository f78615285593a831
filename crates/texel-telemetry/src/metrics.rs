// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory metrics registry.
//!
//! Metrics are registered once and then updated through cheap, clonable
//! handles that can be moved onto pool workers and the pump thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A structured metric identifier: `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricId {
    /// The broad category (e.g. "decode").
    pub namespace: String,
    /// The metric name within the namespace (e.g. "completed").
    pub name: String,
}

impl MetricId {
    /// Creates a new `MetricId`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// The current value of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Monotonic count.
    Counter(u64),
    /// Value that can go up or down.
    Gauge(f64),
    /// Distribution of samples over fixed bucket upper bounds.
    Histogram {
        /// Upper bounds of each bucket.
        bucket_bounds: Vec<f64>,
        /// Samples per bucket; samples above the last bound land in the last.
        bucket_counts: Vec<u64>,
        /// Total number of samples.
        count: u64,
        /// Sum of all samples.
        sum: f64,
    },
}

impl MetricValue {
    fn kind(&self) -> &'static str {
        match self {
            MetricValue::Counter(_) => "counter",
            MetricValue::Gauge(_) => "gauge",
            MetricValue::Histogram { .. } => "histogram",
        }
    }
}

/// A registered metric.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Identifier.
    pub id: MetricId,
    /// Human-readable description.
    pub description: String,
    /// Unit of measurement.
    pub unit: String,
    /// Current value.
    pub value: MetricValue,
}

/// Errors raised by the registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    /// The metric was never registered (or was cleared).
    #[error("metric not found: {0}")]
    NotFound(MetricId),
    /// The operation does not apply to this kind of metric.
    #[error("metric {id} is a {found}, expected a {expected}")]
    TypeMismatch {
        /// The metric involved.
        id: MetricId,
        /// Kind required by the operation.
        expected: &'static str,
        /// Kind actually stored.
        found: &'static str,
    },
    /// Histogram bounds were empty or not increasing.
    #[error("invalid histogram buckets for {0}")]
    InvalidBuckets(MetricId),
}

/// A specialized `Result` type for metric operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

type Storage = Arc<RwLock<HashMap<MetricId, Metric>>>;

/// Central registry for metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    storage: Storage,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or resets) a counter.
    pub fn register_counter(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> CounterHandle {
        let id = self.put(namespace, name, description, "count", MetricValue::Counter(0));
        CounterHandle(MetricHandle {
            id,
            storage: self.storage.clone(),
        })
    }

    /// Registers (or resets) a gauge.
    pub fn register_gauge(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> GaugeHandle {
        let id = self.put(namespace, name, description, unit, MetricValue::Gauge(0.0));
        GaugeHandle(MetricHandle {
            id,
            storage: self.storage.clone(),
        })
    }

    /// Registers (or resets) a histogram. `buckets` must be non-empty and
    /// strictly increasing.
    pub fn register_histogram(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        buckets: Vec<f64>,
    ) -> MetricsResult<HistogramHandle> {
        let (namespace, name) = (namespace.into(), name.into());
        if buckets.is_empty() || buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(MetricsError::InvalidBuckets(MetricId::new(namespace, name)));
        }
        let value = MetricValue::Histogram {
            bucket_counts: vec![0; buckets.len()],
            bucket_bounds: buckets,
            count: 0,
            sum: 0.0,
        };
        let id = self.put(namespace, name, description, unit, value);
        Ok(HistogramHandle(MetricHandle {
            id,
            storage: self.storage.clone(),
        }))
    }

    /// Returns a snapshot of one metric.
    pub fn get_metric(&self, id: &MetricId) -> MetricsResult<Metric> {
        read(&self.storage)
            .get(id)
            .cloned()
            .ok_or_else(|| MetricsError::NotFound(id.clone()))
    }

    /// Returns snapshots of every metric in `namespace`, sorted by name.
    pub fn namespace_metrics(&self, namespace: &str) -> Vec<Metric> {
        let mut metrics: Vec<_> = read(&self.storage)
            .values()
            .filter(|m| m.id.namespace == namespace)
            .cloned()
            .collect();
        metrics.sort_by(|a, b| a.id.name.cmp(&b.id.name));
        metrics
    }

    /// Number of registered metrics.
    pub fn metric_count(&self) -> usize {
        read(&self.storage).len()
    }

    /// Removes every metric. Outstanding handles start returning `NotFound`.
    pub fn clear_all(&self) {
        write(&self.storage).clear();
    }

    fn put(
        &self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        value: MetricValue,
    ) -> MetricId {
        let id = MetricId::new(namespace, name);
        let metric = Metric {
            id: id.clone(),
            description: description.into(),
            unit: unit.into(),
            value,
        };
        write(&self.storage).insert(id.clone(), metric);
        id
    }
}

fn read(storage: &Storage) -> std::sync::RwLockReadGuard<'_, HashMap<MetricId, Metric>> {
    storage.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(storage: &Storage) -> std::sync::RwLockWriteGuard<'_, HashMap<MetricId, Metric>> {
    storage.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct MetricHandle {
    id: MetricId,
    storage: Storage,
}

impl MetricHandle {
    fn update<T>(
        &self,
        expected: &'static str,
        f: impl FnOnce(&mut MetricValue) -> Option<T>,
    ) -> MetricsResult<T> {
        let mut storage = write(&self.storage);
        let metric = storage
            .get_mut(&self.id)
            .ok_or_else(|| MetricsError::NotFound(self.id.clone()))?;
        let found = metric.value.kind();
        f(&mut metric.value).ok_or_else(|| MetricsError::TypeMismatch {
            id: self.id.clone(),
            expected,
            found,
        })
    }
}

/// Handle on a registered counter.
#[derive(Debug, Clone)]
pub struct CounterHandle(MetricHandle);

impl CounterHandle {
    /// Increments by one, returning the new value.
    pub fn increment(&self) -> MetricsResult<u64> {
        self.increment_by(1)
    }

    /// Increments by `amount`, returning the new value.
    pub fn increment_by(&self, amount: u64) -> MetricsResult<u64> {
        self.0.update("counter", |value| match value {
            MetricValue::Counter(v) => {
                *v = v.saturating_add(amount);
                Some(*v)
            }
            _ => None,
        })
    }

    /// Current value.
    pub fn get(&self) -> MetricsResult<u64> {
        self.0.update("counter", |value| match value {
            MetricValue::Counter(v) => Some(*v),
            _ => None,
        })
    }

    /// The metric identifier.
    pub fn id(&self) -> &MetricId {
        &self.0.id
    }
}

/// Handle on a registered gauge.
#[derive(Debug, Clone)]
pub struct GaugeHandle(MetricHandle);

impl GaugeHandle {
    /// Sets the gauge.
    pub fn set(&self, new_value: f64) -> MetricsResult<()> {
        self.0.update("gauge", |value| match value {
            MetricValue::Gauge(v) => {
                *v = new_value;
                Some(())
            }
            _ => None,
        })
    }

    /// Current value.
    pub fn get(&self) -> MetricsResult<f64> {
        self.0.update("gauge", |value| match value {
            MetricValue::Gauge(v) => Some(*v),
            _ => None,
        })
    }

    /// The metric identifier.
    pub fn id(&self) -> &MetricId {
        &self.0.id
    }
}

/// Handle on a registered histogram.
#[derive(Debug, Clone)]
pub struct HistogramHandle(MetricHandle);

impl HistogramHandle {
    /// Records one sample.
    pub fn observe(&self, sample: f64) -> MetricsResult<()> {
        self.0.update("histogram", |value| match value {
            MetricValue::Histogram {
                bucket_bounds,
                bucket_counts,
                count,
                sum,
            } => {
                let last = bucket_bounds.len() - 1;
                let bucket = bucket_bounds
                    .iter()
                    .position(|bound| sample <= *bound)
                    .unwrap_or(last);
                bucket_counts[bucket] += 1;
                *count += 1;
                *sum += sample;
                Some(())
            }
            _ => None,
        })
    }

    /// Number of recorded samples.
    pub fn count(&self) -> MetricsResult<u64> {
        self.0.update("histogram", |value| match value {
            MetricValue::Histogram { count, .. } => Some(*count),
            _ => None,
        })
    }

    /// The metric identifier.
    pub fn id(&self) -> &MetricId {
        &self.0.id
    }
}
