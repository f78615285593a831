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

//! Scheduler metrics, registered under the `decode` namespace.

use std::sync::Arc;

use texel_core::{Raster, Responder};
use texel_telemetry::{
    CounterHandle, GaugeHandle, HistogramHandle, MetricsRegistry, MetricsResult, ScopedMetricTimer,
};

const NAMESPACE: &str = "decode";

/// Histogram bounds for pump durations, in milliseconds.
const PUMP_TIME_BUCKETS: [f64; 8] = [0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// Handles on the decode scheduler metrics.
#[derive(Debug, Clone)]
pub struct DecodeMetrics {
    /// Every `submit_decode` call, admitted or not.
    pub submitted: CounterHandle,
    /// Requests handed directly to a pool worker.
    pub pooled: CounterHandle,
    /// Deferred creation records appended to the buffer.
    pub buffered: CounterHandle,
    /// Submissions dropped without a callback.
    pub rejected: CounterHandle,
    /// Responders told `success = true`.
    pub completed: CounterHandle,
    /// Responders told `success = false`.
    pub failed: CounterHandle,
    /// Requests queued or buffered after the last pump.
    pub pending: GaugeHandle,
    /// Duration of each pump. `None` if the histogram could not be registered.
    pub pump_time: Option<HistogramHandle>,
}

impl DecodeMetrics {
    /// Registers (or resets) the decode metrics in `registry`.
    pub fn register(registry: &MetricsRegistry) -> Self {
        let counter = |name: &str, description: &str| {
            registry.register_counter(NAMESPACE, name, description)
        };

        let pump_time = registry
            .register_histogram(
                NAMESPACE,
                "pump_time",
                "Time spent in one pump of the decode queue",
                "ms",
                PUMP_TIME_BUCKETS.to_vec(),
            )
            .map_err(|e| log::warn!("Decode pump timing disabled: {e}"))
            .ok();

        Self {
            submitted: counter("submitted", "Decode submissions"),
            pooled: counter("pooled", "Decodes handed to a pool worker"),
            buffered: counter("buffered", "Decodes deferred to the shared queue"),
            rejected: counter("rejected", "Decode submissions dropped without callback"),
            completed: counter("completed", "Decodes reported as successful"),
            failed: counter("failed", "Decodes reported as failed"),
            pending: registry.register_gauge(
                NAMESPACE,
                "pending",
                "Decodes queued or buffered after the last pump",
                "requests",
            ),
            pump_time,
        }
    }

    /// Starts timing a pump, if the histogram is available.
    pub(crate) fn time_pump(&self) -> Option<ScopedMetricTimer<'_>> {
        self.pump_time.as_ref().map(ScopedMetricTimer::new)
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        record(self.pending.set(pending as f64));
    }

    /// Wraps `responder` so that outcomes are counted before being forwarded.
    pub(crate) fn observe(&self, responder: Option<Arc<dyn Responder>>) -> Arc<dyn Responder> {
        Arc::new(CountingResponder {
            inner: responder,
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        })
    }
}

/// Metric updates never fail a decode.
pub(crate) fn record<T>(result: MetricsResult<T>) {
    if let Err(e) = result {
        log::debug!("Failed to update decode metric: {e}");
    }
}

struct CountingResponder {
    inner: Option<Arc<dyn Responder>>,
    completed: CounterHandle,
    failed: CounterHandle,
}

impl Responder for CountingResponder {
    fn completed(&self, success: bool, primary: Option<Raster>, aux: Option<Raster>) {
        if success {
            record(self.completed.increment());
        } else {
            record(self.failed.increment());
        }
        if let Some(inner) = &self.inner {
            inner.completed(success, primary, aux);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use texel_telemetry::{MetricId, MetricValue};

    #[test]
    fn test_registers_decode_namespace() {
        let registry = MetricsRegistry::new();
        let metrics = DecodeMetrics::register(&registry);

        assert!(metrics.pump_time.is_some());
        assert_eq!(registry.namespace_metrics(NAMESPACE).len(), 8);
        metrics.set_pending(3);
        let pending = registry
            .get_metric(&MetricId::new(NAMESPACE, "pending"))
            .unwrap();
        assert_eq!(pending.value, MetricValue::Gauge(3.0));
    }

    #[test]
    fn test_observed_responder_counts_and_forwards() {
        let registry = MetricsRegistry::new();
        let metrics = DecodeMetrics::register(&registry);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let inner: Arc<dyn Responder> = Arc::new(move |_ok: bool, _p: Option<Raster>, _a: Option<Raster>| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        metrics.observe(Some(inner)).completed(true, None, None);
        metrics.observe(None).completed(false, None, None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.completed.get().unwrap(), 1);
        assert_eq!(metrics.failed.get().unwrap(), 1);
    }
}
