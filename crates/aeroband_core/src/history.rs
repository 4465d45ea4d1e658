//! Histórico curto por métrica para os gráficos.

use crate::types::{Metric, SensorReading};
use std::collections::VecDeque;

/// Capacidade fixa de cada série.
pub const HISTORY_CAPACITY: usize = 20;

/// Série FIFO de no máximo [`HISTORY_CAPACITY`] amostras.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySeries {
    samples: VecDeque<f64>,
}

impl HistorySeries {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Amostras da mais antiga para a mais recente.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }
}

/// Anexa `value` à série e devolve a nova série.
///
/// `None`, NaN e infinitos são ignorados em silêncio: a série volta intacta.
pub fn append(mut series: HistorySeries, value: Option<f64>) -> HistorySeries {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return series;
    };
    if series.samples.len() >= HISTORY_CAPACITY {
        series.samples.pop_front();
    }
    series.samples.push_back(v);
    series
}

/// Uma série por métrica conhecida.
#[derive(Debug, Clone, Default)]
pub struct History {
    series: [HistorySeries; Metric::COUNT],
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra cada métrica da leitura na sua série.
    pub fn record(&mut self, reading: &SensorReading) {
        for (metric, value) in reading.iter() {
            let slot = &mut self.series[metric.index()];
            *slot = append(std::mem::take(slot), value);
        }
    }

    pub fn series(&self, metric: Metric) -> &HistorySeries {
        &self.series[metric.index()]
    }

    pub fn clear(&mut self) {
        self.series = Default::default();
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_samples_leave_series_unchanged() {
        let s = append(HistorySeries::new(), Some(1.0));
        let before = s.clone();
        let s = append(s, None);
        let s = append(s, Some(f64::NAN));
        let s = append(s, Some(f64::INFINITY));
        assert_eq!(s, before);
    }

    #[test]
    fn never_exceeds_capacity_and_drops_oldest_first() {
        let mut s = HistorySeries::new();
        for i in 0..57 {
            s = append(s, Some(i as f64));
            assert!(s.len() <= HISTORY_CAPACITY);
        }
        let expected: Vec<f64> = (37..57).map(|i| i as f64).collect();
        assert_eq!(s.to_vec(), expected);
        assert_eq!(s.latest(), Some(56.0));
    }

    #[test]
    fn keeps_insertion_order_below_capacity() {
        let mut s = HistorySeries::new();
        for v in [3.0, 1.0, 2.0] {
            s = append(s, Some(v));
        }
        assert_eq!(s.to_vec(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn zero_is_recorded() {
        let s = append(HistorySeries::new(), Some(0.0));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn record_touches_only_present_metrics() {
        let mut h = History::new();
        h.record(&SensorReading::from_pairs([(Metric::Temperature, 22.8)]));
        h.record(&SensorReading::from_pairs([
            (Metric::Temperature, 23.1),
            (Metric::Humidity, 40.0),
        ]));
        assert_eq!(h.series(Metric::Temperature).to_vec(), vec![22.8, 23.1]);
        assert_eq!(h.series(Metric::Humidity).len(), 1);
        assert!(h.series(Metric::Pm10).is_empty());
    }
}
