//! Sistema de alertas – níveis e avaliação de thresholds.
//!
//! O nível é recalculado a cada leitura e nunca persistido.

use crate::config::{AlertThresholds, Band, LowerBound};
use crate::types::{Metric, SensorReading};
use serde::{Deserialize, Serialize};

/// Nível de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[serde(rename = "none")]
    Normal,
    Warning,
    Critical,
}

/// Um alerta disparado.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub metric: Metric,
    pub value: f64,
    pub level: AlertLevel,
}

/// Regra de threshold de uma métrica.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Alerta dos dois lados
    Band(Band),
    /// Só valores baixos escalam (resistência do gás)
    LowerBound(LowerBound),
}

impl AlertThresholds {
    /// Regra configurada para a métrica.
    pub fn rule(&self, metric: Metric) -> Threshold {
        match metric {
            Metric::Temperature => Threshold::Band(self.temperature),
            Metric::Humidity => Threshold::Band(self.humidity),
            Metric::Pressure => Threshold::Band(self.pressure),
            Metric::GasResistance => Threshold::LowerBound(self.gas_resistance),
            Metric::Co => Threshold::Band(self.co),
            Metric::Ethanol => Threshold::Band(self.ethanol),
            Metric::H2 => Threshold::Band(self.h2),
            Metric::Nh3 => Threshold::Band(self.nh3),
            Metric::Ch4 => Threshold::Band(self.ch4),
            Metric::No2 => Threshold::Band(self.no2),
            Metric::Pm1 => Threshold::Band(self.pm1),
            Metric::Pm2_5 => Threshold::Band(self.pm2_5),
            Metric::Pm10 => Threshold::Band(self.pm10),
        }
    }
}

/// Avalia um valor de uma métrica. Dado ausente nunca alerta.
pub fn evaluate(metric: Metric, value: Option<f64>, thresholds: &AlertThresholds) -> AlertLevel {
    match value {
        Some(v) if !v.is_nan() => match thresholds.rule(metric) {
            Threshold::Band(band) => level_for_band(v, &band),
            Threshold::LowerBound(bound) => level_for_lower_bound(v, &bound),
        },
        _ => AlertLevel::Normal,
    }
}

/// Avalia uma leitura e retorna só os alertas não normais.
pub fn evaluate_reading(reading: &SensorReading, thresholds: &AlertThresholds) -> Vec<Alert> {
    reading
        .present()
        .filter_map(|(metric, value)| {
            let level = evaluate(metric, Some(value), thresholds);
            (level != AlertLevel::Normal).then_some(Alert {
                metric,
                value,
                level,
            })
        })
        .collect()
}

/// Nível para uma faixa de dois lados.
pub fn level_for_band(value: f64, band: &Band) -> AlertLevel {
    if value < band.critical_min || value > band.critical_max {
        AlertLevel::Critical
    } else if value < band.warning_min || value > band.warning_max {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Nível para um limite só inferior.
pub fn level_for_lower_bound(value: f64, bound: &LowerBound) -> AlertLevel {
    if value < bound.critical_min {
        AlertLevel::Critical
    } else if value < bound.warning_min {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}
