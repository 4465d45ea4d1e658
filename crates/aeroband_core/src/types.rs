//! Métricas conhecidas do sensor ambiental e a leitura decodificada.
//!
//! Uma [`SensorReading`] guarda `Option<f64>` por métrica: `None` é o único
//! marcador de "sem dado", e `Some(0.0)` é uma leitura zero legítima.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

// ──────────────────────────────────────────────
// Métricas
// ──────────────────────────────────────────────

/// Métrica publicada pelo periférico.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    GasResistance,
    Co,
    Ethanol,
    H2,
    Nh3,
    Ch4,
    No2,
    Pm1,
    #[serde(rename = "pm2_5")]
    Pm2_5,
    Pm10,
}

impl Metric {
    /// Quantidade de métricas conhecidas.
    pub const COUNT: usize = 13;

    /// Todas as métricas, na ordem canônica.
    pub const ALL: [Metric; Self::COUNT] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::GasResistance,
        Metric::Co,
        Metric::Ethanol,
        Metric::H2,
        Metric::Nh3,
        Metric::Ch4,
        Metric::No2,
        Metric::Pm1,
        Metric::Pm2_5,
        Metric::Pm10,
    ];

    /// Posição na ordem canônica.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Chave canônica no JSON (também usada no backend).
    pub fn key(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
            Metric::GasResistance => "gas_resistance",
            Metric::Co => "co",
            Metric::Ethanol => "ethanol",
            Metric::H2 => "h2",
            Metric::Nh3 => "nh3",
            Metric::Ch4 => "ch4",
            Metric::No2 => "no2",
            Metric::Pm1 => "pm1",
            Metric::Pm2_5 => "pm2_5",
            Metric::Pm10 => "pm10",
        }
    }

    /// Nomes alternativos aceitos pelo parser (firmware ESP32 antigo).
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Metric::Temperature => &["temp"],
            Metric::Humidity => &["hum"],
            Metric::GasResistance => &["gas"],
            Metric::Nh3 => &["ammonia"],
            Metric::Pm2_5 => &["pm25"],
            _ => &[],
        }
    }

    /// Rótulo legível para logs.
    pub fn label(self) -> &'static str {
        match self {
            Metric::Temperature => "Temperatura",
            Metric::Humidity => "Umidade",
            Metric::Pressure => "Pressão",
            Metric::GasResistance => "Resistência do gás",
            Metric::Co => "CO",
            Metric::Ethanol => "Etanol",
            Metric::H2 => "H2",
            Metric::Nh3 => "NH3",
            Metric::Ch4 => "CH4",
            Metric::No2 => "NO2",
            Metric::Pm1 => "PM1",
            Metric::Pm2_5 => "PM2.5",
            Metric::Pm10 => "PM10",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::Pressure => "hPa",
            Metric::GasResistance => "kΩ",
            Metric::Co | Metric::Ethanol | Metric::H2 | Metric::Nh3 | Metric::Ch4 => "ppm",
            Metric::No2 => "ppb",
            Metric::Pm1 | Metric::Pm2_5 | Metric::Pm10 => "µg/m³",
        }
    }

    /// Resolve uma chave canônica ou alias.
    pub fn from_key(key: &str) -> Option<Metric> {
        Self::ALL
            .into_iter()
            .find(|m| m.key() == key || m.aliases().contains(&key))
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Leitura completa de um frame. Imutável depois de construída.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    values: [Option<f64>; Metric::COUNT],
}

impl SensorReading {
    /// Monta uma leitura a partir de pares (métrica, valor).
    ///
    /// Valores não finitos viram `None`.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Metric, f64)>,
    {
        let mut values = [None; Metric::COUNT];
        for (metric, value) in pairs {
            values[metric.index()] = value.is_finite().then_some(value);
        }
        Self { values }
    }

    pub(crate) fn from_values(values: [Option<f64>; Metric::COUNT]) -> Self {
        Self { values }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.index()]
    }

    /// Itera todas as métricas, inclusive as ausentes.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, Option<f64>)> + '_ {
        Metric::ALL.into_iter().map(|m| (m, self.get(m)))
    }

    /// Itera apenas as métricas presentes.
    pub fn present(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|m| self.get(m).map(|v| (m, v)))
    }

    /// `true` se nenhuma métrica conhecida veio no frame.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Serializa como objeto plano com todas as chaves (`null` quando ausente).
impl Serialize for SensorReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Metric::COUNT))?;
        for (metric, value) in self.iter() {
            map.serialize_entry(metric.key(), &value)?;
        }
        map.end()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reading_is_empty() {
        let r = SensorReading::default();
        assert!(r.is_empty());
        assert_eq!(r.present().count(), 0);
    }

    #[test]
    fn zero_is_a_valid_value() {
        let r = SensorReading::from_pairs([(Metric::Co, 0.0)]);
        assert_eq!(r.get(Metric::Co), Some(0.0));
        assert!(!r.is_empty());
    }

    #[test]
    fn non_finite_becomes_none() {
        let r = SensorReading::from_pairs([
            (Metric::Temperature, f64::NAN),
            (Metric::Humidity, f64::INFINITY),
        ]);
        assert!(r.is_empty());
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(Metric::from_key("temp"), Some(Metric::Temperature));
        assert_eq!(Metric::from_key("pm25"), Some(Metric::Pm2_5));
        assert_eq!(Metric::from_key("ammonia"), Some(Metric::Nh3));
        assert_eq!(Metric::from_key("pm2_5"), Some(Metric::Pm2_5));
        assert_eq!(Metric::from_key("lux"), None);
    }

    #[test]
    fn index_matches_canonical_order() {
        for (i, m) in Metric::ALL.iter().enumerate() {
            assert_eq!(m.index(), i);
        }
    }

    #[test]
    fn serializes_flat_with_nulls() {
        let r = SensorReading::from_pairs([(Metric::Temperature, 22.8), (Metric::Pm2_5, 19.0)]);
        let json = serde_json::to_value(&r).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), Metric::COUNT);
        assert_eq!(obj["temperature"], 22.8);
        assert_eq!(obj["pm2_5"], 19.0);
        assert!(obj["humidity"].is_null());
    }
}
