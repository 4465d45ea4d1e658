//! Pipeline de ingestão: bytes → Parser → History → Alertas → Forwarder.

use crate::forwarder::Forwarder;
use aeroband_core::alerts::{Alert, AlertLevel, evaluate_reading};
use aeroband_core::config::AlertThresholds;
use aeroband_core::history::History;
use aeroband_core::{FrameParser, ParseEvent, SensorReading};
use tracing::{debug, error, info, warn};

/// Contadores acumulados desde o início.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub readings: u64,
    pub parse_errors: u64,
    pub alerts: u64,
}

pub struct IngestionPipeline<F: Forwarder> {
    parser: FrameParser,
    history: History,
    thresholds: AlertThresholds,
    forwarder: F,
    last_reading: Option<SensorReading>,
    stats: PipelineStats,
}

impl<F: Forwarder> IngestionPipeline<F> {
    pub fn new(max_pending: usize, thresholds: AlertThresholds, forwarder: F) -> Self {
        Self {
            parser: FrameParser::new(max_pending),
            history: History::new(),
            thresholds,
            forwarder,
            last_reading: None,
            stats: PipelineStats::default(),
        }
    }

    /// Processa uma notificação. Retorna os alertas das leituras completas.
    pub fn ingest(&mut self, bytes: &[u8]) -> Vec<Alert> {
        let mut raised = Vec::new();
        for event in self.parser.push(bytes) {
            match event {
                ParseEvent::Reading(reading) => raised.extend(self.accept(reading)),
                ParseEvent::Error(e) => {
                    self.stats.parse_errors += 1;
                    warn!("Frame descartado: {e}");
                }
            }
        }
        raised
    }

    /// Descarta frame parcial (nova sessão).
    pub fn reset_link(&mut self) {
        if self.parser.pending_len() > 0 {
            debug!("Descartando {} bytes de frame parcial", self.parser.pending_len());
        }
        self.parser.reset();
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn last_reading(&self) -> Option<&SensorReading> {
        self.last_reading.as_ref()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn accept(&mut self, reading: SensorReading) -> Vec<Alert> {
        if reading.is_empty() {
            debug!("Frame sem métricas conhecidas");
        }
        self.stats.readings += 1;
        self.history.record(&reading);

        let alerts = evaluate_reading(&reading, &self.thresholds);
        for alert in &alerts {
            self.stats.alerts += 1;
            let m = alert.metric;
            match alert.level {
                AlertLevel::Critical => {
                    error!("CRÍTICO: {} = {:.2} {}", m.label(), alert.value, m.unit())
                }
                _ => warn!("Atenção: {} = {:.2} {}", m.label(), alert.value, m.unit()),
            }
        }

        info!("{}", summarize(&reading));
        self.forwarder.forward(&reading);
        self.last_reading = Some(reading);
        alerts
    }
}

/// Linha de log com as métricas presentes.
fn summarize(reading: &SensorReading) -> String {
    let parts: Vec<String> = reading
        .present()
        .map(|(m, v)| format!("{}={v:.1}", m.key()))
        .collect();
    if parts.is_empty() {
        "← leitura vazia".into()
    } else {
        format!("← {}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::tests::RecordingForwarder;
    use aeroband_core::Metric;

    fn pipeline() -> IngestionPipeline<RecordingForwarder> {
        IngestionPipeline::new(4096, AlertThresholds::default(), RecordingForwarder::default())
    }

    #[test]
    fn split_frame_reaches_history_and_forwarder_once() {
        let mut p = pipeline();
        assert!(p.ingest(b"{\"temperature\":2").is_empty());
        assert!(p.forwarder.readings.borrow().is_empty());

        p.ingest(b"3.5,\"pm2_5\":80}\n");
        assert_eq!(p.stats().readings, 1);
        assert_eq!(p.history().series(Metric::Temperature).to_vec(), vec![23.5]);
        assert_eq!(p.forwarder.readings.borrow().len(), 1);
        assert_eq!(p.last_reading().unwrap().get(Metric::Pm2_5), Some(80.0));
    }

    #[test]
    fn alerts_are_reported() {
        let mut p = pipeline();
        let alerts = p.ingest(b"{\"pm2_5\":80,\"temperature\":22}");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, Metric::Pm2_5);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(p.stats().alerts, 1);
    }

    #[test]
    fn malformed_frames_are_counted_not_forwarded() {
        let mut p = pipeline();
        p.ingest(b"{\"temperature\":}\n{\"humidity\":40}");
        assert_eq!(p.stats().parse_errors, 1);
        assert_eq!(p.stats().readings, 1);
        assert_eq!(p.forwarder.readings.borrow().len(), 1);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut p = pipeline();
        p.ingest(b"{\"temperature\":2");
        p.reset_link();
        p.ingest(b"{\"humidity\":40}");
        assert_eq!(p.stats().readings, 1);
        assert!(p.history().series(Metric::Temperature).is_empty());
    }

    #[test]
    fn history_keeps_last_twenty() {
        let mut p = pipeline();
        for i in 0..25 {
            p.ingest(format!("{{\"co\":{i}}}").as_bytes());
        }
        let co = p.history().series(Metric::Co).to_vec();
        assert_eq!(co.len(), 20);
        assert_eq!(co.first(), Some(&5.0));
        assert_eq!(co.last(), Some(&24.0));
    }
}
