//! Parser de frames do sensor.
//!
//! O periférico publica objetos JSON delimitados por newline, mas o MTU do
//! BLE quebra um objeto em vários pacotes de notificação. O parser acumula o
//! trecho incompleto e tenta de novo com o próximo pacote.
//!
//! ```text
//! pacote 1: {"temperature":2
//! pacote 2: 2.8,"humidity":40}\n
//!           └──────► SensorReading { temperature: 22.8, humidity: 40 }
//! ```
//!
//! Um frame inválido vira [`ParseEvent::Error`]; `push` nunca falha, para não
//! derrubar a assinatura de notificações.

use crate::types::{Metric, SensorReading};
use serde_json::{Map, Value};

/// Limite padrão do buffer parcial.
pub const DEFAULT_MAX_PENDING: usize = 4096;

/// Resultado de um frame decodificado.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    Reading(SensorReading),
    Error(ParseError),
}

/// Erros de frame. Todos carregam o texto bruto para log.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Frame JSON inválido ({reason}): {raw}")]
    Malformed { raw: String, reason: String },

    #[error("Frame não é um objeto JSON: {raw}")]
    NotAnObject { raw: String },

    #[error("Buffer parcial excedeu {limit} bytes ({len} bytes descartados)")]
    Overflow { raw: String, len: usize, limit: usize },
}

impl ParseError {
    /// Texto bruto que originou o erro.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::Malformed { raw, .. }
            | ParseError::NotAnObject { raw }
            | ParseError::Overflow { raw, .. } => raw,
        }
    }
}

/// Decodificador incremental de frames JSON.
#[derive(Debug)]
pub struct FrameParser {
    pending: Vec<u8>,
    max_pending: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl FrameParser {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_pending,
        }
    }

    /// Bytes aguardando o próximo pacote.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Descarta o buffer parcial (nova sessão, por exemplo).
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Alimenta um pacote e retorna os eventos dos frames completos.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ParseEvent> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let rest = &buf[offset..];
            let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            let mut resync = None;

            loop {
                let start = stream.byte_offset();
                match stream.next() {
                    None => break,
                    Some(Ok(value)) => {
                        let raw = &rest[start..stream.byte_offset()];
                        events.push(frame_event(value, raw));
                    }
                    Some(Err(e)) if e.is_eof() => {
                        // Frame incompleto: espera o próximo pacote
                        self.retain(&rest[start..], &mut events);
                        break;
                    }
                    Some(Err(e)) => {
                        // Erro de sintaxe: descarta até o próximo newline
                        let tail = &rest[start..];
                        let (bad, skip) = match tail.iter().position(|&b| b == b'\n') {
                            Some(n) => (&tail[..n], n + 1),
                            None => (tail, tail.len()),
                        };
                        events.push(ParseEvent::Error(ParseError::Malformed {
                            raw: lossy(bad),
                            reason: e.to_string(),
                        }));
                        resync = Some(offset + start + skip);
                        break;
                    }
                }
            }

            match resync {
                Some(next) => offset = next,
                None => break,
            }
        }

        events
    }

    fn retain(&mut self, partial: &[u8], events: &mut Vec<ParseEvent>) {
        if partial.len() > self.max_pending {
            events.push(ParseEvent::Error(ParseError::Overflow {
                raw: lossy(partial),
                len: partial.len(),
                limit: self.max_pending,
            }));
            self.pending.clear();
        } else {
            self.pending = partial.to_vec();
        }
    }
}

fn frame_event(value: Value, raw: &[u8]) -> ParseEvent {
    match value {
        Value::Object(obj) => ParseEvent::Reading(extract_reading(&obj)),
        _ => ParseEvent::Error(ParseError::NotAnObject { raw: lossy(raw) }),
    }
}

/// Extrai todas as métricas conhecidas de um objeto JSON.
///
/// Ordem de preferência por métrica: chave canônica (`{ "value": v }` e
/// depois escalar) e então cada alias na mesma ordem.
pub fn extract_reading(obj: &Map<String, Value>) -> SensorReading {
    let mut values = [None; Metric::COUNT];
    for metric in Metric::ALL {
        values[metric.index()] = std::iter::once(metric.key())
            .chain(metric.aliases().iter().copied())
            .find_map(|name| obj.get(name).and_then(field_value));
    }
    SensorReading::from_values(values)
}

fn field_value(value: &Value) -> Option<f64> {
    match value {
        Value::Object(inner) => inner.get("value").and_then(coerce),
        other => coerce(other),
    }
}

fn coerce(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(events: Vec<ParseEvent>) -> Vec<SensorReading> {
        events
            .into_iter()
            .filter_map(|e| match e {
                ParseEvent::Reading(r) => Some(r),
                ParseEvent::Error(_) => None,
            })
            .collect()
    }

    fn errors(events: &[ParseEvent]) -> Vec<&ParseError> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Error(err) => Some(err),
                ParseEvent::Reading(_) => None,
            })
            .collect()
    }

    #[test]
    fn esp32_frame_sets_known_metrics_only() {
        let mut parser = FrameParser::default();
        let events = parser.push(br#"{"temperature":22.8,"humidity":40.7,"pm1":21}"#);
        let r = readings(events);
        assert_eq!(r.len(), 1);
        let r = &r[0];
        assert_eq!(r.get(Metric::Temperature), Some(22.8));
        assert_eq!(r.get(Metric::Humidity), Some(40.7));
        assert_eq!(r.get(Metric::Pm1), Some(21.0));
        for m in Metric::ALL {
            if !matches!(m, Metric::Temperature | Metric::Humidity | Metric::Pm1) {
                assert_eq!(r.get(m), None, "{m} deveria ser None");
            }
        }
    }

    #[test]
    fn split_frame_is_reassembled() {
        let mut parser = FrameParser::default();
        let first = parser.push(br#"{"temperature":2"#);
        assert!(first.is_empty());
        assert!(parser.pending_len() > 0);

        let r = readings(parser.push(br#"2.8,"humidity":40}"#));
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].get(Metric::Temperature), Some(22.8));
        assert_eq!(r[0].get(Metric::Humidity), Some(40.0));
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn frame_split_across_many_packets() {
        let frame = br#"{"temperature":{"value":21.5},"pm25":12,"nh3":913.08}"#;
        let mut parser = FrameParser::default();
        let mut all = Vec::new();
        for chunk in frame.chunks(7) {
            all.extend(parser.push(chunk));
        }
        let r = readings(all);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].get(Metric::Temperature), Some(21.5));
        assert_eq!(r[0].get(Metric::Pm2_5), Some(12.0));
        assert_eq!(r[0].get(Metric::Nh3), Some(913.08));
    }

    #[test]
    fn extraction_preserves_value_nested_or_scalar() {
        let values = [0.0, -12.25, 22.8, 1013.25, 913.08, 123456.5];
        for metric in Metric::ALL {
            for v in values {
                for body in [
                    format!(r#"{{"{}":{v}}}"#, metric.key()),
                    format!(r#"{{"{}":{{"value":{v}}}}}"#, metric.key()),
                ] {
                    let mut parser = FrameParser::default();
                    let r = readings(parser.push(body.as_bytes()));
                    assert_eq!(r.len(), 1, "{body}");
                    assert_eq!(r[0].get(metric), Some(v), "{body}");
                }
            }
        }
    }

    #[test]
    fn nested_value_wins_over_alias() {
        let mut parser = FrameParser::default();
        let r = readings(parser.push(br#"{"pm2_5":{"value":9},"pm25":30}"#));
        assert_eq!(r[0].get(Metric::Pm2_5), Some(9.0));
    }

    #[test]
    fn aliases_are_used_when_canonical_missing() {
        let mut parser = FrameParser::default();
        let r = readings(parser.push(br#"{"temp":19.5,"hum":55,"pm25":19,"ammonia":4.2}"#));
        assert_eq!(r[0].get(Metric::Temperature), Some(19.5));
        assert_eq!(r[0].get(Metric::Humidity), Some(55.0));
        assert_eq!(r[0].get(Metric::Pm2_5), Some(19.0));
        assert_eq!(r[0].get(Metric::Nh3), Some(4.2));
    }

    #[test]
    fn numeric_strings_are_coerced_and_garbage_is_null() {
        let mut parser = FrameParser::default();
        let r = readings(parser.push(
            br#"{"temperature":"23.5","humidity":"abc","pressure":null,"co":true,"h2":"NaN"}"#,
        ));
        assert_eq!(r[0].get(Metric::Temperature), Some(23.5));
        assert_eq!(r[0].get(Metric::Humidity), None);
        assert_eq!(r[0].get(Metric::Pressure), None);
        assert_eq!(r[0].get(Metric::Co), None);
        assert_eq!(r[0].get(Metric::H2), None);
    }

    #[test]
    fn newline_delimited_frames_in_one_chunk() {
        let mut parser = FrameParser::default();
        let r = readings(parser.push(b"{\"co\":1}\n{\"co\":2}\n{\"co\":3}\n"));
        let co: Vec<_> = r.iter().map(|r| r.get(Metric::Co)).collect();
        assert_eq!(co, vec![Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn malformed_line_is_reported_and_next_line_survives() {
        let mut parser = FrameParser::default();
        let events = parser.push(b"{\"co\":1,,}\n{\"co\":7}\n");
        let errs = errors(&events);
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], ParseError::Malformed { .. }));
        assert_eq!(errs[0].raw(), "{\"co\":1,,}");
        let r = readings(events);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].get(Metric::Co), Some(7.0));
    }

    #[test]
    fn bad_continuation_surfaces_error() {
        let mut parser = FrameParser::default();
        assert!(parser.push(br#"{"temperature":2"#).is_empty());
        let events = parser.push(b"x}\n");
        assert_eq!(errors(&events).len(), 1);
        assert_eq!(parser.pending_len(), 0);

        // A assinatura continua funcionando
        let r = readings(parser.push(b"{\"humidity\":41}\n"));
        assert_eq!(r[0].get(Metric::Humidity), Some(41.0));
    }

    #[test]
    fn non_object_is_rejected() {
        let mut parser = FrameParser::default();
        let events = parser.push(b"[1,2,3]\n");
        assert!(matches!(
            errors(&events)[0],
            ParseError::NotAnObject { raw } if raw == "[1,2,3]"
        ));
    }

    #[test]
    fn pending_overflow_is_discarded() {
        let mut parser = FrameParser::new(16);
        let events = parser.push(br#"{"temperature":22.8,"humidity":"#);
        assert!(matches!(errors(&events)[0], ParseError::Overflow { limit: 16, .. }));
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn empty_object_yields_empty_reading() {
        let mut parser = FrameParser::default();
        let r = readings(parser.push(b"{}"));
        assert!(r[0].is_empty());
    }
}
