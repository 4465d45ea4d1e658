//! Encaminhamento das leituras para o backend CRUD.
//!
//! Fire-and-forget: o loop de eventos só enfileira; uma thread dedicada faz
//! o `POST`. Fila cheia descarta a leitura, falhas viram `warn!` e nunca há
//! retry.

use aeroband_core::SensorReading;
use aeroband_core::config::BackendConfig;
use crossbeam_channel::{Sender, TrySendError, bounded};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Destino das leituras parseadas.
pub trait Forwarder {
    fn forward(&self, reading: &SensorReading);
}

impl<F: Forwarder + ?Sized> Forwarder for Box<F> {
    fn forward(&self, reading: &SensorReading) {
        (**self).forward(reading)
    }
}

/// Descarta tudo (backend desabilitado).
#[derive(Debug, Default)]
pub struct NullForwarder;

impl Forwarder for NullForwarder {
    fn forward(&self, _reading: &SensorReading) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Falha ao criar cliente HTTP: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Falha ao criar thread do forwarder: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Corpo do `POST /sensor-data`: leitura plana (ausente = `null`) + `deviceId`.
pub fn backend_body(reading: &SensorReading, device_id: &str) -> Value {
    let mut body = match serde_json::to_value(reading) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    body.insert("deviceId".into(), Value::String(device_id.to_string()));
    Value::Object(body)
}

/// Forwarder HTTP com fila bounded e thread de envio.
pub struct HttpForwarder {
    tx: Sender<SensorReading>,
    dropped: Arc<AtomicU64>,
}

impl HttpForwarder {
    pub fn spawn(config: &BackendConfig) -> Result<Self, ForwardError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_secs))
            .build()?;
        let (tx, rx) = bounded::<SensorReading>(config.queue_size.max(1));
        let endpoint = config.endpoint.clone();
        let device_id = config.device_id.clone();

        std::thread::Builder::new()
            .name("backend-forwarder".into())
            .spawn(move || {
                info!("Forwarder enviando para {endpoint}");
                for reading in rx {
                    post_reading(&client, &endpoint, &backend_body(&reading, &device_id));
                }
                debug!("Forwarder encerrado");
            })?;

        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Leituras descartadas por fila cheia.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Forwarder for HttpForwarder {
    fn forward(&self, reading: &SensorReading) {
        match self.tx.try_send(reading.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Fila do backend cheia, descartando leitura");
            }
            Err(TrySendError::Disconnected(_)) => warn!("Thread do forwarder encerrada"),
        }
    }
}

impl Drop for HttpForwarder {
    fn drop(&mut self) {
        let dropped = self.dropped();
        if dropped > 0 {
            warn!("{dropped} leituras não enviadas ao backend (fila cheia)");
        }
    }
}

fn post_reading(client: &reqwest::blocking::Client, endpoint: &str, body: &Value) {
    match client.post(endpoint).json(body).send() {
        Ok(resp) if resp.status().is_success() => debug!("Leitura enviada ({})", resp.status()),
        Ok(resp) => warn!("Backend recusou leitura: {}", resp.status()),
        Err(e) => warn!("Erro ao enviar leitura: {e}"),
    }
}
