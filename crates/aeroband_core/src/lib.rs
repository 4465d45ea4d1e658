//! # Aeroband Core
//!
//! Crate compartilhada com o modelo de dados do sensor ambiental, o parser
//! de frames BLE, o protocolo da ponte UDP, a configuração TOML e o fluxo de
//! tarefas com recompensa em SUI.
//!
//! ## Módulos
//! - [`types`] – Métricas conhecidas e `SensorReading`
//! - [`parser`] – Decodificação de frames JSON fragmentados
//! - [`history`] – Janela FIFO de 20 amostras por métrica
//! - [`alerts`] – Thresholds e níveis de alerta
//! - [`bridge`] – Datagramas da ponte BLE → UDP
//! - [`config`] – Configuração unificada via TOML
//! - [`tasks`] – Quadro de tarefas e persistência chave-valor
//! - [`reward`] – Motor de recompensa (tesouraria, carteira, transferência)

pub mod types;
pub mod parser;
pub mod history;
pub mod alerts;
pub mod bridge;
pub mod config;
pub mod tasks;
pub mod reward;

// Re-exports convenientes
pub use types::{Metric, SensorReading};
pub use parser::{FrameParser, ParseEvent};
pub use config::AppConfig;
pub use bridge::{encode_datagram, decode_datagram, PROTOCOL_VERSION};

/// Timestamp Unix atual em milissegundos.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
