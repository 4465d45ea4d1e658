//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável cobre o gateway, o
//! emulador e o motor de recompensas. Todas as seções usam
//! `#[serde(default)]`, então um arquivo parcial é válido.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao gravar a configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao gravar {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ──────────────────────────────────────────────
// Link BLE
// ──────────────────────────────────────────────

/// Política de reconexão após uma desconexão não solicitada.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Tentativas por evento de desconexão (0 = nunca reconecta)
    pub max_attempts: u32,
    /// Espera antes da primeira tentativa (ms)
    pub initial_backoff_ms: u64,
    /// Fator multiplicativo entre tentativas
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Espera antes da tentativa `attempt` (começando em 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }
}

/// Configuração do link com o periférico.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Endereço UDP onde a ponte BLE entrega os datagramas
    pub bind_addr: String,
    /// Tempo máximo esperando um anúncio do dispositivo (segundos)
    pub discovery_timeout_secs: f64,
    /// UUID do serviço GATT
    pub service_uuid: String,
    /// UUID da characteristic de notificação
    pub characteristic_uuid: String,
    /// Capacidade do channel de notificações (excedente é descartado)
    pub notification_queue: usize,
    /// Limite do buffer de frame parcial (bytes)
    pub max_pending_bytes: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5006".into(),
            discovery_timeout_secs: 10.0,
            service_uuid: "19b10000-e8f2-537e-4f6c-d104768a1214".into(),
            characteristic_uuid: "19b10000-e8f2-537e-4f6c-d104768a1214".into(),
            notification_queue: 64,
            max_pending_bytes: 4096,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl LinkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.discovery_timeout_secs)
    }
}

// ──────────────────────────────────────────────
// Watchdog
// ──────────────────────────────────────────────

/// Supervisão das notificações.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Período de verificação (segundos)
    pub interval_secs: f64,
    /// Silêncio máximo antes de reiniciar as notificações (segundos)
    pub stale_after_secs: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5.0,
            stale_after_secs: 15.0,
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs_f64(self.stale_after_secs)
    }
}

// ──────────────────────────────────────────────
// Backend
// ──────────────────────────────────────────────

/// Encaminhamento das leituras para o backend CRUD.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub enabled: bool,
    /// URL completa do `POST /sensor-data`
    pub endpoint: String,
    /// Identificador enviado como `deviceId`
    pub device_id: String,
    pub timeout_secs: f64,
    /// Leituras aguardando envio (excedente é descartado)
    pub queue_size: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:3001/sensor-data".into(),
            device_id: "ESP32_Sensor".into(),
            timeout_secs: 5.0,
            queue_size: 32,
        }
    }
}

// ──────────────────────────────────────────────
// Alertas
// ──────────────────────────────────────────────

/// Faixa de dois níveis. Valores iguais ao limite contam como lado "bom".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub warning_min: f64,
    pub warning_max: f64,
    pub critical_min: f64,
    pub critical_max: f64,
}

impl Band {
    pub const fn new(warning: (f64, f64), critical: (f64, f64)) -> Self {
        Self {
            warning_min: warning.0,
            warning_max: warning.1,
            critical_min: critical.0,
            critical_max: critical.1,
        }
    }

    fn is_nested(&self) -> bool {
        self.critical_min <= self.warning_min
            && self.warning_min <= self.warning_max
            && self.warning_max <= self.critical_max
    }
}

/// Limite apenas inferior (valores baixos são piores).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowerBound {
    pub warning_min: f64,
    pub critical_min: f64,
}

/// Tabela de thresholds por métrica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub temperature: Band,
    pub humidity: Band,
    pub pressure: Band,
    pub gas_resistance: LowerBound,
    pub co: Band,
    pub ethanol: Band,
    pub h2: Band,
    pub nh3: Band,
    pub ch4: Band,
    pub no2: Band,
    pub pm1: Band,
    pub pm2_5: Band,
    pub pm10: Band,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temperature: Band::new((18.0, 27.0), (10.0, 35.0)),
            humidity: Band::new((30.0, 60.0), (20.0, 70.0)),
            pressure: Band::new((980.0, 1030.0), (950.0, 1050.0)),
            gas_resistance: LowerBound {
                warning_min: 50.0,
                critical_min: 20.0,
            },
            co: Band::new((0.0, 9.0), (0.0, 35.0)),
            ethanol: Band::new((0.0, 100.0), (0.0, 500.0)),
            h2: Band::new((0.0, 100.0), (0.0, 1000.0)),
            nh3: Band::new((0.0, 25.0), (0.0, 50.0)),
            ch4: Band::new((0.0, 1000.0), (0.0, 5000.0)),
            no2: Band::new((0.0, 53.0), (0.0, 100.0)),
            pm1: Band::new((0.0, 15.0), (0.0, 35.0)),
            pm2_5: Band::new((0.0, 12.0), (0.0, 35.4)),
            pm10: Band::new((0.0, 54.0), (0.0, 154.0)),
        }
    }
}

impl AlertThresholds {
    fn bands(&self) -> [(&'static str, &Band); 12] {
        [
            ("temperature", &self.temperature),
            ("humidity", &self.humidity),
            ("pressure", &self.pressure),
            ("co", &self.co),
            ("ethanol", &self.ethanol),
            ("h2", &self.h2),
            ("nh3", &self.nh3),
            ("ch4", &self.ch4),
            ("no2", &self.no2),
            ("pm1", &self.pm1),
            ("pm2_5", &self.pm2_5),
            ("pm10", &self.pm10),
        ]
    }
}

// ──────────────────────────────────────────────
// Recompensas
// ──────────────────────────────────────────────

/// Valores de recompensa e acesso ao ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Recompensa por dificuldade (SUI)
    pub easy: f64,
    pub medium: f64,
    pub hard: f64,
    pub coin_type: String,
    /// Fullnode JSON-RPC
    pub rpc_url: String,
    /// Endereço que paga as recompensas (deve ser a conta da carteira)
    pub treasury_address: String,
    /// Orçamento de gas por transferência (MIST)
    pub gas_budget: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            easy: 0.001,
            medium: 0.002,
            hard: 0.005,
            coin_type: "0x2::sui::SUI".into(),
            rpc_url: "https://fullnode.testnet.sui.io:443".into(),
            treasury_address: String::new(),
            gas_budget: 10_000_000,
        }
    }
}

// ──────────────────────────────────────────────
// Armazenamento e emulador
// ──────────────────────────────────────────────

/// Persistência do quadro de tarefas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Arquivo JSON chave-valor
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "aeroband-tasks.json".into(),
        }
    }
}

/// Configuração do emulador de sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Destino dos datagramas (o `bind_addr` do gateway)
    pub target: String,
    pub device_name: String,
    /// Intervalo entre frames (segundos)
    pub interval_secs: f64,
    /// Tamanho máximo de cada notificação (MTU BLE - 3)
    pub chunk_size: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:5006".into(),
            device_name: "Aeroband-ESP32".into(),
            interval_secs: 1.0,
            chunk_size: 20,
        }
    }
}

// ──────────────────────────────────────────────
// Raiz
// ──────────────────────────────────────────────

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub watchdog: WatchdogConfig,
    pub backend: BackendConfig,
    pub alerts: AlertThresholds,
    pub rewards: RewardConfig,
    pub storage: StorageConfig,
    pub emulator: EmulatorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.link.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("bind_addr inválido: {}", self.link.bind_addr));
        }
        if self.link.notification_queue == 0 {
            errors.push("notification_queue não pode ser 0".into());
        }
        // Todo campo convertido em `Duration` precisa ser finito e positivo
        for (name, secs) in [
            ("link.discovery_timeout_secs", self.link.discovery_timeout_secs),
            ("watchdog.stale_after_secs", self.watchdog.stale_after_secs),
            ("backend.timeout_secs", self.backend.timeout_secs),
            ("emulator.interval_secs", self.emulator.interval_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                errors.push(format!("{name} deve ser positivo: {secs}"));
            }
        }
        if !(0.1..=60.0).contains(&self.watchdog.interval_secs) {
            errors.push(format!(
                "Intervalo do watchdog inválido: {} (0.1–60.0)",
                self.watchdog.interval_secs
            ));
        }
        if self.watchdog.stale_after_secs < self.watchdog.interval_secs {
            errors.push("stale_after_secs menor que o intervalo do watchdog".into());
        }
        if self.backend.enabled && self.backend.endpoint.is_empty() {
            errors.push("Backend habilitado sem endpoint".into());
        }
        for (name, band) in self.alerts.bands() {
            if !band.is_nested() {
                errors.push(format!("Faixa de alerta inconsistente: {name}"));
            }
        }
        let gas = &self.alerts.gas_resistance;
        if gas.critical_min > gas.warning_min {
            errors.push("gas_resistance: critical_min acima de warning_min".into());
        }
        for (name, amount) in [
            ("easy", self.rewards.easy),
            ("medium", self.rewards.medium),
            ("hard", self.rewards.hard),
        ] {
            if !(amount > 0.0) {
                errors.push(format!("Recompensa {name} deve ser positiva"));
            }
        }
        if self.emulator.chunk_size == 0 {
            errors.push("chunk_size do emulador não pode ser 0".into());
        }

        errors
    }
}
