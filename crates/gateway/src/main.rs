//! # Aeroband Gateway
//!
//! Conecta ao sensor ambiental Aeroband (ESP32) através da ponte BLE → UDP,
//! reconstrói os frames JSON, mantém o histórico, avalia alertas e encaminha
//! cada leitura para o backend. Também administra o quadro de tarefas.
//!
//! ## Uso
//! ```bash
//! aeroband_gateway                  # run: conecta e processa leituras
//! aeroband_gateway tasks list
//! aeroband_gateway tasks assign 7
//! ```
//!
//! Em `run`, digitar `q` + Enter encerra o gateway.

mod cli;
mod connection;
mod forwarder;
mod pipeline;
mod sui_rpc;
mod transport;
mod udp_bridge;
mod watchdog;

use aeroband_core::AppConfig;
use cli::{Command, GatewayError};
use connection::{ConnectionManager, ConnectionState};
use crossbeam_channel::{Receiver, Sender, select, tick};
use forwarder::{Forwarder, HttpForwarder, NullForwarder};
use pipeline::IngestionPipeline;
use std::io::BufRead;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use transport::{DeviceTransport, LinkEvent, LinkSink};
use udp_bridge::UdpBridge;
use watchdog::Watchdog;

/// Espera entre tentativas de conexão inicial.
const CONNECT_RETRY: Duration = Duration::from_secs(2);

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let command = match cli::parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };
    if command == Command::Help {
        println!("{}", cli::USAGE);
        return ExitCode::SUCCESS;
    }

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config: {problem}");
        }
        error!("Corrija {} antes de continuar", config_path.display());
        return ExitCode::FAILURE;
    }

    let result = match command {
        Command::Run => run(&config),
        other => cli::run_tasks(&other, &config, &config_path),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

// ──────────────────────────────────────────────
// Loop de eventos
// ──────────────────────────────────────────────

/// Por que o loop de eventos terminou.
enum LoopExit {
    Shutdown,
    LinkLost,
}

fn run(config: &AppConfig) -> Result<(), GatewayError> {
    let (sink, notifications, control) = LinkSink::channel(config.link.notification_queue);
    let transport = UdpBridge::bind(&config.link.bind_addr, config.link.discovery_timeout())?;
    let mut link = ConnectionManager::new(transport, config.link.clone(), sink.clone());

    let forwarder: Box<dyn Forwarder> = if config.backend.enabled {
        Box::new(HttpForwarder::spawn(&config.backend)?)
    } else {
        info!("Backend desabilitado");
        Box::new(NullForwarder)
    };
    let mut pipeline = IngestionPipeline::new(
        config.link.max_pending_bytes,
        config.alerts.clone(),
        forwarder,
    );
    let (shutdown_tx, shutdown) = crossbeam_channel::bounded(1);
    spawn_stdin_watcher(shutdown_tx.clone());

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   AEROBAND GATEWAY – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Ponte:     {}", config.link.bind_addr);
    println!("  Serviço:   {}", config.link.service_uuid);
    println!("  Watchdog:  {:.0}s / {:.0}s", config.watchdog.interval_secs, config.watchdog.stale_after_secs);
    println!("  Backend:   {}", if config.backend.enabled { config.backend.endpoint.as_str() } else { "-" });
    println!("  Protocolo: ponte v{}", aeroband_core::PROTOCOL_VERSION);
    println!("══════════════════════════════════════════════");
    println!();

    loop {
        if !connect_until_ready(&mut link, &shutdown) {
            break;
        }
        pipeline.reset_link();

        match event_loop(config, &mut link, &mut pipeline, &sink, &notifications, &control, &shutdown) {
            LoopExit::Shutdown => break,
            LoopExit::LinkLost => warn!(
                "Link com {} perdido, voltando à busca pelo dispositivo",
                link.device().map_or("?", |d| d.name.as_str())
            ),
        }
    }

    drop(shutdown_tx);
    link.disconnect();
    let stats = pipeline.stats();
    info!(
        "Encerrado: {} leituras, {} frames inválidos, {} alertas, {} notificações descartadas",
        stats.readings,
        stats.parse_errors,
        stats.alerts,
        sink.dropped()
    );
    Ok(())
}

/// Tenta conectar até conseguir. `false` se pediram para encerrar.
fn connect_until_ready<T: DeviceTransport>(link: &mut ConnectionManager<T>, shutdown: &Receiver<()>) -> bool {
    loop {
        match link.connect() {
            Ok(()) => return true,
            Err(e) => warn!("Falha ao conectar: {e}. Tentando novamente em {}s...", CONNECT_RETRY.as_secs()),
        }
        match shutdown.recv_timeout(CONNECT_RETRY) {
            Ok(()) => return false,
            Err(_) => continue,
        }
    }
}

fn event_loop<T: DeviceTransport, F: Forwarder>(
    config: &AppConfig,
    link: &mut ConnectionManager<T>,
    pipeline: &mut IngestionPipeline<F>,
    sink: &LinkSink,
    notifications: &Receiver<Vec<u8>>,
    control: &Receiver<LinkEvent>,
    shutdown: &Receiver<()>,
) -> LoopExit {
    let ticker = tick(config.watchdog.interval());
    let mut watchdog = Watchdog::new(config.watchdog.stale_after(), Instant::now());
    let mut reported_drops = sink.dropped();

    loop {
        select! {
            recv(notifications) -> msg => {
                let Ok(bytes) = msg else { return LoopExit::Shutdown };
                watchdog.record_data(Instant::now());
                pipeline.ingest(&bytes);
            }
            recv(control) -> msg => {
                let Ok(LinkEvent::Disconnected { device_id }) = msg else { return LoopExit::Shutdown };
                pipeline.reset_link();
                if link.handle_disconnect(&device_id) {
                    watchdog.record_data(Instant::now());
                } else if link.state() == ConnectionState::Disconnected {
                    return LoopExit::LinkLost;
                }
            }
            recv(ticker) -> _ => {
                watchdog.check(Instant::now(), link);
                let dropped = sink.dropped();
                if dropped > reported_drops {
                    warn!("{} notificações descartadas (channel cheio)", dropped - reported_drops);
                    reported_drops = dropped;
                }
            }
            recv(shutdown) -> _ => {
                info!("Encerrando ({} restarts do watchdog)", watchdog.restarts());
                return LoopExit::Shutdown;
            }
        }
    }
}

/// Thread que lê stdin; `q` encerra. EOF não encerra (execução sem terminal).
fn spawn_stdin_watcher(tx: Sender<()>) {
    let spawned = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if matches!(line.trim(), "q" | "quit") {
                    let _ = tx.send(());
                    return;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Sem leitura de stdin ({e}), use Ctrl+C para sair");
    }
}
