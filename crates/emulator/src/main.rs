//! # Aeroband Emulator
//!
//! Simula o ESP32 do Aeroband do lado da ponte BLE → UDP: anuncia o serviço
//! GATT, gera leituras com jitter e envia cada frame JSON fatiado em
//! notificações do tamanho do MTU. No fim envia `Bye`.
//!
//! ## Uso
//! ```bash
//! aeroband_emulator              # envia para sempre
//! aeroband_emulator --count 30   # 30 frames e desconecta
//! ```

use aeroband_core::bridge::{Advert, Datagram, encode_datagram};
use aeroband_core::config::EmulatorConfig;
use aeroband_core::{AppConfig, Metric, SensorReading};
use rand::Rng;
use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Re-anuncia a cada N frames para o gateway achar o dispositivo a qualquer momento.
const ADVERT_EVERY: u64 = 5;

/// Valor base e amplitude do jitter por métrica.
const PROFILE: [(Metric, f64, f64); Metric::COUNT] = [
    (Metric::Temperature, 23.0, 1.5),
    (Metric::Humidity, 48.0, 6.0),
    (Metric::Pressure, 1012.0, 3.0),
    (Metric::GasResistance, 120.0, 40.0),
    (Metric::Co, 2.0, 1.5),
    (Metric::Ethanol, 0.5, 0.4),
    (Metric::H2, 0.8, 0.5),
    (Metric::Nh3, 0.6, 0.5),
    (Metric::Ch4, 1.5, 1.0),
    (Metric::No2, 0.05, 0.04),
    (Metric::Pm1, 6.0, 4.0),
    (Metric::Pm2_5, 12.0, 10.0),
    (Metric::Pm10, 20.0, 15.0),
];

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let count = match parse_count(std::env::args().skip(1)) {
        Ok(count) => count,
        Err(msg) => {
            eprintln!("{msg}\n\nUso: aeroband_emulator [--count N]");
            return ExitCode::from(2);
        }
    };

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config: {problem}");
        }
        return ExitCode::FAILURE;
    }
    let emu = &config.emulator;

    // ── Socket UDP ──
    let sock = match UdpSocket::bind("0.0.0.0:0") {
        Ok(sock) => sock,
        Err(e) => {
            error!("Falha ao criar socket UDP: {e}");
            return ExitCode::FAILURE;
        }
    };

    let advert = Datagram::Advert(Advert {
        name: emu.device_name.clone(),
        service_uuid: config.link.service_uuid.clone(),
        characteristic_uuid: config.link.characteristic_uuid.clone(),
    });

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   AEROBAND EMULATOR – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Destino:   {}", emu.target);
    println!("  Device:    {}", emu.device_name);
    println!("  Intervalo: {:.1}s", emu.interval_secs);
    println!("  Chunk:     {} bytes", emu.chunk_size);
    println!("  Frames:    {}", count.map_or("∞".to_string(), |c| c.to_string()));
    println!("══════════════════════════════════════════════");
    println!();

    let interval = Duration::from_secs_f64(emu.interval_secs);
    let mut rng = rand::rng();
    let mut sent_frames = 0u64;

    // ── Loop principal ──
    while count.is_none_or(|c| sent_frames < c) {
        let cycle_start = Instant::now();

        if sent_frames % ADVERT_EVERY == 0 {
            send(&sock, emu, &advert);
        }

        let reading = simulate(&mut rng);
        match frame_chunks(&reading, emu.chunk_size) {
            Ok(chunks) => {
                let n = chunks.len();
                for chunk in chunks {
                    send(&sock, emu, &Datagram::Notify(chunk));
                }
                info!(
                    "→ frame #{sent_frames} em {n} notificações | T {:.1}°C | UR {:.0}% | PM2.5 {:.1}",
                    reading.get(Metric::Temperature).unwrap_or_default(),
                    reading.get(Metric::Humidity).unwrap_or_default(),
                    reading.get(Metric::Pm2_5).unwrap_or_default(),
                );
            }
            Err(e) => error!("Erro ao serializar leitura: {e}"),
        }
        sent_frames += 1;

        // Dormir pelo tempo restante do intervalo
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }

    send(&sock, emu, &Datagram::Bye);
    info!("{sent_frames} frames enviados, desconectado");
    ExitCode::SUCCESS
}

fn send(sock: &UdpSocket, emu: &EmulatorConfig, datagram: &Datagram) {
    match encode_datagram(datagram) {
        Ok(bytes) => {
            if let Err(e) = sock.send_to(&bytes, &emu.target) {
                warn!("Erro ao enviar UDP: {e}");
            }
        }
        Err(e) => error!("Erro ao codificar datagrama: {e}"),
    }
}

/// `--count N` (ausente = sem limite).
fn parse_count<I>(args: I) -> Result<Option<u64>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut count = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--count" | "-n" => {
                let raw = args.next().ok_or("--count exige um valor")?;
                count = Some(raw.parse().map_err(|_| format!("Contagem inválida: {raw}"))?);
            }
            other => return Err(format!("Argumento desconhecido: {other}")),
        }
    }
    Ok(count)
}

/// Leitura com jitter uniforme em torno do perfil, sem valores negativos.
fn simulate(rng: &mut impl Rng) -> SensorReading {
    SensorReading::from_pairs(PROFILE.iter().map(|&(metric, base, jitter)| {
        let value = base + rng.random_range(-jitter..=jitter);
        (metric, (value.max(0.0) * 100.0).round() / 100.0)
    }))
}

/// Frame JSON terminado em newline, fatiado em pedaços de `chunk_size`.
fn frame_chunks(reading: &SensorReading, chunk_size: usize) -> Result<Vec<Vec<u8>>, serde_json::Error> {
    let mut frame = serde_json::to_vec(reading)?;
    frame.push(b'\n');
    Ok(frame.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect())
}
