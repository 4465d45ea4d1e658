//! Transporte via ponte BLE → UDP.
//!
//! A ponte (ESP32 com WiFi ou o emulador) envia anúncios, notificações e
//! desconexões como datagramas (ver `aeroband_core::bridge`). Aqui:
//!
//! - o primeiro anúncio com o serviço configurado é a seleção do dispositivo
//! - o par serviço/characteristic anunciado é a tabela GATT
//! - `Bye` é uma desconexão não solicitada e apaga o anúncio: reconectar
//!   exige um anúncio novo
//!
//! Cada sessão tem uma thread leitora (`udp-bridge`) que só entrega
//! notificações do peer selecionado enquanto `notifying` está ligado.

use crate::transport::{ConnectionError, DeviceInfo, DeviceTransport, GattSession, LinkSink};
use aeroband_core::bridge::{Advert, Datagram, MAX_DATAGRAM, decode_datagram};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timeout de cada `recv_from`, para as threads checarem o flag de parada.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Anúncios vistos, por id do dispositivo. Compartilhado com os leitores.
type Adverts = Arc<Mutex<HashMap<String, (SocketAddr, Advert)>>>;

pub struct UdpBridge {
    socket: UdpSocket,
    discovery_timeout: Duration,
    adverts: Adverts,
}

impl UdpBridge {
    pub fn bind(addr: &str, discovery_timeout: Duration) -> Result<Self, ConnectionError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        info!("Ponte BLE escutando em {}", socket.local_addr()?);
        Ok(Self {
            socket,
            discovery_timeout,
            adverts: Adverts::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectionError> {
        Ok(self.socket.local_addr()?)
    }
}

impl DeviceTransport for UdpBridge {
    type Session = UdpSession;

    fn request_device(&mut self, service_uuid: &str) -> Result<DeviceInfo, ConnectionError> {
        let deadline = Instant::now() + self.discovery_timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        info!("Aguardando anúncio do serviço {service_uuid}...");

        while Instant::now() < deadline {
            let (size, addr) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(ref e) if is_timeout(e) => continue,
                Err(e) => return Err(e.into()),
            };
            match decode_datagram(&buf[..size]) {
                Ok(Datagram::Advert(advert)) if advert.service_uuid.eq_ignore_ascii_case(service_uuid) => {
                    let device = DeviceInfo {
                        id: addr.to_string(),
                        name: advert.name.clone(),
                    };
                    self.adverts
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(device.id.clone(), (addr, advert));
                    return Ok(device);
                }
                Ok(Datagram::Advert(advert)) => {
                    debug!("Ignorando anúncio de {} (serviço {})", advert.name, advert.service_uuid)
                }
                Ok(_) => {}
                Err(e) => debug!("Pacote inválido de {addr}: {e}"),
            }
        }

        Err(ConnectionError::SelectionCancelled)
    }

    fn connect(&mut self, device: &DeviceInfo, sink: LinkSink) -> Result<UdpSession, ConnectionError> {
        let (peer, advert) = self
            .adverts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| ConnectionError::Transport(format!("dispositivo {} sem anúncio ativo", device.id)))?;

        let socket = self.socket.try_clone()?;
        let closed = Arc::new(AtomicBool::new(false));
        let notifying = Arc::new(AtomicBool::new(false));

        let reader = {
            let closed = closed.clone();
            let notifying = notifying.clone();
            let adverts = self.adverts.clone();
            let device_id = device.id.clone();
            std::thread::Builder::new()
                .name("udp-bridge".into())
                .spawn(move || {
                    reader_loop(&socket, peer, &device_id, &sink, &adverts, &closed, &notifying)
                })?
        };

        Ok(UdpSession {
            advert,
            closed,
            notifying,
            reader: Some(reader),
        })
    }
}

/// Sessão sobre a ponte UDP.
pub struct UdpSession {
    advert: Advert,
    closed: Arc<AtomicBool>,
    notifying: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl GattSession for UdpSession {
    fn discover(&mut self, service_uuid: &str, characteristic_uuid: &str) -> Result<(), ConnectionError> {
        if !self.advert.service_uuid.eq_ignore_ascii_case(service_uuid) {
            return Err(ConnectionError::ServiceNotFound(service_uuid.to_string()));
        }
        if !self.advert.characteristic_uuid.eq_ignore_ascii_case(characteristic_uuid) {
            return Err(ConnectionError::CharacteristicNotFound(characteristic_uuid.to_string()));
        }
        Ok(())
    }

    fn start_notifications(&mut self) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::NotConnected);
        }
        self.notifying.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_notifications(&mut self) -> Result<(), ConnectionError> {
        self.notifying.store(false, Ordering::Release);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.notifying.store(false, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn reader_loop(
    socket: &UdpSocket,
    peer: SocketAddr,
    device_id: &str,
    sink: &LinkSink,
    adverts: &Mutex<HashMap<String, (SocketAddr, Advert)>>,
    closed: &AtomicBool,
    notifying: &AtomicBool,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !closed.load(Ordering::Acquire) {
        let (size, addr) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                warn!("Erro ao receber UDP: {e}");
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };
        if addr != peer {
            debug!("Ignorando pacote de {addr} (esperado: {peer})");
            continue;
        }

        match decode_datagram(&buf[..size]) {
            Ok(Datagram::Notify(bytes)) => {
                if notifying.load(Ordering::Acquire) {
                    sink.notify(bytes);
                }
            }
            Ok(Datagram::Bye) => {
                adverts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(device_id);
                closed.store(true, Ordering::Release);
                sink.disconnected(device_id);
            }
            Ok(Datagram::Advert(_)) => {}
            Err(e) => debug!("Pacote inválido de {addr}: {e}"),
        }
    }
    debug!("Leitor da sessão {device_id} encerrado");
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}
