//! Fronteira com o transporte do dispositivo.
//!
//! O gateway não fala BLE diretamente: um [`DeviceTransport`] seleciona o
//! periférico e abre uma [`GattSession`]. As notificações chegam por push
//! num [`LinkSink`], com dois channels separados:
//!
//! - notificações: bounded, o excedente é descartado e contado
//! - controle (desconexões): nunca descartado

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Periférico escolhido pelo usuário (ou pela ponte).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identificador estável do transporte (endereço da ponte, MAC, ...)
    pub id: String,
    pub name: String,
}

/// Evento de controle do link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// O periférico caiu sem o usuário pedir
    Disconnected { device_id: String },
}

/// Erros de conexão.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Seleção de dispositivo cancelada")]
    SelectionCancelled,

    #[error("Serviço {0} não encontrado")]
    ServiceNotFound(String),

    #[error("Characteristic {0} não encontrada")]
    CharacteristicNotFound(String),

    #[error("Sem conexão ativa")]
    NotConnected,

    #[error("Falha no transporte: {0}")]
    Transport(String),

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Lado produtor dos channels do link, entregue a cada sessão.
#[derive(Debug, Clone)]
pub struct LinkSink {
    notifications: Sender<Vec<u8>>,
    control: Sender<LinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl LinkSink {
    /// Cria o sink e os receivers consumidos pelo loop de eventos.
    pub fn channel(capacity: usize) -> (Self, Receiver<Vec<u8>>, Receiver<LinkEvent>) {
        let (notif_tx, notif_rx) = bounded(capacity.max(1));
        let (ctrl_tx, ctrl_rx) = unbounded();
        let sink = Self {
            notifications: notif_tx,
            control: ctrl_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, notif_rx, ctrl_rx)
    }

    /// Entrega uma notificação. Channel cheio descarta a mais nova.
    pub fn notify(&self, bytes: Vec<u8>) -> bool {
        match self.notifications.try_send(bytes) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Channel de notificações cheio, descartando pacote");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Sinaliza desconexão não solicitada.
    pub fn disconnected(&self, device_id: &str) {
        let _ = self.control.send(LinkEvent::Disconnected {
            device_id: device_id.to_string(),
        });
    }

    /// Notificações descartadas desde o início.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Seleção de dispositivo e abertura de sessão.
pub trait DeviceTransport {
    type Session: GattSession;

    /// Pede um dispositivo que anuncie `service_uuid`.
    fn request_device(&mut self, service_uuid: &str) -> Result<DeviceInfo, ConnectionError>;

    /// Abre a sessão GATT; notificações e desconexões vão para `sink`.
    fn connect(&mut self, device: &DeviceInfo, sink: LinkSink) -> Result<Self::Session, ConnectionError>;
}

/// Sessão GATT aberta com um periférico.
pub trait GattSession {
    fn discover(&mut self, service_uuid: &str, characteristic_uuid: &str) -> Result<(), ConnectionError>;
    fn start_notifications(&mut self) -> Result<(), ConnectionError>;
    fn stop_notifications(&mut self) -> Result<(), ConnectionError>;
    /// Encerra a sessão. Idempotente.
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_and_counts() {
        let (sink, rx, _ctrl) = LinkSink::channel(2);
        assert!(sink.notify(b"a".to_vec()));
        assert!(sink.notify(b"b".to_vec()));
        assert!(!sink.notify(b"c".to_vec()));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), b"a");
        assert_eq!(rx.try_recv().unwrap(), b"b");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn control_events_are_never_dropped() {
        let (sink, _rx, ctrl) = LinkSink::channel(1);
        for _ in 0..100 {
            sink.disconnected("dev");
        }
        assert_eq!(ctrl.len(), 100);
        assert_eq!(
            ctrl.recv().unwrap(),
            LinkEvent::Disconnected {
                device_id: "dev".into()
            }
        );
    }
}
