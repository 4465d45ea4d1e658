//! Gerenciador de conexão com o periférico.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!      ▲                          │                 │
//!      └──────── erro ────────────┘   queda não solicitada
//!      ▲                                            │
//!      └── tentativas esgotadas ◄── reconexão (política) ◄┘
//! ```
//!
//! `disconnect()` do usuário desliga a reconexão automática até o próximo
//! `connect()`.

use crate::transport::{ConnectionError, DeviceInfo, DeviceTransport, GattSession, LinkSink};
use aeroband_core::config::LinkConfig;
use tracing::{debug, error, info, warn};

/// Estado do link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// O que o watchdog precisa do link.
pub trait NotificationControl {
    fn state(&self) -> ConnectionState;
    /// Para e reinicia as notificações sem derrubar a conexão.
    fn restart_notifications(&mut self) -> Result<(), ConnectionError>;
}

pub struct ConnectionManager<T: DeviceTransport> {
    transport: T,
    config: LinkConfig,
    sink: LinkSink,
    state: ConnectionState,
    device: Option<DeviceInfo>,
    session: Option<T::Session>,
    user_disconnected: bool,
}

impl<T: DeviceTransport> ConnectionManager<T> {
    pub fn new(transport: T, config: LinkConfig, sink: LinkSink) -> Self {
        Self {
            transport,
            config,
            sink,
            state: ConnectionState::Disconnected,
            device: None,
            session: None,
            user_disconnected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Seleciona o dispositivo e abre a sessão com notificações ativas.
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        self.teardown();
        self.user_disconnected = false;
        self.state = ConnectionState::Connecting;

        let device = match self.transport.request_device(&self.config.service_uuid) {
            Ok(device) => device,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        info!("Dispositivo selecionado: {} ({})", device.name, device.id);

        let result = self.open(&device);
        self.device = Some(device);
        result
    }

    /// Desconexão pedida pelo usuário. Sem reconexão automática depois.
    pub fn disconnect(&mut self) {
        self.user_disconnected = true;
        self.teardown();
        if let Some(device) = &self.device {
            info!("Desconectado de {}", device.name);
        }
    }

    /// Trata uma queda não solicitada aplicando a política de reconexão.
    ///
    /// Retorna `true` se o link voltou a `Connected`.
    pub fn handle_disconnect(&mut self, device_id: &str) -> bool {
        if self.user_disconnected || self.state != ConnectionState::Connected {
            debug!("Desconexão de {device_id} ignorada (estado {:?})", self.state);
            return false;
        }
        let Some(device) = self.device.clone() else {
            return false;
        };
        if device.id != device_id {
            debug!("Desconexão de {device_id} não é do dispositivo atual");
            return false;
        }

        warn!("Dispositivo {} desconectou", device.name);
        self.teardown();

        let policy = self.config.reconnect.clone();
        for attempt in 0..policy.max_attempts {
            let delay = policy.delay(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            info!(
                "Reconectando a {} (tentativa {}/{})",
                device.name,
                attempt + 1,
                policy.max_attempts
            );
            self.state = ConnectionState::Connecting;
            match self.open(&device) {
                Ok(()) => return true,
                Err(e) => warn!("Reconexão falhou: {e}"),
            }
        }

        if policy.max_attempts > 0 {
            error!(
                "Reconexão a {} esgotada após {} tentativa(s)",
                device.name, policy.max_attempts
            );
        }
        false
    }

    fn open(&mut self, device: &DeviceInfo) -> Result<(), ConnectionError> {
        let mut session = match self.transport.connect(device, self.sink.clone()) {
            Ok(session) => session,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let started = session
            .discover(&self.config.service_uuid, &self.config.characteristic_uuid)
            .and_then(|()| session.start_notifications());

        match started {
            Ok(()) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                info!("Conectado a {}, notificações ativas", device.name);
                Ok(())
            }
            Err(e) => {
                session.disconnect();
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.stop_notifications() {
                debug!("Falha ao parar notificações: {e}");
            }
            session.disconnect();
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl<T: DeviceTransport> NotificationControl for ConnectionManager<T> {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn restart_notifications(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        let session = self.session.as_mut().ok_or(ConnectionError::NotConnected)?;
        session.stop_notifications()?;
        session.start_notifications()
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aeroband_core::config::ReconnectPolicy;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Transporte em memória que registra cada chamada.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub no_device: bool,
        /// Quantos `connect` seguintes devem falhar
        pub connect_failures: Rc<Cell<u32>>,
        pub fail_discover: bool,
        pub fail_restart: Rc<Cell<bool>>,
        pub log: Rc<RefCell<Vec<String>>>,
    }

    pub(crate) struct FakeSession {
        log: Rc<RefCell<Vec<String>>>,
        fail_discover: bool,
        fail_restart: Rc<Cell<bool>>,
    }

    impl DeviceTransport for FakeTransport {
        type Session = FakeSession;

        fn request_device(&mut self, _service_uuid: &str) -> Result<DeviceInfo, ConnectionError> {
            self.log.borrow_mut().push("request".into());
            if self.no_device {
                return Err(ConnectionError::SelectionCancelled);
            }
            Ok(DeviceInfo {
                id: "dev-1".into(),
                name: "Aeroband-ESP32".into(),
            })
        }

        fn connect(&mut self, _device: &DeviceInfo, _sink: LinkSink) -> Result<FakeSession, ConnectionError> {
            self.log.borrow_mut().push("connect".into());
            let failures = self.connect_failures.get();
            if failures > 0 {
                self.connect_failures.set(failures - 1);
                return Err(ConnectionError::Transport("gatt indisponível".into()));
            }
            Ok(FakeSession {
                log: self.log.clone(),
                fail_discover: self.fail_discover,
                fail_restart: self.fail_restart.clone(),
            })
        }
    }

    impl GattSession for FakeSession {
        fn discover(&mut self, service_uuid: &str, _characteristic_uuid: &str) -> Result<(), ConnectionError> {
            self.log.borrow_mut().push("discover".into());
            if self.fail_discover {
                return Err(ConnectionError::ServiceNotFound(service_uuid.into()));
            }
            Ok(())
        }

        fn start_notifications(&mut self) -> Result<(), ConnectionError> {
            self.log.borrow_mut().push("start".into());
            if self.fail_restart.get() {
                return Err(ConnectionError::Transport("cccd".into()));
            }
            Ok(())
        }

        fn stop_notifications(&mut self) -> Result<(), ConnectionError> {
            self.log.borrow_mut().push("stop".into());
            Ok(())
        }

        fn disconnect(&mut self) {
            self.log.borrow_mut().push("disconnect".into());
        }
    }

    fn manager(transport: FakeTransport, reconnect: ReconnectPolicy) -> ConnectionManager<FakeTransport> {
        let (sink, _rx, _ctrl) = LinkSink::channel(8);
        let config = LinkConfig {
            reconnect,
            ..Default::default()
        };
        ConnectionManager::new(transport, config, sink)
    }

    fn count(log: &Rc<RefCell<Vec<String>>>, entry: &str) -> usize {
        log.borrow().iter().filter(|e| *e == entry).count()
    }

    #[test]
    fn connect_runs_full_handshake() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());

        link.connect().unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.device().unwrap().name, "Aeroband-ESP32");
        assert_eq!(*log.borrow(), ["request", "connect", "discover", "start"]);
    }

    #[test]
    fn cancelled_selection_stays_disconnected() {
        let transport = FakeTransport {
            no_device: true,
            ..Default::default()
        };
        let mut link = manager(transport, ReconnectPolicy::default());
        assert!(matches!(link.connect(), Err(ConnectionError::SelectionCancelled)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn missing_service_tears_session_down() {
        let transport = FakeTransport {
            fail_discover: true,
            ..Default::default()
        };
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());

        assert!(matches!(link.connect(), Err(ConnectionError::ServiceNotFound(_))));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(count(&log, "disconnect"), 1);
        assert!(matches!(link.restart_notifications(), Err(ConnectionError::NotConnected)));
    }

    #[test]
    fn unsolicited_disconnect_reconnects_once_by_default() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());
        link.connect().unwrap();

        assert!(link.handle_disconnect("dev-1"));
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(count(&log, "connect"), 2);
        assert_eq!(count(&log, "start"), 2);
        // Mesmo dispositivo, sem nova seleção
        assert_eq!(count(&log, "request"), 1);
    }

    #[test]
    fn failed_reconnect_stays_disconnected() {
        let transport = FakeTransport::default();
        let failures = transport.connect_failures.clone();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());
        link.connect().unwrap();

        failures.set(10);
        assert!(!link.handle_disconnect("dev-1"));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(count(&log, "connect"), 2);
    }

    #[test]
    fn policy_controls_attempt_count() {
        let transport = FakeTransport::default();
        let failures = transport.connect_failures.clone();
        let log = transport.log.clone();
        let policy = ReconnectPolicy {
            max_attempts: 3,
            initial_backoff_ms: 0,
            backoff_multiplier: 2.0,
        };
        let mut link = manager(transport, policy);
        link.connect().unwrap();

        failures.set(2);
        assert!(link.handle_disconnect("dev-1"));
        assert_eq!(count(&log, "connect"), 4);

        failures.set(10);
        assert!(!link.handle_disconnect("dev-1"));
        assert_eq!(count(&log, "connect"), 7);
    }

    #[test]
    fn zero_attempts_never_reconnects() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        let mut link = manager(transport, policy);
        link.connect().unwrap();

        assert!(!link.handle_disconnect("dev-1"));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(count(&log, "connect"), 1);
    }

    #[test]
    fn user_disconnect_suppresses_reconnect() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());
        link.connect().unwrap();

        link.disconnect();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.handle_disconnect("dev-1"));
        assert_eq!(count(&log, "connect"), 1);
        assert_eq!(count(&log, "disconnect"), 1);
    }

    #[test]
    fn foreign_device_events_are_ignored() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());
        link.connect().unwrap();

        assert!(!link.handle_disconnect("other"));
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(count(&log, "connect"), 1);
    }

    #[test]
    fn restart_stops_then_starts_on_live_session() {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let mut link = manager(transport, ReconnectPolicy::default());
        link.connect().unwrap();
        log.borrow_mut().clear();

        link.restart_notifications().unwrap();
        assert_eq!(*log.borrow(), ["stop", "start"]);
        assert_eq!(link.state(), ConnectionState::Connected);
    }
}
