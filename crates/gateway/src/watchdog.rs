//! Watchdog de notificações.
//!
//! Se o link está `Connected` mas nada chega há mais que `stale_after`, faz
//! um único restart das notificações e rearma o timestamp. Falhas do restart
//! só são logadas.

use crate::connection::{ConnectionState, NotificationControl};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Watchdog {
    stale_after: Duration,
    last_data: Instant,
    restarts: u64,
}

impl Watchdog {
    pub fn new(stale_after: Duration, now: Instant) -> Self {
        Self {
            stale_after,
            last_data: now,
            restarts: 0,
        }
    }

    /// Chamado a cada notificação recebida.
    pub fn record_data(&mut self, now: Instant) {
        self.last_data = now;
    }

    pub fn last_data(&self) -> Instant {
        self.last_data
    }

    /// Restarts disparados até agora.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Verificação periódica. Retorna `true` se disparou um restart.
    pub fn check(&mut self, now: Instant, link: &mut impl NotificationControl) -> bool {
        if link.state() != ConnectionState::Connected {
            return false;
        }
        let silence = now.saturating_duration_since(self.last_data);
        if silence <= self.stale_after {
            return false;
        }

        warn!("Sem dados há {:.1}s, reiniciando notificações", silence.as_secs_f64());
        match link.restart_notifications() {
            Ok(()) => info!("Notificações reiniciadas"),
            Err(e) => warn!("Falha ao reiniciar notificações: {e}"),
        }
        self.last_data = now;
        self.restarts += 1;
        true
    }
}
