use std::sync::Arc;

use tokio::sync::watch;

// ═══════════════════════════════════════════════════════════════
//  Flow control: backpressure между sink и ingestor
// ═══════════════════════════════════════════════════════════════

/// Состояние потока доставки route'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Ingestor может выдать следующую запись.
    Resumed,
    /// В pipeline есть запись в работе: доставка остановлена.
    Suspended,
    /// Route закрыт (fault или shutdown). Терминальное состояние.
    Closed,
}

/// Общий переключатель suspend/resume для одного route'а.
///
/// Sink держит его на своей стороне, ingestor ждёт `Resumed` перед каждой
/// следующей записью. Переходы идемпотентны; из `Closed` выхода нет.
#[derive(Clone)]
pub struct FlowControl {
    tx: Arc<watch::Sender<FlowState>>,
}

impl FlowControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FlowState::Resumed);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> FlowState {
        *self.tx.borrow()
    }

    /// Остановить доставку. Повторный вызов ничего не меняет.
    pub fn suspend(&self) {
        self.tx.send_if_modified(|state| {
            if *state == FlowState::Resumed {
                *state = FlowState::Suspended;
                true
            } else {
                false
            }
        });
    }

    /// Разрешить следующую запись.
    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if *state == FlowState::Suspended {
                *state = FlowState::Resumed;
                true
            } else {
                false
            }
        });
    }

    pub fn close(&self) {
        self.tx.send_if_modified(|state| {
            if *state == FlowState::Closed {
                false
            } else {
                *state = FlowState::Closed;
                true
            }
        });
    }

    /// Дождаться `Resumed`. `false`: поток закрыт и ждать больше нечего.
    pub async fn wait_resumed(&self) -> bool {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                FlowState::Resumed => return true,
                FlowState::Closed => return false,
                FlowState::Suspended => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new()
    }
}
