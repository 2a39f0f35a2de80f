//! Window focus monitoring
//!
//! The host environment reports two transitions: the document became hidden
//! (tab switch, minimize) and the window lost focus (another application
//! surfaced). Both arrive through an injected [`FocusSignalSource`]. Listener
//! callbacks only enqueue a [`FocusSignal`]; the controller drains the queue
//! on its own loop, so no callback ever touches session state directly.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Platform focus transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSignal {
    /// Document hidden; counts toward the tab-switch lockout
    Hidden,
    /// Window blurred; recorded but not counted as a switch
    Blur,
}

/// Registration handle returned by a signal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub type FocusCallback = Box<dyn FnMut() + Send>;

/// Host-environment focus events
pub trait FocusSignalSource {
    fn on_hidden(&mut self, callback: FocusCallback) -> ListenerId;

    fn on_blur(&mut self, callback: FocusCallback) -> ListenerId;

    /// Remove a listener; unknown ids are ignored
    fn remove_listener(&mut self, id: ListenerId);
}

/// A focus signal stamped with the instant its callback fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusEvent {
    pub signal: FocusSignal,
    pub at: DateTime<Utc>,
}

/// Focus signal inbox with a tab-switch counter
#[derive(Debug)]
pub struct FocusMonitor {
    tx: Sender<FocusEvent>,
    rx: Receiver<FocusEvent>,
    listeners: Vec<ListenerId>,
    switch_count: u32,
    sealed: bool,
}

impl Default for FocusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusMonitor {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            listeners: Vec::new(),
            switch_count: 0,
            sealed: false,
        }
    }

    pub fn is_listening(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Tab switches that made it into the ledger
    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    /// Count one recorded tab switch; returns the new total
    pub fn accept_switch(&mut self) -> u32 {
        self.switch_count += 1;
        self.switch_count
    }

    /// Register both listeners. Each callback stamps its signal with `clock`.
    /// Calling twice does not double-register.
    pub fn start(&mut self, source: &mut dyn FocusSignalSource, clock: Arc<dyn Clock>) {
        if self.is_listening() || self.sealed {
            return;
        }
        let hidden = source.on_hidden(Self::enqueue(
            self.tx.clone(),
            clock.clone(),
            FocusSignal::Hidden,
        ));
        let blur = source.on_blur(Self::enqueue(self.tx.clone(), clock, FocusSignal::Blur));
        self.listeners = vec![hidden, blur];
        debug!("focus listeners registered");
    }

    fn enqueue(tx: Sender<FocusEvent>, clock: Arc<dyn Clock>, signal: FocusSignal) -> FocusCallback {
        Box::new(move || {
            let _ = tx.send(FocusEvent {
                signal,
                at: clock.now(),
            });
        })
    }

    /// Stop accepting signals. Listeners are removed exactly once and anything
    /// still queued is discarded.
    pub fn stop(&mut self, source: &mut dyn FocusSignalSource) {
        self.sealed = true;
        for id in self.listeners.drain(..) {
            source.remove_listener(id);
        }
        while self.rx.try_recv().is_ok() {}
    }

    /// Ignore everything from now on without touching the source
    pub fn seal(&mut self) {
        self.sealed = true;
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Take queued events in arrival order. Returns nothing once sealed.
    pub fn drain(&mut self) -> Vec<FocusEvent> {
        let events: Vec<FocusEvent> = self.rx.try_iter().collect();
        if self.sealed {
            return Vec::new();
        }
        events
    }
}

type ListenerTable = Vec<(ListenerId, FocusSignal, FocusCallback)>;

/// In-process signal source; clones share listeners, so a test or simulation
/// keeps one clone to fire events while the controller owns another.
#[derive(Clone, Default)]
pub struct ManualFocusSource {
    listeners: Arc<Mutex<ListenerTable>>,
    next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for ManualFocusSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualFocusSource")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ManualFocusSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn fire(&self, signal: FocusSignal) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for (_, kind, callback) in listeners.iter_mut() {
            if *kind == signal {
                callback();
            }
        }
    }

    pub fn fire_hidden(&self) {
        self.fire(FocusSignal::Hidden);
    }

    pub fn fire_blur(&self) {
        self.fire(FocusSignal::Blur);
    }

    fn register(&mut self, signal: FocusSignal, callback: FocusCallback) -> ListenerId {
        let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
        let id = ListenerId(*next);
        *next += 1;
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, signal, callback));
        id
    }
}

impl FocusSignalSource for ManualFocusSource {
    fn on_hidden(&mut self, callback: FocusCallback) -> ListenerId {
        self.register(FocusSignal::Hidden, callback)
    }

    fn on_blur(&mut self, callback: FocusCallback) -> ListenerId {
        self.register(FocusSignal::Blur, callback)
    }

    fn remove_listener(&mut self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(lid, _, _)| *lid != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn test_signals_queue_until_drained() {
        let clock = clock();
        let mut source = ManualFocusSource::new();
        let mut monitor = FocusMonitor::new();
        monitor.start(&mut source, clock.clone());
        assert_eq!(source.listener_count(), 2);

        source.fire_hidden();
        clock.advance_secs(2);
        source.fire_blur();
        source.fire_hidden();

        let events = monitor.drain();
        let signals: Vec<FocusSignal> = events.iter().map(|e| e.signal).collect();
        assert_eq!(
            signals,
            vec![FocusSignal::Hidden, FocusSignal::Blur, FocusSignal::Hidden]
        );
        assert_eq!(events[1].at - events[0].at, chrono::Duration::seconds(2));
        assert!(monitor.drain().is_empty());
    }

    #[test]
    fn test_drain_does_not_count_switches() {
        let mut source = ManualFocusSource::new();
        let mut monitor = FocusMonitor::new();
        monitor.start(&mut source, clock());

        for _ in 0..4 {
            source.fire_hidden();
        }
        assert_eq!(monitor.drain().len(), 4);
        assert_eq!(monitor.switch_count(), 0);

        assert_eq!(monitor.accept_switch(), 1);
        assert_eq!(monitor.switch_count(), 1);
    }

    #[test]
    fn test_start_twice_registers_once() {
        let mut source = ManualFocusSource::new();
        let mut monitor = FocusMonitor::new();
        monitor.start(&mut source, clock());
        monitor.start(&mut source, clock());
        assert_eq!(source.listener_count(), 2);
    }

    #[test]
    fn test_stop_removes_listeners_and_discards_pending() {
        let mut source = ManualFocusSource::new();
        let mut monitor = FocusMonitor::new();
        monitor.start(&mut source, clock());

        source.fire_hidden();
        monitor.stop(&mut source);
        monitor.stop(&mut source);

        assert_eq!(source.listener_count(), 0);
        source.fire_hidden();
        assert!(monitor.drain().is_empty());
        assert_eq!(monitor.switch_count(), 0);

        // A stopped monitor never re-registers
        monitor.start(&mut source, clock());
        assert_eq!(source.listener_count(), 0);
    }

    #[test]
    fn test_sealed_monitor_ignores_signals() {
        let mut source = ManualFocusSource::new();
        let mut monitor = FocusMonitor::new();
        monitor.start(&mut source, clock());
        monitor.seal();

        source.fire_blur();
        assert!(monitor.drain().is_empty());
        assert!(monitor.is_sealed());
    }
}
