use std::cell::RefCell;
use std::rc::Rc;

use planvault_engine::{AuditEvent, AuditSink, Notification, Notifier};

/// Notifier that keeps every notification. Clones share the same log, so a
/// test keeps one handle and gives the router another.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    log: Rc<RefCell<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.log.borrow().clone()
    }

    pub fn last(&self) -> Option<Notification> {
        self.log.borrow().last().cloned()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, notification: Notification) {
        self.log.borrow_mut().push(notification);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingAudit {
    events: Rc<RefCell<Vec<AuditEvent>>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.borrow().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn log_event(&mut self, event: AuditEvent) {
        self.events.borrow_mut().push(event);
    }
}
