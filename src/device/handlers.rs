use std::collections::HashMap;
use std::sync::Arc;

use crate::serial::link::{DeviceEvent, MessageKind};

pub type Handler = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// One callback per message kind; registering again replaces the previous
/// callback.
#[derive(Default)]
pub struct MessageHandlers {
    handlers: HashMap<MessageKind, Handler>,
}

impl MessageHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: MessageKind, handler: F)
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            log::debug!("Replaced handler for {}", kind.tag());
        } else {
            log::debug!("Handler registered for {}", kind.tag());
        }
    }

    /// The handler for `kind`, cloned so it can be called without holding
    /// whatever lock guards the registry.
    pub fn get(&self, kind: MessageKind) -> Option<Handler> {
        self.handlers.get(&kind).cloned()
    }

    /// Invoke the handler for `event`. Returns false when none is registered.
    pub fn dispatch(&self, event: &DeviceEvent) -> bool {
        match self.handlers.get(&event.kind()) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}
