use std::{
    any::{Any, TypeId},
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::anyhow;
use thiserror::Error;

use super::messages::{HandlerId, Message};
use crate::{log_debug, log_error};

const ENABLE_LOGS: bool = true;

type Handler = Arc<dyn Fn(&dyn Any) -> anyhow::Result<()> + Send + Sync>;

/// A handler that failed while a message was being published. Reported in the
/// [`PublishReport`] and logged; never returned as an error to the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerFault {
    #[error("handler {id:?} failed on {message}: {reason}")]
    Failed {
        id: HandlerId,
        message: &'static str,
        reason: String,
    },
    #[error("handler {id:?} panicked on {message}: {reason}")]
    Panicked {
        id: HandlerId,
        message: &'static str,
        reason: String,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub faults: Vec<HandlerFault>,
}

/// A recorded `(id, description, message type)` registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub id: HandlerId,
    pub description: String,
    pub message: &'static str,
}

struct Registration {
    id: HandlerId,
    description: String,
    message: &'static str,
    handler: Handler,
}

/// Synchronous in-process publish/subscribe hub.
///
/// `publish` runs every handler of the message's type on the caller's thread,
/// in registration order, and returns once all of them have run.
#[derive(Default)]
pub struct MessageBus {
    routes: RwLock<HashMap<TypeId, Vec<Registration>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to `M` under `id`.
    ///
    /// Returns `true` when an earlier registration with the same id was
    /// replaced; the replacement keeps the earlier delivery position.
    pub fn register_handler<M, F>(
        &self,
        id: HandlerId,
        description: impl Into<String>,
        handler: F,
    ) -> bool
    where
        M: Message,
        F: Fn(&M) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |message: &dyn Any| match message.downcast_ref::<M>() {
            Some(message) => handler(message),
            None => Err(anyhow!("message routed to a handler of another type")),
        });
        let registration = Registration {
            id,
            description: description.into(),
            message: M::NAME,
            handler: erased,
        };

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let handlers = routes.entry(TypeId::of::<M>()).or_default();

        match handlers.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => {
                log_debug!("replacing handler {:?} for {}", id, M::NAME);
                *existing = registration;
                true
            }
            None => {
                log_debug!("registered handler {:?} for {}", id, M::NAME);
                handlers.push(registration);
                false
            }
        }
    }

    pub fn unregister_handler<M: Message>(&self, id: HandlerId) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handlers) = routes.get_mut(&TypeId::of::<M>()) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|registration| registration.id != id);
        before != handlers.len()
    }

    /// Delivers `message` to every handler registered for `M`.
    ///
    /// Handler errors and panics are logged and collected in the report; they
    /// never reach the publisher or stop delivery to the remaining handlers.
    pub fn publish<M: Message>(&self, message: &M) -> PublishReport {
        // Snapshot the handler list so handlers may publish or register re-entrantly.
        let handlers: Vec<(HandlerId, Handler)> = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            match routes.get(&TypeId::of::<M>()) {
                Some(registrations) => registrations
                    .iter()
                    .map(|registration| (registration.id, Arc::clone(&registration.handler)))
                    .collect(),
                None => return PublishReport::default(),
            }
        };

        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(message as &dyn Any)));
            let fault = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => HandlerFault::Failed {
                    id,
                    message: M::NAME,
                    reason: format!("{err:#}"),
                },
                Err(payload) => HandlerFault::Panicked {
                    id,
                    message: M::NAME,
                    reason: panic_reason(payload.as_ref()),
                },
            };
            log_error!("{fault}");
            report.faults.push(fault);
        }

        report
    }

    pub fn handler_count<M: Message>(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<M>())
            .map_or(0, Vec::len)
    }

    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<RegistrationInfo> = routes
            .values()
            .flatten()
            .map(|registration| RegistrationInfo {
                id: registration.id,
                description: registration.description.clone(),
                message: registration.message,
            })
            .collect();
        all.sort_by(|a, b| a.message.cmp(b.message));
        all
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
