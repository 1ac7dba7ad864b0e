/*
    RoutingMessageDispatcher

    Routes non-control routing messages that reach the end of a path to the
    subsystem registered for their type. One handler per type, registered once.

    parse_routing_message_buffer() is the single decode point for routing
    payloads: unknown tags and malformed bodies never reach a handler.
*/

use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

use super::metrics;
use super::routing_message::{RoutingMessage, RoutingMessageType};
use crate::core_path::PathId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a handler is already registered for {0:?}")]
    AlreadyRegistered(RoutingMessageType),
}

/// Consumer of routing messages arriving on a path.
pub trait RoutingHandler {
    /// `rx_path` names the path the message came in on. Returns false if the
    /// message was not handled.
    fn handle_routing_message(&mut self, rx_path: PathId, msg: RoutingMessage) -> bool;
}

#[derive(Default)]
pub struct RoutingMessageDispatcher {
    handlers: HashMap<RoutingMessageType, Box<dyn RoutingHandler + Send + Sync>>,
}

impl RoutingMessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: RoutingMessageType,
        handler: Box<dyn RoutingHandler + Send + Sync>,
    ) -> Result<(), DispatchError> {
        if self.handlers.contains_key(&kind) {
            return Err(DispatchError::AlreadyRegistered(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn is_registered(&self, kind: RoutingMessageType) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn dispatch(&mut self, rx_path: PathId, msg: RoutingMessage) -> bool {
        let kind = msg.message_type();
        match self.handlers.get_mut(&kind) {
            Some(handler) => handler.handle_routing_message(rx_path, msg),
            None => {
                trace!(path = %rx_path, ?kind, "no handler registered");
                metrics::frame_dropped("no_handler");
                false
            }
        }
    }
}

impl RoutingHandler for RoutingMessageDispatcher {
    fn handle_routing_message(&mut self, rx_path: PathId, msg: RoutingMessage) -> bool {
        self.dispatch(rx_path, msg)
    }
}

/// Decode `buf` and hand the message to `handler`.
pub fn parse_routing_message_buffer(
    buf: &[u8],
    handler: &mut dyn RoutingHandler,
    rx_path: PathId,
) -> bool {
    match RoutingMessage::decode(buf) {
        Ok(msg) => handler.handle_routing_message(rx_path, msg),
        Err(e) => {
            trace!(path = %rx_path, error = %e, "malformed routing message dropped");
            metrics::frame_dropped("malformed_routing");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(PathId, RoutingMessage)>>>;

    struct Recorder(Seen);

    impl RoutingHandler for Recorder {
        fn handle_routing_message(&mut self, rx_path: PathId, msg: RoutingMessage) -> bool {
            self.0.lock().unwrap().push((rx_path, msg));
            true
        }
    }

    fn dispatcher_with_data_handler() -> (RoutingMessageDispatcher, Seen) {
        let seen: Seen = Arc::default();
        let mut dispatcher = RoutingMessageDispatcher::new();
        dispatcher
            .register(RoutingMessageType::DataTransfer, Box::new(Recorder(seen.clone())))
            .unwrap();
        (dispatcher, seen)
    }

    #[test]
    fn test_second_registration_rejected() {
        let (mut dispatcher, _) = dispatcher_with_data_handler();
        let err = dispatcher
            .register(RoutingMessageType::DataTransfer, Box::new(Recorder(Arc::default())))
            .unwrap_err();
        assert_eq!(err, DispatchError::AlreadyRegistered(RoutingMessageType::DataTransfer));
        assert!(dispatcher.is_registered(RoutingMessageType::DataTransfer));
        assert!(!dispatcher.is_registered(RoutingMessageType::DataDiscard));
    }

    #[test]
    fn test_parse_and_dispatch() {
        let (mut dispatcher, seen) = dispatcher_with_data_handler();
        let path = PathId::random();
        let msg = RoutingMessage::DataTransfer {
            protocol: 1,
            payload: b"ping".to_vec(),
        };
        assert!(parse_routing_message_buffer(&msg.encode().unwrap(), &mut dispatcher, path));
        assert_eq!(seen.lock().unwrap().as_slice(), &[(path, msg)]);

        // registered nowhere
        let discard = RoutingMessage::DataDiscard { sequence: 3 }.encode().unwrap();
        assert!(!parse_routing_message_buffer(&discard, &mut dispatcher, path));
    }

    #[test]
    fn test_garbage_never_reaches_handler() {
        let (mut dispatcher, seen) = dispatcher_with_data_handler();
        let path = PathId::random();
        assert!(!parse_routing_message_buffer(&[], &mut dispatcher, path));
        assert!(!parse_routing_message_buffer(&[200, 0, 0, 0, 0], &mut dispatcher, path));
        assert!(!parse_routing_message_buffer(&[4, 0, 0, 0, 1, 0], &mut dispatcher, path));
        assert!(seen.lock().unwrap().is_empty());
    }
}
