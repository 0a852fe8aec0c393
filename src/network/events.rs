use crate::events::{
    dispatcher,
    model::{LogEvent, LogLevel, NetworkEvent, ProtocolEvent},
};

/// Emit a structured network event.
pub(crate) fn emit_network_event(
    component: &'static str,
    level: LogLevel,
    action: &str,
    addr: Option<String>,
    detail: Option<String>,
) {
    let mut meta = dispatcher::meta(component, level);
    meta.corr_id = Some(dispatcher::correlation_id());
    dispatcher::emit(LogEvent::Network(NetworkEvent {
        meta,
        action: action.to_string(),
        addr,
        detail,
    }));
}

/// Emit a protocol event describing one message seen on a connection.
pub(crate) fn emit_protocol_event(
    level: LogLevel,
    kind: &str,
    peer: Option<String>,
    code: Option<u64>,
    detail: Option<String>,
) {
    let meta = dispatcher::meta("protocol", level);
    dispatcher::emit(LogEvent::Protocol(ProtocolEvent {
        meta,
        peer,
        code,
        kind: kind.to_string(),
        detail,
    }));
}
