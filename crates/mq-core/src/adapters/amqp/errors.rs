use lapin::Error as LapinError;
use shared_types::MqError;

const REPLY_SUCCESS: u16 = 200;
const CONNECTION_FORCED: u16 = 320;
const ACCESS_REFUSED: u16 = 403;
const NOT_FOUND: u16 = 404;
const PRECONDITION_FAILED: u16 = 406;

/// Reply code carried by a protocol error.
fn reply_code(err: &LapinError) -> Option<u16> {
    match err {
        LapinError::ProtocolError(amqp) => Some(amqp.get_id()),
        _ => None,
    }
}

/// Broker-initiated close that should end a consume loop silently.
pub(crate) fn is_normal_close(err: &LapinError) -> bool {
    match err {
        LapinError::InvalidChannelState(_) | LapinError::InvalidConnectionState(_) => true,
        _ => matches!(reply_code(err), Some(REPLY_SUCCESS | CONNECTION_FORCED)),
    }
}

pub(crate) fn map_amqp_error(context: &str, err: &LapinError) -> MqError {
    let details = err.to_string();
    let mapped = match reply_code(err) {
        Some(ACCESS_REFUSED) => MqError::auth(context),
        Some(NOT_FOUND) => MqError::not_found(context),
        Some(PRECONDITION_FAILED) => MqError::validation(context),
        Some(REPLY_SUCCESS | CONNECTION_FORCED) => MqError::connection(context).peer_closed(),
        Some(_) => MqError::connection(context),
        None => match err {
            LapinError::MissingHeartbeatError => MqError::network(context),
            LapinError::InvalidChannelState(_) | LapinError::InvalidConnectionState(_) => {
                MqError::connection(context).peer_closed()
            }
            _ => MqError::connection(context),
        },
    };
    mapped.with_details(details)
}
