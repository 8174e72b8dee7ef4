//! Structured logging helpers.
//!
//! Every log line emitted through these macros carries a `component` field
//! (`service`, `orchestrator`, `kafka`, `amqp`, `remoting`, ...), so JSON
//! output can be filtered per component by a log shipper.

/// Emit a tracing event tagged with a component.
///
/// ```rust,ignore
/// log_event!(info, "orchestrator", "Subscription started", subscription_id = %id);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::__tracing::info!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::__tracing::warn!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (error, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::__tracing::error!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        $crate::__tracing::debug!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log the outcome of a broker operation with standard fields.
#[macro_export]
macro_rules! log_operation {
    ($component:expr, $operation:expr, $connection_id:expr, $result:expr, $latency_ms:expr) => {
        match &$result {
            Ok(_) => $crate::__tracing::info!(
                component = $component,
                operation = $operation,
                connection_id = %$connection_id,
                latency_ms = $latency_ms,
                "Operation succeeded"
            ),
            Err(e) => $crate::__tracing::warn!(
                component = $component,
                operation = $operation,
                connection_id = %$connection_id,
                latency_ms = $latency_ms,
                error = %e,
                "Operation failed"
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_expand_without_subscriber() {
        let id = "c1";
        crate::log_event!(info, "test", "hello", connection_id = %id);
        crate::log_event!(debug, "test", "plain");
        let result: Result<(), String> = Err("boom".to_string());
        crate::log_operation!("test", "produce", id, result, 3u64);
    }
}
