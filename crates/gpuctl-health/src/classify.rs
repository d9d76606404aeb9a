use gpuctl_proto::HealthCheckErrorKind;

/// Maps a non-2xx/3xx HTTP status into the spec §4.5.1 error taxonomy.
pub fn classify_status(status: u16) -> HealthCheckErrorKind {
    match status {
        502 => HealthCheckErrorKind::BadGateway,
        503 => HealthCheckErrorKind::ServiceUnavailable,
        500..=599 => HealthCheckErrorKind::ServerError,
        400..=499 => HealthCheckErrorKind::ClientError,
        _ => HealthCheckErrorKind::Unknown,
    }
}

/// Maps a transport-level failure into the same taxonomy.
pub fn classify_reqwest_error(err: &reqwest::Error) -> HealthCheckErrorKind {
    if err.is_timeout() {
        return HealthCheckErrorKind::Timeout;
    }
    if err.is_connect() {
        let message = err.to_string().to_lowercase();
        if message.contains("dns") || message.contains("resolve") || message.contains("lookup") {
            return HealthCheckErrorKind::DnsResolutionFailed;
        }
        if message.contains("refused") {
            return HealthCheckErrorKind::ConnectionRefused;
        }
        if message.contains("reset") {
            return HealthCheckErrorKind::ConnectionReset;
        }
        if message.contains("unreachable") {
            return HealthCheckErrorKind::NetworkUnreachable;
        }
        return HealthCheckErrorKind::ConnectionRefused;
    }
    if err.is_decode() || err.is_body() {
        return HealthCheckErrorKind::InvalidResponse;
    }
    let message = err.to_string().to_lowercase();
    if message.contains("ssl") || message.contains("tls") || message.contains("certificate") {
        return HealthCheckErrorKind::SslError;
    }
    if message.contains("reset") {
        return HealthCheckErrorKind::ConnectionReset;
    }
    if message.contains("unreachable") {
        return HealthCheckErrorKind::NetworkUnreachable;
    }
    HealthCheckErrorKind::Unknown
}
