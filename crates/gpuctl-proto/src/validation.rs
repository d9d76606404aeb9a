//! Input validation shared by the instance service (spec §4.1 boundary
//! cases, §8).

/// `gpuNum` must be in `[1, 8]` (spec §8).
pub fn validate_gpu_num(gpu_num: u8) -> Result<(), String> {
    if (1..=8).contains(&gpu_num) {
        Ok(())
    } else {
        Err(format!("gpuNum must be between 1 and 8, got {gpu_num}"))
    }
}

/// `rootfsSize` must be in `[10, 1000]` (spec §8).
pub fn validate_rootfs_size(rootfs_size: u32) -> Result<(), String> {
    if (10..=1000).contains(&rootfs_size) {
        Ok(())
    } else {
        Err(format!("rootfsSize must be between 10 and 1000, got {rootfs_size}"))
    }
}

/// `webhookUrl` must be absent, or `http`/`https` scheme (spec §8: rejects
/// `ftp://...` and `javascript:...`).
pub fn validate_webhook_url(url: Option<&str>) -> Result<(), String> {
    match url {
        None => Ok(()),
        Some(url) => {
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err(format!("webhookUrl must use http or https scheme, got {url}"))
            }
        }
    }
}

pub fn validate_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must be non-empty"))
    } else {
        Ok(())
    }
}

/// Each template port must be in `[1, 65535]` (spec §4.4).
pub fn validate_port(port: u32) -> Result<(), String> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(format!("port must be between 1 and 65535, got {port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_num_boundary_cases() {
        assert!(validate_gpu_num(0).is_err());
        assert!(validate_gpu_num(1).is_ok());
        assert!(validate_gpu_num(8).is_ok());
        assert!(validate_gpu_num(9).is_err());
    }

    #[test]
    fn rootfs_size_boundary_cases() {
        assert!(validate_rootfs_size(5).is_err());
        assert!(validate_rootfs_size(10).is_ok());
        assert!(validate_rootfs_size(1000).is_ok());
        assert!(validate_rootfs_size(1001).is_err());
    }

    #[test]
    fn webhook_url_scheme_enforcement() {
        assert!(validate_webhook_url(None).is_ok());
        assert!(validate_webhook_url(Some("https://example.com/hook")).is_ok());
        assert!(validate_webhook_url(Some("http://example.com/hook")).is_ok());
        assert!(validate_webhook_url(Some("ftp://example.com/hook")).is_err());
        assert!(validate_webhook_url(Some("javascript:alert(1)")).is_err());
    }

    #[test]
    fn port_boundary_cases() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(1).is_ok());
        assert!(validate_port(65535).is_ok());
        assert!(validate_port(65536).is_err());
    }
}
