/// Path of the presign endpoint, relative to the control-plane base URL.
pub const PRESIGN_PATH: &str = "/uploads/presign";

/// Path of the finalize endpoint, relative to the control-plane base URL.
pub const FINALIZE_PATH: &str = "/uploads/finalize";

/// Content type sent with every raw part PUT.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Mime type announced for recorded inspection videos.
pub const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// Body-level status value the control plane uses for success.
pub const STATUS_SUCCESS: &str = "success";

/// Returns `true` if a body-level status string denotes success.
///
/// Accepts `"success"` and `"ok"` case-insensitively.
pub fn is_success_status(status: &str) -> bool {
    status.eq_ignore_ascii_case(STATUS_SUCCESS) || status.eq_ignore_ascii_case("ok")
}
