use crate::trusted::domain::request::TrustedBroadcastRequest;

/// Whether `request` may be broadcast at `current_height`.
pub fn eligible(request: &TrustedBroadcastRequest, current_height: u32) -> bool {
    current_height >= request.min_broadcast_height
}
