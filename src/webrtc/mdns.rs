use webrtc::ice::mdns::MulticastDnsMode;

/// Environment variable selecting the mDNS candidate mode
pub const MDNS_MODE_ENV: &str = "WHEP_CLIENT_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode() -> MulticastDnsMode {
    // Playback clients usually sit behind a relay; .local host candidates only add noise
    std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
        .unwrap_or(MulticastDnsMode::Disabled)
}

pub fn mdns_host_name(session_id: &str) -> String {
    format!("whep-{session_id}.local")
}
