use jiff::Timestamp;

/// Format a server ISO-8601 timestamp into a short relative label like
/// "2d ago", "3h ago", "15m ago", or "just now".
pub fn relative_label(created: &str) -> String {
    let Ok(ts) = created.parse::<Timestamp>() else {
        return "unknown".to_string();
    };
    let now = Timestamp::now().as_second();
    let then = ts.as_second();

    if now <= then {
        return "just now".to_string();
    }

    let delta = now - then;
    let days = delta / 86_400;
    if days > 0 {
        return format!("{}d ago", days);
    }

    let hours = delta / 3_600;
    if hours > 0 {
        return format!("{}h ago", hours);
    }

    let minutes = delta / 60;
    if minutes > 0 {
        return format!("{}m ago", minutes);
    }

    "just now".to_string()
}
