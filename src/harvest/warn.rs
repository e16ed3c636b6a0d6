fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if !ch.is_control() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn format_line(code: &str, stage: &str, tick: &str, incident: &str, reason: &str, err: &str) -> String {
    format!(
        "HARVEST_WARN code={} stage={} tick={} incident={} reason={} err={}",
        sanitize_value(code),
        sanitize_value(stage),
        sanitize_value(tick),
        sanitize_value(incident),
        sanitize_value(reason),
        sanitize_value(err),
    )
}

/// One greppable stderr line per skipped tick or degraded message.
pub fn emit(code: &str, stage: &str, tick: &str, incident: &str, reason: &str, err: &str) {
    eprintln!("{}", format_line(code, stage, tick, incident, reason, err));
}
