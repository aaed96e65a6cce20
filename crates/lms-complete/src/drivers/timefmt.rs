//! Session-time encoders and their decoders.

/// SCORM 1.2 `CMITimespan`: `HHHH:MM:SS`. Hours widen past four digits
/// rather than saturating, so every value decodes back exactly.
pub fn scorm12_time(seconds: u64) -> String {
    let (h, m, s) = split(seconds);
    format!("{h:04}:{m:02}:{s:02}")
}

/// Parse `H+:MM:SS[.ss]`, truncating fractional seconds. Totals that do
/// not fit in a `u64` are rejected.
pub fn parse_scorm12_time(text: &str) -> Option<u64> {
    let mut parts = text.trim().split(':');
    let h: u64 = parts.next()?.parse().ok()?;
    let m: u64 = parts.next()?.parse().ok()?;
    let s_part = parts.next()?;
    if parts.next().is_some() || m >= 60 {
        return None;
    }
    let s: u64 = s_part.split('.').next()?.parse().ok()?;
    if s >= 60 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

/// AICC `Time`: `HH:MM:SS`.
pub fn aicc_time(seconds: u64) -> String {
    let (h, m, s) = split(seconds);
    format!("{h:02}:{m:02}:{s:02}")
}

/// ISO-8601 duration, always in `PT#H#M#S` form.
pub fn iso_duration(seconds: u64) -> String {
    let (h, m, s) = split(seconds);
    format!("PT{h}H{m}M{s}S")
}

/// Parse an ISO-8601 duration (`P1DT2H`, `PT90S`, `PT1.5S`); years and
/// months are rejected since their length is ambiguous.
pub fn parse_iso_duration(text: &str) -> Option<u64> {
    let rest = text.trim().strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut total = 0u64;
    for (value, unit) in components(date)? {
        let seconds = match unit {
            'W' => value.checked_mul(7 * 86_400)?,
            'D' => value.checked_mul(86_400)?,
            _ => return None,
        };
        total = total.checked_add(seconds)?;
    }
    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        for (value, unit) in components(time)? {
            let seconds = match unit {
                'H' => value.checked_mul(3600)?,
                'M' => value.checked_mul(60)?,
                'S' => value,
                _ => return None,
            };
            total = total.checked_add(seconds)?;
        }
    }
    Some(total)
}

fn components(text: &str) -> Option<Vec<(u64, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
        } else {
            let whole = number.split('.').next()?;
            out.push((whole.parse().ok()?, ch));
            number.clear();
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(out)
}

fn split(seconds: u64) -> (u64, u64, u64) {
    (seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}
