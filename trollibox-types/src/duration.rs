//! Track length formatting.

/// Format seconds as `mm:ss`, or `hh:mm:ss` once there are hours.
pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds / 60) % 60;
    let secs = seconds % 60;
    if hours == 0 {
        format!("{:02}:{:02}", minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    }
}

/// Parse user input of the form `ss`, `mm:ss` or `hh:mm:ss` into seconds.
///
/// Every component after the first must be below 60.
pub fn parse_duration(input: &str) -> Result<u32, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty time".to_string());
    }
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() > 3 {
        return Err(format!("too many components in {:?}", input));
    }

    let mut total: u32 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value: u32 = part
            .trim()
            .parse()
            .map_err(|_| format!("{:?} is not a number", part))?;
        if i > 0 && value >= 60 {
            return Err(format!("{} is out of range in {:?}", value, input));
        }
        total = total
            .checked_mul(60)
            .and_then(|t| t.checked_add(value))
            .ok_or_else(|| format!("{:?} is too long", input))?;
    }
    Ok(total)
}
