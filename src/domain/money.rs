use thiserror::Error;

/// Prices are stored as integer cents, so 12.50 is 1250.
pub type Cents = i64;

/// Render cents as a decimal amount.
/// Example: 1250 -> "12.50", -5 -> "-0.05"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCentsError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount '{0}', expected something like 12.50")]
    InvalidFormat(String),

    #[error("amount '{0}' is too large")]
    Overflow(String),
}

/// Parse a decimal amount into cents. Digits past the second decimal
/// place are truncated.
/// Example: "12.5" -> 1250, "7" -> 700, ".99" -> 99, "3.999" -> 399
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseCentsError::Empty);
    }

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let invalid = || ParseCentsError::InvalidFormat(trimmed.to_string());

    let (units_str, fraction_str) = match digits.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (digits, ""),
    };
    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(invalid());
    }
    if !units_str.chars().all(|c| c.is_ascii_digit())
        || !fraction_str.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str
            .parse()
            .map_err(|_| ParseCentsError::Overflow(trimmed.to_string()))?
    };

    let fraction: i64 = match fraction_str.len() {
        0 => 0,
        1 => fraction_str.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => fraction_str[..2].parse().map_err(|_| invalid())?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or_else(|| ParseCentsError::Overflow(trimmed.to_string()))?;

    Ok(if negative { -cents } else { cents })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(1250), "12.50");
        assert_eq!(format_cents(7), "0.07");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-5), "-0.05");
        assert_eq!(format_cents(-123456), "-1234.56");
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("12.50"), Ok(1250));
        assert_eq!(parse_cents("12.5"), Ok(1250));
        assert_eq!(parse_cents("7"), Ok(700));
        assert_eq!(parse_cents(".99"), Ok(99));
        assert_eq!(parse_cents("3."), Ok(300));
        assert_eq!(parse_cents(" 3.999 "), Ok(399));
        assert_eq!(parse_cents("-4.20"), Ok(-420));
    }

    #[test]
    fn test_parse_cents_rejects_garbage() {
        assert_eq!(parse_cents(""), Err(ParseCentsError::Empty));
        assert!(matches!(parse_cents("."), Err(ParseCentsError::InvalidFormat(_))));
        assert!(matches!(parse_cents("1.2.3"), Err(ParseCentsError::InvalidFormat(_))));
        assert!(matches!(parse_cents("12,50"), Err(ParseCentsError::InvalidFormat(_))));
        assert!(matches!(parse_cents("+5"), Err(ParseCentsError::InvalidFormat(_))));
        assert!(matches!(
            parse_cents("99999999999999999999"),
            Err(ParseCentsError::Overflow(_))
        ));
    }
}
