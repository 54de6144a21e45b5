//! Amounts are integer minor currency units (cents) everywhere; no floats.

/// `unit_price × quantity`, saturating rather than wrapping on overflow.
pub fn line_total(unit_price: i64, quantity: u32) -> i64 {
    unit_price.saturating_mul(i64::from(quantity))
}

/// Render minor units as a decimal string, e.g. `4000` → `"40.00"`.
pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        assert_eq!(line_total(1000, 2), 2000);
        assert_eq!(line_total(i64::MAX, 2), i64::MAX);
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(4000), "40.00");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(-1250), "-12.50");
    }
}
