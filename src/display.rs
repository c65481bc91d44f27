use clap::ValueEnum;

use crate::accounting::LedgerError;
use crate::models::Wei;

const ETHER_DECIMALS: u32 = 18;
const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Currency {
    #[default]
    Eth,
    Usd,
    Eur,
    Pln,
}

impl Currency {
    /// Fixed conversion rate from one ether.
    pub fn rate(self) -> Wei {
        match self {
            Currency::Eth => 1,
            Currency::Usd => 2469,
            Currency::Eur => 2218,
            Currency::Pln => 9588,
        }
    }

    pub fn decimals(self) -> u32 {
        match self {
            Currency::Eth => 5,
            Currency::Usd | Currency::Eur | Currency::Pln => 2,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Eth => "ETH",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Pln => "PLN",
        }
    }
}

/// Exact ether value of `wei`, trailing zeros trimmed.
pub fn format_ether(wei: Wei) -> String {
    let sign = if wei < 0 { "-" } else { "" };
    let abs = wei.unsigned_abs();
    let fraction = format!("{:018}", abs % WEI_PER_ETHER);
    let fraction = fraction.trim_end_matches('0');
    let fraction = if fraction.is_empty() { "0" } else { fraction };
    format!("{}{}.{}", sign, abs / WEI_PER_ETHER, fraction)
}

/// Ether value of `wei` rounded half away from zero to `decimals` places.
pub fn format_fixed(wei: Wei, decimals: u32) -> String {
    if decimals >= ETHER_DECIMALS {
        return format_ether(wei);
    }

    let scale = 10u128.pow(ETHER_DECIMALS - decimals);
    let abs = wei.unsigned_abs();
    let mut units = abs / scale;
    if (abs % scale) * 2 >= scale {
        units += 1;
    }

    let sign = if wei < 0 && units != 0 { "-" } else { "" };
    if decimals == 0 {
        return format!("{}{}", sign, units);
    }
    let divisor = 10u128.pow(decimals);
    format!(
        "{}{}.{:0width$}",
        sign,
        units / divisor,
        units % divisor,
        width = decimals as usize
    )
}

pub fn format_amount(wei: Wei, currency: Currency) -> Result<String, LedgerError> {
    let converted = wei
        .checked_mul(currency.rate())
        .ok_or(LedgerError::TotalOverflow("currency conversion"))?;
    Ok(format_fixed(converted, currency.decimals()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHER: Wei = 1_000_000_000_000_000_000;

    #[test]
    fn ether_keeps_full_precision() {
        assert_eq!(format_ether(0), "0.0");
        assert_eq!(format_ether(ETHER), "1.0");
        assert_eq!(format_ether(1), "0.000000000000000001");
        assert_eq!(format_ether(-ETHER / 2), "-0.5");
        assert_eq!(format_ether(12 * ETHER + 345), "12.000000000000000345");
    }

    #[test]
    fn fixed_rounds_half_away_from_zero() {
        assert_eq!(format_fixed(1_234_565_000_000_000_000, 5), "1.23457");
        assert_eq!(format_fixed(1_234_564_999_999_999_999, 5), "1.23456");
        assert_eq!(format_fixed(-1_234_565_000_000_000_000, 5), "-1.23457");
        assert_eq!(format_fixed(ETHER, 2), "1.00");
        assert_eq!(format_fixed(ETHER / 2, 0), "1");
    }

    #[test]
    fn tiny_negative_amount_rounds_to_plain_zero() {
        assert_eq!(format_fixed(-1, 5), "0.00000");
    }

    #[test]
    fn eighteen_decimals_is_exact_ether() {
        assert_eq!(format_fixed(ETHER + 1, 18), "1.000000000000000001");
    }

    #[test]
    fn currencies_convert_with_fixed_rates() {
        assert_eq!(format_amount(ETHER, Currency::Eth).unwrap(), "1.00000");
        assert_eq!(format_amount(ETHER, Currency::Usd).unwrap(), "2469.00");
        assert_eq!(format_amount(ETHER / 4, Currency::Eur).unwrap(), "554.50");
        assert_eq!(format_amount(-ETHER, Currency::Pln).unwrap(), "-9588.00");
    }

    #[test]
    fn conversion_overflow_is_an_error() {
        assert!(format_amount(Wei::MAX, Currency::Usd).is_err());
    }
}
