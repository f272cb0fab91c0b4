//! Symbol normalization and exchange-suffix conventions.
//!
//! The quote provider keys instruments by uppercase ticker, with a dotted
//! suffix for non-US exchanges (e.g. "EQNR.OL", "VOD.L"). The suffix also
//! determines the quote currency.

/// Normalize a user-supplied symbol to provider form: trimmed, uppercased,
/// suffix preserved.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Derive the ISO currency code from a symbol's exchange suffix.
///
/// Unknown or absent suffixes default to USD, matching the provider's
/// treatment of US-listed instruments.
pub fn currency_for_symbol(symbol: &str) -> &'static str {
    let suffix = match symbol.rsplit_once('.') {
        Some((_, suffix)) => suffix,
        None => return "USD",
    };

    match suffix {
        "L" => "GBP",
        "DE" | "F" | "PA" | "AS" | "MC" | "MI" | "BR" => "EUR",
        "OL" => "NOK",
        "ST" => "SEK",
        "CO" => "DKK",
        "SW" => "CHF",
        "TO" | "V" => "CAD",
        "T" => "JPY",
        "HK" => "HKD",
        "AX" => "AUD",
        _ => "USD",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize_symbol(" aapl "), "AAPL");
        assert_eq!(normalize_symbol("eqnr.ol"), "EQNR.OL");
        assert_eq!(normalize_symbol("BRK.B"), "BRK.B");
    }

    #[test]
    fn currency_from_suffix() {
        assert_eq!(currency_for_symbol("AAPL"), "USD");
        assert_eq!(currency_for_symbol("VOD.L"), "GBP");
        assert_eq!(currency_for_symbol("EQNR.OL"), "NOK");
        assert_eq!(currency_for_symbol("SAP.DE"), "EUR");
        assert_eq!(currency_for_symbol("7203.T"), "JPY");
        assert_eq!(currency_for_symbol("RY.TO"), "CAD");
        // Unrecognized suffixes fall back to USD rather than failing.
        assert_eq!(currency_for_symbol("BRK.B"), "USD");
    }
}
