use std::env;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Currency stamped on journal entries (ISO 4217)
    pub currency: String,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;

        let currency = env::var("SETTLEMENT_CURRENCY").unwrap_or_else(|_| "USD".to_string());
        if !is_valid_currency(&currency) {
            return Err(format!(
                "SETTLEMENT_CURRENCY must be a 3-letter uppercase code, got '{}'",
                currency
            ));
        }

        let run_migrations = match env::var("SETTLEMENT_RUN_MIGRATIONS") {
            Ok(v) => parse_bool(&v)
                .ok_or_else(|| format!("SETTLEMENT_RUN_MIGRATIONS must be true/false, got '{}'", v))?,
            Err(_) => true,
        };

        Ok(Config {
            database_url,
            currency,
            run_migrations,
        })
    }
}

/// Check if currency code is valid (3 uppercase letters)
pub fn is_valid_currency(currency: &str) -> bool {
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_shape() {
        assert!(is_valid_currency("USD"));
        assert!(!is_valid_currency("usd"));
        assert!(!is_valid_currency("US"));
        assert!(!is_valid_currency("EURO"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
