use std::env;
use std::path::PathBuf;

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,
    pub xendit_base_url: String,
    pub xendit_secret_api_key: String,
    pub xendit_webhook_token: String,
    pub user_service_url: String,
    /// When set, order-created events only queue a payment request and the
    /// scheduler creates the invoice later.
    pub disable_create_invoice_directly: bool,
    pub order_created_subject: String,
    pub payment_success_subject: String,
    pub invoice_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL").ok_or("DATABASE_URL must be set")?;

        let bus_type = var_or("BUS_TYPE", "inmemory").to_lowercase();
        if bus_type != "inmemory" && bus_type != "nats" {
            return Err(format!(
                "Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'",
                bus_type
            ));
        }

        let nats_url = var_or("NATS_URL", "nats://localhost:4222");
        let host = var_or("HOST", "0.0.0.0");

        let port: u16 = var_or("PORT", "8089")
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let xendit_base_url = var_or("XENDIT_BASE_URL", "https://api.xendit.co");
        let xendit_secret_api_key =
            lookup("XENDIT_SECRET_API_KEY").ok_or("XENDIT_SECRET_API_KEY must be set")?;
        let xendit_webhook_token = lookup("XENDIT_WEBHOOK_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or("XENDIT_WEBHOOK_TOKEN must be set")?;

        let user_service_url = var_or("USER_SERVICE_URL", "http://localhost:8081");

        let disable_create_invoice_directly =
            parse_bool(&var_or("DISABLE_CREATE_INVOICE_DIRECTLY", "false")).ok_or(
                "DISABLE_CREATE_INVOICE_DIRECTLY must be true or false".to_string(),
            )?;

        let order_created_subject = var_or("ORDER_CREATED_SUBJECT", "order.created");
        let payment_success_subject = var_or("PAYMENT_SUCCESS_SUBJECT", "payment.success");
        let invoice_dir = PathBuf::from(var_or("INVOICE_DIR", "/invoices"));

        Ok(Config {
            database_url,
            bus_type,
            nats_url,
            host,
            port,
            xendit_base_url,
            xendit_secret_api_key,
            xendit_webhook_token,
            user_service_url,
            disable_create_invoice_directly,
            order_created_subject,
            payment_success_subject,
            invoice_dir,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/payments"),
        ("XENDIT_SECRET_API_KEY", "xnd_development_key"),
        ("XENDIT_WEBHOOK_TOKEN", "callback-token"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup_from(&REQUIRED)).unwrap();

        assert_eq!(config.bus_type, "inmemory");
        assert_eq!(config.port, 8089);
        assert_eq!(config.xendit_base_url, "https://api.xendit.co");
        assert!(!config.disable_create_invoice_directly);
        assert_eq!(config.order_created_subject, "order.created");
        assert_eq!(config.payment_success_subject, "payment.success");
        assert_eq!(config.invoice_dir, PathBuf::from("/invoices"));
    }

    #[test]
    fn missing_webhook_token_is_rejected() {
        let err = Config::from_lookup(lookup_from(&REQUIRED[..2])).unwrap_err();
        assert!(err.contains("XENDIT_WEBHOOK_TOKEN"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("BUS_TYPE", "NATS"),
            ("PORT", "9000"),
            ("DISABLE_CREATE_INVOICE_DIRECTLY", "true"),
            ("INVOICE_DIR", "/tmp/invoices"),
        ]);
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();

        assert_eq!(config.bus_type, "nats");
        assert_eq!(config.port, 9000);
        assert!(config.disable_create_invoice_directly);
        assert_eq!(config.invoice_dir, PathBuf::from("/tmp/invoices"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "not-a-port"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("BUS_TYPE", "kafka"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("DISABLE_CREATE_INVOICE_DIRECTLY", "maybe"));
        assert!(Config::from_lookup(lookup_from(&pairs)).is_err());
    }
}
