use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub supabase_jwt_secret: String,
    pub qpay_base_url: String,
    pub qpay_username: String,
    pub qpay_password: String,
    pub qpay_invoice_code: String,
    pub qpay_callback_url: String,
    pub qpay_timeout_secs: u64,
    pub booking_fee: i64,
    pub payment_expiry_minutes: i64,
    pub clinic_utc_offset_hours: i32,
    pub port: u16,
    pub environment: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: string_var("SUPABASE_URL", ""),
            supabase_service_key: string_var("SUPABASE_SERVICE_ROLE_KEY", ""),
            supabase_jwt_secret: string_var("SUPABASE_JWT_SECRET", ""),
            qpay_base_url: string_var("QPAY_API_URL", "https://merchant.qpay.mn/v2"),
            qpay_username: string_var("QPAY_USERNAME", ""),
            qpay_password: string_var("QPAY_PASSWORD", ""),
            qpay_invoice_code: string_var("QPAY_INVOICE_CODE", ""),
            qpay_callback_url: string_var("QPAY_CALLBACK_URL", ""),
            qpay_timeout_secs: parsed_var("QPAY_TIMEOUT_SECS", 30),
            booking_fee: parsed_var("BOOKING_FEE", 25_000),
            payment_expiry_minutes: parsed_var("PAYMENT_EXPIRY_MINUTES", 15),
            clinic_utc_offset_hours: parsed_var("CLINIC_UTC_OFFSET_HOURS", 8),
            port: parsed_var("PORT", 4000),
            environment: string_var("APP_ENV", "development"),
        };

        if !config.is_configured() {
            warn!("Supabase not configured - bookings will be kept in memory only");
        }

        if !config.is_payment_provider_configured() {
            warn!("QPay credentials not configured - invoice creation will fail");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_service_key.is_empty()
    }

    pub fn is_payment_provider_configured(&self) -> bool {
        !self.qpay_username.is_empty()
            && !self.qpay_password.is_empty()
            && !self.qpay_invoice_code.is_empty()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn string_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        if default.is_empty() {
            warn!("{} not set, using empty value", key);
        } else {
            warn!("{} not set, using default", key);
        }
        default.to_string()
    })
}

fn parsed_var<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
