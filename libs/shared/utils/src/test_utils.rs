use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{ClinicStore, InMemoryStore};
use shared_models::auth::User;
use shared_models::scheduling::{DayOfWeek, Doctor, ScheduleEntry};

use crate::clock::ManualClock;
use crate::context::AppContext;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub qpay_base_url: String,
    pub qpay_timeout_secs: u64,
    pub booking_fee: i64,
    pub payment_expiry_minutes: i64,
    pub environment: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_service_key: "test-service-key".to_string(),
            qpay_base_url: "http://localhost:54322/v2".to_string(),
            qpay_timeout_secs: 30,
            booking_fee: 25_000,
            payment_expiry_minutes: 15,
            environment: "test".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_qpay_url(mut self, url: &str) -> Self {
        self.qpay_base_url = url.to_string();
        self
    }

    pub fn with_qpay_timeout(mut self, secs: u64) -> Self {
        self.qpay_timeout_secs = secs;
        self
    }

    pub fn production(mut self) -> Self {
        self.environment = "production".to_string();
        self
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_service_key: self.supabase_service_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            qpay_base_url: self.qpay_base_url.clone(),
            qpay_username: "test_merchant".to_string(),
            qpay_password: "test_password".to_string(),
            qpay_invoice_code: "TEST_INVOICE".to_string(),
            qpay_callback_url: "https://api.clinic.test/api/payments/callback".to_string(),
            qpay_timeout_secs: self.qpay_timeout_secs,
            booking_fee: self.booking_fee,
            payment_expiry_minutes: self.payment_expiry_minutes,
            clinic_utc_offset_hours: 8,
            port: 0,
            environment: self.environment.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "authenticated".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        Self::create_token_with_claims(
            json!({
                "sub": user.id,
                "email": user.email,
                "role": "authenticated",
                "app_metadata": { "role": user.role },
                "aud": "authenticated",
                "iat": now.timestamp(),
                "exp": exp.timestamp()
            }),
            secret,
        )
    }

    pub fn create_token_with_claims(claims: serde_json::Value, secret: &str) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("HS256 encoding cannot fail for JSON claims")
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// A seeded in-memory clinic whose clock reads Monday 2030-01-07 08:00
/// clinic time. The default doctor works Mondays 09:00-12:00 in 30 minute
/// slots.
pub struct TestClinic {
    pub config: Arc<AppConfig>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub doctor: Doctor,
}

impl TestClinic {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(config: TestConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Self::start_instant()));

        let clinic = Self {
            config: config.to_arc(),
            store,
            clock,
            doctor: Doctor {
                id: Uuid::new_v4(),
                name: "Dr. Oyun".to_string(),
                specialization: Some("Dentistry".to_string()),
                is_active: true,
            },
        };

        clinic.store.insert_doctor(clinic.doctor.clone()).await;
        clinic
            .add_schedule(clinic.doctor.id, DayOfWeek::Monday, "09:00", "12:00", 30)
            .await;
        clinic
    }

    /// 2030-01-07 00:00 UTC, 08:00 at UTC+8.
    pub fn start_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 7, 0, 0, 0)
            .single()
            .expect("fixed test instant is valid")
    }

    pub fn context(&self) -> Arc<AppContext> {
        Arc::new(AppContext::with_clock(
            self.config.clone(),
            self.store.clone() as Arc<dyn ClinicStore>,
            self.clock.clone(),
        ))
    }

    pub async fn add_doctor(&self, name: &str, is_active: bool) -> Doctor {
        let doctor = Doctor {
            id: Uuid::new_v4(),
            name: name.to_string(),
            specialization: None,
            is_active,
        };
        self.store.insert_doctor(doctor.clone()).await;
        doctor
    }

    pub async fn add_schedule(&self, doctor_id: Uuid, day: DayOfWeek, start: &str, end: &str, slot_duration: i32) {
        let entry = ScheduleEntry {
            day_of_week: day,
            start_time: time(start),
            end_time: time(end),
            slot_duration,
        };
        self.store
            .upsert_schedule(doctor_id, &entry)
            .await
            .expect("in-memory schedule upsert");
    }

    /// Clinic-local date of the test clock.
    pub fn today(&self) -> NaiveDate {
        self.context().today()
    }

    pub fn next_monday(&self) -> NaiveDate {
        self.today() + Duration::days(7)
    }

    pub fn next_sunday(&self) -> NaiveDate {
        self.today() + Duration::days(6)
    }
}

pub fn time(raw: &str) -> NaiveTime {
    shared_models::time::parse_time_of_day(raw).expect("test time must be HH:MM")
}
