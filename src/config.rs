use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    /// Appended to bare usernames at login (`maria` -> `maria@<domain>`).
    pub login_email_domain: String,
    pub clinic_name: String,
    /// Offset of the clinic's wall clock from UTC, used for "today" and "now".
    pub clinic_utc_offset_minutes: i32,
    pub storage_dir: String,
    pub public_base_url: String,
    pub max_attachment_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);

        let login_email_domain = env::var("LOGIN_EMAIL_DOMAIN")
            .map(|d| d.trim().trim_start_matches('@').to_lowercase())
            .unwrap_or_else(|_| "clinic.local".to_string());
        let clinic_name = env::var("CLINIC_NAME").unwrap_or_else(|_| "Clinic".to_string());

        let clinic_utc_offset_minutes = env::var("CLINIC_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(-180);
        if clinic_utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("CLINIC_UTC_OFFSET_MINUTES must be within +/- 1439");
        }

        let storage_dir =
            env::var("STORAGE_DIR").unwrap_or_else(|_| "./storage/attachments".to_string());
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{bind_addr}"))
            .trim_end_matches('/')
            .to_string();
        let max_attachment_bytes = env::var("MAX_ATTACHMENT_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(10 * 1024 * 1024);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            login_email_domain,
            clinic_name,
            clinic_utc_offset_minutes,
            storage_dir,
            public_base_url,
            max_attachment_bytes,
        })
    }
}
